//! Windows Prefetch (`.pf`) parsing for versions 17 (XP) through 31 (Windows 11).

use crate::datetime::filetime_to_datetime;
use crate::error::{Error, Result};
use crate::text::{le_u32, le_u64, utf16le_to_string};
use crate::xpress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SIGNATURE: &[u8; 4] = b"SCCA";
const COMPRESSED_SIGNATURE: &[u8; 4] = b"MAM\x04";
const NAME_OFFSET: usize = 16;
const NAME_LENGTH: usize = 60;
const LAST_RUN_OFFSET_VISTA: usize = 128;

/// Where run information lives for a given format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PrefetchLayout {
    /// Version 17: one last-run time at 120, run count at 144
    Xp,
    /// Versions 23 to 31: up to eight last-run times from 128
    Vista {
        last_runs: usize,
        run_count_offset: usize,
    },
}

impl PrefetchLayout {
    pub fn for_version(version: u32, header: &[u8]) -> Option<Self> {
        let layout = match version {
            17 => PrefetchLayout::Xp,
            23 => PrefetchLayout::Vista {
                last_runs: 1,
                run_count_offset: 152,
            },
            26 => PrefetchLayout::Vista {
                last_runs: 8,
                run_count_offset: 208,
            },
            30 | 31 => {
                // the shorter file-information variant starts its metrics at 0x128
                let run_count_offset = if le_u32(header, 84) == Some(0x128) { 200 } else { 208 };
                PrefetchLayout::Vista {
                    last_runs: 8,
                    run_count_offset,
                }
            }
            _ => return None,
        };
        Some(layout)
    }

    fn last_run_offset(&self) -> usize {
        match self {
            PrefetchLayout::Xp => 120,
            PrefetchLayout::Vista { .. } => LAST_RUN_OFFSET_VISTA,
        }
    }

    fn last_run_slots(&self) -> usize {
        match self {
            PrefetchLayout::Xp => 1,
            PrefetchLayout::Vista { last_runs, .. } => *last_runs,
        }
    }

    fn run_count_offset(&self) -> usize {
        match self {
            PrefetchLayout::Xp => 144,
            PrefetchLayout::Vista {
                run_count_offset, ..
            } => *run_count_offset,
        }
    }
}

pub fn os_family(version: u32) -> &'static str {
    match version {
        17 => "XP/2003",
        23 => "Vista/7",
        26 => "8/8.1",
        30 => "10",
        31 => "11",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchFile {
    pub file_name: String,
    pub path: String,
    pub executable_name: String,
    /// Hash part of the file name, e.g. `4A81B364` for `CMD.EXE-4A81B364.pf`
    pub prefetch_hash: String,
    /// Path hash stored in the header
    pub header_hash: String,
    pub version: u32,
    pub os_family: String,
    pub layout: PrefetchLayout,
    pub compressed: bool,
    pub run_count: u32,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_run_times: Vec<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

pub fn prefetch_hash(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("pf") => stem,
        _ => file_name,
    };
    stem.rsplit_once('-')
        .map(|(_, hash)| hash.to_string())
        .unwrap_or_default()
}

/// Expand a `MAM\x04` container, or borrow the data unchanged
fn decompressed(data: &[u8]) -> Result<Option<Vec<u8>>> {
    if data.get(..4) != Some(&COMPRESSED_SIGNATURE[..]) {
        return Ok(None);
    }
    let size = le_u32(data, 4)
        .ok_or_else(|| Error::Parse("prefetch: truncated compression header".to_string()))?;
    xpress::decompress(&data[8..], size as usize).map(Some)
}

pub fn parse_prefetch(data: &[u8], file_name: &str) -> Result<PrefetchFile> {
    let expanded = decompressed(data)?;
    let compressed = expanded.is_some();
    let data = expanded.as_deref().unwrap_or(data);

    if data.get(4..8) != Some(&SIGNATURE[..]) {
        return Err(Error::Parse(format!("{}: missing SCCA signature", file_name)));
    }
    let version = le_u32(data, 0).unwrap_or(0);
    let layout = PrefetchLayout::for_version(version, data)
        .ok_or_else(|| Error::Parse(format!("{}: unsupported prefetch version {}", file_name, version)))?;

    let mut executable_name = data
        .get(NAME_OFFSET..NAME_OFFSET + NAME_LENGTH)
        .map(utf16le_to_string)
        .unwrap_or_default();
    if executable_name.is_empty() {
        executable_name = file_name
            .rsplit_once('-')
            .map_or(file_name, |(name, _)| name)
            .to_string();
    }

    let run_count = le_u32(data, layout.run_count_offset())
        .ok_or_else(|| Error::Parse(format!("{}: truncated file information", file_name)))?;
    let last_run_times: Vec<DateTime<Utc>> = (0..layout.last_run_slots())
        .filter_map(|i| le_u64(data, layout.last_run_offset() + i * 8))
        .filter_map(filetime_to_datetime)
        .collect();

    Ok(PrefetchFile {
        file_name: file_name.to_string(),
        path: String::new(),
        executable_name,
        prefetch_hash: prefetch_hash(file_name),
        header_hash: le_u32(data, 76).map(|h| format!("{:08X}", h)).unwrap_or_default(),
        version,
        os_family: os_family(version).to_string(),
        layout,
        compressed,
        run_count,
        last_run_time: last_run_times.first().copied(),
        last_run_times,
        created: None,
        modified: None,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    pub const RUN_TIME: u64 = 128_166_372_000_000_000;

    pub fn prefetch(version: u32, executable: &str, run_count: u32, runs: usize) -> Vec<u8> {
        let mut data = vec![0u8; 0x130];
        data[0..4].copy_from_slice(&version.to_le_bytes());
        data[4..8].copy_from_slice(b"SCCA");
        data[12..16].copy_from_slice(&0x130u32.to_le_bytes());
        for (i, unit) in executable.encode_utf16().take(29).enumerate() {
            data[16 + i * 2..18 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        data[76..80].copy_from_slice(&0x4A81_B364u32.to_le_bytes());
        data[84..88].copy_from_slice(&0x130u32.to_le_bytes());
        let (first_run, count_at) = match version {
            17 => (120, 144),
            23 => (128, 152),
            _ => (128, 208),
        };
        for i in 0..runs {
            let at = first_run + i * 8;
            data[at..at + 8].copy_from_slice(&(RUN_TIME - i as u64 * 10_000_000).to_le_bytes());
        }
        data[count_at..count_at + 4].copy_from_slice(&run_count.to_le_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::xpress::testing::{FlatEncoder, Token};

    #[test]
    fn test_xp_layout() {
        let pf = parse_prefetch(&prefetch(17, "CMD.EXE", 12, 1), "CMD.EXE-4A81B364.pf").unwrap();
        assert_eq!(pf.layout, PrefetchLayout::Xp);
        assert_eq!(pf.executable_name, "CMD.EXE");
        assert_eq!(pf.run_count, 12);
        assert_eq!(pf.os_family, "XP/2003");
        assert_eq!(pf.last_run_time, filetime_to_datetime(RUN_TIME));
        assert_eq!(pf.prefetch_hash, "4A81B364");
        assert_eq!(pf.header_hash, "4A81B364");
        assert!(!pf.compressed);
    }

    #[test]
    fn test_vista_and_win8_run_times() {
        let vista = parse_prefetch(&prefetch(23, "NOTEPAD.EXE", 3, 1), "NOTEPAD.EXE-D8414F97.pf").unwrap();
        assert_eq!(vista.run_count, 3);
        assert_eq!(vista.last_run_times.len(), 1);

        let win8 = parse_prefetch(&prefetch(26, "CALC.EXE", 9, 5), "CALC.EXE-AC08706A.pf").unwrap();
        assert_eq!(win8.run_count, 9);
        assert_eq!(win8.last_run_times.len(), 5);
        assert_eq!(win8.last_run_time, filetime_to_datetime(RUN_TIME));
        assert!(win8.last_run_times[0] > win8.last_run_times[4]);
    }

    #[test]
    fn test_win10_metrics_offset_variant() {
        let mut data = prefetch(30, "EXPLORER.EXE", 0, 8);
        data[84..88].copy_from_slice(&0x128u32.to_le_bytes());
        data[200..204].copy_from_slice(&41u32.to_le_bytes());
        let pf = parse_prefetch(&data, "EXPLORER.EXE-A80E4F97.pf").unwrap();
        assert_eq!(
            pf.layout,
            PrefetchLayout::Vista {
                last_runs: 8,
                run_count_offset: 200
            }
        );
        assert_eq!(pf.run_count, 41);
    }

    #[test]
    fn test_compressed_container() {
        let plain = prefetch(30, "SVCHOST.EXE", 77, 2);
        let mut encoder = FlatEncoder::new();
        let tokens: Vec<Token> = plain.iter().map(|&b| Token::Literal(b)).collect();
        encoder.block(&tokens);

        let mut data = b"MAM\x04".to_vec();
        data.extend_from_slice(&(plain.len() as u32).to_le_bytes());
        data.extend(encoder.finish());

        let pf = parse_prefetch(&data, "SVCHOST.EXE-7B0E4F6F.pf").unwrap();
        assert!(pf.compressed);
        assert_eq!(pf.version, 30);
        assert_eq!(pf.run_count, 77);
        assert_eq!(pf.last_run_times.len(), 2);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_prefetch(b"not a prefetch file", "x.pf").is_err());
        let mut data = prefetch(17, "A.EXE", 1, 1);
        data[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(parse_prefetch(&data, "A.EXE-00000000.pf").is_err());
    }

    #[test]
    fn test_name_fallback_and_hash() {
        let pf = parse_prefetch(&prefetch(23, "", 1, 1), "SETUP.EXE-1234ABCD.pf").unwrap();
        assert_eq!(pf.executable_name, "SETUP.EXE");
        assert_eq!(prefetch_hash("NTOSBOOT-B00DFAAD.PF"), "B00DFAAD");
        assert_eq!(prefetch_hash("Layout.ini"), "");
    }
}
