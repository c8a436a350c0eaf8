//! Windows LNK (Shell Link) file parser
//!
//! Shell links record the target's timestamps, size and location at the time
//! the link was created, which makes them useful evidence of file access even
//! after the target is gone.

use crate::datetime::filetime_to_datetime;
use crate::error::{Error, Result};
use crate::text::{ansi_to_string, le_u32, utf16le_z_at};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

const HEADER_SIZE: u32 = 0x4C;
const LINK_CLSID: [u8; 16] = [
    0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];
const TRACKER_SIGNATURE: u32 = 0xA000_0003;

bitflags! {
    pub struct LinkFlags: u32 {
        const HAS_LINK_TARGET_ID_LIST = 0x0000_0001;
        const HAS_LINK_INFO = 0x0000_0002;
        const HAS_NAME = 0x0000_0004;
        const HAS_RELATIVE_PATH = 0x0000_0008;
        const HAS_WORKING_DIR = 0x0000_0010;
        const HAS_ARGUMENTS = 0x0000_0020;
        const HAS_ICON_LOCATION = 0x0000_0040;
        const IS_UNICODE = 0x0000_0080;
    }
}

bitflags! {
    struct LinkInfoFlags: u32 {
        const VOLUME_ID_AND_LOCAL_BASE_PATH = 0x1;
        const COMMON_NETWORK_RELATIVE_LINK_AND_PATH_SUFFIX = 0x2;
    }
}

/// Decoded shell link. Absent strings are empty rather than null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellLink {
    pub target_path: String,
    pub local_base_path: String,
    pub network_path: String,
    pub name: String,
    pub relative_path: String,
    pub working_directory: String,
    pub arguments: String,
    pub icon_location: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub access_time: Option<DateTime<Utc>>,
    pub write_time: Option<DateTime<Utc>>,
    /// Size of the target when the link was last updated
    pub target_size: u32,
    pub file_attributes: u32,
    pub icon_index: i32,
    pub show_command: u32,
    pub link_flags: u32,
    pub drive_type: String,
    pub drive_serial_number: String,
    pub volume_label: String,
    /// NetBIOS name of the machine the target lived on (Tracker block)
    pub machine_id: String,
    /// Flags that promised data the file does not contain
    pub inconsistencies: Vec<String>,
}

#[derive(Debug, Default)]
struct LinkInfo {
    local_base_path: String,
    network_path: String,
    drive_type: String,
    drive_serial_number: String,
    volume_label: String,
}

fn drive_type_name(code: u32) -> &'static str {
    match code {
        1 => "no root directory",
        2 => "removable",
        3 => "fixed",
        4 => "remote",
        5 => "cdrom",
        6 => "ramdisk",
        _ => "unknown",
    }
}

/// NUL-terminated string at `offset` within `block`, ANSI or UTF-16
fn string_in(block: &[u8], offset: usize, unicode: bool) -> Option<String> {
    if offset == 0 || offset >= block.len() {
        return None;
    }
    if unicode {
        utf16le_z_at(block, offset).map(|(s, _)| s)
    } else {
        Some(ansi_to_string(&block[offset..]))
    }
}

impl LinkInfo {
    fn parse(block: &[u8]) -> Result<Self> {
        let field = |offset| le_u32(block, offset).map(|v| v as usize);
        let header_size = field(4).ok_or_else(|| Error::Parse("LinkInfo header truncated".to_string()))?;
        let flags = LinkInfoFlags::from_bits_truncate(field(8).unwrap_or(0) as u32);
        let mut info = LinkInfo::default();

        let unicode_suffix = if header_size >= 0x24 {
            field(32).and_then(|o| string_in(block, o, true))
        } else {
            None
        };
        let suffix = unicode_suffix
            .or_else(|| field(24).and_then(|o| string_in(block, o, false)))
            .unwrap_or_default();

        if flags.contains(LinkInfoFlags::VOLUME_ID_AND_LOCAL_BASE_PATH) {
            let unicode_path = if header_size >= 0x24 {
                field(28).and_then(|o| string_in(block, o, true))
            } else {
                None
            };
            let base = unicode_path
                .or_else(|| field(16).and_then(|o| string_in(block, o, false)))
                .unwrap_or_default();
            info.local_base_path = format!("{}{}", base, suffix);

            if let Some(volume) = field(12).and_then(|o| block.get(o..)) {
                info.drive_type = drive_type_name(le_u32(volume, 4).unwrap_or(0)).to_string();
                info.drive_serial_number = le_u32(volume, 8)
                    .map(|s| format!("{:08X}", s))
                    .unwrap_or_default();
                let label = match le_u32(volume, 12) {
                    Some(0x14) => le_u32(volume, 16).and_then(|o| string_in(volume, o as usize, true)),
                    Some(o) => string_in(volume, o as usize, false),
                    None => None,
                };
                info.volume_label = label.unwrap_or_default();
            }
        }

        if flags.contains(LinkInfoFlags::COMMON_NETWORK_RELATIVE_LINK_AND_PATH_SUFFIX) {
            if let Some(network) = field(20).and_then(|o| block.get(o..)) {
                let net_name = le_u32(network, 8)
                    .and_then(|o| string_in(network, o as usize, false))
                    .unwrap_or_default();
                info.network_path = if suffix.is_empty() {
                    net_name
                } else {
                    format!("{}\\{}", net_name.trim_end_matches('\\'), suffix)
                };
            }
        }
        Ok(info)
    }
}

impl ShellLink {
    pub fn parse(data: &[u8]) -> Result<ShellLink> {
        if data.len() < HEADER_SIZE as usize {
            return Err(Error::Parse(format!(
                "LNK file too small: {} bytes, need at least 76",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let header_size = cursor.read_u32::<LittleEndian>()?;
        if header_size != HEADER_SIZE {
            return Err(Error::Parse(format!(
                "Invalid LNK header size: expected 0x4C, got 0x{:X}",
                header_size
            )));
        }
        let mut clsid = [0u8; 16];
        cursor.read_exact(&mut clsid)?;
        if clsid != LINK_CLSID {
            return Err(Error::Parse("Invalid Shell Link CLSID".to_string()));
        }

        let raw_flags = cursor.read_u32::<LittleEndian>()?;
        let flags = LinkFlags::from_bits_truncate(raw_flags);
        let mut link = ShellLink {
            link_flags: raw_flags,
            file_attributes: cursor.read_u32::<LittleEndian>()?,
            creation_time: filetime_to_datetime(cursor.read_u64::<LittleEndian>()?),
            access_time: filetime_to_datetime(cursor.read_u64::<LittleEndian>()?),
            write_time: filetime_to_datetime(cursor.read_u64::<LittleEndian>()?),
            target_size: cursor.read_u32::<LittleEndian>()?,
            icon_index: cursor.read_i32::<LittleEndian>()?,
            show_command: cursor.read_u32::<LittleEndian>()?,
            ..Default::default()
        };

        let mut offset = HEADER_SIZE as usize;
        if flags.contains(LinkFlags::HAS_LINK_TARGET_ID_LIST) {
            match data.get(offset..offset + 2) {
                Some(size) => offset += 2 + usize::from(u16::from_le_bytes([size[0], size[1]])),
                None => link.flag_without_data("HasLinkTargetIDList"),
            }
        }

        if flags.contains(LinkFlags::HAS_LINK_INFO) {
            let block = le_u32(data, offset)
                .map(|size| size as usize)
                .filter(|&size| size >= 28)
                .and_then(|size| data.get(offset..offset + size));
            match block {
                Some(block) => {
                    match LinkInfo::parse(block) {
                        Ok(info) => link.apply_link_info(info),
                        Err(e) => link.inconsistencies.push(format!("LinkInfo: {}", e)),
                    }
                    offset += block.len();
                }
                None => link.flag_without_data("HasLinkInfo"),
            }
        }

        let unicode = flags.contains(LinkFlags::IS_UNICODE);
        let strings = [
            (LinkFlags::HAS_NAME, "HasName"),
            (LinkFlags::HAS_RELATIVE_PATH, "HasRelativePath"),
            (LinkFlags::HAS_WORKING_DIR, "HasWorkingDir"),
            (LinkFlags::HAS_ARGUMENTS, "HasArguments"),
            (LinkFlags::HAS_ICON_LOCATION, "HasIconLocation"),
        ];
        let mut truncated = false;
        for (flag, label) in strings {
            if !flags.contains(flag) {
                continue;
            }
            let value = if truncated {
                None
            } else {
                read_counted_string(data, &mut offset, unicode)
            };
            match value {
                Some(value) => *link.string_slot(flag) = value,
                None => {
                    truncated = true;
                    link.flag_without_data(label);
                }
            }
        }

        if !truncated {
            link.machine_id = tracker_machine_id(data, offset).unwrap_or_default();
        }

        link.target_path = [
            &link.local_base_path,
            &link.network_path,
            &link.relative_path,
            &link.name,
        ]
        .into_iter()
        .find(|s| !s.is_empty())
        .cloned()
        .unwrap_or_default();
        Ok(link)
    }

    fn flag_without_data(&mut self, flag: &str) {
        self.inconsistencies
            .push(format!("{} is set but the data is missing or truncated", flag));
    }

    fn string_slot(&mut self, flag: LinkFlags) -> &mut String {
        if flag == LinkFlags::HAS_NAME {
            &mut self.name
        } else if flag == LinkFlags::HAS_RELATIVE_PATH {
            &mut self.relative_path
        } else if flag == LinkFlags::HAS_WORKING_DIR {
            &mut self.working_directory
        } else if flag == LinkFlags::HAS_ARGUMENTS {
            &mut self.arguments
        } else {
            &mut self.icon_location
        }
    }

    fn apply_link_info(&mut self, info: LinkInfo) {
        self.local_base_path = info.local_base_path;
        self.network_path = info.network_path;
        self.drive_type = info.drive_type;
        self.drive_serial_number = info.drive_serial_number;
        self.volume_label = info.volume_label;
    }
}

/// Length-prefixed StringData entry; `None` when it runs past the end
fn read_counted_string(data: &[u8], offset: &mut usize, unicode: bool) -> Option<String> {
    let count = usize::from(u16::from_le_bytes(
        data.get(*offset..*offset + 2)?.try_into().ok()?,
    ));
    let width = if unicode { 2 } else { 1 };
    let start = *offset + 2;
    let bytes = data.get(start..start + count * width)?;
    *offset = start + count * width;
    Some(if unicode {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        ansi_to_string(bytes)
    })
}

/// Walk the extra-data blocks looking for the distributed link tracker
fn tracker_machine_id(data: &[u8], mut offset: usize) -> Option<String> {
    loop {
        let size = le_u32(data, offset)? as usize;
        if size < 8 || offset + size > data.len() {
            return None;
        }
        if le_u32(data, offset + 4)? == TRACKER_SIGNATURE {
            let machine = data.get(offset + 16..offset + 32)?;
            return Some(ansi_to_string(machine));
        }
        offset += size;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_full_link() {
        let link = ShellLink::parse(&shell_link("C:\\Windows\\notepad.exe", "notes.txt")).unwrap();
        assert_eq!(link.target_path, "C:\\Windows\\notepad.exe");
        assert_eq!(link.local_base_path, "C:\\Windows\\notepad.exe");
        assert_eq!(link.working_directory, "C:\\Windows\\System32");
        assert_eq!(link.arguments, "notes.txt");
        assert_eq!(link.name, "");
        assert_eq!(link.machine_id, "jean-pc");
        assert_eq!(link.drive_type, "fixed");
        assert_eq!(link.drive_serial_number, "1234ABCD");
        assert_eq!(link.volume_label, "SYSTEM");
        assert_eq!(link.target_size, 4096);
        assert_eq!(link.creation_time, filetime_to_datetime(CREATED));
        assert!(link.access_time.is_none());
        assert!(link.inconsistencies.is_empty());
    }

    #[test]
    fn test_network_path() {
        let info = LinkInfo::parse(&link_info("", Some("\\\\server\\share"))).unwrap();
        assert_eq!(info.network_path, "\\\\server\\share");
    }

    #[test]
    fn test_flag_without_data() {
        let mut data = shell_link("C:\\a.txt", "x");
        // cut inside the arguments string
        let cut = data.len() - 0x60 - 4 - 2;
        data.truncate(cut);
        let link = ShellLink::parse(&data).unwrap();
        assert_eq!(link.arguments, "");
        assert_eq!(link.working_directory, "C:\\Windows\\System32");
        assert_eq!(link.machine_id, "");
        assert_eq!(link.inconsistencies.len(), 1);
        assert!(link.inconsistencies[0].starts_with("HasArguments"));
    }

    #[test]
    fn test_only_arguments_flag() {
        let mut data = vec![0u8; 76];
        data[0..4].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        data[4..20].copy_from_slice(&LINK_CLSID);
        let flags = LinkFlags::HAS_ARGUMENTS | LinkFlags::IS_UNICODE;
        data[20..24].copy_from_slice(&flags.bits().to_le_bytes());
        data.extend(counted_utf16("/c whoami"));
        data.extend_from_slice(&0u32.to_le_bytes());

        let link = ShellLink::parse(&data).unwrap();
        assert_eq!(link.arguments, "/c whoami");
        assert_eq!(link.name, "");
        assert_eq!(link.relative_path, "");
        assert_eq!(link.working_directory, "");
        assert_eq!(link.icon_location, "");
        assert_eq!(link.target_path, "");
        assert!(link.inconsistencies.is_empty());
    }

    #[test]
    fn test_header_only_link_info_missing() {
        let mut data = shell_link("C:\\a.txt", "x");
        data.truncate(76);
        data[20..24].copy_from_slice(&LinkFlags::HAS_LINK_INFO.bits().to_le_bytes());
        let link = ShellLink::parse(&data).unwrap();
        assert_eq!(link.target_path, "");
        assert_eq!(link.inconsistencies.len(), 1);
    }

    #[test]
    fn test_invalid_lnk_data() {
        assert!(ShellLink::parse(&[]).is_err());
        assert!(ShellLink::parse(&[0u8; 50]).is_err());
        let mut data = shell_link("C:\\a.txt", "");
        data[4] = 0xFF;
        assert!(ShellLink::parse(&data).is_err());
    }
}
