//! Recycle bin parsing: legacy `INFO2` indexes (Windows 95 to XP) and the
//! `$I`/`$R` pairs used from Vista on.

use crate::datetime::filetime_to_datetime;
use crate::error::{Error, Result};
use crate::fs::{FilesystemEntry, FilesystemView};
use crate::text::{ansi_to_string, file_name, le_u32, le_u64, utf16le_to_string};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CATEGORY: &str = "recycle_bin";

pub const RECYCLE_BIN_DIRS: [&str; 4] = ["/RECYCLER", "/Recycler", "/RECYCLED", "/$Recycle.Bin"];

const INFO2_HEADER_SIZE: usize = 20;
const INFO2_RECORD_SIZE: usize = 800;
/// Windows 95 INFO files carry ANSI names only
const INFO_ANSI_RECORD_SIZE: usize = 280;
const INDEX_V1_NAME_BYTES: usize = 520;

/// Index record layout, selected by the file type and its version field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecycleLayout {
    /// `INFO2` record inside a shared index file
    Info2,
    /// Vista/7/8 `$I` file: fixed 520-byte name
    IndexV1,
    /// Windows 10+ `$I` file: length-prefixed name
    IndexV2,
}

/// One deleted file known to the recycle bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedFile {
    pub original_filename: String,
    /// Name of the stored content file (`Dc3.txt`, `$R1A2B3C.txt`)
    pub recycle_filename: String,
    pub info_filename: String,
    pub deletion_time: Option<DateTime<Utc>>,
    /// Original size as recorded by the index
    pub file_size: u64,
    pub layout: RecycleLayout,
    pub drive_letter: Option<String>,
    pub record_number: Option<u32>,
    /// `$I` identifier (suffix after `$I`)
    pub identifier: Option<String>,
    /// SID-named subdirectory holding the entry
    pub user_sid: Option<String>,
    /// Content file path on the volume, when it still exists
    pub data_file_path: Option<String>,
    pub data_file_size: Option<u64>,
    /// Host path the content was copied to
    pub recovered_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecycleBinLocation {
    pub path: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecycleBinSummary {
    pub total_deleted_files: usize,
    pub total_size: u64,
    pub earliest_deletion: Option<DateTime<Utc>>,
    pub latest_deletion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecycleBinArtifacts {
    pub locations: Vec<RecycleBinLocation>,
    pub deleted_files: Vec<DeletedFile>,
    pub summary: RecycleBinSummary,
}

/// Parse an `INFO2` index. A truncated trailing record is ignored.
pub fn parse_info2(data: &[u8]) -> Vec<DeletedFile> {
    if data.len() < INFO2_HEADER_SIZE {
        return Vec::new();
    }
    let record_size = match le_u32(data, 12).map(|v| v as usize) {
        Some(INFO_ANSI_RECORD_SIZE) => INFO_ANSI_RECORD_SIZE,
        _ => INFO2_RECORD_SIZE,
    };

    let mut files = Vec::new();
    let mut offset = INFO2_HEADER_SIZE;
    while offset + record_size <= data.len() {
        let record = &data[offset..offset + record_size];
        offset += record_size;

        let unicode = record.get(280..800).map(utf16le_to_string).unwrap_or_default();
        let original_filename = if unicode.is_empty() {
            ansi_to_string(&record[..260])
        } else {
            unicode
        };
        if original_filename.is_empty() {
            log::debug!("INFO2 record at 0x{:X} has no name, skipped", offset - record_size);
            continue;
        }

        let record_number = le_u32(record, 260).unwrap_or(0);
        let drive = le_u32(record, 264).unwrap_or(u32::MAX);
        let drive_letter = (drive < 26).then(|| ((b'A' + drive as u8) as char).to_string());
        let extension = original_filename
            .rsplit(&['\\', '/'][..])
            .next()
            .and_then(|name| name.rfind('.').map(|dot| name[dot..].to_string()))
            .unwrap_or_default();
        let recycle_filename = format!(
            "D{}{}{}",
            drive_letter.as_deref().map(|d| d.to_lowercase()).unwrap_or_default(),
            record_number,
            extension
        );

        files.push(DeletedFile {
            original_filename,
            recycle_filename,
            info_filename: "INFO2".to_string(),
            deletion_time: le_u64(record, 268).and_then(filetime_to_datetime),
            file_size: u64::from(le_u32(record, 276).unwrap_or(0)),
            layout: RecycleLayout::Info2,
            drive_letter,
            record_number: Some(record_number),
            identifier: None,
            user_sid: None,
            data_file_path: None,
            data_file_size: None,
            recovered_path: None,
        });
    }
    files
}

/// Parse one `$I` file
pub fn parse_index_file(data: &[u8], identifier: &str) -> Result<DeletedFile> {
    let short = || Error::Parse(format!("$I{} truncated", identifier));
    let version = le_u64(data, 0).ok_or_else(short)?;
    let file_size = le_u64(data, 8).ok_or_else(short)?;
    let deletion_time = le_u64(data, 16).ok_or_else(short)?;
    let (layout, original_filename) = match version {
        1 => {
            let end = data.len().min(24 + INDEX_V1_NAME_BYTES);
            (RecycleLayout::IndexV1, utf16le_to_string(data.get(24..end).ok_or_else(short)?))
        }
        2 => {
            let chars = le_u32(data, 24).ok_or_else(short)? as usize;
            let end = data.len().min(28 + chars.saturating_mul(2));
            (RecycleLayout::IndexV2, utf16le_to_string(data.get(28..end).ok_or_else(short)?))
        }
        other => {
            return Err(Error::Parse(format!("$I{}: unknown version {}", identifier, other)));
        }
    };

    Ok(DeletedFile {
        original_filename,
        recycle_filename: format!("$R{}", identifier),
        info_filename: format!("$I{}", identifier),
        deletion_time: filetime_to_datetime(deletion_time),
        file_size,
        layout,
        drive_letter: None,
        record_number: None,
        identifier: Some(identifier.to_string()),
        user_sid: None,
        data_file_path: None,
        data_file_size: None,
        recovered_path: None,
    })
}

/// Parse every `$I` file in one directory and pair it with its `$R` sibling
fn parse_index_directory(entries: &[FilesystemEntry], view: &dyn FilesystemView) -> Vec<DeletedFile> {
    let data_files: HashMap<String, &FilesystemEntry> = entries
        .iter()
        .filter_map(|e| e.name.strip_prefix("$R").map(|suffix| (suffix.to_lowercase(), e)))
        .collect();

    let mut files = Vec::new();
    for entry in entries.iter().filter(|e| !e.is_directory) {
        let identifier = match entry.name.strip_prefix("$I") {
            Some(identifier) => identifier,
            None => continue,
        };
        let parsed = entry.read(view).and_then(|data| parse_index_file(&data, identifier));
        match parsed {
            Ok(mut file) => {
                if let Some(data_file) = data_files.get(&identifier.to_lowercase()) {
                    file.data_file_path = Some(data_file.path.clone());
                    file.data_file_size = Some(data_file.size);
                }
                files.push(file);
            }
            Err(e) => log::warn!("Skipping {}: {}", entry.path, e),
        }
    }
    files
}

fn parse_info2_directory(entries: &[FilesystemEntry], view: &dyn FilesystemView) -> Vec<DeletedFile> {
    let info2 = match entries.iter().find(|e| !e.is_directory && e.name.eq_ignore_ascii_case("INFO2")) {
        Some(info2) => info2,
        None => return Vec::new(),
    };
    let data = match info2.read(view) {
        Ok(data) => data,
        Err(e) => {
            log::warn!("Cannot read {}: {}", info2.path, e);
            return Vec::new();
        }
    };
    let mut files = parse_info2(&data);
    for file in &mut files {
        if let Some(content) = entries
            .iter()
            .find(|e| !e.is_directory && e.name.eq_ignore_ascii_case(&file.recycle_filename))
        {
            file.data_file_path = Some(content.path.clone());
            file.data_file_size = Some(content.size);
        }
    }
    log::debug!("{}: {} INFO2 record(s)", info2.path, files.len());
    files
}

/// Copy a deleted file's stored content into `out_dir`, returning the host path
pub fn recover_deleted_file(view: &dyn FilesystemView, file: &DeletedFile, out_dir: &Path) -> Result<PathBuf> {
    let source = file
        .data_file_path
        .as_deref()
        .ok_or_else(|| Error::NotFound(format!("no stored content for {}", file.original_filename)))?;
    let target_dir = out_dir.join(file.user_sid.as_deref().unwrap_or("root"));
    std::fs::create_dir_all(&target_dir)?;
    let target = target_dir.join(file_name(source));

    let mut writer = BufWriter::new(File::create(&target)?);
    let copied = view
        .copy_to(source, &mut writer)
        .and_then(|written| writer.flush().map(|_| written).map_err(Error::from));
    match copied {
        Ok(written) => {
            log::debug!("Recovered {} ({} bytes) to {}", source, written, target.display());
            Ok(target)
        }
        Err(e) => {
            drop(writer);
            // leave no partial copy behind
            let _ = std::fs::remove_file(&target);
            Err(e)
        }
    }
}

/// Locate recycle bins on `view` and parse every index found in them
pub fn extract_recycle_bin_artifacts(view: &dyn FilesystemView, recover_dir: Option<&Path>) -> RecycleBinArtifacts {
    let mut artifacts = RecycleBinArtifacts::default();
    let mut seen: Vec<String> = Vec::new();

    for bin in RECYCLE_BIN_DIRS {
        let lowered = bin.to_lowercase();
        if seen.contains(&lowered) || !view.exists(bin) {
            continue;
        }
        seen.push(lowered);

        let root_entries = view.list_dir(bin);
        artifacts.locations.push(RecycleBinLocation {
            path: bin.to_string(),
            entry_count: root_entries.len(),
        });

        artifacts.deleted_files.extend(parse_info2_directory(&root_entries, view));
        artifacts.deleted_files.extend(parse_index_directory(&root_entries, view));

        for sid_dir in root_entries.iter().filter(|e| e.is_directory) {
            let entries = view.list_dir(&sid_dir.path);
            let mut files = parse_info2_directory(&entries, view);
            files.extend(parse_index_directory(&entries, view));
            for file in &mut files {
                file.user_sid = Some(sid_dir.name.clone());
            }
            artifacts.deleted_files.extend(files);
        }
    }

    if let Some(out_dir) = recover_dir {
        for file in artifacts.deleted_files.iter_mut().filter(|f| f.data_file_path.is_some()) {
            match recover_deleted_file(view, file, out_dir) {
                Ok(path) => file.recovered_path = Some(path.display().to_string()),
                Err(e) => log::warn!("Cannot recover {}: {}", file.original_filename, e),
            }
        }
    }

    let times = artifacts.deleted_files.iter().filter_map(|f| f.deletion_time);
    artifacts.summary = RecycleBinSummary {
        total_deleted_files: artifacts.deleted_files.len(),
        total_size: artifacts.deleted_files.iter().map(|f| f.file_size).sum(),
        earliest_deletion: times.clone().min(),
        latest_deletion: times.max(),
    };
    log::info!(
        "Recycle bin: {} location(s), {} deleted file(s)",
        artifacts.locations.len(),
        artifacts.deleted_files.len()
    );
    artifacts
}

#[cfg(test)]
pub(crate) mod testing {
    pub const DELETED_AT: u64 = 128_500_000_000_000_000;

    pub fn info2_record(unicode_name: &str, ansi_name: &str, recno: u32, drive: u32, size: u32) -> Vec<u8> {
        let mut record = vec![0u8; 800];
        record[..ansi_name.len()].copy_from_slice(ansi_name.as_bytes());
        record[260..264].copy_from_slice(&recno.to_le_bytes());
        record[264..268].copy_from_slice(&drive.to_le_bytes());
        record[268..276].copy_from_slice(&(DELETED_AT + u64::from(recno)).to_le_bytes());
        record[276..280].copy_from_slice(&size.to_le_bytes());
        let name: Vec<u8> = unicode_name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        record[280..280 + name.len()].copy_from_slice(&name);
        record
    }

    pub fn info2_file(records: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![0u8; 20];
        data[0..4].copy_from_slice(&5u32.to_le_bytes());
        data[12..16].copy_from_slice(&800u32.to_le_bytes());
        for record in records {
            data.extend_from_slice(record);
        }
        data
    }

    pub fn index_v2(name: &str, size: u64) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let mut data = Vec::new();
        data.extend_from_slice(&2u64.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&DELETED_AT.to_le_bytes());
        data.extend_from_slice(&(units.len() as u32).to_le_bytes());
        data.extend(units.iter().flat_map(|u| u.to_le_bytes()));
        data
    }

    pub fn index_v1(name: &str, size: u64) -> Vec<u8> {
        let mut data = vec![0u8; 24 + 520];
        data[0..8].copy_from_slice(&1u64.to_le_bytes());
        data[8..16].copy_from_slice(&size.to_le_bytes());
        data[16..24].copy_from_slice(&DELETED_AT.to_le_bytes());
        let units: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        data[24..24 + units.len()].copy_from_slice(&units);
        data
    }
}
