//! Internet Explorer `index.dat` (URL cache) parsing.
//!
//! Records are located by scanning for the `URL ` tag, so entries in free
//! blocks are recovered too. The URL location field is not always trustworthy,
//! and each entry says how its URL was found.

use crate::datetime::filetime_to_datetime;
use crate::fs::FilesystemView;
use crate::profiles::UserProfile;
use crate::text::{le_u32, le_u64, printable_ascii};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const RECORD_TAG: &[u8; 4] = b"URL ";
const BLOCK_SIZE: usize = 128;
const MAX_BLOCKS: usize = 64;
const LOCATION_FIELD: usize = 0x34;
const PROBE_OFFSETS: [usize; 5] = [0x68, 52, 56, 60, 64];
const PARTIAL_START: usize = 52;
const PARTIAL_MAX: usize = 256;

pub const HISTORY_DIRS: [&str; 2] = [
    "Local Settings/History/History.IE5",
    "AppData/Local/Microsoft/Windows/History/History.IE5",
];
pub const COOKIE_DIRS: [&str; 2] = ["Cookies", "AppData/Roaming/Microsoft/Windows/Cookies"];
pub const CACHE_DIRS: [&str; 2] = [
    "Local Settings/Temporary Internet Files/Content.IE5",
    "AppData/Local/Microsoft/Windows/Temporary Internet Files/Content.IE5",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlConfidence {
    /// Read through the record's own location field
    Verified,
    /// Found by probing the usual string offsets
    Heuristic,
    /// Best-effort printable bytes, possibly truncated
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDatEntry {
    pub source: String,
    pub user_profile: String,
    pub index_file: String,
    pub url: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub record_size: usize,
    pub url_confidence: UrlConfidence,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IeArtifacts {
    pub history: Vec<IndexDatEntry>,
    pub cookies: Vec<IndexDatEntry>,
    pub cache: Vec<IndexDatEntry>,
}

fn looks_like_url(s: &str) -> bool {
    let lowered = s.to_lowercase();
    s.len() > 3 && (lowered.contains("http") || lowered.contains("www.") || s.contains('.'))
}

fn string_at(record: &[u8], offset: usize) -> Option<String> {
    let s = printable_ascii(record.get(offset..)?);
    looks_like_url(&s).then_some(s)
}

fn resolve_url(record: &[u8]) -> Option<(String, UrlConfidence)> {
    let verified = le_u32(record, LOCATION_FIELD)
        .map(|o| o as usize)
        .filter(|&o| o >= LOCATION_FIELD + 4)
        .and_then(|o| string_at(record, o));
    if let Some(url) = verified {
        return Some((url, UrlConfidence::Verified));
    }
    if let Some(url) = PROBE_OFFSETS.iter().find_map(|&o| string_at(record, o)) {
        return Some((url, UrlConfidence::Heuristic));
    }
    let end = record.len().min(PARTIAL_START + PARTIAL_MAX);
    let partial = printable_ascii(record.get(PARTIAL_START..end)?);
    (partial.len() >= 3).then_some((partial, UrlConfidence::Partial))
}

/// Parsed record plus its size in bytes
struct RawRecord {
    url: String,
    confidence: UrlConfidence,
    last_modified: Option<DateTime<Utc>>,
    last_accessed: Option<DateTime<Utc>>,
    size: usize,
}

fn record_at(data: &[u8], offset: usize) -> Option<RawRecord> {
    if data.get(offset..offset + 4)? != RECORD_TAG {
        return None;
    }
    let blocks = le_u32(data, offset + 4)? as usize;
    if !(1..=MAX_BLOCKS).contains(&blocks) {
        return None;
    }
    let size = blocks * BLOCK_SIZE;
    let record = data.get(offset..offset + size)?;
    let (url, confidence) = resolve_url(record)?;
    Some(RawRecord {
        url,
        confidence,
        last_modified: le_u64(record, 8).and_then(filetime_to_datetime),
        last_accessed: le_u64(record, 16).and_then(filetime_to_datetime),
        size,
    })
}

pub fn parse_index_dat(data: &[u8], index_file: &str, user_profile: &str) -> Vec<IndexDatEntry> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        match record_at(data, offset) {
            Some(record) => {
                if record.confidence != UrlConfidence::Verified {
                    log::debug!(
                        "{}: URL at 0x{:X} recovered with {:?} confidence",
                        index_file,
                        offset,
                        record.confidence
                    );
                }
                entries.push(IndexDatEntry {
                    source: "internet_explorer".to_string(),
                    user_profile: user_profile.to_string(),
                    index_file: index_file.to_string(),
                    url: record.url,
                    last_modified: record.last_modified,
                    last_accessed: record.last_accessed,
                    record_size: record.size,
                    url_confidence: record.confidence,
                });
                offset += record.size;
            }
            None => offset += 4,
        }
    }
    entries
}

/// `index.dat` paths under `dirs`, including `MSHist*` subfolders when asked
fn index_files(
    view: &dyn FilesystemView,
    profile: &UserProfile,
    dirs: &[&str],
    with_subfolders: bool,
    seen: &mut HashSet<String>,
) -> Vec<String> {
    let mut paths = Vec::new();
    for dir in dirs {
        let dir = profile.join(dir);
        let mut candidates = vec![crate::text::join_path(&dir, "index.dat")];
        if with_subfolders {
            candidates.extend(
                view.subdirectories(&dir)
                    .into_iter()
                    .filter(|e| e.name.to_lowercase().starts_with("mshist"))
                    .map(|e| crate::text::join_path(&e.path, "index.dat")),
            );
        }
        for path in candidates {
            if view.exists(&path) && seen.insert(path.to_lowercase()) {
                paths.push(path);
            }
        }
    }
    paths
}

fn parse_files(view: &dyn FilesystemView, paths: &[String], user: &str) -> Vec<IndexDatEntry> {
    let mut entries = Vec::new();
    for path in paths {
        match view.read(path) {
            Ok(data) => entries.extend(parse_index_dat(&data, path, user)),
            Err(e) => log::warn!("Cannot read {}: {}", path, e),
        }
    }
    entries
}

pub fn extract_ie_artifacts(view: &dyn FilesystemView, profile: &UserProfile) -> IeArtifacts {
    let mut seen = HashSet::new();
    let history = index_files(view, profile, &HISTORY_DIRS, true, &mut seen);
    let cookies = index_files(view, profile, &COOKIE_DIRS, false, &mut seen);
    let cache = index_files(view, profile, &CACHE_DIRS, false, &mut seen);
    IeArtifacts {
        history: parse_files(view, &history, &profile.user_name),
        cookies: parse_files(view, &cookies, &profile.user_name),
        cache: parse_files(view, &cache, &profile.user_name),
    }
}
