//! Legacy `.evt` event log parsing with logon and system event classification.
//!
//! `.evtx` logs are listed so their presence is reported, but their binary
//! XML is not decoded.

use crate::datetime::unix_seconds_to_datetime;
use crate::error::{Error, Result};
use crate::fs::FilesystemView;
use crate::text::{le_u16, le_u32, utf16le_to_string, utf16le_z_at};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CATEGORY: &str = "event_logs";

pub const EVT_DIRS: [&str; 2] = ["/Windows/System32/config", "/WINNT/System32/config"];
pub const EVTX_DIR: &str = "/Windows/System32/winevt/Logs";

const RECORD_SIGNATURE: &[u8; 4] = b"LfLe";
const MIN_RECORD_SIZE: usize = 56;
const SIGNATURE_SCAN_LIMIT: usize = 512;

/// A log file found on the volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogFile {
    pub name: String,
    pub path: String,
    pub size: u64,
    /// `evt` or `evtx`
    pub format: String,
    pub parsed: bool,
    pub record_count: usize,
}

/// One decoded EVENTLOGRECORD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub log_file: String,
    pub record_number: u32,
    /// Low 16 bits of the event identifier, as shown by Event Viewer
    pub event_id: u16,
    /// Full identifier including severity and facility bits
    pub event_id_full: u32,
    pub event_type: String,
    pub event_category: u16,
    pub time_generated: Option<DateTime<Utc>>,
    pub time_written: Option<DateTime<Utc>>,
    pub source_name: String,
    pub computer_name: String,
    pub strings: Vec<String>,
    pub user_sid: Option<String>,
    pub data_length: u32,
}

/// Fields pulled from logon/logoff insertion strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogonDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logon_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logon_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logon_process: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workstation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_network_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogonEvent {
    #[serde(flatten)]
    pub event: EventRecord,
    pub event_description: String,
    pub logon_details: LogonDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    #[serde(flatten)]
    pub event: EventRecord,
    pub event_description: String,
    pub service_name: Option<String>,
    pub service_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLogSummary {
    pub total_events: usize,
    pub total_logon_events: usize,
    pub total_system_events: usize,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLogArtifacts {
    pub log_files: Vec<EventLogFile>,
    pub all_events: Vec<EventRecord>,
    pub logon_events: Vec<LogonEvent>,
    pub system_events: Vec<SystemEvent>,
    pub summary: EventLogSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogonKind {
    Success,
    Failure,
    Logoff,
    Other,
}

fn logon_description(event_id: u16) -> Option<(&'static str, LogonKind)> {
    let entry = match event_id {
        528 => ("Successful Logon", LogonKind::Success),
        529 => ("Logon Failure - Unknown user name or bad password", LogonKind::Failure),
        530 => ("Logon Failure - Account logon time restriction violation", LogonKind::Failure),
        531 => ("Logon Failure - Account currently disabled", LogonKind::Failure),
        532 => ("Logon Failure - The specified user account has expired", LogonKind::Failure),
        533 => ("Logon Failure - User not allowed to logon at this computer", LogonKind::Failure),
        534 => ("Logon Failure - The user has not been granted the requested logon type", LogonKind::Failure),
        535 => ("Logon Failure - The specified account's password has expired", LogonKind::Failure),
        536 => ("Logon Failure - The NetLogon service is not active", LogonKind::Failure),
        537 => ("Logon Failure - Unknown reason", LogonKind::Failure),
        538 => ("User Logoff", LogonKind::Logoff),
        539 => ("Logon Failure - Account locked out", LogonKind::Failure),
        540 => ("Successful Network Logon", LogonKind::Success),
        4624 => ("An account was successfully logged on", LogonKind::Success),
        4625 => ("An account failed to log on", LogonKind::Failure),
        4634 => ("An account was logged off", LogonKind::Logoff),
        4647 => ("User initiated logoff", LogonKind::Logoff),
        4648 => ("A logon was attempted using explicit credentials", LogonKind::Other),
        _ => return None,
    };
    Some(entry)
}

fn system_description(event_id: u16) -> Option<&'static str> {
    Some(match event_id {
        6005 => "The Event log service was started",
        6006 => "The Event log service was stopped",
        6008 => "Unexpected system shutdown",
        6009 => "System startup",
        6013 => "System uptime",
        1074 => "System shutdown initiated by user",
        1076 => "System shutdown reason",
        7034 => "Service crashed unexpectedly",
        7035 => "Service sent a control",
        7036 => "Service started or stopped",
        7040 => "Service start type changed",
        _ => return None,
    })
}

pub fn event_type_name(code: u16) -> String {
    match code {
        0 => "Success".to_string(),
        1 => "Error".to_string(),
        2 => "Warning".to_string(),
        4 => "Information".to_string(),
        8 => "Audit Success".to_string(),
        16 => "Audit Failure".to_string(),
        other => format!("Unknown({})", other),
    }
}

/// Render a binary SID as `S-1-5-21-...`
pub fn format_sid(sid: &[u8]) -> Option<String> {
    let revision = *sid.first()?;
    let count = *sid.get(1)? as usize;
    let authority = sid
        .get(2..8)?
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let mut out = format!("S-{}-{}", revision, authority);
    for i in 0..count {
        out.push_str(&format!("-{}", le_u32(sid, 8 + i * 4)?));
    }
    Some(out)
}

fn find(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Offset of the first record-shaped structure, tolerating a few leading bytes of damage
fn first_record_offset(data: &[u8]) -> Option<usize> {
    if data.get(4..8) == Some(&RECORD_SIGNATURE[..]) || data.get(..4) == Some(b"ElfF") {
        return Some(0);
    }
    let window = &data[..data.len().min(SIGNATURE_SCAN_LIMIT + 8)];
    find(window, RECORD_SIGNATURE, 4).map(|p| p - 4)
}

/// Decode one record of `length` bytes starting at `record[0]`
pub fn parse_record(record: &[u8], log_file: &str) -> Result<EventRecord> {
    let short = || Error::Parse("event record truncated".to_string());
    if record.len() < MIN_RECORD_SIZE || record.get(4..8) != Some(&RECORD_SIGNATURE[..]) {
        return Err(Error::Parse("not an event record".to_string()));
    }
    let event_id_full = le_u32(record, 20).ok_or_else(short)?;
    let num_strings = le_u16(record, 26).ok_or_else(short)? as usize;
    let string_offset = le_u32(record, 36).ok_or_else(short)? as usize;
    let sid_length = le_u32(record, 40).ok_or_else(short)? as usize;
    let sid_offset = le_u32(record, 44).ok_or_else(short)? as usize;

    let (source_name, used) = utf16le_z_at(record, MIN_RECORD_SIZE).unwrap_or_default();
    let computer_name = utf16le_z_at(record, MIN_RECORD_SIZE + used)
        .map(|(name, _)| name)
        .unwrap_or_default();

    let mut strings = Vec::with_capacity(num_strings.min(64));
    let mut pos = string_offset;
    for _ in 0..num_strings {
        match utf16le_z_at(record, pos) {
            Some((s, consumed)) => {
                strings.push(s);
                pos += consumed;
            }
            None => {
                // unterminated final string runs to the end of the record
                if let Some(tail) = record.get(pos..) {
                    strings.push(utf16le_to_string(tail));
                }
                break;
            }
        }
    }

    let user_sid = if sid_length > 0 {
        record
            .get(sid_offset..sid_offset.saturating_add(sid_length))
            .and_then(format_sid)
    } else {
        None
    };
    let timestamp = |offset| {
        le_u32(record, offset)
            .filter(|&t| t > 0)
            .and_then(|t| unix_seconds_to_datetime(i64::from(t)))
    };

    Ok(EventRecord {
        log_file: log_file.to_string(),
        record_number: le_u32(record, 8).ok_or_else(short)?,
        event_id: (event_id_full & 0xFFFF) as u16,
        event_id_full,
        event_type: event_type_name(le_u16(record, 24).ok_or_else(short)?),
        event_category: le_u16(record, 28).ok_or_else(short)?,
        time_generated: timestamp(12),
        time_written: timestamp(16),
        source_name,
        computer_name,
        strings,
        user_sid,
        data_length: le_u32(record, 48).ok_or_else(short)?,
    })
}

/// Decode every well-formed record of an `.evt` file
pub fn parse_evt(data: &[u8], log_file: &str) -> Vec<EventRecord> {
    let mut events = Vec::new();
    let mut offset = match first_record_offset(data) {
        Some(offset) => offset,
        None => {
            log::warn!("{}: no event record signature in the first {} bytes", log_file, SIGNATURE_SCAN_LIMIT);
            return events;
        }
    };

    while offset + 8 <= data.len() {
        let length = le_u32(data, offset).unwrap_or(0) as usize;
        let plausible = data.get(offset + 4..offset + 8) == Some(&RECORD_SIGNATURE[..])
            && length >= MIN_RECORD_SIZE
            && length <= data.len() - offset;
        if plausible {
            match parse_record(&data[offset..offset + length], log_file) {
                Ok(event) => {
                    events.push(event);
                    offset += length;
                    continue;
                }
                Err(e) => log::debug!("{}: record at 0x{:X}: {}", log_file, offset, e),
            }
        }
        // resume at the next signature past this offset
        match find(data, RECORD_SIGNATURE, offset + 5) {
            Some(next) => offset = next - 4,
            None => break,
        }
    }
    events
}

fn string_at(strings: &[String], i: usize) -> Option<String> {
    strings.get(i).cloned()
}

fn logon_details(kind: LogonKind, strings: &[String]) -> LogonDetails {
    match kind {
        LogonKind::Success if strings.len() >= 8 => LogonDetails {
            user_name: string_at(strings, 0),
            domain: string_at(strings, 1),
            logon_id: string_at(strings, 2),
            logon_type: string_at(strings, 3),
            logon_process: string_at(strings, 4),
            authentication_package: string_at(strings, 5),
            workstation_name: string_at(strings, 6),
            source_network_address: string_at(strings, 7),
            ..Default::default()
        },
        LogonKind::Failure if strings.len() >= 6 => LogonDetails {
            user_name: string_at(strings, 0),
            domain: string_at(strings, 1),
            failure_reason: string_at(strings, 2),
            status: string_at(strings, 3),
            sub_status: string_at(strings, 4),
            workstation_name: string_at(strings, 5),
            ..Default::default()
        },
        LogonKind::Logoff if strings.len() >= 3 => LogonDetails {
            user_name: string_at(strings, 0),
            domain: string_at(strings, 1),
            logon_id: string_at(strings, 2),
            ..Default::default()
        },
        _ => LogonDetails::default(),
    }
}

pub fn classify_logon(events: &[EventRecord]) -> Vec<LogonEvent> {
    events
        .iter()
        .filter_map(|event| {
            let (description, kind) = logon_description(event.event_id)?;
            Some(LogonEvent {
                logon_details: logon_details(kind, &event.strings),
                event_description: description.to_string(),
                event: event.clone(),
            })
        })
        .collect()
}

pub fn classify_system(events: &[EventRecord]) -> Vec<SystemEvent> {
    events
        .iter()
        .filter_map(|event| {
            let description = system_description(event.event_id)?;
            let is_service = matches!(event.event_id, 7034 | 7035 | 7036 | 7040);
            Some(SystemEvent {
                service_name: if is_service { string_at(&event.strings, 0) } else { None },
                service_state: if event.event_id == 7036 {
                    string_at(&event.strings, 1)
                } else {
                    None
                },
                event_description: description.to_string(),
                event: event.clone(),
            })
        })
        .collect()
}

fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .map_or(false, |(_, ext)| ext.eq_ignore_ascii_case(extension))
}

pub fn list_event_log_files(view: &dyn FilesystemView) -> Vec<EventLogFile> {
    let mut files = Vec::new();
    for dir in EVT_DIRS {
        for entry in view.files(dir).into_iter().filter(|e| has_extension(&e.name, "evt")) {
            files.push(EventLogFile {
                name: entry.name,
                path: entry.path,
                size: entry.size,
                format: "evt".to_string(),
                parsed: false,
                record_count: 0,
            });
        }
    }
    for entry in view.files(EVTX_DIR).into_iter().filter(|e| has_extension(&e.name, "evtx")) {
        files.push(EventLogFile {
            name: entry.name,
            path: entry.path,
            size: entry.size,
            format: "evtx".to_string(),
            parsed: false,
            record_count: 0,
        });
    }
    files
}

pub fn extract_event_log_artifacts(view: &dyn FilesystemView) -> EventLogArtifacts {
    let mut artifacts = EventLogArtifacts {
        log_files: list_event_log_files(view),
        ..Default::default()
    };

    for log_file in artifacts.log_files.iter_mut().filter(|f| f.format == "evt") {
        match view.read(&log_file.path) {
            Ok(data) => {
                let events = parse_evt(&data, &log_file.name);
                log::debug!("{}: {} record(s)", log_file.path, events.len());
                log_file.parsed = true;
                log_file.record_count = events.len();
                artifacts.all_events.extend(events);
            }
            Err(e) => log::warn!("Cannot read {}: {}", log_file.path, e),
        }
    }

    artifacts.logon_events = classify_logon(&artifacts.all_events);
    artifacts.system_events = classify_system(&artifacts.all_events);

    let times = artifacts.all_events.iter().filter_map(|e| e.time_generated);
    artifacts.summary = EventLogSummary {
        total_events: artifacts.all_events.len(),
        total_logon_events: artifacts.logon_events.len(),
        total_system_events: artifacts.system_events.len(),
        earliest: times.clone().min(),
        latest: times.max(),
    };
    log::info!(
        "Event logs: {} file(s), {} event(s), {} logon, {} system",
        artifacts.log_files.len(),
        artifacts.summary.total_events,
        artifacts.summary.total_logon_events,
        artifacts.summary.total_system_events
    );
    artifacts
}
