//! The aggregated extraction document and its timeline projection.

use crate::browser::BrowserArtifacts;
use crate::event_log::EventLogArtifacts;
use crate::filesystem_artifacts::FilesystemArtifacts;
use crate::partition::Partition;
use crate::recycle_bin::RecycleBinArtifacts;
use crate::registry_artifacts::RegistryArtifacts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A category-level failure that did not stop the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(category: &str, message: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionInfo {
    pub image_path: String,
    pub image_format: String,
    pub ntfs_offset: u64,
    pub user_profiles: Vec<String>,
    pub extraction_time: DateTime<Utc>,
    pub partitions: Vec<Partition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_browser_history: usize,
    pub total_browser_cookies: usize,
    pub total_browser_downloads: usize,
    pub total_usb_devices: usize,
    pub total_userassist_entries: usize,
    pub total_installed_programs: usize,
    pub total_run_keys: usize,
    pub total_deleted_files: usize,
    pub total_event_log_entries: usize,
    pub total_logon_events: usize,
    pub total_system_events: usize,
    pub total_prefetch_files: usize,
    pub total_link_files: usize,
    pub total_jump_lists: usize,
    pub total_records: usize,
    pub diagnostics: usize,
    pub extraction_timestamp: Option<DateTime<Utc>>,
}

/// Everything one run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDocument {
    pub case_id: Option<String>,
    pub extraction_info: ExtractionInfo,
    pub registry_artifacts: RegistryArtifacts,
    pub recycle_bin_artifacts: RecycleBinArtifacts,
    pub event_log_artifacts: EventLogArtifacts,
    pub filesystem_artifacts: FilesystemArtifacts,
    pub browser_artifacts: BrowserArtifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: Summary,
}

/// The five category results, before summarizing
#[derive(Debug, Clone, Default)]
pub struct CategoryResults {
    pub registry: RegistryArtifacts,
    pub recycle_bin: RecycleBinArtifacts,
    pub event_logs: EventLogArtifacts,
    pub filesystem: FilesystemArtifacts,
    pub browsers: BrowserArtifacts,
}

impl ArtifactDocument {
    pub fn assemble(
        case_id: Option<String>,
        extraction_info: ExtractionInfo,
        results: CategoryResults,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        let registry = &results.registry;
        let event_logs = &results.event_logs;
        let filesystem = &results.filesystem;
        let browsers = &results.browsers;

        let mut summary = Summary {
            total_browser_history: browsers.total_history(),
            total_browser_cookies: browsers.total_cookies(),
            total_browser_downloads: browsers.total_downloads(),
            total_usb_devices: registry.usb_history.len(),
            total_userassist_entries: registry.userassist.len(),
            total_installed_programs: registry.installed_programs.len(),
            total_run_keys: registry.run_keys.len(),
            total_deleted_files: results.recycle_bin.deleted_files.len(),
            total_event_log_entries: event_logs.all_events.len(),
            total_logon_events: event_logs.logon_events.len(),
            total_system_events: event_logs.system_events.len(),
            total_prefetch_files: filesystem.prefetch_files.len(),
            total_link_files: filesystem.link_files.len(),
            total_jump_lists: filesystem.jump_lists.len(),
            total_records: 0,
            diagnostics: diagnostics.len(),
            extraction_timestamp: Some(extraction_info.extraction_time),
        };
        // logon and system events are views over all_events
        summary.total_records = summary.total_browser_history
            + summary.total_browser_cookies
            + summary.total_browser_downloads
            + summary.total_usb_devices
            + summary.total_userassist_entries
            + summary.total_installed_programs
            + summary.total_run_keys
            + summary.total_deleted_files
            + summary.total_event_log_entries
            + summary.total_prefetch_files
            + summary.total_link_files
            + summary.total_jump_lists;

        Self {
            case_id,
            extraction_info,
            registry_artifacts: results.registry,
            recycle_bin_artifacts: results.recycle_bin,
            event_log_artifacts: results.event_logs,
            filesystem_artifacts: results.filesystem,
            browser_artifacts: results.browsers,
            diagnostics,
            summary,
        }
    }

    /// One row per timestamp of every record, unsorted
    pub fn extract_timeline_events(&self) -> Vec<TimelineEvent> {
        let mut events = Vec::new();
        let mut push = |timestamp: Option<DateTime<Utc>>, category: &str, artifact: &str, kind: &str, description: String, source: &str| {
            if let Some(timestamp) = timestamp {
                events.push(TimelineEvent {
                    timestamp,
                    category: category.to_string(),
                    artifact: artifact.to_string(),
                    timestamp_type: kind.to_string(),
                    description,
                    source: source.to_string(),
                });
            }
        };

        let registry = &self.registry_artifacts;
        for usb in &registry.usb_history {
            let name = if usb.friendly_name.is_empty() { &usb.device_name } else { &usb.friendly_name };
            push(usb.first_install, "registry", "usb_device", "First Install", format!("{} ({})", name, usb.instance_id), "SYSTEM");
        }
        for entry in &registry.userassist {
            push(entry.last_run, "registry", "userassist", "Last Run", format!("{} run {} time(s)", entry.program, entry.run_count), &entry.user);
        }
        for program in &registry.installed_programs {
            push(program.last_modified, "registry", "installed_program", "Key Modified", program.display_name.clone(), "SOFTWARE");
        }
        for run in &registry.run_keys {
            push(run.last_modified, "registry", "run_key", "Key Modified", format!("{} = {}", run.name, run.value), &run.hive);
        }

        for file in &self.recycle_bin_artifacts.deleted_files {
            push(file.deletion_time, "recycle_bin", "deleted_file", "Deleted", file.original_filename.clone(), &file.info_filename);
        }

        for event in &self.event_log_artifacts.all_events {
            let description = format!("{} {} ({})", event.source_name, event.event_id, event.event_type);
            push(event.time_generated, "event_logs", "event", "Generated", description, &event.log_file);
        }

        let filesystem = &self.filesystem_artifacts;
        for pf in &filesystem.prefetch_files {
            for run in &pf.last_run_times {
                push(Some(*run), "filesystem", "prefetch", "Executed", pf.executable_name.clone(), &pf.path);
            }
        }
        for link in &filesystem.link_files {
            let target = link.link.target_path.clone();
            push(link.link.creation_time, "filesystem", "lnk", "Target Created", target.clone(), &link.file_path);
            push(link.link.write_time, "filesystem", "lnk", "Target Modified", target.clone(), &link.file_path);
            push(link.link.access_time, "filesystem", "lnk", "Target Accessed", target, &link.file_path);
        }
        for list in &filesystem.jump_lists {
            let app = list.app_name.clone().unwrap_or_else(|| list.app_id.clone());
            push(list.modified, "filesystem", "jump_list", "Modified", app, &list.path);
        }

        let browsers = &self.browser_artifacts;
        for entry in browsers.firefox.history.iter().chain(&browsers.chrome_edge.history) {
            push(entry.last_visit, "browser", "history", "Visited", entry.url.clone(), &entry.source);
        }
        for cookie in browsers.firefox.cookies.iter().chain(&browsers.chrome_edge.cookies) {
            push(cookie.creation_time, "browser", "cookie", "Created", format!("{}{}", cookie.host, cookie.path), &cookie.source);
        }
        for download in browsers.firefox.downloads.iter().chain(&browsers.chrome_edge.downloads) {
            let what = download.target_path.clone().or_else(|| download.url.clone()).unwrap_or_default();
            push(download.start_time, "browser", "download", "Started", what, &download.source);
        }
        let ie = &browsers.internet_explorer;
        for entry in ie.history.iter().chain(&ie.cookies).chain(&ie.cache) {
            push(entry.last_accessed, "browser", "index_dat", "Last Accessed", entry.url.clone(), &entry.index_file);
        }
        events
    }
}

/// One timestamped row of the flattened timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub artifact: String,
    pub timestamp_type: String,
    pub description: String,
    pub source: String,
}
