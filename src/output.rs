//! Output formatting for the extraction document.

use crate::datetime::{format_timestamp_human, timestamp_in_range};
use crate::error::Result;
use crate::types::{ArtifactDocument, TimelineEvent};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::io::{BufWriter, Write};

/// Supported output formats
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Full artifact document as pretty-printed JSON
    Json,
    /// Human-readable counts per category
    Summary,
    /// CSV timeline of every timestamped record in ascending order
    Timeline,
}

/// Row selection for the timeline format
#[derive(Debug, Clone, Default)]
pub struct TimelineFilter {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Matched against the description and source columns
    pub pattern: Option<Regex>,
}

impl TimelineFilter {
    pub fn matches(&self, event: &TimelineEvent) -> bool {
        if !timestamp_in_range(&event.timestamp, &self.after, &self.before) {
            return false;
        }
        self.pattern
            .as_ref()
            .map_or(true, |re| re.is_match(&event.description) || re.is_match(&event.source))
    }
}

/// Handles output formatting and writing
pub struct OutputWriter;

impl OutputWriter {
    pub fn write_document(
        document: &ArtifactDocument,
        format: OutputFormat,
        filter: &TimelineFilter,
        writer: Box<dyn Write>,
    ) -> Result<()> {
        match format {
            OutputFormat::Json => Self::write_json(document, writer),
            OutputFormat::Summary => Self::write_summary(document, writer),
            OutputFormat::Timeline => Self::write_timeline(document, filter, writer),
        }
    }

    /// Write the document as JSON; timestamps stay ISO-8601 UTC
    pub fn write_json(document: &ArtifactDocument, mut writer: Box<dyn Write>) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, document)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_summary(document: &ArtifactDocument, mut writer: Box<dyn Write>) -> Result<()> {
        let info = &document.extraction_info;
        let summary = &document.summary;

        if let Some(case_id) = &document.case_id {
            writeln!(writer, "{:<24} {}", "Case:", case_id)?;
        }
        writeln!(writer, "{:<24} {} ({})", "Image:", info.image_path, info.image_format)?;
        writeln!(writer, "{:<24} 0x{:X}", "NTFS offset:", info.ntfs_offset)?;
        writeln!(writer, "{:<24} {}", "Extracted:", format_timestamp_human(&info.extraction_time))?;
        writeln!(writer, "{:<24} {}", "User profiles:", info.user_profiles.len())?;
        for profile in &info.user_profiles {
            writeln!(writer, "  {}", profile)?;
        }
        writeln!(writer)?;

        let rows: [(&str, usize); 14] = [
            ("USB devices", summary.total_usb_devices),
            ("UserAssist entries", summary.total_userassist_entries),
            ("Installed programs", summary.total_installed_programs),
            ("Run keys", summary.total_run_keys),
            ("Deleted files", summary.total_deleted_files),
            ("Event log entries", summary.total_event_log_entries),
            ("  logon events", summary.total_logon_events),
            ("  system events", summary.total_system_events),
            ("Prefetch files", summary.total_prefetch_files),
            ("Link files", summary.total_link_files),
            ("Jump lists", summary.total_jump_lists),
            ("Browser history", summary.total_browser_history),
            ("Browser cookies", summary.total_browser_cookies),
            ("Browser downloads", summary.total_browser_downloads),
        ];
        for (label, count) in rows {
            writeln!(writer, "{:<24} {}", format!("{}:", label), count)?;
        }
        writeln!(writer, "{:<24} {}", "Total records:", summary.total_records)?;

        if !document.diagnostics.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Diagnostics ({}):", document.diagnostics.len())?;
            for diagnostic in &document.diagnostics {
                writeln!(writer, "  [{}] {}", diagnostic.category, diagnostic.message)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write every timestamped record as a CSV row in ascending time order
    pub fn write_timeline(document: &ArtifactDocument, filter: &TimelineFilter, writer: Box<dyn Write>) -> Result<()> {
        let mut events = document.extract_timeline_events();
        events.retain(|e| filter.matches(e));
        sort_timeline(&mut events);

        let pb = ProgressBar::new(events.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message("Writing timeline");

        let mut csv_writer = csv::Writer::from_writer(BufWriter::new(writer));
        csv_writer.write_record(["timestamp", "category", "artifact", "timestamp_type", "description", "source"])?;
        for event in &events {
            csv_writer.write_record([
                format_timeline_timestamp(&event.timestamp).as_str(),
                event.category.as_str(),
                event.artifact.as_str(),
                event.timestamp_type.as_str(),
                event.description.as_str(),
                event.source.as_str(),
            ])?;
            pb.inc(1);
        }
        csv_writer.flush()?;
        pb.finish_and_clear();
        Ok(())
    }
}

/// Ascending by time; ties ordered by category then artifact for stable output
pub fn sort_timeline(events: &mut [TimelineEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.artifact.cmp(&b.artifact))
    });
}

fn format_timeline_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Create appropriate writer based on output option
pub fn create_writer(output_file: Option<&str>) -> Result<Box<dyn Write>> {
    let writer: Box<dyn Write> = match output_file {
        Some("-") | None => Box::new(std::io::stdout()),
        Some(path) => Box::new(BufWriter::new(std::fs::File::create(path)?)),
    };
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recycle_bin::{DeletedFile, RecycleLayout};
    use crate::types::{CategoryResults, Diagnostic, ExtractionInfo};
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    /// `Write` handle whose bytes remain inspectable after the box is dropped
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn deleted(name: &str, day: u32) -> DeletedFile {
        DeletedFile {
            original_filename: name.to_string(),
            recycle_filename: format!("Dc{}.txt", day),
            info_filename: "INFO2".to_string(),
            deletion_time: Some(Utc.with_ymd_and_hms(2008, 6, day, 9, 30, 0).unwrap()),
            file_size: 1,
            layout: RecycleLayout::Info2,
            drive_letter: Some("C".to_string()),
            record_number: Some(day),
            identifier: None,
            user_sid: None,
            data_file_path: None,
            data_file_size: None,
            recovered_path: None,
        }
    }

    fn document() -> ArtifactDocument {
        let mut results = CategoryResults::default();
        results.recycle_bin.deleted_files.push(deleted("C:\\late, with comma.txt", 20));
        results.recycle_bin.deleted_files.push(deleted("C:\\early.txt", 3));
        ArtifactDocument::assemble(
            Some("CASE-42".to_string()),
            ExtractionInfo {
                image_path: "disk.E01".to_string(),
                image_format: "ewf".to_string(),
                ntfs_offset: 0x7E00,
                user_profiles: vec!["/Users/alice".to_string()],
                extraction_time: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
                partitions: Vec::new(),
            },
            results,
            vec![Diagnostic::new("event_logs", "Application.Evt unreadable")],
        )
    }

    #[test]
    fn test_json_output() {
        let buffer = SharedBuffer::default();
        OutputWriter::write_json(&document(), Box::new(buffer.clone())).unwrap();
        let json: serde_json::Value = serde_json::from_str(&buffer.text()).unwrap();
        assert_eq!(json["case_id"], "CASE-42");
        assert_eq!(json["summary"]["total_deleted_files"], 2);
        assert_eq!(
            json["recycle_bin_artifacts"]["deleted_files"][1]["deletion_time"],
            "2008-06-03T09:30:00Z"
        );
    }

    #[test]
    fn test_timeline_sorted_and_quoted() {
        let buffer = SharedBuffer::default();
        OutputWriter::write_timeline(&document(), &TimelineFilter::default(), Box::new(buffer.clone())).unwrap();
        let text = buffer.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,category,artifact,timestamp_type,description,source");
        assert_eq!(lines[1], "2008-06-03T09:30:00Z,recycle_bin,deleted_file,Deleted,C:\\early.txt,INFO2");
        assert_eq!(
            lines[2],
            "2008-06-20T09:30:00Z,recycle_bin,deleted_file,Deleted,\"C:\\late, with comma.txt\",INFO2"
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_timeline_filter() {
        let filter = TimelineFilter {
            after: Some(Utc.with_ymd_and_hms(2008, 6, 1, 0, 0, 0).unwrap()),
            before: None,
            pattern: Some(Regex::new("(?i)LATE").unwrap()),
        };
        let buffer = SharedBuffer::default();
        OutputWriter::write_timeline(&document(), &filter, Box::new(buffer.clone())).unwrap();
        let text = buffer.text();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("late, with comma"));

        let before_all = TimelineFilter {
            before: Some(Utc.with_ymd_and_hms(2008, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let buffer = SharedBuffer::default();
        OutputWriter::write_timeline(&document(), &before_all, Box::new(buffer.clone())).unwrap();
        assert_eq!(buffer.text().lines().count(), 1);
    }

    #[test]
    fn test_summary_lists_diagnostics() {
        let buffer = SharedBuffer::default();
        OutputWriter::write_summary(&document(), Box::new(buffer.clone())).unwrap();
        let text = buffer.text();
        assert!(text.contains("Case:                    CASE-42"));
        assert!(text.contains("NTFS offset:             0x7E00"));
        assert!(text.contains("Deleted files:           2"));
        assert!(text.contains("[event_logs] Application.Evt unreadable"));
    }
}
