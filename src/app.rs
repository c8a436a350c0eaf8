//! Main application logic and orchestration.

use crate::{
    cli::Config,
    error::{Error, Result},
    extractor::Extractor,
    output::{create_writer, OutputFormat, OutputWriter},
    types::ArtifactDocument,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Main application runner
pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the application with the configured parameters
    pub fn run(self) -> Result<()> {
        if let Some(threads) = self.config.threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .map_err(|e| Error::Generic(format!("Cannot configure thread pool: {}", e)))?;
        }

        let started = Instant::now();
        let document = self.extract()?;
        self.report(&document, started.elapsed());

        let writer = create_writer(self.config.output.as_deref())?;
        OutputWriter::write_document(&document, self.config.format, &self.config.timeline_filter, writer)?;
        if let Some(path) = self.config.output.as_deref().filter(|p| *p != "-") {
            eprintln!("📝 Wrote {} output to {}", format_name(self.config.format), path);
        }
        Ok(())
    }

    fn extract(&self) -> Result<ArtifactDocument> {
        eprintln!("🔍 Opening {}", self.config.image.display());
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message("Extracting artifacts");
        spinner.enable_steady_tick(Duration::from_millis(120));

        let extractor = Extractor::new(self.config.extraction.clone());
        let result = extractor.run(&self.config.image);
        match &result {
            Ok(_) => spinner.finish_with_message("Extraction complete"),
            Err(_) => spinner.abandon_with_message("Extraction failed"),
        }
        result
    }

    /// Run report on stderr so stdout stays clean for the document
    fn report(&self, document: &ArtifactDocument, elapsed: Duration) {
        let info = &document.extraction_info;
        let summary = &document.summary;
        eprintln!(
            "💽 {} image, NTFS volume at offset 0x{:X}, {} partition(s)",
            info.image_format,
            info.ntfs_offset,
            info.partitions.len()
        );
        eprintln!("👤 {} user profile(s)", info.user_profiles.len());
        eprintln!(
            "📊 Registry: {} USB, {} UserAssist, {} programs, {} run keys",
            summary.total_usb_devices,
            summary.total_userassist_entries,
            summary.total_installed_programs,
            summary.total_run_keys
        );
        eprintln!(
            "📊 Recycle bin: {} deleted file(s); event logs: {} record(s)",
            summary.total_deleted_files, summary.total_event_log_entries
        );
        eprintln!(
            "📊 Filesystem: {} prefetch, {} link(s), {} jump list(s)",
            summary.total_prefetch_files, summary.total_link_files, summary.total_jump_lists
        );
        eprintln!(
            "📊 Browsers: {} history, {} cookie(s), {} download(s)",
            summary.total_browser_history, summary.total_browser_cookies, summary.total_browser_downloads
        );
        for diagnostic in &document.diagnostics {
            eprintln!("⚠️  {}: {}", diagnostic.category, diagnostic.message);
        }
        eprintln!(
            "🎉 {} record(s) extracted in {:.2}s",
            summary.total_records,
            elapsed.as_secs_f64()
        );
    }
}

fn format_name(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => "JSON",
        OutputFormat::Summary => "summary",
        OutputFormat::Timeline => "timeline",
    }
}
