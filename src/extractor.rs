//! Extraction orchestration.
//!
//! Opens the image once, mounts the Windows volume, discovers profiles and
//! then runs the five artifact categories in parallel on the rayon pool.
//! A category that panics is replaced by its empty value and a diagnostic;
//! only image, partition and mount failures abort the run.

use crate::browser::{self, extract_browser_artifacts, BrowserArtifacts, DEFAULT_HISTORY_LIMIT};
use crate::error::Result;
use crate::event_log::{self, extract_event_log_artifacts, EventLogArtifacts};
use crate::filesystem_artifacts::{self, extract_filesystem_artifacts, FilesystemArtifacts, DEFAULT_LNK_DEPTH};
use crate::fs::FilesystemView;
use crate::image::Image;
use crate::ntfs::NtfsView;
use crate::partition::{enumerate_partitions, select_ntfs, Partition};
use crate::profiles::{discover_profiles, UserProfile};
use crate::recycle_bin::{self, extract_recycle_bin_artifacts, RecycleBinArtifacts};
use crate::registry_artifacts::{self, extract_registry_artifacts, RegistryArtifacts};
use crate::types::{ArtifactDocument, CategoryResults, Diagnostic, ExtractionInfo};
use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level directories that mark a Windows system volume
const SYSTEM_MARKERS: [&str; 4] = ["/Windows", "/WINNT", "/Users", "/Documents and Settings"];

/// Library-level knobs for one run
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub case_id: Option<String>,
    /// Copy recycle-bin content files here when set
    pub recover_dir: Option<PathBuf>,
    pub lnk_depth: usize,
    pub history_limit: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            case_id: None,
            recover_dir: None,
            lnk_depth: DEFAULT_LNK_DEPTH,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Unopened,
    Mounted,
    ProfilesDiscovered,
    ParsingRegistry,
    ParsingRecycleBin,
    ParsingEventLogs,
    ParsingFilesystem,
    ParsingBrowsers,
    Aggregated,
    Closed,
}

fn enter(stage: ExtractionStage) {
    log::debug!("Extraction stage: {:?}", stage);
}

pub struct Extractor {
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract every artifact category from the image at `image_path`.
    ///
    /// Fails only when the image cannot be opened, holds no NTFS partition or
    /// the chosen volume cannot be mounted.
    pub fn run<P: AsRef<Path>>(&self, image_path: P) -> Result<ArtifactDocument> {
        enter(ExtractionStage::Unopened);
        let image_path = image_path.as_ref();
        let image = Arc::new(Image::open(image_path)?);
        let partitions = enumerate_partitions(&image)?;
        for partition in &partitions {
            log::info!(
                "Partition {}: offset 0x{:X}, {} bytes, {}",
                partition.index,
                partition.start_offset,
                partition.length,
                partition.type_descriptor
            );
        }

        let view = mount_windows_volume(&image, &partitions)?;
        enter(ExtractionStage::Mounted);

        let info = ExtractionInfo {
            image_path: image_path.display().to_string(),
            image_format: image.format().to_string(),
            ntfs_offset: view.volume_offset(),
            user_profiles: Vec::new(),
            extraction_time: Utc::now(),
            partitions,
        };
        let document = self.extract_from_view(&view, info);

        drop(view);
        drop(image);
        enter(ExtractionStage::Closed);
        Ok(document)
    }

    /// Run profile discovery and every category against an already mounted view
    pub fn extract_from_view(&self, view: &dyn FilesystemView, mut info: ExtractionInfo) -> ArtifactDocument {
        let profiles = discover_profiles(view);
        info.user_profiles = profiles.iter().map(|p| p.path.clone()).collect();
        enter(ExtractionStage::ProfilesDiscovered);

        let (results, diagnostics) = self.run_categories(view, &profiles);

        let document = ArtifactDocument::assemble(self.config.case_id.clone(), info, results, diagnostics);
        enter(ExtractionStage::Aggregated);
        log::info!(
            "Extracted {} record(s) with {} diagnostic(s)",
            document.summary.total_records,
            document.summary.diagnostics
        );
        document
    }

    fn run_categories(
        &self,
        view: &dyn FilesystemView,
        profiles: &[UserProfile],
    ) -> (CategoryResults, Vec<Diagnostic>) {
        let recover_dir = self.config.recover_dir.as_deref();
        let lnk_depth = self.config.lnk_depth;
        let history_limit = self.config.history_limit;

        let mut registry: ((RegistryArtifacts, Vec<Diagnostic>), Option<Diagnostic>) = Default::default();
        let mut recycle: (RecycleBinArtifacts, Option<Diagnostic>) = Default::default();
        let mut events: (EventLogArtifacts, Option<Diagnostic>) = Default::default();
        let mut filesystem: (FilesystemArtifacts, Option<Diagnostic>) = Default::default();
        let mut browsers: (BrowserArtifacts, Option<Diagnostic>) = Default::default();

        {
            let registry = &mut registry;
            let recycle = &mut recycle;
            let events = &mut events;
            let filesystem = &mut filesystem;
            let browsers = &mut browsers;
            rayon::scope(|s| {
                s.spawn(move |_| {
                    enter(ExtractionStage::ParsingRegistry);
                    *registry = guarded(registry_artifacts::CATEGORY, || {
                        let mut diagnostics = Vec::new();
                        let artifacts = extract_registry_artifacts(view, profiles, &mut diagnostics);
                        (artifacts, diagnostics)
                    });
                });
                s.spawn(move |_| {
                    enter(ExtractionStage::ParsingRecycleBin);
                    *recycle = guarded(recycle_bin::CATEGORY, || {
                        extract_recycle_bin_artifacts(view, recover_dir)
                    });
                });
                s.spawn(move |_| {
                    enter(ExtractionStage::ParsingEventLogs);
                    *events = guarded(event_log::CATEGORY, || extract_event_log_artifacts(view));
                });
                s.spawn(move |_| {
                    enter(ExtractionStage::ParsingFilesystem);
                    *filesystem = guarded(filesystem_artifacts::CATEGORY, || {
                        extract_filesystem_artifacts(view, profiles, lnk_depth)
                    });
                });
                s.spawn(move |_| {
                    enter(ExtractionStage::ParsingBrowsers);
                    *browsers = guarded(browser::CATEGORY, || {
                        extract_browser_artifacts(view, profiles, history_limit)
                    });
                });
            });
        }

        let ((registry, mut diagnostics), registry_panic) = registry;
        let (recycle_bin, recycle_panic) = recycle;
        let (event_logs, events_panic) = events;
        let (filesystem, filesystem_panic) = filesystem;
        let (browsers, browsers_panic) = browsers;
        diagnostics.extend(
            [registry_panic, recycle_panic, events_panic, filesystem_panic, browsers_panic]
                .into_iter()
                .flatten(),
        );

        let results = CategoryResults {
            registry,
            recycle_bin,
            event_logs,
            filesystem,
            browsers,
        };
        (results, diagnostics)
    }
}

/// Run one category, turning a panic into its empty value plus a diagnostic
fn guarded<T: Default>(category: &str, work: impl FnOnce() -> T) -> (T, Option<Diagnostic>) {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => (value, None),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("{} extraction aborted: {}", category, message);
            (T::default(), Some(Diagnostic::new(category, format!("extraction aborted: {}", message))))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn looks_like_system_volume(view: &NtfsView) -> bool {
    SYSTEM_MARKERS.iter().any(|dir| view.exists(dir))
}

/// Mount the first NTFS partition, preferring a later one that holds Windows
fn mount_windows_volume(image: &Arc<Image>, partitions: &[Partition]) -> Result<NtfsView> {
    let first = select_ntfs(partitions)?;
    let view = NtfsView::mount(Arc::clone(image), first.start_offset)?;
    if looks_like_system_volume(&view) {
        return Ok(view);
    }

    for candidate in partitions.iter().filter(|p| p.is_ntfs() && p.index != first.index) {
        match NtfsView::mount(Arc::clone(image), candidate.start_offset) {
            Ok(other) if looks_like_system_volume(&other) => {
                log::info!(
                    "Partition {} has no Windows directories; using partition {}",
                    first.index,
                    candidate.index
                );
                return Ok(other);
            }
            Ok(_) => {}
            Err(e) => log::debug!("Partition {} not mountable: {}", candidate.index, e),
        }
    }
    log::warn!("No partition looks like a Windows system volume; using partition {}", first.index);
    Ok(view)
}
