//! # imgtrace - Windows disk image artifact extraction
//!
//! Reads a raw or EWF disk image, mounts its NTFS system volume read-only
//! through a minimal in-crate NTFS reader, and extracts the artifacts
//! Windows leaves behind into a single serializable document.
//!
//! ## Artifacts
//!
//! - Registry hives: USB history, UserAssist, installed programs, Run keys,
//!   last logged-on user, timezone and network configuration
//! - Recycle bin: `INFO2` (XP) and `$I` (Vista+) records
//! - Classic `.evt` event logs, with logon and service events classified
//! - Prefetch (including XPRESS-compressed Windows 10 files), `.lnk`
//!   shortcuts and Jump Lists
//! - Firefox and Chromium SQLite stores, Internet Explorer `index.dat`
//!
//! ```no_run
//! use imgtrace::extractor::{ExtractionConfig, Extractor};
//!
//! let document = Extractor::new(ExtractionConfig::default()).run("disk.E01")?;
//! println!("{} records", document.summary.total_records);
//! # Ok::<(), imgtrace::Error>(())
//! ```

pub mod app;
pub mod browser;
pub mod cli;
pub mod datetime;
pub mod error;
pub mod event_log;
pub mod ewf;
pub mod extractor;
pub mod filesystem_artifacts;
pub mod fs;
pub mod image;
pub mod index_dat;
pub mod jumplist;
pub mod lnk_parser;
pub mod ntfs;
pub mod output;
pub mod partition;
pub mod prefetch;
pub mod profiles;
pub mod recycle_bin;
pub mod registry;
pub mod registry_artifacts;
pub mod text;
pub mod types;
pub mod xpress;

pub use error::{Error, Result};
pub use extractor::{ExtractionConfig, Extractor};
pub use output::{OutputFormat, OutputWriter};
pub use types::{ArtifactDocument, Diagnostic, TimelineEvent};
