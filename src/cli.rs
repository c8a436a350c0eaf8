//! Command-line interface definitions and parsing.

use crate::browser::DEFAULT_HISTORY_LIMIT;
use crate::datetime::parse_date_filter;
use crate::error::{Error, Result};
use crate::extractor::ExtractionConfig;
use crate::filesystem_artifacts::DEFAULT_LNK_DEPTH;
use crate::output::{OutputFormat, TimelineFilter};
use clap::Parser;
use std::path::PathBuf;

/// imgtrace - Windows disk image artifact extractor
#[derive(Parser, Debug)]
#[command(name = "imgtrace")]
#[command(about = "imgtrace - Extract Windows forensic artifacts from raw and E01 disk images", version)]
#[command(long_about = "Extracts Windows artifacts from a disk image without mounting it:
• Registry: USB history, UserAssist, installed programs, Run keys, timezone, network
• Recycle bin: INFO2 and $I index records, optional content recovery
• Event logs: classic EVT records with logon and service classification
• Filesystem: Prefetch (including compressed), LNK shortcuts, Jump Lists
• Browsers: Firefox, Chrome/Edge history, cookies, downloads, IE index.dat

Accepts single raw files, split raw sets (.001, .002, ...) and EWF sets (.E01, .E02, ...).")]
pub struct Args {
    /// Disk image path (single file or first segment of a split set)
    pub image: PathBuf,

    /// Output file (use "-" for stdout, default: stdout)
    #[arg(long, short)]
    pub output: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Case identifier carried into the output document
    #[arg(long)]
    pub case_id: Option<String>,

    /// Copy recoverable recycle-bin content into this directory
    #[arg(long)]
    pub recover_dir: Option<PathBuf>,

    /// Directory depth searched below each profile for .lnk files
    #[arg(long, default_value_t = DEFAULT_LNK_DEPTH)]
    pub lnk_depth: usize,

    /// Maximum history rows read from each browser store
    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,

    /// Timeline only: keep rows whose description or source matches (regex, case-insensitive)
    #[arg(long)]
    pub filter: Option<String>,

    /// Timeline only: rows at or after this date (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    pub after: Option<String>,

    /// Timeline only: rows at or before this date (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    pub before: Option<String>,

    /// Worker threads for category extraction (default: one per core)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parsed and validated CLI configuration
#[derive(Debug)]
pub struct Config {
    pub image: PathBuf,
    pub output: Option<String>,
    pub format: OutputFormat,
    pub timeline_filter: TimelineFilter,
    pub threads: Option<usize>,
    pub verbose: u8,
    pub extraction: ExtractionConfig,
}

impl Config {
    /// Parse and validate CLI arguments into a configuration
    pub fn from_args(args: Args) -> Result<Self> {
        if !args.image.is_file() {
            return Err(Error::InvalidInput(format!(
                "Image {} does not exist or is not a file",
                args.image.display()
            )));
        }
        if args.threads == Some(0) {
            return Err(Error::InvalidInput("--threads must be at least 1".to_string()));
        }
        if args.history_limit == 0 {
            return Err(Error::InvalidInput("--history-limit must be at least 1".to_string()));
        }
        if let Some(dir) = &args.recover_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::InvalidInput(format!(
                    "Recovery target {} is not a directory",
                    dir.display()
                )));
            }
        }
        let pattern = match &args.filter {
            Some(pattern) => Some(
                regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::InvalidInput(format!("Invalid regex pattern '{}': {}", pattern, e)))?,
            ),
            None => None,
        };
        let timeline_filter = TimelineFilter {
            after: args.after.as_deref().map(parse_date_filter).transpose()?,
            before: args.before.as_deref().map(parse_date_filter).transpose()?,
            pattern,
        };
        let case_id = args.case_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());

        Ok(Config {
            image: args.image,
            output: args.output,
            format: args.format,
            timeline_filter,
            threads: args.threads,
            verbose: args.verbose,
            extraction: ExtractionConfig {
                case_id,
                recover_dir: args.recover_dir,
                lnk_depth: args.lnk_depth,
                history_limit: args.history_limit,
            },
        })
    }

    /// `log` level filter for the requested verbosity
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
