//! Read-only filesystem view over a mounted volume.
//!
//! Paths are `/`-separated, rooted at the volume root and matched
//! case-insensitively. Artifact parsers only ever see this trait, so they can
//! be exercised against an in-memory tree in tests.

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::io::Write;

/// One directory listing entry
#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

impl FilesystemEntry {
    /// Read the full content of this entry
    pub fn read(&self, view: &dyn FilesystemView) -> Result<Vec<u8>> {
        view.read(&self.path)
    }
}

pub trait FilesystemView: Send + Sync {
    /// Full content of a regular file.
    ///
    /// Missing paths yield `Error::NotFound`, unreadable content `Error::Read`.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Children of a directory. A missing or unreadable directory lists as empty.
    fn list_dir(&self, path: &str) -> Vec<FilesystemEntry>;

    fn exists(&self, path: &str) -> bool;

    /// Stream a regular file into `out`, returning the bytes written.
    ///
    /// The default buffers the whole file through [`read`](Self::read); views
    /// backed by a disk image copy in bounded pieces.
    fn copy_to(&self, path: &str, out: &mut dyn Write) -> Result<u64> {
        let data = self.read(path)?;
        out.write_all(&data)?;
        Ok(data.len() as u64)
    }

    /// Entries of `path` that are directories
    fn subdirectories(&self, path: &str) -> Vec<FilesystemEntry> {
        self.list_dir(path).into_iter().filter(|e| e.is_directory).collect()
    }

    /// Regular files of `path`
    fn files(&self, path: &str) -> Vec<FilesystemEntry> {
        self.list_dir(path).into_iter().filter(|e| !e.is_directory).collect()
    }
}
