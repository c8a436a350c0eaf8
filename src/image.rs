//! Disk image access.
//!
//! An [`Image`] presents one or more segment files as a single logical byte
//! stream. Raw images may be a single file or a numbered split set
//! (`disk.001`, `disk.002`, ...); Expert Witness sets (`.E01`) are detected by
//! signature. All reads go through one mutex because a segment read is a
//! seek followed by a read and is not atomic across threads.

use crate::error::{Error, Result};
use crate::ewf::{self, EwfReader};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Logical sector size used for partition table arithmetic
pub const SECTOR_SIZE: u64 = 512;

struct RawSegment {
    file: File,
    start: u64,
    len: u64,
}

/// Storage backend selected once when the image is opened
enum ImageBackend {
    Raw(Vec<RawSegment>),
    Ewf(EwfReader),
}

impl ImageBackend {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self {
            ImageBackend::Raw(segments) => {
                let mut done = 0;
                while done < buf.len() {
                    let position = offset + done as u64;
                    let segment = match segments
                        .iter_mut()
                        .find(|s| position >= s.start && position < s.start + s.len)
                    {
                        Some(segment) => segment,
                        None => break,
                    };
                    let within = position - segment.start;
                    let n = ((segment.len - within) as usize).min(buf.len() - done);
                    segment.file.seek(SeekFrom::Start(within))?;
                    segment.file.read_exact(&mut buf[done..done + n])?;
                    done += n;
                }
                Ok(done)
            }
            ImageBackend::Ewf(reader) => reader.read_at(offset, buf),
        }
    }
}

/// A read-only disk image opened for one extraction run
pub struct Image {
    path: PathBuf,
    backend: Mutex<ImageBackend>,
    size: u64,
    segment_count: usize,
    format: &'static str,
}

impl Image {
    /// Open an image from a single file or the first segment of a set
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ImageOpen(format!("{} does not exist", path.display())));
        }

        let (backend, size, segment_count, format) = if ewf::is_ewf(path) {
            let reader = EwfReader::open(path)?;
            let size = reader.media_size();
            let count = reader.segment_count();
            (ImageBackend::Ewf(reader), size, count, "ewf")
        } else {
            let mut segments = Vec::new();
            let mut start = 0u64;
            for segment_path in raw_segment_paths(path) {
                let file = File::open(&segment_path)
                    .map_err(|e| Error::ImageOpen(format!("{}: {}", segment_path.display(), e)))?;
                let len = file.metadata()?.len();
                segments.push(RawSegment { file, start, len });
                start += len;
            }
            let count = segments.len();
            (ImageBackend::Raw(segments), start, count, "raw")
        };

        if size == 0 {
            return Err(Error::ImageOpen(format!("{} has zero media size", path.display())));
        }
        log::info!(
            "Opened {} image {} ({} segment(s), {} bytes)",
            format,
            path.display(),
            segment_count,
            size
        );

        Ok(Self {
            path: path.to_path_buf(),
            backend: Mutex::new(backend),
            size,
            segment_count,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total logical media size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Container format name ("raw" or "ewf")
    pub fn format(&self) -> &'static str {
        self.format
    }

    /// Read up to `buf.len()` bytes at `offset`, clamped to the media end
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let wanted = buf.len().min((self.size - offset) as usize);
        let mut backend = self.backend.lock();
        backend.read_at(offset, &mut buf[..wanted])
    }

    /// Read exactly `len` bytes at `offset`
    pub fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.read_at(offset, &mut buf)?;
        if n < len {
            return Err(Error::Read(format!(
                "short read at 0x{:X}: wanted {} bytes, got {}",
                offset, len, n
            )));
        }
        Ok(buf)
    }
}

/// Numbered split images: `disk.001` -> `disk.002` ... with the same digit width
fn raw_segment_paths(first: &Path) -> Vec<PathBuf> {
    let mut paths = vec![first.to_path_buf()];
    let ext = match first.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_digit()) => ext.to_string(),
        _ => return paths,
    };
    let width = ext.len();
    let mut number: u64 = match ext.parse() {
        Ok(n) => n,
        Err(_) => return paths,
    };
    loop {
        number += 1;
        let candidate = first.with_extension(format!("{:0width$}", number, width = width));
        if !candidate.is_file() {
            break;
        }
        paths.push(candidate);
    }
    paths
}
