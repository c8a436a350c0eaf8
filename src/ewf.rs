//! Expert Witness (EWF / `.E01`) segment reader.
//!
//! Walks the section chain of every segment file, collects the chunk table,
//! and serves random-access reads by inflating one chunk at a time. Only the
//! sections needed for media access are interpreted (`volume`/`disk`,
//! `sectors`, `table`, `next`, `done`).

use crate::error::{Error, Result};
use crate::text::{le_u32, le_u64};
use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// EWF segment file signature
pub const EVF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];

const FILE_HEADER_SIZE: u64 = 13;
const SECTION_DESCRIPTOR_SIZE: u64 = 76;
const TABLE_HEADER_SIZE: usize = 24;
const MAX_SECTIONS_PER_SEGMENT: usize = 1 << 16;
/// Trailing checksum on uncompressed chunks
const CHUNK_CHECKSUM_SIZE: u64 = 4;
/// Largest chunk geometry accepted from a volume section
const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
struct ChunkLocation {
    segment: usize,
    offset: u64,
    stored_size: u64,
    compressed: bool,
}

/// Random-access reader over an EWF segment set
pub struct EwfReader {
    segments: Vec<File>,
    chunks: Vec<ChunkLocation>,
    chunk_size: u64,
    media_size: u64,
    cached: Option<(usize, Vec<u8>)>,
}

impl EwfReader {
    /// Open the first segment and every sibling segment that follows it
    pub fn open(first: &Path) -> Result<Self> {
        let paths = segment_paths(first);
        let mut segments = Vec::with_capacity(paths.len());
        let mut chunks = Vec::new();
        let mut geometry: Option<(u64, u64)> = None;

        for (index, path) in paths.iter().enumerate() {
            let mut file = File::open(path)
                .map_err(|e| Error::ImageOpen(format!("{}: {}", path.display(), e)))?;
            let mut header = [0u8; FILE_HEADER_SIZE as usize];
            file.read_exact(&mut header)
                .map_err(|e| Error::ImageOpen(format!("{}: {}", path.display(), e)))?;
            if header[..8] != EVF_SIGNATURE {
                return Err(Error::ImageOpen(format!("{} is not an EWF segment", path.display())));
            }
            Self::walk_sections(&mut file, index, &mut chunks, &mut geometry)?;
            segments.push(file);
        }

        let (chunk_size, media_size) = geometry
            .ok_or_else(|| Error::ImageOpen("EWF image has no volume section".to_string()))?;
        if chunk_size == 0 || media_size == 0 {
            return Err(Error::ImageOpen("EWF image reports zero media size".to_string()));
        }
        log::debug!(
            "EWF: {} segment(s), {} chunk(s) of {} bytes, media {} bytes",
            segments.len(),
            chunks.len(),
            chunk_size,
            media_size
        );

        Ok(Self {
            segments,
            chunks,
            chunk_size,
            media_size,
            cached: None,
        })
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn walk_sections(
        file: &mut File,
        segment: usize,
        chunks: &mut Vec<ChunkLocation>,
        geometry: &mut Option<(u64, u64)>,
    ) -> Result<()> {
        let file_len = file.metadata()?.len();
        let mut offset = FILE_HEADER_SIZE;
        let mut sectors_end: Option<u64> = None;

        for _ in 0..MAX_SECTIONS_PER_SEGMENT {
            let data_offset = match offset.checked_add(SECTION_DESCRIPTOR_SIZE) {
                Some(end) if end <= file_len => end,
                _ => break,
            };
            let mut descriptor = [0u8; SECTION_DESCRIPTOR_SIZE as usize];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut descriptor)?;

            let kind_end = descriptor[..16].iter().position(|&b| b == 0).unwrap_or(16);
            let kind = String::from_utf8_lossy(&descriptor[..kind_end]).to_string();
            let next = le_u64(&descriptor, 16).unwrap_or(0);
            let size = le_u64(&descriptor, 24).unwrap_or(0);
            let corrupt = |what: &str| Error::ImageOpen(format!("EWF segment {}: {} at 0x{:X}", segment, what, offset));

            match kind.as_str() {
                "volume" | "disk" => {
                    let data = read_section_data(file, data_offset, 24)?;
                    let sectors_per_chunk = u64::from(le_u32(&data, 8).unwrap_or(64));
                    let bytes_per_sector = u64::from(le_u32(&data, 12).unwrap_or(512));
                    let sector_count = le_u64(&data, 16).unwrap_or(0);
                    let chunk_size = sectors_per_chunk
                        .checked_mul(bytes_per_sector)
                        .filter(|&size| size <= MAX_CHUNK_SIZE)
                        .ok_or_else(|| corrupt("implausible chunk geometry"))?;
                    *geometry = Some((chunk_size, sector_count.saturating_mul(bytes_per_sector)));
                }
                "sectors" => {
                    sectors_end = Some(offset.checked_add(size).ok_or_else(|| corrupt("sectors size overflows"))?);
                }
                "table" => {
                    let header = read_section_data(file, data_offset, TABLE_HEADER_SIZE)?;
                    let count = le_u32(&header, 0).unwrap_or(0) as usize;
                    let base = le_u64(&header, 8).unwrap_or(0);
                    let available = (size.saturating_sub(SECTION_DESCRIPTOR_SIZE) as usize)
                        .saturating_sub(TABLE_HEADER_SIZE)
                        / 4;
                    let count = count.min(available);
                    let entries_offset = data_offset
                        .checked_add(TABLE_HEADER_SIZE as u64)
                        .ok_or_else(|| corrupt("table offset overflows"))?;
                    let raw = read_section_data(file, entries_offset, count * 4)?;
                    let entries: Vec<u32> = (0..count).filter_map(|i| le_u32(&raw, i * 4)).collect();
                    let table_end = sectors_end.filter(|&end| end <= offset).unwrap_or(offset);

                    let chunk_offset = |entry: u32| {
                        base.checked_add(u64::from(entry & 0x7FFF_FFFF))
                            .ok_or_else(|| corrupt("table base overflows"))
                    };
                    for (i, entry) in entries.iter().enumerate() {
                        let start = chunk_offset(*entry)?;
                        let end = match entries.get(i + 1) {
                            Some(next_entry) => chunk_offset(*next_entry)?,
                            None => table_end,
                        };
                        if end <= start {
                            log::warn!("EWF: chunk {} in segment {} has no stored bytes", chunks.len(), segment);
                        }
                        chunks.push(ChunkLocation {
                            segment,
                            offset: start,
                            stored_size: end.saturating_sub(start),
                            compressed: entry & 0x8000_0000 != 0,
                        });
                    }
                }
                "next" | "done" => break,
                _ => {}
            }

            if next == 0 || next <= offset {
                break;
            }
            offset = next;
        }
        Ok(())
    }

    fn load_chunk(&mut self, index: usize) -> Result<&[u8]> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == index);
        if !hit {
            let location = self
                .chunks
                .get(index)
                .cloned()
                .ok_or_else(|| Error::Read(format!("EWF chunk {} out of range", index)))?;
            let file = self
                .segments
                .get_mut(location.segment)
                .ok_or_else(|| Error::Read(format!("EWF segment {} missing", location.segment)))?;
            let limit = max_stored_size(self.chunk_size);
            if location.stored_size > limit {
                return Err(Error::Read(format!(
                    "EWF chunk {} stores {} bytes, more than the {} allowed for {}-byte chunks",
                    index, location.stored_size, limit, self.chunk_size
                )));
            }
            let mut stored = vec![0u8; location.stored_size as usize];
            file.seek(SeekFrom::Start(location.offset))?;
            file.read_exact(&mut stored)?;

            let mut data = if location.compressed {
                let mut inflated = Vec::with_capacity(self.chunk_size as usize);
                ZlibDecoder::new(stored.as_slice())
                    .take(self.chunk_size)
                    .read_to_end(&mut inflated)
                    .map_err(|e| Error::Read(format!("EWF chunk {} inflate failed: {}", index, e)))?;
                inflated
            } else {
                stored
            };
            data.truncate(self.chunk_size as usize);
            self.cached = Some((index, data));
        }
        match &self.cached {
            Some((_, data)) => Ok(data.as_slice()),
            None => Err(Error::Read(format!("EWF chunk {} unavailable", index))),
        }
    }

    /// Read from the logical media. Returns the number of bytes copied.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.media_size {
            return Ok(0);
        }
        let wanted = buf.len().min((self.media_size - offset) as usize);
        let chunk_size = self.chunk_size;
        let mut done = 0;
        while done < wanted {
            let position = offset + done as u64;
            let index = (position / chunk_size) as usize;
            let within = (position % chunk_size) as usize;
            let chunk = self.load_chunk(index)?;
            if within >= chunk.len() {
                break;
            }
            let n = (chunk.len() - within).min(wanted - done);
            buf[done..done + n].copy_from_slice(&chunk[within..within + n]);
            done += n;
        }
        Ok(done)
    }
}

/// Upper bound on the stored bytes of one chunk: the raw chunk plus its
/// checksum, or the zlib worst case (5 bytes per 16 KiB block plus header and trailer)
fn max_stored_size(chunk_size: u64) -> u64 {
    let zlib_overhead = 6 + 5 * (chunk_size / 16_384 + 1);
    chunk_size + CHUNK_CHECKSUM_SIZE.max(zlib_overhead)
}

fn read_section_data(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut data[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(data)
}

/// `image.E01` -> `image.E02` ... `image.E99`, `image.EAA` ... until a file is missing
fn segment_paths(first: &Path) -> Vec<PathBuf> {
    let mut paths = vec![first.to_path_buf()];
    let ext = match first.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.len() == 3 => ext.to_string(),
        _ => return paths,
    };
    let lead = match ext.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => c,
        _ => return paths,
    };
    let upper = lead.is_ascii_uppercase();

    for n in 2..(100 + 26 * 26) {
        let suffix = if n < 100 {
            format!("{}{:02}", lead, n)
        } else {
            let idx = (n - 100) as u8;
            let (a, b) = if upper { (b'A', b'A') } else { (b'a', b'a') };
            format!("{}{}{}", lead, (a + idx / 26) as char, (b + idx % 26) as char)
        };
        let candidate = first.with_extension(suffix);
        if !candidate.is_file() {
            break;
        }
        paths.push(candidate);
    }
    paths
}

/// Whether a file starts with the EWF signature
pub fn is_ewf(path: &Path) -> bool {
    let mut magic = [0u8; 8];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| magic == EVF_SIGNATURE)
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::testing::build_ewf;
    use super::*;

    fn media() -> Vec<u8> {
        (0..2048u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_ewf_reads_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.E01");
        std::fs::write(&path, build_ewf(&media())).unwrap();

        assert!(is_ewf(&path));
        let mut reader = EwfReader::open(&path).unwrap();
        assert_eq!(reader.media_size(), 2048);
        assert_eq!(reader.segment_count(), 1);

        let mut buf = vec![0u8; 600];
        let n = reader.read_at(300, &mut buf).unwrap();
        assert_eq!(n, 600);
        assert_eq!(buf, media()[300..900].to_vec());
    }

    #[test]
    fn test_ewf_read_clamped_at_media_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.E01");
        std::fs::write(&path, build_ewf(&media())).unwrap();
        let mut reader = EwfReader::open(&path).unwrap();

        let mut buf = vec![0u8; 100];
        assert_eq!(reader.read_at(2000, &mut buf).unwrap(), 48);
        assert_eq!(reader.read_at(4096, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_rejects_non_ewf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.E01");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(!is_ewf(&path));
        assert!(matches!(EwfReader::open(&path), Err(Error::ImageOpen(_))));
    }

    /// Offset of the sectors descriptor and of the table descriptor in a built image
    fn section_offsets(image: &[u8]) -> (usize, usize) {
        let sectors = FILE_HEADER_SIZE as usize + SECTION_DESCRIPTOR_SIZE as usize + 1052;
        let size = u64::from_le_bytes(image[sectors + 24..sectors + 32].try_into().unwrap());
        (sectors, sectors + size as usize)
    }

    fn open_image(image: &[u8]) -> Result<EwfReader> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.E01");
        std::fs::write(&path, image).unwrap();
        EwfReader::open(&path)
    }

    #[test]
    fn test_sectors_size_overflow_rejected() {
        let mut image = build_ewf(&media());
        let (sectors, _) = section_offsets(&image);
        image[sectors + 24..sectors + 32].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(open_image(&image), Err(Error::ImageOpen(_))));
    }

    #[test]
    fn test_table_base_overflow_rejected() {
        let mut image = build_ewf(&media());
        let (_, table) = section_offsets(&image);
        let base = table + SECTION_DESCRIPTOR_SIZE as usize + 8;
        image[base..base + 8].copy_from_slice(&(u64::MAX - 16).to_le_bytes());
        assert!(matches!(open_image(&image), Err(Error::ImageOpen(_))));
    }

    #[test]
    fn test_oversized_chunk_not_loaded() {
        let mut image = build_ewf(&media());
        let (_, table) = section_offsets(&image);
        // chunk 0 appears to span up to the second entry
        let second = table + SECTION_DESCRIPTOR_SIZE as usize + TABLE_HEADER_SIZE + 4;
        image[second..second + 4].copy_from_slice(&0x7FFF_FFF0u32.to_le_bytes());
        let mut reader = open_image(&image).unwrap();

        let mut buf = vec![0u8; 16];
        assert!(matches!(reader.read_at(0, &mut buf), Err(Error::Read(_))));
        assert!(max_stored_size(512) < 0x7FFF_0000);
    }
}
