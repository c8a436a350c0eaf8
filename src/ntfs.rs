//! Read-only NTFS reader.
//!
//! Bootstraps from the volume boot record to the `$MFT` runlist, then serves
//! path lookups by walking `$I30` directory indexes from the root record.
//! Nothing is cached; every call reads what it needs through the shared
//! [`Image`], which serializes the underlying segment access.

use crate::datetime::filetime_to_datetime;
use crate::error::{Error, Result};
use crate::fs::{FilesystemEntry, FilesystemView};
use crate::image::Image;
use crate::text::{join_path, le_u16, le_u32, le_u64, utf16le_to_string};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

pub const ATTR_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_DATA: u32 = 0x80;
pub const ATTR_INDEX_ROOT: u32 = 0x90;
pub const ATTR_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_BITMAP: u32 = 0xB0;
const ATTR_END: u32 = 0xFFFF_FFFF;

const ROOT_RECORD: u64 = 5;
const FIRST_USER_RECORD: u64 = 16;
const FIXUP_STRIDE: usize = 512;
const DIRECTORY_INDEX: &str = "$I30";
const FILE_NAME_IS_DIRECTORY: u32 = 0x1000_0000;
const NAMESPACE_DOS: u8 = 2;
const MAX_EXTENSION_RECORDS: usize = 512;
/// Largest piece read from the image at once when copying a file out
const COPY_CHUNK: u64 = 1024 * 1024;

bitflags! {
    /// MFT record header flags
    pub struct RecordFlags: u16 {
        const IN_USE    = 0x0001;
        const DIRECTORY = 0x0002;
    }
}

bitflags! {
    /// Attribute header flags
    pub struct AttributeFlags: u16 {
        const COMPRESSED = 0x0001;
        const ENCRYPTED  = 0x4000;
        const SPARSE     = 0x8000;
    }
}

/// Volume geometry decoded from the boot sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub bytes_per_sector: u64,
    pub cluster_size: u64,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_record_size: u64,
    pub index_record_size: u64,
}

impl Geometry {
    /// Parse an NTFS boot sector
    pub fn parse(boot: &[u8]) -> Result<Self> {
        if boot.len() < 512 || &boot[3..11] != b"NTFS    " {
            return Err(Error::Mount("missing NTFS boot sector signature".to_string()));
        }
        let mut cursor = Cursor::new(&boot[11..]);
        let bytes_per_sector = u64::from(cursor.read_u16::<LittleEndian>()?);
        let raw_spc = cursor.read_u8()?;
        if !bytes_per_sector.is_power_of_two() || !(256..=4096).contains(&bytes_per_sector) {
            return Err(Error::Mount(format!("invalid bytes per sector {}", bytes_per_sector)));
        }
        let sectors_per_cluster = if raw_spc > 0x80 {
            1u64 << (256 - u32::from(raw_spc)).min(31)
        } else {
            u64::from(raw_spc)
        };
        if sectors_per_cluster == 0 {
            return Err(Error::Mount("zero sectors per cluster".to_string()));
        }
        let cluster_size = bytes_per_sector * sectors_per_cluster;

        let total_sectors = le_u64(boot, 40).unwrap_or(0);
        let mft_lcn = le_u64(boot, 48).unwrap_or(0);
        let mft_record_size = record_size(boot[64] as i8, cluster_size);
        let index_record_size = record_size(boot[68] as i8, cluster_size);
        if !(256..=65536).contains(&mft_record_size) || !(256..=65536).contains(&index_record_size) {
            return Err(Error::Mount(format!(
                "implausible record sizes (MFT {}, index {})",
                mft_record_size, index_record_size
            )));
        }

        Ok(Self {
            bytes_per_sector,
            cluster_size,
            total_sectors,
            mft_lcn,
            mft_record_size,
            index_record_size,
        })
    }

    pub fn volume_size(&self) -> u64 {
        self.total_sectors.saturating_mul(self.bytes_per_sector)
    }
}

fn record_size(raw: i8, cluster_size: u64) -> u64 {
    if raw < 0 {
        1u64 << u32::from(raw.unsigned_abs()).min(31)
    } else {
        u64::from(raw as u8) * cluster_size
    }
}

/// One run of a non-resident attribute, in clusters. `lcn` is `None` for sparse runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    pub lcn: Option<u64>,
    pub length: u64,
}

/// Decode an NTFS mapping-pairs array into absolute runs
pub fn decode_runlist(data: &[u8]) -> Result<Vec<DataRun>> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut lcn: i64 = 0;

    while let Some(&header) = data.get(pos) {
        if header == 0 {
            break;
        }
        let len_size = (header & 0x0F) as usize;
        let off_size = (header >> 4) as usize;
        if len_size == 0 || len_size > 8 || off_size > 8 {
            return Err(Error::Parse(format!("invalid run header 0x{:02X}", header)));
        }
        let len_start = pos + 1;
        let off_start = len_start + len_size;
        let next = off_start + off_size;
        let (len_bytes, off_bytes) = match (data.get(len_start..off_start), data.get(off_start..next)) {
            (Some(l), Some(o)) => (l, o),
            _ => return Err(Error::Parse("truncated runlist".to_string())),
        };
        pos = next;

        let length = len_bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        if off_size == 0 {
            runs.push(DataRun { lcn: None, length });
            continue;
        }
        let raw = off_bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let delta = if off_size < 8 && off_bytes[off_size - 1] & 0x80 != 0 {
            raw as i64 - (1i64 << (off_size * 8))
        } else {
            raw as i64
        };
        lcn = lcn
            .checked_add(delta)
            .filter(|v| *v >= 0)
            .ok_or_else(|| Error::Parse("runlist LCN out of range".to_string()))?;
        runs.push(DataRun {
            lcn: Some(lcn as u64),
            length,
        });
    }
    Ok(runs)
}

/// Attribute content
#[derive(Debug, Clone)]
pub enum AttributeBody {
    Resident(Vec<u8>),
    NonResident {
        start_vcn: u64,
        runs: Vec<DataRun>,
        data_size: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub type_code: u32,
    pub name: String,
    pub flags: AttributeFlags,
    pub body: AttributeBody,
}

/// A decoded MFT record
#[derive(Debug, Clone)]
pub struct MftRecord {
    pub number: u64,
    pub flags: RecordFlags,
    pub base_record: u64,
    pub attributes: Vec<Attribute>,
}

/// $FILE_NAME attribute content as found in records and index keys
#[derive(Debug, Clone)]
pub struct FileName {
    pub parent: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub real_size: u64,
    pub flags: u32,
    pub namespace: u8,
    pub name: String,
}

impl FileName {
    pub fn parse(content: &[u8]) -> Option<Self> {
        let name_len = *content.get(64)? as usize;
        let namespace = *content.get(65)?;
        let name_bytes = content.get(66..66 + name_len * 2)?;
        Some(Self {
            parent: le_u64(content, 0)? & 0xFFFF_FFFF_FFFF,
            created: filetime_to_datetime(le_u64(content, 8)?),
            modified: filetime_to_datetime(le_u64(content, 16)?),
            mft_modified: filetime_to_datetime(le_u64(content, 24)?),
            accessed: filetime_to_datetime(le_u64(content, 32)?),
            real_size: le_u64(content, 48)?,
            flags: le_u32(content, 56)?,
            namespace,
            name: utf16le_to_string(name_bytes),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FILE_NAME_IS_DIRECTORY != 0
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    record: u64,
    file_name: FileName,
}

/// Apply the update sequence array of a multi-sector record in place
pub fn apply_fixups(buffer: &mut [u8]) -> Result<()> {
    let usa_offset = le_u16(buffer, 4).unwrap_or(0) as usize;
    let usa_count = le_u16(buffer, 6).unwrap_or(0) as usize;
    if usa_count <= 1 {
        return Ok(());
    }
    let usa_end = usa_offset + usa_count * 2;
    if usa_end > buffer.len() {
        return Err(Error::Parse("update sequence array out of bounds".to_string()));
    }
    let usa = buffer[usa_offset..usa_end].to_vec();
    for stride in 0..usa_count - 1 {
        let pos = (stride + 1) * FIXUP_STRIDE - 2;
        if pos + 2 > buffer.len() {
            break;
        }
        if buffer[pos..pos + 2] != usa[..2] {
            return Err(Error::Parse(format!("fixup mismatch in sector {}", stride)));
        }
        buffer[pos] = usa[2 + stride * 2];
        buffer[pos + 1] = usa[3 + stride * 2];
    }
    Ok(())
}

/// Decode one MFT record buffer (fixups are applied here)
pub fn parse_record(mut buffer: Vec<u8>, number: u64) -> Result<MftRecord> {
    if buffer.len() < 48 || &buffer[..4] != b"FILE" {
        return Err(Error::Parse(format!("record {} has no FILE signature", number)));
    }
    apply_fixups(&mut buffer)?;

    let first_attribute = le_u16(&buffer, 20).unwrap_or(0) as usize;
    let flags = RecordFlags::from_bits_truncate(le_u16(&buffer, 22).unwrap_or(0));
    let used = (le_u32(&buffer, 24).unwrap_or(0) as usize).min(buffer.len());
    let base_record = le_u64(&buffer, 32).unwrap_or(0) & 0xFFFF_FFFF_FFFF;

    let mut attributes = Vec::new();
    let mut offset = first_attribute;
    while offset + 16 <= used {
        let type_code = le_u32(&buffer, offset).unwrap_or(ATTR_END);
        if type_code == ATTR_END {
            break;
        }
        let length = le_u32(&buffer, offset + 4).unwrap_or(0) as usize;
        if length < 16 || offset + length > used {
            log::debug!("record {}: attribute at 0x{:X} overruns the record", number, offset);
            break;
        }
        match parse_attribute(&buffer[offset..offset + length]) {
            Ok(attribute) => attributes.push(attribute),
            Err(e) => log::debug!("record {}: skipping attribute 0x{:X}: {}", number, type_code, e),
        }
        offset += length;
    }

    Ok(MftRecord {
        number,
        flags,
        base_record,
        attributes,
    })
}

fn parse_attribute(attr: &[u8]) -> Result<Attribute> {
    let short = || Error::Parse("attribute header truncated".to_string());
    let type_code = le_u32(attr, 0).ok_or_else(short)?;
    let non_resident = *attr.get(8).ok_or_else(short)? != 0;
    let name_len = *attr.get(9).ok_or_else(short)? as usize;
    let name_offset = le_u16(attr, 10).ok_or_else(short)? as usize;
    let flags = AttributeFlags::from_bits_truncate(le_u16(attr, 12).ok_or_else(short)?);
    let name = if name_len > 0 {
        attr.get(name_offset..name_offset + name_len * 2)
            .map(utf16le_to_string)
            .ok_or_else(short)?
    } else {
        String::new()
    };

    let body = if non_resident {
        let start_vcn = le_u64(attr, 16).ok_or_else(short)?;
        let runs_offset = le_u16(attr, 32).ok_or_else(short)? as usize;
        let data_size = le_u64(attr, 48).ok_or_else(short)?;
        let runs = decode_runlist(attr.get(runs_offset..).ok_or_else(short)?)?;
        AttributeBody::NonResident {
            start_vcn,
            runs,
            data_size,
        }
    } else {
        let value_len = le_u32(attr, 16).ok_or_else(short)? as usize;
        let value_offset = le_u16(attr, 20).ok_or_else(short)? as usize;
        let value = attr
            .get(value_offset..value_offset + value_len)
            .ok_or_else(|| Error::Parse("resident value overruns attribute".to_string()))?;
        AttributeBody::Resident(value.to_vec())
    };

    Ok(Attribute {
        type_code,
        name,
        flags,
        body,
    })
}

/// Extension record numbers referenced by an `$ATTRIBUTE_LIST`
fn attribute_list_records(list: &[u8]) -> Vec<u64> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos + 26 <= list.len() {
        let entry_len = le_u16(list, pos + 4).unwrap_or(0) as usize;
        if entry_len < 26 {
            break;
        }
        if let Some(reference) = le_u64(list, pos + 16) {
            records.push(reference & 0xFFFF_FFFF_FFFF);
        }
        pos += entry_len;
    }
    records.sort_unstable();
    records.dedup();
    records
}

fn parse_index_entries(data: &[u8], start: usize, end: usize, out: &mut Vec<IndexEntry>) {
    let end = end.min(data.len());
    let mut pos = start;
    while pos + 16 <= end {
        let reference = le_u64(data, pos).unwrap_or(0);
        let entry_len = le_u16(data, pos + 8).unwrap_or(0) as usize;
        let key_len = le_u16(data, pos + 10).unwrap_or(0) as usize;
        let flags = le_u32(data, pos + 12).unwrap_or(0);
        if flags & 0x02 != 0 || entry_len < 16 || pos + entry_len > end {
            break;
        }
        if let Some(file_name) = data.get(pos + 16..pos + 16 + key_len).and_then(FileName::parse) {
            out.push(IndexEntry {
                record: reference & 0xFFFF_FFFF_FFFF,
                file_name,
            });
        }
        pos += entry_len;
    }
}

/// Mounted NTFS volume implementing [`FilesystemView`]
pub struct NtfsView {
    image: Arc<Image>,
    offset: u64,
    geometry: Geometry,
    volume_size: u64,
    mft_runs: Vec<DataRun>,
}

impl NtfsView {
    /// Mount the NTFS volume starting at byte `offset` of `image`
    pub fn mount(image: Arc<Image>, offset: u64) -> Result<Self> {
        let boot = image
            .read_exact_at(offset, 512)
            .map_err(|e| Error::Mount(format!("cannot read boot sector at 0x{:X}: {}", offset, e)))?;
        let geometry = Geometry::parse(&boot)?;
        let available = image.size().saturating_sub(offset);
        let volume_size = match geometry.volume_size() {
            0 => available,
            declared => declared.min(available),
        };

        let mut view = Self {
            image,
            offset,
            geometry,
            volume_size,
            mft_runs: Vec::new(),
        };

        let mft_start = geometry.mft_lcn.saturating_mul(geometry.cluster_size);
        let raw = view
            .read_volume(mft_start, geometry.mft_record_size as usize)
            .map_err(|e| Error::Mount(format!("cannot read $MFT record 0: {}", e)))?;
        let record = parse_record(raw, 0).map_err(|e| Error::Mount(format!("$MFT record 0: {}", e)))?;
        view.mft_runs = Self::stream_runs(&record.attributes, ATTR_DATA, "")
            .ok_or_else(|| Error::Mount("$MFT has no non-resident $DATA".to_string()))?;

        // A fragmented $MFT keeps further extents in extension records
        if record.attributes.iter().any(|a| a.type_code == ATTR_ATTRIBUTE_LIST) {
            let attributes = view.collect_attributes(record)?;
            if let Some(runs) = Self::stream_runs(&attributes, ATTR_DATA, "") {
                view.mft_runs = runs;
            }
        }
        view.check_runs(&view.mft_runs)
            .map_err(|e| Error::Mount(format!("$MFT runlist: {}", e)))?;

        log::info!(
            "Mounted NTFS at 0x{:X}: cluster {} bytes, MFT record {} bytes, volume {} bytes",
            offset,
            geometry.cluster_size,
            geometry.mft_record_size,
            volume_size
        );
        Ok(view)
    }

    pub fn volume_offset(&self) -> u64 {
        self.offset
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn read_volume(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        let end = position
            .checked_add(len as u64)
            .ok_or_else(|| Error::Read("volume offset overflow".to_string()))?;
        if end > self.volume_size {
            return Err(Error::Read(format!(
                "read of {} bytes at 0x{:X} exceeds volume size 0x{:X}",
                len, position, self.volume_size
            )));
        }
        self.image.read_exact_at(self.offset + position, len)
    }

    /// Every allocated run must end inside the volume
    fn check_runs(&self, runs: &[DataRun]) -> Result<()> {
        let cluster = self.geometry.cluster_size;
        for run in runs {
            let Some(lcn) = run.lcn else { continue };
            let end = lcn
                .checked_add(run.length)
                .and_then(|clusters| clusters.checked_mul(cluster))
                .ok_or_else(|| Error::Read(format!("run at LCN 0x{:X} overflows", lcn)))?;
            if end > self.volume_size {
                return Err(Error::Read(format!(
                    "run at LCN 0x{:X} ends at 0x{:X}, past volume size 0x{:X}",
                    lcn, end, self.volume_size
                )));
            }
        }
        Ok(())
    }

    fn read_runs_range(&self, runs: &[DataRun], start: u64, len: usize) -> Result<Vec<u8>> {
        let cluster = self.geometry.cluster_size;
        let end = start
            .checked_add(len as u64)
            .ok_or_else(|| Error::Read("stream range overflow".to_string()))?;
        let mut out = vec![0u8; len];
        let mut run_start = 0u64;
        let mut covered = 0u64;

        for run in runs {
            let run_end = run_start.saturating_add(run.length.saturating_mul(cluster));
            if run_end > start && run_start < end {
                let from = start.max(run_start);
                let to = end.min(run_end);
                if let Some(lcn) = run.lcn {
                    let disk = lcn
                        .checked_mul(cluster)
                        .and_then(|base| base.checked_add(from - run_start))
                        .ok_or_else(|| Error::Read(format!("run at LCN 0x{:X} overflows", lcn)))?;
                    let bytes = self.read_volume(disk, (to - from) as usize)?;
                    out[(from - start) as usize..(to - start) as usize].copy_from_slice(&bytes);
                }
                covered += to - from;
            }
            run_start = run_end;
            if run_start >= end {
                break;
            }
        }

        if covered < len as u64 {
            return Err(Error::Read(format!(
                "runlist covers {} of {} requested bytes",
                covered, len
            )));
        }
        Ok(out)
    }

    fn read_record(&self, number: u64) -> Result<MftRecord> {
        let size = self.geometry.mft_record_size;
        let raw = self.read_runs_range(&self.mft_runs, number.saturating_mul(size), size as usize)?;
        parse_record(raw, number)
    }

    /// All attributes of a file, following `$ATTRIBUTE_LIST` into extension records
    fn collect_attributes(&self, record: MftRecord) -> Result<Vec<Attribute>> {
        let number = record.number;
        let mut attributes = record.attributes;
        let list = match attributes.iter().find(|a| a.type_code == ATTR_ATTRIBUTE_LIST) {
            Some(list) => self.attribute_content(list)?,
            None => return Ok(attributes),
        };

        for extension in attribute_list_records(&list)
            .into_iter()
            .filter(|&r| r != number)
            .take(MAX_EXTENSION_RECORDS)
        {
            match self.read_record(extension) {
                Ok(ext) if ext.base_record == number => attributes.extend(ext.attributes),
                Ok(_) => log::debug!("record {} is not an extension of {}", extension, number),
                Err(e) => log::warn!("extension record {} of {} unreadable: {}", extension, number, e),
            }
        }
        Ok(attributes)
    }

    fn attribute_content(&self, attribute: &Attribute) -> Result<Vec<u8>> {
        match &attribute.body {
            AttributeBody::Resident(data) => Ok(data.clone()),
            AttributeBody::NonResident { runs, data_size, .. } => self.read_stream(runs, *data_size),
        }
    }

    fn check_stream_size(&self, data_size: u64) -> Result<()> {
        if data_size > self.volume_size {
            return Err(Error::Read(format!(
                "declared size {} exceeds volume size {}",
                data_size, self.volume_size
            )));
        }
        Ok(())
    }

    fn read_stream(&self, runs: &[DataRun], data_size: u64) -> Result<Vec<u8>> {
        self.check_stream_size(data_size)?;
        self.read_runs_range(runs, 0, data_size as usize)
    }

    /// First extent of a stream: the resident value or the VCN 0 attribute
    fn first_extent<'a>(attributes: &'a [Attribute], type_code: u32, name: &str) -> Option<&'a Attribute> {
        attributes.iter().find(|a| {
            a.type_code == type_code
                && a.name == name
                && match &a.body {
                    AttributeBody::Resident(_) => true,
                    AttributeBody::NonResident { start_vcn, .. } => *start_vcn == 0,
                }
        })
    }

    /// Runlist of a named stream assembled from all of its extents in VCN order
    fn stream_runs(attributes: &[Attribute], type_code: u32, name: &str) -> Option<Vec<DataRun>> {
        let mut extents: Vec<(u64, &Vec<DataRun>)> = attributes
            .iter()
            .filter(|a| a.type_code == type_code && a.name == name)
            .filter_map(|a| match &a.body {
                AttributeBody::NonResident { start_vcn, runs, .. } => Some((*start_vcn, runs)),
                AttributeBody::Resident(_) => None,
            })
            .collect();
        if extents.is_empty() {
            return None;
        }
        extents.sort_by_key(|(vcn, _)| *vcn);
        Some(extents.into_iter().flat_map(|(_, runs)| runs.iter().copied()).collect())
    }

    /// Full content of a named stream, or `None` if the file has no such stream
    fn stream_data(&self, attributes: &[Attribute], type_code: u32, name: &str) -> Result<Option<Vec<u8>>> {
        let first = match Self::first_extent(attributes, type_code, name) {
            Some(first) => first,
            None => return Ok(None),
        };
        match &first.body {
            AttributeBody::Resident(data) => Ok(Some(data.clone())),
            AttributeBody::NonResident { data_size, .. } => {
                if first.flags.intersects(AttributeFlags::COMPRESSED | AttributeFlags::ENCRYPTED) {
                    return Err(Error::Read("compressed or encrypted stream".to_string()));
                }
                let runs = Self::stream_runs(attributes, type_code, name).unwrap_or_default();
                self.read_stream(&runs, *data_size).map(Some)
            }
        }
    }

    fn directory_entries(&self, number: u64) -> Result<Vec<IndexEntry>> {
        let record = self.read_record(number)?;
        if !record.flags.contains(RecordFlags::DIRECTORY) {
            return Err(Error::NotFound(format!("record {} is not a directory", number)));
        }
        let attributes = self.collect_attributes(record)?;

        let mut entries = Vec::new();
        if let Some(root) = self.stream_data(&attributes, ATTR_INDEX_ROOT, DIRECTORY_INDEX)? {
            let entries_offset = le_u32(&root, 16).unwrap_or(0) as usize;
            let total = le_u32(&root, 20).unwrap_or(0) as usize;
            parse_index_entries(&root, 16 + entries_offset, 16 + total, &mut entries);
        }

        match self.stream_data(&attributes, ATTR_INDEX_ALLOCATION, DIRECTORY_INDEX) {
            Ok(Some(allocation)) => {
                let bitmap = self
                    .stream_data(&attributes, ATTR_BITMAP, DIRECTORY_INDEX)
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                let block_size = self.geometry.index_record_size as usize;
                for (i, block) in allocation.chunks(block_size).enumerate() {
                    let in_use = bitmap.is_empty()
                        || bitmap.get(i / 8).map_or(false, |b| b & (1 << (i % 8)) != 0);
                    if !in_use || block.len() < block_size || &block[..4] != b"INDX" {
                        continue;
                    }
                    let mut block = block.to_vec();
                    if let Err(e) = apply_fixups(&mut block) {
                        log::debug!("record {}: index block {} skipped: {}", number, i, e);
                        continue;
                    }
                    let entries_offset = le_u32(&block, 0x18).unwrap_or(0) as usize;
                    let total = le_u32(&block, 0x1C).unwrap_or(0) as usize;
                    parse_index_entries(&block, 0x18 + entries_offset, 0x18 + total, &mut entries);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("record {}: index allocation unreadable: {}", number, e),
        }

        // One entry per child, preferring long names over DOS 8.3 aliases
        let mut order: Vec<u64> = Vec::new();
        let mut best: HashMap<u64, IndexEntry> = HashMap::new();
        for entry in entries {
            if entry.record < FIRST_USER_RECORD {
                continue;
            }
            match best.get(&entry.record) {
                Some(existing) if existing.file_name.namespace != NAMESPACE_DOS => {}
                Some(_) => {
                    best.insert(entry.record, entry);
                }
                None => {
                    order.push(entry.record);
                    best.insert(entry.record, entry);
                }
            }
        }
        Ok(order.into_iter().filter_map(|r| best.remove(&r)).collect())
    }

    fn resolve(&self, path: &str) -> Result<u64> {
        let mut current = ROOT_RECORD;
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            let wanted = component.to_lowercase();
            let entries = self
                .directory_entries(current)
                .map_err(|_| Error::NotFound(path.to_string()))?;
            current = entries
                .into_iter()
                .find(|e| e.file_name.name.to_lowercase() == wanted)
                .map(|e| e.record)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn describe(&self, dir: &str, entry: IndexEntry) -> FilesystemEntry {
        let mut described = FilesystemEntry {
            path: join_path(dir, &entry.file_name.name),
            is_directory: entry.file_name.is_directory(),
            size: entry.file_name.real_size,
            created: entry.file_name.created,
            modified: entry.file_name.modified,
            accessed: entry.file_name.accessed,
            name: entry.file_name.name,
        };

        // $STANDARD_INFORMATION carries the timestamps Explorer shows
        if let Ok(record) = self.read_record(entry.record) {
            described.is_directory = record.flags.contains(RecordFlags::DIRECTORY);
            for attribute in &record.attributes {
                match (&attribute.type_code, &attribute.body) {
                    (&ATTR_STANDARD_INFORMATION, AttributeBody::Resident(si)) => {
                        described.created = le_u64(si, 0).and_then(filetime_to_datetime);
                        described.modified = le_u64(si, 8).and_then(filetime_to_datetime);
                        described.accessed = le_u64(si, 24).and_then(filetime_to_datetime);
                    }
                    (&ATTR_DATA, AttributeBody::Resident(data)) if attribute.name.is_empty() => {
                        described.size = data.len() as u64;
                    }
                    (&ATTR_DATA, AttributeBody::NonResident { start_vcn: 0, data_size, .. })
                        if attribute.name.is_empty() =>
                    {
                        described.size = *data_size;
                    }
                    _ => {}
                }
            }
        }
        described
    }
}

impl NtfsView {
    fn file_attributes(&self, path: &str) -> Result<Vec<Attribute>> {
        let number = self.resolve(path)?;
        let record = self.read_record(number)?;
        if record.flags.contains(RecordFlags::DIRECTORY) {
            return Err(Error::Read(format!("{} is a directory", path)));
        }
        self.collect_attributes(record)
    }

    /// Copy the unnamed data stream of `path` to `out`, at most `chunk` bytes per read
    fn copy_file(&self, path: &str, out: &mut dyn Write, chunk: u64) -> Result<u64> {
        let attributes = self.file_attributes(path)?;
        let first = Self::first_extent(&attributes, ATTR_DATA, "")
            .ok_or_else(|| Error::Read(format!("{} has no data stream", path)))?;
        let data_size = match &first.body {
            AttributeBody::Resident(data) => {
                out.write_all(data)?;
                return Ok(data.len() as u64);
            }
            AttributeBody::NonResident { data_size, .. } => *data_size,
        };
        if first.flags.intersects(AttributeFlags::COMPRESSED | AttributeFlags::ENCRYPTED) {
            return Err(Error::Read("compressed or encrypted stream".to_string()));
        }
        self.check_stream_size(data_size)?;

        let runs = Self::stream_runs(&attributes, ATTR_DATA, "").unwrap_or_default();
        let mut offset = 0u64;
        while offset < data_size {
            let len = (data_size - offset).min(chunk.max(1));
            out.write_all(&self.read_runs_range(&runs, offset, len as usize)?)?;
            offset += len;
        }
        Ok(data_size)
    }
}

impl FilesystemView for NtfsView {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let attributes = self.file_attributes(path)?;
        self.stream_data(&attributes, ATTR_DATA, "")?
            .ok_or_else(|| Error::Read(format!("{} has no data stream", path)))
    }

    fn copy_to(&self, path: &str, out: &mut dyn Write) -> Result<u64> {
        self.copy_file(path, out, COPY_CHUNK)
    }

    fn list_dir(&self, path: &str) -> Vec<FilesystemEntry> {
        let entries = match self.resolve(path).and_then(|n| self.directory_entries(n)) {
            Ok(entries) => entries,
            Err(e) => {
                log::trace!("list_dir {}: {}", path, e);
                return Vec::new();
            }
        };
        let dir = if path.is_empty() { "/" } else { path };
        entries.into_iter().map(|e| self.describe(dir, e)).collect()
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builder for small synthetic NTFS volumes: 512-byte clusters,
    //! 1024-byte MFT and index records, MFT at cluster 16.

    pub const CLUSTER: usize = 512;
    pub const RECORD: usize = 1024;
    pub const MFT_LCN: usize = 16;
    pub const MFT_RECORDS: usize = 32;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn pad8(v: &mut Vec<u8>) {
        while v.len() % 8 != 0 {
            v.push(0);
        }
    }

    pub fn file_name_key(parent: u64, name: &str, is_dir: bool, size: u64, namespace: u8) -> Vec<u8> {
        let mut key = vec![0u8; 66];
        key[0..8].copy_from_slice(&(parent | (1 << 48)).to_le_bytes());
        for i in 0..4 {
            let ft = 130_000_000_000_000_000u64 + i as u64;
            key[8 + i * 8..16 + i * 8].copy_from_slice(&ft.to_le_bytes());
        }
        key[48..56].copy_from_slice(&size.to_le_bytes());
        let flags: u32 = if is_dir { 0x1000_0000 } else { 0x20 };
        key[56..60].copy_from_slice(&flags.to_le_bytes());
        key[64] = name.encode_utf16().count() as u8;
        key[65] = namespace;
        key.extend(utf16(name));
        key
    }

    pub fn index_entry(record: u64, key: &[u8]) -> Vec<u8> {
        let mut e = vec![0u8; 16];
        e[0..8].copy_from_slice(&(record | (1 << 48)).to_le_bytes());
        e[10..12].copy_from_slice(&(key.len() as u16).to_le_bytes());
        e.extend_from_slice(key);
        pad8(&mut e);
        let len = e.len() as u16;
        e[8..10].copy_from_slice(&len.to_le_bytes());
        e
    }

    pub fn end_entry() -> Vec<u8> {
        let mut e = vec![0u8; 16];
        e[8..10].copy_from_slice(&16u16.to_le_bytes());
        e[12..16].copy_from_slice(&2u32.to_le_bytes());
        e
    }

    pub fn resident(type_code: u32, name: &str, value: &[u8]) -> Vec<u8> {
        let name16 = utf16(name);
        let mut a = vec![0u8; 24];
        a[0..4].copy_from_slice(&type_code.to_le_bytes());
        a[9] = name.encode_utf16().count() as u8;
        a[10..12].copy_from_slice(&24u16.to_le_bytes());
        a.extend(name16);
        pad8(&mut a);
        let value_offset = a.len() as u16;
        a[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
        a[20..22].copy_from_slice(&value_offset.to_le_bytes());
        a.extend_from_slice(value);
        pad8(&mut a);
        let len = a.len() as u32;
        a[4..8].copy_from_slice(&len.to_le_bytes());
        a
    }

    pub fn non_resident(type_code: u32, name: &str, runlist: &[u8], data_size: u64, clusters: u64) -> Vec<u8> {
        let mut a = vec![0u8; 64];
        a[0..4].copy_from_slice(&type_code.to_le_bytes());
        a[8] = 1;
        a[9] = name.encode_utf16().count() as u8;
        a[10..12].copy_from_slice(&64u16.to_le_bytes());
        a[24..32].copy_from_slice(&clusters.saturating_sub(1).to_le_bytes());
        a[40..48].copy_from_slice(&(clusters * CLUSTER as u64).to_le_bytes());
        a[48..56].copy_from_slice(&data_size.to_le_bytes());
        a[56..64].copy_from_slice(&data_size.to_le_bytes());
        a.extend(utf16(name));
        pad8(&mut a);
        let runs_offset = a.len() as u16;
        a[32..34].copy_from_slice(&runs_offset.to_le_bytes());
        a.extend_from_slice(runlist);
        a.push(0);
        pad8(&mut a);
        let len = a.len() as u32;
        a[4..8].copy_from_slice(&len.to_le_bytes());
        a
    }

    pub fn standard_information(filetime: u64) -> Vec<u8> {
        let mut si = vec![0u8; 48];
        for i in 0..4 {
            si[i * 8..i * 8 + 8].copy_from_slice(&filetime.to_le_bytes());
        }
        resident(0x10, "", &si)
    }

    pub fn index_root(entries: &[Vec<u8>], large: bool) -> Vec<u8> {
        let mut body: Vec<u8> = entries.concat();
        body.extend(end_entry());
        let mut v = vec![0u8; 32];
        v[0..4].copy_from_slice(&0x30u32.to_le_bytes());
        v[4..8].copy_from_slice(&1u32.to_le_bytes());
        v[8..12].copy_from_slice(&(RECORD as u32).to_le_bytes());
        v[12] = 2;
        v[16..20].copy_from_slice(&16u32.to_le_bytes());
        v[20..24].copy_from_slice(&(16 + body.len() as u32).to_le_bytes());
        v[24..28].copy_from_slice(&(16 + body.len() as u32).to_le_bytes());
        v[28] = if large { 1 } else { 0 };
        v.extend(body);
        resident(0x90, "$I30", &v)
    }

    fn seal(mut buf: Vec<u8>, usa_offset: usize) -> Vec<u8> {
        let usn = [0x07u8, 0x00];
        let sectors = buf.len() / 512;
        buf[4..6].copy_from_slice(&(usa_offset as u16).to_le_bytes());
        buf[6..8].copy_from_slice(&((sectors + 1) as u16).to_le_bytes());
        buf[usa_offset..usa_offset + 2].copy_from_slice(&usn);
        for s in 0..sectors {
            let pos = (s + 1) * 512 - 2;
            let original = [buf[pos], buf[pos + 1]];
            buf[usa_offset + 2 + s * 2..usa_offset + 4 + s * 2].copy_from_slice(&original);
            buf[pos..pos + 2].copy_from_slice(&usn);
        }
        buf
    }

    pub fn record(number: u64, directory: bool, attributes: &[Vec<u8>]) -> Vec<u8> {
        record_with_base(number, directory, 0, attributes)
    }

    pub fn record_with_base(number: u64, directory: bool, base: u64, attributes: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD];
        buf[0..4].copy_from_slice(b"FILE");
        buf[16..18].copy_from_slice(&1u16.to_le_bytes());
        buf[20..22].copy_from_slice(&56u16.to_le_bytes());
        let flags: u16 = if directory { 0x03 } else { 0x01 };
        buf[22..24].copy_from_slice(&flags.to_le_bytes());
        buf[28..32].copy_from_slice(&(RECORD as u32).to_le_bytes());
        buf[32..40].copy_from_slice(&base.to_le_bytes());
        buf[44..48].copy_from_slice(&(number as u32).to_le_bytes());
        let mut offset = 56;
        for a in attributes {
            buf[offset..offset + a.len()].copy_from_slice(a);
            offset += a.len();
        }
        buf[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        buf[24..28].copy_from_slice(&((offset + 8) as u32).to_le_bytes());
        seal(buf, 48)
    }

    pub fn indx_block(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD];
        buf[0..4].copy_from_slice(b"INDX");
        let mut body: Vec<u8> = entries.concat();
        body.extend(end_entry());
        buf[0x18..0x1C].copy_from_slice(&0x28u32.to_le_bytes());
        buf[0x1C..0x20].copy_from_slice(&(0x28 + body.len() as u32).to_le_bytes());
        buf[0x20..0x24].copy_from_slice(&((RECORD - 0x18) as u32).to_le_bytes());
        buf[0x40..0x40 + body.len()].copy_from_slice(&body);
        seal(buf, 0x28)
    }

    /// A volume image with the given MFT records placed at their numbers
    /// and extra cluster contents.
    pub struct VolumeBuilder {
        pub data: Vec<u8>,
    }

    impl VolumeBuilder {
        pub fn new(total_clusters: usize) -> Self {
            let mut data = vec![0u8; total_clusters * CLUSTER];
            data[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
            data[3..11].copy_from_slice(b"NTFS    ");
            data[11..13].copy_from_slice(&512u16.to_le_bytes());
            data[13] = 1;
            data[40..48].copy_from_slice(&(total_clusters as u64).to_le_bytes());
            data[48..56].copy_from_slice(&(MFT_LCN as u64).to_le_bytes());
            data[64] = 0xF6;
            data[68] = 0xF6;
            data[510] = 0x55;
            data[511] = 0xAA;
            let mut builder = Self { data };
            let mft_clusters = (MFT_RECORDS * RECORD / CLUSTER) as u8;
            builder.put_record(
                0,
                &record(
                    0,
                    false,
                    &[non_resident(
                        0x80,
                        "",
                        &[0x11, mft_clusters, MFT_LCN as u8],
                        (MFT_RECORDS * RECORD) as u64,
                        mft_clusters as u64,
                    )],
                ),
            );
            builder
        }

        pub fn put_record(&mut self, number: usize, record: &[u8]) {
            let at = MFT_LCN * CLUSTER + number * RECORD;
            self.data[at..at + RECORD].copy_from_slice(record);
        }

        pub fn put_clusters(&mut self, lcn: usize, bytes: &[u8]) {
            let at = lcn * CLUSTER;
            self.data[at..at + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// The volume used by the reader tests:
    ///
    /// ```text
    /// /Users            (INDX-backed)
    /// /Users/alice/big.bin  (sparse non-resident)
    /// /Users/Public
    /// /Windows/notes.txt    (resident, plus DOS alias)
    /// ```
    pub fn sample_volume() -> Vec<u8> {
        let mut v = VolumeBuilder::new(128);
        let si = standard_information(131_000_000_000_000_000);

        v.put_record(
            5,
            &record(
                5,
                true,
                &[
                    si.clone(),
                    index_root(
                        &[
                            index_entry(0, &file_name_key(5, "$MFT", false, 0, 3)),
                            index_entry(16, &file_name_key(5, "Users", true, 0, 3)),
                            index_entry(17, &file_name_key(5, "Windows", true, 0, 3)),
                        ],
                        false,
                    ),
                ],
            ),
        );
        v.put_record(
            16,
            &record(
                16,
                true,
                &[
                    si.clone(),
                    index_root(&[], true),
                    non_resident(0xA0, "$I30", &[0x11, 0x02, 100], RECORD as u64, 2),
                    resident(0xB0, "$I30", &[0x01, 0, 0, 0, 0, 0, 0, 0]),
                ],
            ),
        );
        v.put_clusters(
            100,
            &indx_block(&[
                index_entry(18, &file_name_key(16, "alice", true, 0, 1)),
                index_entry(19, &file_name_key(16, "Public", true, 0, 1)),
            ]),
        );
        v.put_record(
            17,
            &record(
                17,
                true,
                &[
                    si.clone(),
                    index_root(
                        &[
                            index_entry(20, &file_name_key(17, "NOTES~1.TXT", false, 10, 2)),
                            index_entry(20, &file_name_key(17, "notes.txt", false, 10, 1)),
                        ],
                        false,
                    ),
                ],
            ),
        );
        v.put_record(
            18,
            &record(
                18,
                true,
                &[
                    si.clone(),
                    index_root(&[index_entry(21, &file_name_key(18, "big.bin", false, 0, 3))], false),
                ],
            ),
        );
        v.put_record(19, &record(19, true, &[si.clone(), index_root(&[], false)]));
        v.put_record(20, &record(20, false, &[si.clone(), resident(0x80, "", b"hello ntfs")]));
        v.put_record(
            21,
            &record(
                21,
                false,
                &[
                    si,
                    non_resident(0x80, "", &[0x11, 0x02, 110, 0x01, 0x01, 0x11, 0x01, 0x02], 1636, 4),
                ],
            ),
        );
        v.put_clusters(110, &[0xABu8; 1024]);
        v.put_clusters(112, &[0xCDu8; 512]);
        v.data
    }

    /// Sample volume whose `$MFT` record 0 carries `runlist` for its data
    pub fn volume_with_mft_runlist(runlist: &[u8]) -> Vec<u8> {
        let mut volume = sample_volume();
        let clusters = (MFT_RECORDS * RECORD / CLUSTER) as u64;
        let mft = record(0, false, &[non_resident(0x80, "", runlist, (MFT_RECORDS * RECORD) as u64, clusters)]);
        let at = MFT_LCN * CLUSTER;
        volume[at..at + RECORD].copy_from_slice(&mft);
        volume
    }
}
