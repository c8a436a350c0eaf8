//! Registry hive reader for SYSTEM, SOFTWARE and NTUSER.DAT files
//!
//! Supports:
//! - `regf` base block and `hbin` cell addressing
//! - `nk` keys with compressed (ASCII) and UTF-16 names
//! - `vk` values, resident and `db` big-data payloads
//! - `lf`, `lh`, `li` and `ri` subkey lists
//!
//! A [`Hive`] owns the file bytes; [`Key`] borrows it, so a key handle can
//! never outlive the hive it was read from.

use crate::datetime::filetime_to_datetime;
use crate::error::{Error, Result};
use crate::text::{le_u16, le_u32, le_u64, utf16le_to_string};
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

/// Hive bins start one page into the file
const HBIN_START: usize = 0x1000;
/// Maximum payload of one big-data segment
const DB_SEGMENT_SIZE: usize = 16344;
/// `ri` lists may nest; real hives use one level
const MAX_LIST_DEPTH: usize = 8;
const MAX_SUBKEYS: usize = 1 << 16;
const KEY_COMP_NAME: u16 = 0x0020;
const VALUE_COMP_NAME: u16 = 0x0001;
const DATA_RESIDENT: u32 = 0x8000_0000;

/// Registry base block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveHeader {
    /// Primary sequence number
    pub primary_sequence: u32,
    /// Secondary sequence number; differs from primary in a dirty hive
    pub secondary_sequence: u32,
    /// Last written timestamp
    pub last_written: Option<DateTime<Utc>>,
    pub major_version: u32,
    pub minor_version: u32,
    /// Root cell offset relative to the first hbin
    pub root_cell_offset: u32,
    /// Size of all hive bins
    pub hive_bins_size: u32,
}

impl HiveHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        if &signature != b"regf" {
            return Err(Error::Parse("Invalid registry signature".to_string()));
        }

        let primary_sequence = cursor.read_u32::<LittleEndian>()?;
        let secondary_sequence = cursor.read_u32::<LittleEndian>()?;
        let last_written = cursor.read_u64::<LittleEndian>()?;
        let major_version = cursor.read_u32::<LittleEndian>()?;
        let minor_version = cursor.read_u32::<LittleEndian>()?;
        let _file_type = cursor.read_u32::<LittleEndian>()?;
        let _file_format = cursor.read_u32::<LittleEndian>()?;
        let root_cell_offset = cursor.read_u32::<LittleEndian>()?;
        let hive_bins_size = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            primary_sequence,
            secondary_sequence,
            last_written: filetime_to_datetime(last_written),
            major_version,
            minor_version,
            root_cell_offset,
            hive_bins_size,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.primary_sequence != self.secondary_sequence
    }
}

/// Registry value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryValueType {
    None,
    String,
    ExpandString,
    Binary,
    DWord,
    DWordBigEndian,
    Link,
    MultiString,
    ResourceList,
    FullResourceDescriptor,
    ResourceRequirementsList,
    QWord,
    Unknown(u32),
}

impl From<u32> for RegistryValueType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::String,
            2 => Self::ExpandString,
            3 => Self::Binary,
            4 => Self::DWord,
            5 => Self::DWordBigEndian,
            6 => Self::Link,
            7 => Self::MultiString,
            8 => Self::ResourceList,
            9 => Self::FullResourceDescriptor,
            10 => Self::ResourceRequirementsList,
            11 => Self::QWord,
            other => Self::Unknown(other),
        }
    }
}

/// Decoded value content
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryData {
    None,
    String(String),
    ExpandString(String),
    Link(String),
    MultiString(Vec<String>),
    DWord(u32),
    QWord(u64),
    Binary(Vec<u8>),
}

impl RegistryData {
    fn decode(value_type: RegistryValueType, raw: &[u8]) -> Self {
        match value_type {
            RegistryValueType::None => RegistryData::None,
            RegistryValueType::String => RegistryData::String(utf16le_to_string(raw)),
            RegistryValueType::ExpandString => RegistryData::ExpandString(utf16le_to_string(raw)),
            RegistryValueType::Link => RegistryData::Link(utf16le_to_string(raw)),
            RegistryValueType::MultiString => {
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                RegistryData::MultiString(
                    units
                        .split(|&u| u == 0)
                        .filter(|s| !s.is_empty())
                        .map(String::from_utf16_lossy)
                        .collect(),
                )
            }
            RegistryValueType::DWord if raw.len() >= 4 => RegistryData::DWord(le_u32(raw, 0).unwrap_or(0)),
            RegistryValueType::DWordBigEndian if raw.len() >= 4 => {
                RegistryData::DWord(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            RegistryValueType::QWord if raw.len() >= 8 => RegistryData::QWord(le_u64(raw, 0).unwrap_or(0)),
            _ => RegistryData::Binary(raw.to_vec()),
        }
    }

    /// Text rendering: strings verbatim, numbers in decimal, multi-strings joined with `;`
    pub fn as_string(&self) -> Option<String> {
        match self {
            RegistryData::String(s) | RegistryData::ExpandString(s) | RegistryData::Link(s) => Some(s.clone()),
            RegistryData::MultiString(items) => Some(items.join(";")),
            RegistryData::DWord(v) => Some(v.to_string()),
            RegistryData::QWord(v) => Some(v.to_string()),
            RegistryData::None | RegistryData::Binary(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            RegistryData::DWord(v) => Some(*v),
            RegistryData::QWord(v) => u32::try_from(*v).ok(),
            RegistryData::String(s) | RegistryData::ExpandString(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RegistryData::DWord(v) => Some(u64::from(*v)),
            RegistryData::QWord(v) => Some(*v),
            _ => None,
        }
    }
}

/// One registry value
#[derive(Debug, Clone)]
pub struct RegistryValue {
    /// Value name; empty for the key's default value
    pub name: String,
    pub value_type: RegistryValueType,
    pub data: RegistryData,
    pub raw: Vec<u8>,
}

/// A parsed registry hive file
pub struct Hive {
    data: Vec<u8>,
    header: HiveHeader,
}

impl Hive {
    /// Validate the base block and root key of a hive image
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < HBIN_START + 32 {
            return Err(Error::Parse("Registry file too small".to_string()));
        }
        let header = HiveHeader::parse(&data)?;
        if &data[HBIN_START..HBIN_START + 4] != b"hbin" {
            return Err(Error::Parse("first hive bin signature missing".to_string()));
        }
        let hive = Self { data, header };
        hive.root()?;
        if hive.header.is_dirty() {
            log::debug!("hive sequence numbers differ; transaction logs are not replayed");
        }
        Ok(hive)
    }

    pub fn header(&self) -> &HiveHeader {
        &self.header
    }

    pub fn root(&self) -> Result<Key<'_>> {
        Key::parse(self, self.header.root_cell_offset)
    }

    /// Open a key by backslash-separated path relative to the root, ignoring case
    pub fn open_key(&self, path: &str) -> Option<Key<'_>> {
        let mut key = self.root().ok()?;
        for component in path.split('\\').filter(|c| !c.is_empty()) {
            key = key.subkey(component)?;
        }
        Some(key)
    }

    /// Payload of the cell at `offset` (relative to the first hbin), size header excluded
    fn cell(&self, offset: u32) -> Result<&[u8]> {
        let start = HBIN_START + offset as usize;
        let raw_size = le_u32(&self.data, start)
            .ok_or_else(|| Error::Parse(format!("cell 0x{:X} out of bounds", offset)))? as i32;
        let size = raw_size.unsigned_abs() as usize;
        if size < 4 {
            return Err(Error::Parse(format!("cell 0x{:X} has size {}", offset, raw_size)));
        }
        self.data
            .get(start + 4..start + size)
            .ok_or_else(|| Error::Parse(format!("cell 0x{:X} overruns the hive", offset)))
    }

    /// Key cell offsets from a subkey list, following `ri` indirection
    fn subkey_offsets(&self, list: u32, depth: usize, out: &mut Vec<u32>) -> Result<()> {
        if depth > MAX_LIST_DEPTH {
            return Err(Error::Parse("subkey list nesting too deep".to_string()));
        }
        let cell = self.cell(list)?;
        let count = le_u16(cell, 2).unwrap_or(0) as usize;
        match cell.get(..2) {
            Some(b"lf") | Some(b"lh") => {
                for i in 0..count {
                    if let Some(offset) = le_u32(cell, 4 + i * 8) {
                        out.push(offset);
                    }
                }
            }
            Some(b"li") => {
                for i in 0..count {
                    if let Some(offset) = le_u32(cell, 4 + i * 4) {
                        out.push(offset);
                    }
                }
            }
            Some(b"ri") => {
                for i in 0..count {
                    if let Some(sublist) = le_u32(cell, 4 + i * 4) {
                        self.subkey_offsets(sublist, depth + 1, out)?;
                    }
                }
            }
            other => {
                return Err(Error::Parse(format!("unknown subkey list signature {:?}", other)));
            }
        }
        if out.len() > MAX_SUBKEYS {
            return Err(Error::Parse("subkey list too large".to_string()));
        }
        Ok(())
    }

    fn value_data(&self, size_field: u32, offset: u32) -> Result<Vec<u8>> {
        if size_field & DATA_RESIDENT != 0 {
            let len = ((size_field & !DATA_RESIDENT) as usize).min(4);
            return Ok(offset.to_le_bytes()[..len].to_vec());
        }
        let size = size_field as usize;
        let cell = self.cell(offset)?;
        if size > DB_SEGMENT_SIZE && cell.get(..2) == Some(b"db") {
            return self.big_data(cell, size);
        }
        cell.get(..size)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::Parse(format!("value data at 0x{:X} shorter than {}", offset, size)))
    }

    fn big_data(&self, db: &[u8], size: usize) -> Result<Vec<u8>> {
        let count = le_u16(db, 2).unwrap_or(0) as usize;
        let list = self.cell(le_u32(db, 4).unwrap_or(0))?;
        let mut out = Vec::with_capacity(size);
        for i in 0..count {
            let segment = le_u32(list, i * 4)
                .ok_or_else(|| Error::Parse("big data segment list truncated".to_string()))?;
            let chunk = self.cell(segment)?;
            let take = chunk.len().min(DB_SEGMENT_SIZE).min(size - out.len());
            out.extend_from_slice(&chunk[..take]);
            if out.len() >= size {
                break;
            }
        }
        Ok(out)
    }
}

/// A key node borrowed from its hive
#[derive(Clone)]
pub struct Key<'a> {
    hive: &'a Hive,
    name: String,
    last_written: Option<DateTime<Utc>>,
    subkey_count: u32,
    subkey_list: u32,
    value_count: u32,
    value_list: u32,
}

impl<'a> Key<'a> {
    fn parse(hive: &'a Hive, offset: u32) -> Result<Self> {
        let cell = hive.cell(offset)?;
        if cell.get(..2) != Some(b"nk") {
            return Err(Error::Parse(format!("cell 0x{:X} is not a key node", offset)));
        }
        let short = || Error::Parse(format!("key node 0x{:X} truncated", offset));
        let flags = le_u16(cell, 2).ok_or_else(short)?;
        let name_len = le_u16(cell, 72).ok_or_else(short)? as usize;
        let name_bytes = cell.get(76..76 + name_len).ok_or_else(short)?;
        let name = if flags & KEY_COMP_NAME != 0 {
            name_bytes.iter().map(|&b| b as char).collect()
        } else {
            utf16le_to_string(name_bytes)
        };

        Ok(Self {
            hive,
            name,
            last_written: le_u64(cell, 4).and_then(filetime_to_datetime),
            subkey_count: le_u32(cell, 20).ok_or_else(short)?,
            subkey_list: le_u32(cell, 28).ok_or_else(short)?,
            value_count: le_u32(cell, 36).ok_or_else(short)?,
            value_list: le_u32(cell, 40).ok_or_else(short)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_written(&self) -> Option<DateTime<Utc>> {
        self.last_written
    }

    /// Child keys; unreadable children are skipped
    pub fn subkeys(&self) -> Vec<Key<'a>> {
        if self.subkey_count == 0 || self.subkey_list == u32::MAX {
            return Vec::new();
        }
        let mut offsets = Vec::new();
        if let Err(e) = self.hive.subkey_offsets(self.subkey_list, 0, &mut offsets) {
            log::debug!("key {}: subkey list unreadable: {}", self.name, e);
        }
        offsets
            .into_iter()
            .filter_map(|offset| match Key::parse(self.hive, offset) {
                Ok(key) => Some(key),
                Err(e) => {
                    log::debug!("key {}: skipping subkey: {}", self.name, e);
                    None
                }
            })
            .collect()
    }

    pub fn subkey(&self, name: &str) -> Option<Key<'a>> {
        let wanted = name.to_lowercase();
        self.subkeys().into_iter().find(|k| k.name.to_lowercase() == wanted)
    }

    /// Key at a backslash-separated path below this one
    pub fn open(&self, path: &str) -> Option<Key<'a>> {
        let mut key = self.clone();
        for component in path.split('\\').filter(|c| !c.is_empty()) {
            key = key.subkey(component)?;
        }
        Some(key)
    }

    /// All values; unreadable values are skipped
    pub fn values(&self) -> Vec<RegistryValue> {
        if self.value_count == 0 || self.value_list == u32::MAX {
            return Vec::new();
        }
        let list = match self.hive.cell(self.value_list) {
            Ok(list) => list,
            Err(e) => {
                log::debug!("key {}: value list unreadable: {}", self.name, e);
                return Vec::new();
            }
        };
        (0..self.value_count as usize)
            .map_while(|i| le_u32(list, i * 4))
            .filter_map(|offset| match self.parse_value(offset) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!("key {}: skipping value: {}", self.name, e);
                    None
                }
            })
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<RegistryValue> {
        let wanted = name.to_lowercase();
        self.values().into_iter().find(|v| v.name.to_lowercase() == wanted)
    }

    /// Text of a named value, if present and textual
    pub fn string_value(&self, name: &str) -> Option<String> {
        self.value(name).and_then(|v| v.data.as_string())
    }

    pub fn u32_value(&self, name: &str) -> Option<u32> {
        self.value(name).and_then(|v| v.data.as_u32())
    }

    fn parse_value(&self, offset: u32) -> Result<RegistryValue> {
        let cell = self.hive.cell(offset)?;
        if cell.get(..2) != Some(b"vk") {
            return Err(Error::Parse(format!("cell 0x{:X} is not a value", offset)));
        }
        let short = || Error::Parse(format!("value 0x{:X} truncated", offset));
        let name_len = le_u16(cell, 2).ok_or_else(short)? as usize;
        let size_field = le_u32(cell, 4).ok_or_else(short)?;
        let data_offset = le_u32(cell, 8).ok_or_else(short)?;
        let value_type = RegistryValueType::from(le_u32(cell, 12).ok_or_else(short)?);
        let flags = le_u16(cell, 16).ok_or_else(short)?;
        let name_bytes = cell.get(20..20 + name_len).ok_or_else(short)?;
        let name = if flags & VALUE_COMP_NAME != 0 {
            name_bytes.iter().map(|&b| b as char).collect()
        } else {
            utf16le_to_string(name_bytes)
        };

        let raw = if size_field & !DATA_RESIDENT == 0 {
            Vec::new()
        } else {
            self.hive.value_data(size_field, data_offset)?
        };
        Ok(RegistryValue {
            name,
            value_type,
            data: RegistryData::decode(value_type, &raw),
            raw,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn sample() -> Hive {
        let root = TestKey::new("ROOT")
            .path(
                "ControlSet001\\Control\\ComputerName",
                TestKey::new("ComputerName")
                    .written(132_000_000_000_000_000)
                    .sz("ComputerName", "WORKSTATION7"),
            )
            .path(
                "",
                TestKey::new("Select")
                    .dword("Current", 1)
                    .value("Big", 3, vec![0x5A; 40_000])
                    .value(
                        "Multi",
                        7,
                        "a\0bc\0\0".encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
                    )
                    .value("Quad", 11, 7u64.to_le_bytes().to_vec())
                    .value("Empty", 1, Vec::new()),
            );
        Hive::parse(build_hive(&root)).unwrap()
    }

    #[test]
    fn test_invalid_registry_data() {
        assert!(Hive::parse(Vec::new()).is_err());
        assert!(Hive::parse(vec![0u8; 10]).is_err());
        let mut bad = build_hive(&TestKey::new("ROOT"));
        bad[0] = b'x';
        assert!(Hive::parse(bad).is_err());
    }

    #[test]
    fn test_corrupt_root_cell_rejected() {
        let mut data = build_hive(&TestKey::new("ROOT"));
        data[0x24..0x28].copy_from_slice(&0x00FF_FFF0u32.to_le_bytes());
        assert!(Hive::parse(data).is_err());
    }

    #[test]
    fn test_case_insensitive_path_through_ri_list() {
        let hive = sample();
        let key = hive.open_key("controlset001\\CONTROL\\computername\\ComputerName").unwrap();
        assert_eq!(key.name(), "ComputerName");
        assert!(key.last_written().is_some());
        assert_eq!(key.string_value("computername").as_deref(), Some("WORKSTATION7"));
        assert!(hive.open_key("ControlSet002").is_none());
    }

    #[test]
    fn test_value_types() {
        let hive = sample();
        let select = hive.open_key("Select").unwrap();
        assert_eq!(select.u32_value("Current"), Some(1));
        assert_eq!(select.value("Big").unwrap().raw.len(), 40_000);
        assert_eq!(
            select.value("Multi").unwrap().data,
            RegistryData::MultiString(vec!["a".to_string(), "bc".to_string()])
        );
        assert_eq!(select.value("Quad").unwrap().data.as_u64(), Some(7));
        assert_eq!(select.value("Empty").unwrap().data, RegistryData::String(String::new()));
        assert!(select.value("missing").is_none());
    }

    #[test]
    fn test_subkeys_enumerated_in_order() {
        let root = TestKey::new("ROOT")
            .child(TestKey::new("B"))
            .child(TestKey::new("a"))
            .child(TestKey::new("C"));
        let hive = Hive::parse(build_hive(&root)).unwrap();
        let names: Vec<String> = hive.root().unwrap().subkeys().iter().map(|k| k.name().to_string()).collect();
        assert_eq!(names, vec!["B", "a", "C"]);
    }
}
