//! Partition table enumeration (MBR with extended chains, GPT) and NTFS
//! volume selection.

use crate::error::{Error, Result};
use crate::image::{Image, SECTOR_SIZE};
use crate::text::{le_u32, le_u64, utf16le_to_string};
use serde::{Deserialize, Serialize};

const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";
const MAX_EBR_CHAIN: usize = 128;
const MAX_GPT_ENTRIES: usize = 1024;

const GPT_BASIC_DATA: &str = "EBD0A0A2-B9E5-4433-87C0-68B99A26C7C7";
const GPT_EFI_SYSTEM: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
const GPT_MS_RESERVED: &str = "E3C9E316-0B5C-4DB8-817D-F92DF00215AE";
const GPT_MS_RECOVERY: &str = "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC";

/// One entry of the image's partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Position in enumeration order
    pub index: usize,
    /// Byte offset of the first sector
    pub start_offset: u64,
    /// Length in bytes
    pub length: u64,
    /// MBR partition type byte, when the partition came from an MBR
    pub type_code: Option<u8>,
    /// GPT partition type GUID, when the partition came from a GPT
    pub type_guid: Option<String>,
    /// Human-readable type description
    pub type_descriptor: String,
}

impl Partition {
    /// Whether this partition is typed as NTFS
    pub fn is_ntfs(&self) -> bool {
        self.type_descriptor.to_ascii_lowercase().contains("ntfs") || self.type_code == Some(0x07)
    }
}

/// Read the partition table of `image`
pub fn enumerate_partitions(image: &Image) -> Result<Vec<Partition>> {
    if image.size() < SECTOR_SIZE {
        return Ok(Vec::new());
    }
    let boot = image.read_exact_at(0, SECTOR_SIZE as usize)?;

    // A volume image without any partition table
    if &boot[3..11] == NTFS_OEM_ID {
        log::info!("Image starts with an NTFS boot sector; treating it as a bare volume");
        return Ok(vec![Partition {
            index: 0,
            start_offset: 0,
            length: image.size(),
            type_code: None,
            type_guid: None,
            type_descriptor: "NTFS volume (no partition table)".to_string(),
        }]);
    }

    if boot[510] != 0x55 || boot[511] != 0xAA {
        log::warn!("No MBR boot signature at sector 0");
        return Ok(Vec::new());
    }

    let entries = mbr_entries(&boot);
    if entries.iter().any(|e| e.type_code == 0xEE) {
        if let Some(partitions) = gpt_partitions(image)? {
            return Ok(partitions);
        }
        log::warn!("Protective MBR present but GPT header is unreadable");
    }

    let mut partitions = Vec::new();
    for entry in entries {
        if is_extended(entry.type_code) {
            walk_extended(image, entry.start_lba, &mut partitions)?;
        } else {
            push_mbr_partition(image, &mut partitions, entry.type_code, entry.start_lba, entry.sector_count);
        }
    }
    Ok(partitions)
}

/// First NTFS-typed partition, or [`Error::NoFilesystemFound`]
pub fn select_ntfs(partitions: &[Partition]) -> Result<&Partition> {
    partitions
        .iter()
        .find(|p| p.is_ntfs())
        .ok_or(Error::NoFilesystemFound)
}

#[derive(Debug, Clone, Copy)]
struct MbrEntry {
    type_code: u8,
    start_lba: u64,
    sector_count: u64,
}

fn mbr_entries(sector: &[u8]) -> Vec<MbrEntry> {
    (0..4)
        .filter_map(|i| {
            let base = 446 + i * 16;
            let type_code = *sector.get(base + 4)?;
            let start_lba = u64::from(le_u32(sector, base + 8)?);
            let sector_count = u64::from(le_u32(sector, base + 12)?);
            if type_code == 0 || sector_count == 0 {
                return None;
            }
            Some(MbrEntry {
                type_code,
                start_lba,
                sector_count,
            })
        })
        .collect()
}

fn is_extended(type_code: u8) -> bool {
    matches!(type_code, 0x05 | 0x0F | 0x85)
}

fn walk_extended(image: &Image, extended_lba: u64, partitions: &mut Vec<Partition>) -> Result<()> {
    let mut ebr_lba = extended_lba;
    for _ in 0..MAX_EBR_CHAIN {
        let sector = match image.read_exact_at(ebr_lba * SECTOR_SIZE, SECTOR_SIZE as usize) {
            Ok(sector) => sector,
            Err(e) => {
                log::warn!("Extended partition chain broken at LBA {}: {}", ebr_lba, e);
                break;
            }
        };
        if sector[510] != 0x55 || sector[511] != 0xAA {
            break;
        }
        let entries = mbr_entries(&sector);
        let mut next = None;
        for (slot, entry) in entries.iter().enumerate() {
            if is_extended(entry.type_code) {
                next = Some(extended_lba + entry.start_lba);
            } else if slot == 0 {
                push_mbr_partition(
                    image,
                    partitions,
                    entry.type_code,
                    ebr_lba + entry.start_lba,
                    entry.sector_count,
                );
            }
        }
        match next {
            Some(lba) if lba != ebr_lba => ebr_lba = lba,
            _ => break,
        }
    }
    Ok(())
}

fn push_mbr_partition(image: &Image, partitions: &mut Vec<Partition>, type_code: u8, start_lba: u64, sectors: u64) {
    let start_offset = start_lba * SECTOR_SIZE;
    let mut type_descriptor = mbr_type_descriptor(type_code).to_string();
    if type_code == 0x07 && !has_ntfs_boot_sector(image, start_offset) {
        type_descriptor = "IFS (0x07, no NTFS boot sector)".to_string();
    }
    partitions.push(Partition {
        index: partitions.len(),
        start_offset,
        length: sectors * SECTOR_SIZE,
        type_code: Some(type_code),
        type_guid: None,
        type_descriptor,
    });
}

fn mbr_type_descriptor(code: u8) -> &'static str {
    match code {
        0x01 => "FAT12",
        0x04 | 0x06 | 0x0E => "FAT16",
        0x07 => "NTFS (0x07)",
        0x0B | 0x0C => "FAT32",
        0x12 => "OEM diagnostics",
        0x17 => "Hidden IFS",
        0x27 => "Windows recovery environment",
        0x42 => "Windows dynamic disk (LDM)",
        0x82 => "Linux swap",
        0x83 => "Linux",
        0x8E => "Linux LVM",
        0xA5 => "FreeBSD",
        0xAF => "Apple HFS+",
        0xEE => "GPT protective",
        0xEF => "EFI system",
        _ => "Unknown",
    }
}

fn has_ntfs_boot_sector(image: &Image, offset: u64) -> bool {
    image
        .read_exact_at(offset, 16)
        .map(|vbr| &vbr[3..11] == NTFS_OEM_ID)
        .unwrap_or(false)
}

fn gpt_partitions(image: &Image) -> Result<Option<Vec<Partition>>> {
    let header = image.read_exact_at(SECTOR_SIZE, SECTOR_SIZE as usize)?;
    if &header[..8] != b"EFI PART" {
        return Ok(None);
    }
    let entries_lba = le_u64(&header, 72).unwrap_or(2);
    let count = (le_u32(&header, 80).unwrap_or(0) as usize).min(MAX_GPT_ENTRIES);
    let entry_size = le_u32(&header, 84).unwrap_or(128) as usize;
    if !(128..=4096).contains(&entry_size) {
        return Ok(None);
    }

    let table = image.read_exact_at(entries_lba * SECTOR_SIZE, count * entry_size)?;
    let mut partitions = Vec::new();
    for raw in table.chunks_exact(entry_size) {
        if raw[..16].iter().all(|&b| b == 0) {
            continue;
        }
        let type_guid = format_guid(&raw[..16]);
        let first_lba = le_u64(raw, 32).unwrap_or(0);
        let last_lba = le_u64(raw, 40).unwrap_or(0);
        let name = utf16le_to_string(&raw[56..128]);
        let start_offset = first_lba * SECTOR_SIZE;

        let kind = match type_guid.as_str() {
            GPT_BASIC_DATA if has_ntfs_boot_sector(image, start_offset) => "NTFS (Basic data partition)",
            GPT_BASIC_DATA => "Basic data partition",
            GPT_EFI_SYSTEM => "EFI system partition",
            GPT_MS_RESERVED => "Microsoft reserved partition",
            GPT_MS_RECOVERY => "Windows recovery environment",
            _ => "Unknown GPT partition",
        };
        let type_descriptor = if name.is_empty() {
            kind.to_string()
        } else {
            format!("{} \"{}\"", kind, name)
        };

        partitions.push(Partition {
            index: partitions.len(),
            start_offset,
            length: last_lba.saturating_sub(first_lba).saturating_add(1) * SECTOR_SIZE,
            type_code: None,
            type_guid: Some(type_guid),
            type_descriptor,
        });
    }
    Ok(Some(partitions))
}

/// Mixed-endian GUID formatting used by GPT and registry class keys
pub fn format_guid(bytes: &[u8]) -> String {
    if bytes.len() < 16 {
        return String::new();
    }
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        le_u32(bytes, 0).unwrap_or(0),
        u16::from_le_bytes([bytes[4], bytes[5]]),
        u16::from_le_bytes([bytes[6], bytes[7]]),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15]
    )
}


#[cfg(test)]
mod tests {
    use super::testing::set_mbr_entry;
    use super::*;

    fn image_from(bytes: Vec<u8>) -> (tempfile::TempDir, Image) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.dd");
        std::fs::write(&path, bytes).unwrap();
        let image = Image::open(&path).unwrap();
        (dir, image)
    }

    fn ntfs_vbr(disk: &mut [u8], offset: usize) {
        disk[offset + 3..offset + 11].copy_from_slice(NTFS_OEM_ID);
    }

    #[test]
    fn test_mbr_selects_first_ntfs() {
        let mut disk = vec![0u8; 512 * 64];
        set_mbr_entry(&mut disk[..512], 0, 0x0C, 2, 8);
        set_mbr_entry(&mut disk[..512], 1, 0x07, 16, 32);
        ntfs_vbr(&mut disk, 16 * 512);
        let (_dir, image) = image_from(disk);

        let partitions = enumerate_partitions(&image).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].type_descriptor, "FAT32");
        let ntfs = select_ntfs(&partitions).unwrap();
        assert_eq!(ntfs.start_offset, 16 * 512);
        assert_eq!(ntfs.length, 32 * 512);
    }

    #[test]
    fn test_no_ntfs_is_fatal() {
        let mut disk = vec![0u8; 512 * 8];
        set_mbr_entry(&mut disk[..512], 0, 0x83, 1, 4);
        let (_dir, image) = image_from(disk);
        let partitions = enumerate_partitions(&image).unwrap();
        assert!(matches!(select_ntfs(&partitions), Err(Error::NoFilesystemFound)));
    }

    #[test]
    fn test_logical_partition_in_extended_chain() {
        let mut disk = vec![0u8; 512 * 128];
        set_mbr_entry(&mut disk[..512], 0, 0x0F, 8, 100);
        // EBR at LBA 8: logical NTFS at +2, next EBR at extended+40
        set_mbr_entry(&mut disk[8 * 512..9 * 512], 0, 0x07, 2, 20);
        set_mbr_entry(&mut disk[8 * 512..9 * 512], 1, 0x05, 40, 50);
        ntfs_vbr(&mut disk, 10 * 512);
        set_mbr_entry(&mut disk[48 * 512..49 * 512], 0, 0x83, 2, 10);
        let (_dir, image) = image_from(disk);

        let partitions = enumerate_partitions(&image).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].start_offset, 10 * 512);
        assert_eq!(partitions[1].start_offset, 50 * 512);
        assert_eq!(select_ntfs(&partitions).unwrap().index, 0);
    }

    #[test]
    fn test_bare_ntfs_volume() {
        let mut disk = vec![0u8; 4096];
        ntfs_vbr(&mut disk, 0);
        let (_dir, image) = image_from(disk);
        let partitions = enumerate_partitions(&image).unwrap();
        assert_eq!(select_ntfs(&partitions).unwrap().start_offset, 0);
    }

    #[test]
    fn test_gpt_basic_data() {
        let mut disk = vec![0u8; 512 * 96];
        set_mbr_entry(&mut disk[..512], 0, 0xEE, 1, 95);
        disk[512..520].copy_from_slice(b"EFI PART");
        disk[512 + 72..512 + 80].copy_from_slice(&2u64.to_le_bytes());
        disk[512 + 80..512 + 84].copy_from_slice(&4u32.to_le_bytes());
        disk[512 + 84..512 + 88].copy_from_slice(&128u32.to_le_bytes());

        let efi: [u8; 16] = [
            0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B,
        ];
        let basic: [u8; 16] = [
            0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB9, 0x9A, 0x26, 0xC7, 0xC7,
        ];
        let entry0 = 1024;
        disk[entry0..entry0 + 16].copy_from_slice(&efi);
        disk[entry0 + 32..entry0 + 40].copy_from_slice(&34u64.to_le_bytes());
        disk[entry0 + 40..entry0 + 48].copy_from_slice(&39u64.to_le_bytes());
        let entry1 = 1024 + 128;
        disk[entry1..entry1 + 16].copy_from_slice(&basic);
        disk[entry1 + 32..entry1 + 40].copy_from_slice(&40u64.to_le_bytes());
        disk[entry1 + 40..entry1 + 48].copy_from_slice(&95u64.to_le_bytes());
        ntfs_vbr(&mut disk, 40 * 512);
        let (_dir, image) = image_from(disk);

        let partitions = enumerate_partitions(&image).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].type_guid.as_deref(), Some(GPT_EFI_SYSTEM));
        assert_eq!(partitions[1].type_guid.as_deref(), Some(GPT_BASIC_DATA));
        let ntfs = select_ntfs(&partitions).unwrap();
        assert_eq!(ntfs.start_offset, 40 * 512);
        assert_eq!(ntfs.length, 56 * 512);
    }
}
