//! Bounds-checked little-endian field access and Windows string decoding.

use byteorder::{ByteOrder, LittleEndian};
use encoding::all::WINDOWS_1252;
use encoding::{DecoderTrap, Encoding};

pub fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset.checked_add(2)?).map(LittleEndian::read_u16)
}

pub fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset.checked_add(4)?).map(LittleEndian::read_u32)
}

pub fn le_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset.checked_add(8)?).map(LittleEndian::read_u64)
}

/// Decode UTF-16LE, stopping at the first NUL code unit
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Decode a NUL-terminated UTF-16LE string starting at `offset`.
///
/// Returns the string and the number of bytes consumed including the
/// terminator, or `None` if no terminator exists before the end of `data`.
pub fn utf16le_z_at(data: &[u8], offset: usize) -> Option<(String, usize)> {
    let tail = data.get(offset..)?;
    let mut units = Vec::new();
    for pair in tail.chunks_exact(2) {
        let unit = LittleEndian::read_u16(pair);
        if unit == 0 {
            let consumed = (units.len() + 1) * 2;
            return Some((String::from_utf16_lossy(&units), consumed));
        }
        units.push(unit);
    }
    None
}

/// Decode an ANSI (Windows-1252) byte string, stopping at the first NUL
pub fn ansi_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    WINDOWS_1252
        .decode(&bytes[..end], DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Collect the printable ASCII characters of a byte run, stopping at the first NUL
pub fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|&b| b as char)
        .collect()
}

/// Join a volume path and a child name with a single separator
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Final component of a volume path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_utf16_stops_at_nul() {
        let mut bytes = utf16("notepad.exe");
        bytes.extend_from_slice(&[0, 0, b'X', 0]);
        assert_eq!(utf16le_to_string(&bytes), "notepad.exe");
    }

    #[test]
    fn test_utf16_z_consumed() {
        let mut bytes = utf16("EventLog");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&utf16("HOST"));
        bytes.extend_from_slice(&[0, 0]);
        let (first, used) = utf16le_z_at(&bytes, 0).unwrap();
        assert_eq!(first, "EventLog");
        assert_eq!(used, 18);
        let (second, _) = utf16le_z_at(&bytes, used).unwrap();
        assert_eq!(second, "HOST");
        assert!(utf16le_z_at(&utf16("open"), 0).is_none());
    }

    #[test]
    fn test_ansi_cp1252() {
        assert_eq!(ansi_to_string(b"caf\xe9.txt\0junk"), "café.txt");
    }

    #[test]
    fn test_bounds() {
        let data = [1u8, 0, 0, 0];
        assert_eq!(le_u32(&data, 0), Some(1));
        assert_eq!(le_u32(&data, 1), None);
        assert_eq!(le_u64(&data, usize::MAX), None);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "Users"), "/Users");
        assert_eq!(join_path("/Users/", "alice"), "/Users/alice");
        assert_eq!(file_name("/Windows/Prefetch/CMD.EXE-1234.pf"), "CMD.EXE-1234.pf");
    }
}
