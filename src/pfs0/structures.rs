use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Bounds-checked little-endian u32 read at a fixed offset.
fn le_u32(data: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| Error::Corrupt(format!("{what} lies outside the available bytes")))
}

/// Bounds-checked little-endian u64 read at a fixed offset.
fn le_u64(data: &[u8], offset: usize, what: &'static str) -> Result<u64> {
    data.get(offset..offset + 8)
        .map(LittleEndian::read_u64)
        .ok_or_else(|| Error::Corrupt(format!("{what} lies outside the available bytes")))
}

/// PFS0 base header - 0x10 bytes at the very start of the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pfs0BaseHeader {
    pub num_files: u32,
    pub string_table_size: u32,
}

impl Pfs0BaseHeader {
    pub const MAGIC: &'static [u8] = b"PFS0";
    pub const SIZE: usize = 0x10;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corrupt(format!(
                "base header is {} bytes, expected {}",
                data.len(),
                Self::SIZE
            )));
        }

        if &data[0..4] != Self::MAGIC {
            return Err(Error::Corrupt(format!(
                "bad magic {:02x?}, expected \"PFS0\"",
                &data[0..4]
            )));
        }

        let num_files = le_u32(data, 4, "file count")?;
        let string_table_size = le_u32(data, 8, "string table size")?;
        // Bytes 0xC..0x10 are reserved.

        if num_files == 0 {
            return Err(Error::Corrupt("file count is zero".into()));
        }
        if string_table_size == 0 {
            return Err(Error::Corrupt("string table size is zero".into()));
        }

        Ok(Self {
            num_files,
            string_table_size,
        })
    }
}

/// One PFS0 file entry - 0x18 bytes, repeated `num_files` times immediately
/// after the base header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pfs0FileEntry {
    /// Offset of the file's payload, relative to the start of the data region
    pub data_offset: u64,
    /// Payload size in bytes
    pub file_size: u64,
    /// Byte offset of the file's name within the string table
    pub string_table_offset: u32,
}

impl Pfs0FileEntry {
    pub const SIZE: usize = 0x18;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let data_offset = le_u64(data, 0, "entry data offset")?;
        let file_size = le_u64(data, 8, "entry file size")?;
        let string_table_offset = le_u32(data, 16, "entry name offset")?;
        // Bytes 0x14..0x18 are reserved.

        Ok(Self {
            data_offset,
            file_size,
            string_table_offset,
        })
    }
}

/// Fixed-width content identifier, rendered as lowercase hex.
///
/// Content entries inside an NSP are named `"<hex>.nca"`, with metadata
/// content named `"<hex>.cnmt.nca"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId([u8; Self::LEN]);

impl ContentId {
    pub const LEN: usize = 16;

    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Candidate entry name for regular content: `"<hex>.nca"`
    pub fn nca_name(&self) -> String {
        format!("{self}.nca")
    }

    /// Candidate entry name for metadata content: `"<hex>.cnmt.nca"`
    pub fn cnmt_nca_name(&self) -> String {
        format!("{self}.cnmt.nca")
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = hex::decode(s).map_err(|_| Error::InvalidContentId(s.to_string()))?;
        let bytes: [u8; Self::LEN] = raw
            .try_into()
            .map_err(|_| Error::InvalidContentId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header_bytes(num_files: u32, string_table_size: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(Pfs0BaseHeader::SIZE);
        data.extend_from_slice(Pfs0BaseHeader::MAGIC);
        data.extend_from_slice(&num_files.to_le_bytes());
        data.extend_from_slice(&string_table_size.to_le_bytes());
        data.extend_from_slice(&[0u8; 4]);
        data
    }

    #[test]
    fn base_header_parses() {
        let header = Pfs0BaseHeader::from_bytes(&base_header_bytes(3, 42)).unwrap();
        assert_eq!(header.num_files, 3);
        assert_eq!(header.string_table_size, 42);
    }

    #[test]
    fn base_header_rejects_bad_magic() {
        let mut data = base_header_bytes(3, 42);
        data[0] = b'X';
        assert!(matches!(
            Pfs0BaseHeader::from_bytes(&data),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn base_header_rejects_zero_counts() {
        assert!(matches!(
            Pfs0BaseHeader::from_bytes(&base_header_bytes(0, 42)),
            Err(Error::Corrupt(_))
        ));
        assert!(matches!(
            Pfs0BaseHeader::from_bytes(&base_header_bytes(3, 0)),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn base_header_rejects_truncation() {
        let data = base_header_bytes(3, 42);
        assert!(matches!(
            Pfs0BaseHeader::from_bytes(&data[..8]),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn file_entry_parses() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x1000u64.to_le_bytes());
        data.extend_from_slice(&0x2345u64.to_le_bytes());
        data.extend_from_slice(&7u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 4]);

        let entry = Pfs0FileEntry::from_bytes(&data).unwrap();
        assert_eq!(entry.data_offset, 0x1000);
        assert_eq!(entry.file_size, 0x2345);
        assert_eq!(entry.string_table_offset, 7);
    }

    #[test]
    fn file_entry_rejects_truncation() {
        assert!(matches!(
            Pfs0FileEntry::from_bytes(&[0u8; 12]),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn content_id_round_trips() {
        let id: ContentId = "0123456789abcdef0123456789abcdef".parse().unwrap();
        assert_eq!(id.to_string(), "0123456789abcdef0123456789abcdef");
        assert_eq!(id.nca_name(), "0123456789abcdef0123456789abcdef.nca");
        assert_eq!(
            id.cnmt_nca_name(),
            "0123456789abcdef0123456789abcdef.cnmt.nca"
        );
    }

    #[test]
    fn content_id_rejects_bad_input() {
        assert!("not-hex".parse::<ContentId>().is_err());
        assert!("0123456789abcdef".parse::<ContentId>().is_err());
        assert!(
            "0123456789abcdef0123456789abcdef00".parse::<ContentId>().is_err()
        );
    }
}
