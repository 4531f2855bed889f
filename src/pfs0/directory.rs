//! Two-phase PFS0 directory retrieval and entry lookup.
//!
//! The directory sits at the front of the container, so listing it costs
//! two ranged reads: one for the fixed-size base header, and one for the
//! entry table plus string table whose combined size the base header
//! declares. Everything afterwards is served from the retrieved bytes
//! without touching the network again.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::RangeFetch;

use super::structures::{ContentId, Pfs0BaseHeader, Pfs0FileEntry};

/// Directory of a PFS0 container read over ranged fetches.
///
/// The header is populated exactly once by [`retrieve_header`] and is
/// immutable afterwards; accessors fail with [`Error::NotReady`] before
/// that.
///
/// [`retrieve_header`]: Pfs0Directory::retrieve_header
pub struct Pfs0Directory<R: RangeFetch> {
    fetcher: Arc<R>,
    header_bytes: Vec<u8>,
}

impl<R: RangeFetch> Pfs0Directory<R> {
    pub fn new(fetcher: Arc<R>) -> Self {
        Self {
            fetcher,
            header_bytes: Vec::new(),
        }
    }

    /// Get a reference to the underlying fetcher.
    pub fn fetcher(&self) -> &Arc<R> {
        &self.fetcher
    }

    /// Fetch and validate the container directory.
    ///
    /// Two phases: the fixed-size base header first, then the entry table
    /// and string table whose combined size the base header declares.
    /// A second call on an already-populated directory is a no-op.
    pub async fn retrieve_header(&mut self) -> Result<()> {
        if !self.header_bytes.is_empty() {
            return Ok(());
        }

        let mut bytes = vec![0u8; Pfs0BaseHeader::SIZE];
        self.fetcher.read_at(0, &mut bytes).await?;
        let header = Pfs0BaseHeader::from_bytes(&bytes)?;

        let remaining = (header.num_files as u64)
            .checked_mul(Pfs0FileEntry::SIZE as u64)
            .and_then(|n| n.checked_add(header.string_table_size as u64))
            .ok_or_else(|| Error::Corrupt("directory size overflows".into()))?;

        let total = Pfs0BaseHeader::SIZE as u64 + remaining;
        if total > self.fetcher.size() {
            return Err(Error::Corrupt(format!(
                "directory claims {total} bytes but the container is only {}",
                self.fetcher.size()
            )));
        }

        tracing::debug!(
            num_files = header.num_files,
            string_table_size = header.string_table_size,
            remaining,
            "retrieving full directory"
        );

        let mut rest = vec![0u8; remaining as usize];
        self.fetcher
            .read_at(Pfs0BaseHeader::SIZE as u64, &mut rest)
            .await?;
        bytes.extend_from_slice(&rest);

        self.header_bytes = bytes;
        Ok(())
    }

    /// Parsed base header; fails with `NotReady` before retrieval.
    pub fn base_header(&self) -> Result<Pfs0BaseHeader> {
        if self.header_bytes.is_empty() {
            return Err(Error::NotReady);
        }
        Pfs0BaseHeader::from_bytes(&self.header_bytes)
    }

    /// File entry at `index`.
    pub fn entry_at(&self, index: u32) -> Result<Pfs0FileEntry> {
        let header = self.base_header()?;
        if index >= header.num_files {
            return Err(Error::EntryOutOfRange {
                index,
                count: header.num_files,
            });
        }

        let offset = Pfs0BaseHeader::SIZE + index as usize * Pfs0FileEntry::SIZE;
        let bytes = self
            .header_bytes
            .get(offset..offset + Pfs0FileEntry::SIZE)
            .ok_or_else(|| Error::Corrupt(format!("directory too short for file entry {index}")))?;
        Pfs0FileEntry::from_bytes(bytes)
    }

    /// Name of `entry`, read from the string table.
    pub fn name_of(&self, entry: &Pfs0FileEntry) -> Result<String> {
        let header = self.base_header()?;
        let table_start = Pfs0BaseHeader::SIZE + header.num_files as usize * Pfs0FileEntry::SIZE;
        let start = table_start
            .checked_add(entry.string_table_offset as usize)
            .filter(|&s| s < self.header_bytes.len())
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "name offset {} lies outside the string table",
                    entry.string_table_offset
                ))
            })?;

        let tail = &self.header_bytes[start..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Corrupt("unterminated name in string table".into()))?;

        // Lossy: a non-UTF-8 name should not abort directory listing.
        Ok(String::from_utf8_lossy(&tail[..end]).to_string())
    }

    /// Find the entry whose name equals `name` exactly. A miss is a normal
    /// outcome, not an error.
    pub fn entry_by_name(&self, name: &str) -> Result<Option<Pfs0FileEntry>> {
        for index in 0..self.base_header()?.num_files {
            let entry = self.entry_at(index)?;
            if self.name_of(&entry)? == name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Find the first entry whose suffix after the first `.` equals
    /// `extension`. A name with no dot compares whole.
    pub fn entry_by_extension(&self, extension: &str) -> Result<Option<Pfs0FileEntry>> {
        for index in 0..self.base_header()?.num_files {
            let entry = self.entry_at(index)?;
            let name = self.name_of(&entry)?;
            let suffix = name.split_once('.').map_or(name.as_str(), |(_, rest)| rest);
            if suffix == extension {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Find the entry for `id`: `"<hex>.nca"` first, then
    /// `"<hex>.cnmt.nca"`.
    pub fn entry_by_content_id(&self, id: &ContentId) -> Result<Option<Pfs0FileEntry>> {
        if let Some(entry) = self.entry_by_name(&id.nca_name())? {
            return Ok(Some(entry));
        }
        self.entry_by_name(&id.cnmt_nca_name())
    }

    /// Total directory byte length, which is also the offset where the data
    /// region begins.
    pub fn data_offset(&self) -> Result<u64> {
        if self.header_bytes.is_empty() {
            return Err(Error::NotReady);
        }
        Ok(self.header_bytes.len() as u64)
    }

    /// All `(name, entry)` pairs in declaration order.
    pub fn entries(&self) -> Result<Vec<(String, Pfs0FileEntry)>> {
        let header = self.base_header()?;
        let mut entries = Vec::with_capacity(header.num_files as usize);
        for index in 0..header.num_files {
            let entry = self.entry_at(index)?;
            entries.push((self.name_of(&entry)?, entry));
        }
        Ok(entries)
    }

    /// Raw retrieved directory bytes.
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    #[cfg(test)]
    pub(crate) fn with_header(fetcher: Arc<R>, header_bytes: Vec<u8>) -> Self {
        Self {
            fetcher,
            header_bytes,
        }
    }
}
