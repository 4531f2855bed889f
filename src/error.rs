//! Library-wide error and result types.
//!
//! Lookup misses (`entry_by_name` and friends) are not errors; they return
//! `Option::None` and callers branch on it. Everything here is a genuine
//! failure that aborts processing of the affected entry.

use std::io;
use thiserror::Error;

/// Result alias used throughout rnsp.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// The container's directory data is inconsistent: bad magic, zero
    /// counts, offsets past the retrieved header, or ranges past the end
    /// of the container.
    #[error("corrupt container: {0}")]
    Corrupt(String),

    /// A file entry index is not below the header's file count.
    #[error("file entry index {index} is out of bounds ({count} entries)")]
    EntryOutOfRange { index: u32, count: u32 },

    /// The header (or an offset derived from it) was accessed before
    /// `retrieve_header` ran.
    #[error("container header has not been retrieved yet")]
    NotReady,

    /// A content id string was not 32 lowercase hex characters.
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    /// Unusable tuning values, such as a zero segment size.
    #[error("configuration error: {0}")]
    Config(String),

    /// An append would exceed the backpressure window or the entry size.
    #[error("staging buffer cannot accept {requested} bytes ({available} available)")]
    BufferOverflow { requested: u64, available: u64 },

    /// A commit was attempted with no full segment (or final tail) staged.
    #[error("no staged segment is ready to commit")]
    NoSegmentReady,

    /// The storage backend failed to write a segment.
    #[error("storage write failed: {0}")]
    StorageWrite(#[source] io::Error),

    /// The network side failed while fetching or streaming a byte range.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),

    /// The stream was cancelled before completion.
    #[error("stream cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.into())
    }
}
