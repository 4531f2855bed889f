mod http;
mod local;

pub use http::HttpRangeFetcher;
pub use local::LocalFileFetcher;

use async_trait::async_trait;

use crate::error::Result;

/// Trait for ranged reads from a container source.
#[async_trait]
pub trait RangeFetch: Send + Sync {
    /// Read the bytes at `offset` into `buf`. Fills `buf` completely or fails.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Stream `length` bytes starting at `offset` into `sink`, in order.
    ///
    /// Delivers exactly `length` bytes across one or more `accept` calls, or
    /// fails. Errors returned by the sink propagate unchanged.
    async fn stream_range(
        &self,
        offset: u64,
        length: u64,
        sink: &mut dyn ChunkSink,
    ) -> Result<()>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Per-chunk callback invoked by [`RangeFetch::stream_range`].
#[async_trait]
pub trait ChunkSink: Send {
    /// Accept the next chunk of the stream. May suspend until the chunk can
    /// be taken; returning an error aborts the stream.
    async fn accept(&mut self, chunk: &[u8]) -> Result<()>;
}
