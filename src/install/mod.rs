//! Streaming installation of container entries into a content store.
//!
//! This module wires a ranged network stream into a size-bounded staging
//! buffer that is concurrently drained, segment by segment, into a
//! pre-sized storage placeholder.
//!
//! ## Architecture
//!
//! - [`store`]: the [`ContentStore`] collaborator interface plus a
//!   file-backed implementation
//! - [`staging`]: the [`StagingBuffer`] producer/consumer ring with an
//!   explicit backpressure window
//! - [`streamer`]: orchestration - spawns the producer and consumer tasks,
//!   supervises failures, and exposes progress counters through
//!   [`StreamJob`]
//!
//! ## Data flow
//!
//! ```text
//! RangeFetch::stream_range -> StagingBuffer::append   (producer task)
//! StagingBuffer::commit_segment -> ContentStore::commit (consumer task)
//! ```
//!
//! The two tasks share nothing but the staging buffer's cursors; the
//! network handle belongs to the producer and the storage handle to the
//! consumer. Either side's failure cancels the other at its next wait
//! point, the placeholder is discarded, and a single terminal error
//! surfaces to the caller.

mod staging;
mod store;
mod streamer;

pub use staging::StagingBuffer;
pub use store::{ContentStore, FileContentStore};
pub use streamer::{
    DEFAULT_SEGMENT_SIZE, DEFAULT_WINDOW_SEGMENTS, StreamJob, StreamOptions, begin_stream,
};
