//! # rnsp
//!
//! Stream-install NSP (PFS0) content from local files or HTTP URLs using
//! Range requests.
//!
//! This library reads the directory of a PFS0 container with two ranged
//! reads, resolves content entries by name or content id, and streams an
//! entry's bytes through a fixed-size staging buffer into a pre-sized
//! storage placeholder. The network producer and storage consumer run
//! concurrently with explicit backpressure, so memory stays bounded no
//! matter how large the entry is.
//!
//! ## Features
//!
//! - List and resolve PFS0 entries without downloading the payload
//! - HTTP/HTTPS sources via Range requests, plus local files
//! - Bounded-memory streaming installs with segment-granular commits
//! - Pollable progress counters (bytes buffered / committed / total)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rnsp::{HttpRangeFetcher, Pfs0Directory};
//! use rnsp::install::{FileContentStore, StreamOptions, begin_stream};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fetcher = Arc::new(HttpRangeFetcher::new("https://example.com/title.nsp".to_string()).await?);
//!
//!     let mut directory = Pfs0Directory::new(fetcher);
//!     directory.retrieve_header().await?;
//!
//!     // Stream the first .nca entry into ./out
//!     let id: rnsp::ContentId = "0123456789abcdef0123456789abcdef".parse()?;
//!     let entry = directory.entry_by_content_id(&id)?.expect("content not in package");
//!     let store = Arc::new(FileContentStore::new("out")?);
//!     let job = begin_stream(&directory, store, id, entry, StreamOptions::default()).await?;
//!     job.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod install;
pub mod io;
pub mod pfs0;

pub use cli::Cli;
pub use error::{Error, Result};
pub use install::{ContentStore, FileContentStore, StagingBuffer, StreamJob, StreamOptions};
pub use io::{ChunkSink, HttpRangeFetcher, LocalFileFetcher, RangeFetch};
pub use pfs0::{ContentId, Pfs0BaseHeader, Pfs0Directory, Pfs0FileEntry};
