//! Producer/consumer orchestration for streaming one entry into a
//! placeholder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::io::{ChunkSink, RangeFetch};
use crate::pfs0::{ContentId, Pfs0Directory, Pfs0FileEntry};

use super::staging::StagingBuffer;
use super::store::ContentStore;

/// Default segment granularity for placeholder writes (1 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 0x100000;

/// Default backpressure window, in segments.
pub const DEFAULT_WINDOW_SEGMENTS: u64 = 4;

/// How long a cancelled side may take to stop before it is aborted.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning for one streamed entry.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Granularity of placeholder writes, in bytes.
    pub segment_size: u64,
    /// Backpressure window, as a number of segments.
    pub window_segments: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            window_segments: DEFAULT_WINDOW_SEGMENTS,
        }
    }
}

impl StreamOptions {
    fn window_size(&self) -> u64 {
        self.segment_size.saturating_mul(self.window_segments)
    }
}

/// Sink feeding delivered chunks into the staging buffer, waiting for
/// window room before each append.
struct StagingSink {
    staging: Arc<StagingBuffer>,
    cancel: CancellationToken,
}

#[async_trait]
impl ChunkSink for StagingSink {
    async fn accept(&mut self, chunk: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // A chunk larger than the window could never fit whole; feed it
        // through in segment-sized pieces.
        for piece in chunk.chunks(self.staging.segment_size() as usize) {
            self.staging
                .wait_room(piece.len() as u64, &self.cancel)
                .await?;
            self.staging.append(piece)?;
        }
        Ok(())
    }
}

/// Handle to a running stream: progress counters for a polling observer,
/// a cancellation trigger, and the terminal result.
pub struct StreamJob {
    staging: Arc<StagingBuffer>,
    cancel: CancellationToken,
    supervisor: JoinHandle<Result<()>>,
}

impl StreamJob {
    /// Progress counters, safe to poll from any task.
    pub fn progress(&self) -> Arc<StagingBuffer> {
        Arc::clone(&self.staging)
    }

    /// Request cancellation; both sides stop at their next wait point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the stream has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Wait for the terminal result. On success the placeholder has been
    /// registered; on error it has been discarded.
    pub async fn join(self) -> Result<()> {
        flatten(self.supervisor.await)
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(Error::Cancelled),
    }
}

/// Start streaming a resolved entry into a fresh placeholder.
///
/// Computes the absolute remote range for `entry`, allocates a placeholder
/// of the entry's size, and spawns the producer (network to staging) and
/// consumer (staging to store) tasks plus a supervisor that registers the
/// placeholder on success and discards it on any failure.
pub async fn begin_stream<R, S>(
    directory: &Pfs0Directory<R>,
    store: Arc<S>,
    id: ContentId,
    entry: Pfs0FileEntry,
    options: StreamOptions,
) -> Result<StreamJob>
where
    R: RangeFetch + 'static,
    S: ContentStore + 'static,
{
    let name = directory.name_of(&entry)?;
    let size = entry.file_size;
    let remote_offset = directory
        .data_offset()?
        .checked_add(entry.data_offset)
        .ok_or_else(|| Error::Corrupt(format!("entry {name} offset overflows")))?;

    let fetcher = Arc::clone(directory.fetcher());
    let end = remote_offset
        .checked_add(size)
        .filter(|&end| end <= fetcher.size())
        .ok_or_else(|| {
            Error::Corrupt(format!("entry {name} extends past the end of the container"))
        })?;

    tracing::info!(%id, name = %name, size, remote_offset, end, "streaming entry to placeholder");
    let staging = Arc::new(StagingBuffer::new(
        size,
        options.window_size(),
        options.segment_size,
    )?);
    store.create_placeholder(&id, size).await?;

    let cancel = CancellationToken::new();

    let producer = tokio::spawn({
        let mut sink = StagingSink {
            staging: Arc::clone(&staging),
            cancel: cancel.clone(),
        };
        async move { fetcher.stream_range(remote_offset, size, &mut sink).await }
    });

    let consumer = tokio::spawn({
        let staging = Arc::clone(&staging);
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        async move {
            while !staging.is_commit_complete() {
                staging.wait_segment(&cancel).await?;
                staging.commit_segment(store.as_ref(), &id).await?;
            }
            Ok(())
        }
    });

    let supervisor = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match supervise(producer, consumer, &cancel).await {
                Ok(()) => match store.register(&id, &name).await {
                    Ok(()) => {
                        tracing::info!(%id, name = %name, "content registered");
                        Ok(())
                    }
                    Err(e) => {
                        let _ = store.discard(&id).await;
                        Err(e)
                    }
                },
                Err(e) => {
                    tracing::warn!(%id, error = %e, "stream failed, discarding placeholder");
                    let _ = store.discard(&id).await;
                    Err(e)
                }
            }
        }
    });

    Ok(StreamJob {
        staging,
        cancel,
        supervisor,
    })
}

/// Join both sides; the first failure cancels the other, which stops at
/// its next wait point, and becomes the single terminal error.
async fn supervise(
    mut producer: JoinHandle<Result<()>>,
    mut consumer: JoinHandle<Result<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (first, second) = tokio::select! {
        r = &mut producer => (flatten(r), &mut consumer),
        r = &mut consumer => (flatten(r), &mut producer),
    };

    match first {
        Ok(()) => flatten(second.await),
        Err(e) => {
            cancel.cancel();
            match tokio::time::timeout(JOIN_TIMEOUT, &mut *second).await {
                // The secondary error is usually just `Cancelled`; the
                // first failure is the terminal one.
                Ok(joined) => drop(flatten(joined)),
                Err(_) => second.abort(),
            }
            Err(e)
        }
    }
}
