//! Fixed-capacity staging ring between network arrival and storage commit.
//!
//! The buffer decouples network delivery rate and chunk shape from storage
//! commit rate and segment shape while bounding memory to the backpressure
//! window. Three cursors describe a stream: the entry's total size `T`
//! (fixed at construction), the bytes-buffered cursor `B` advanced by the
//! producer, and the bytes-committed cursor `C` advanced by the consumer.
//! `0 <= C <= B <= T` and `B - C <= capacity` hold at all times.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::install::store::ContentStore;
use crate::pfs0::ContentId;

/// Producer/consumer buffer with an explicit backpressure window.
///
/// The ring is divided into `capacity / segment` slots, each guarded by its
/// own mutex. The window invariant `B - C <= capacity` together with
/// segment-aligned commits guarantees the producer and consumer never touch
/// the same slot at the same time, so the two critical sections never
/// contend on a shared lock. The cursors themselves are atomics.
///
/// `append` is called only by the producer, `commit_segment` only by the
/// consumer; the progress readouts are safe from any task.
pub struct StagingBuffer {
    total: u64,
    capacity: u64,
    segment: u64,
    slots: Vec<Mutex<Box<[u8]>>>,
    buffered: AtomicU64,
    committed: AtomicU64,
    data_ready: Notify,
    room_freed: Notify,
}

impl StagingBuffer {
    /// Create a buffer for a stream of exactly `total` bytes.
    ///
    /// `capacity` is the backpressure window and must be a non-zero whole
    /// multiple of `segment`, so commits stay slot-aligned.
    pub fn new(total: u64, capacity: u64, segment: u64) -> Result<Self> {
        if segment == 0 || capacity < segment || capacity % segment != 0 {
            return Err(Error::Config(format!(
                "staging window of {capacity} bytes is not a whole multiple of the {segment}-byte segment"
            )));
        }

        let slots = (0..capacity / segment)
            .map(|_| Mutex::new(vec![0u8; segment as usize].into_boxed_slice()))
            .collect();

        Ok(Self {
            total,
            capacity,
            segment,
            slots,
            buffered: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            data_ready: Notify::new(),
            room_freed: Notify::new(),
        })
    }

    fn lock_slot(&self, index: usize) -> std::sync::MutexGuard<'_, Box<[u8]>> {
        self.slots[index]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// True iff `len` more bytes fit inside the backpressure window.
    pub fn can_append(&self, len: u64) -> bool {
        let buffered = self.buffered.load(Ordering::Acquire);
        let committed = self.committed.load(Ordering::Acquire);
        buffered - committed + len <= self.capacity
    }

    /// Copy `chunk` into the ring at the bytes-buffered cursor.
    ///
    /// Rejects the append outright when it would exceed the backpressure
    /// window or the stream's total size; the cursors are left untouched.
    pub fn append(&self, chunk: &[u8]) -> Result<()> {
        let len = chunk.len() as u64;
        if len == 0 {
            return Ok(());
        }

        let buffered = self.buffered.load(Ordering::Acquire);
        let committed = self.committed.load(Ordering::Acquire);
        let available = (self.capacity - (buffered - committed)).min(self.total - buffered);
        if len > available {
            return Err(Error::BufferOverflow {
                requested: len,
                available,
            });
        }

        // A chunk may span slot boundaries; copy piecewise.
        let mut copied: u64 = 0;
        while copied < len {
            let pos = buffered + copied;
            let slot_index = ((pos / self.segment) % self.slots.len() as u64) as usize;
            let slot_offset = (pos % self.segment) as usize;
            let n = (self.segment as usize - slot_offset).min((len - copied) as usize);

            let mut slot = self.lock_slot(slot_index);
            slot[slot_offset..slot_offset + n]
                .copy_from_slice(&chunk[copied as usize..copied as usize + n]);
            drop(slot);

            copied += n as u64;
        }

        self.buffered.store(buffered + len, Ordering::Release);
        self.data_ready.notify_waiters();
        Ok(())
    }

    /// True iff a full segment, or the final shorter tail reaching the
    /// total, is staged beyond the commit cursor.
    pub fn can_commit_segment(&self) -> bool {
        let buffered = self.buffered.load(Ordering::Acquire);
        let committed = self.committed.load(Ordering::Acquire);
        if committed >= self.total {
            return false;
        }
        buffered - committed >= self.segment || buffered == self.total
    }

    /// Write the next staged segment (or final tail) to `store` at the
    /// absolute offset the commit cursor dictates, then advance it.
    ///
    /// Returns the number of bytes committed. A storage failure surfaces
    /// as [`Error::StorageWrite`] and leaves the commit cursor unchanged.
    pub async fn commit_segment<S: ContentStore + ?Sized>(
        &self,
        store: &S,
        id: &ContentId,
    ) -> Result<u64> {
        let buffered = self.buffered.load(Ordering::Acquire);
        let committed = self.committed.load(Ordering::Acquire);
        let staged = buffered - committed;
        if committed >= self.total || (staged < self.segment && buffered != self.total) {
            return Err(Error::NoSegmentReady);
        }

        let len = staged.min(self.segment);
        // The commit cursor stays segment-aligned until the tail, so the
        // staged bytes never wrap within a slot.
        let slot_index = ((committed / self.segment) % self.slots.len() as u64) as usize;
        let data = {
            let slot = self.lock_slot(slot_index);
            slot[..len as usize].to_vec()
        };

        store.commit(id, committed, &data).await?;

        self.committed.store(committed + len, Ordering::Release);
        self.room_freed.notify_waiters();
        Ok(len)
    }

    /// Suspend until `len` more bytes fit in the window, or cancellation.
    pub async fn wait_room(&self, len: u64, cancel: &CancellationToken) -> Result<()> {
        loop {
            // The waiter must be registered before the condition is checked,
            // or a notification between the two is lost.
            let notified = self.room_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.can_append(len) {
                return Ok(());
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// Suspend until a segment (or the final tail) is ready to commit, or
    /// cancellation.
    pub async fn wait_segment(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let notified = self.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.can_commit_segment() {
                return Ok(());
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// True once every byte of the stream has been appended.
    pub fn is_buffer_complete(&self) -> bool {
        self.buffered.load(Ordering::Acquire) == self.total
    }

    /// True once every byte of the stream has been committed.
    pub fn is_commit_complete(&self) -> bool {
        self.committed.load(Ordering::Acquire) == self.total
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered.load(Ordering::Relaxed)
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn segment_size(&self) -> u64 {
        self.segment
    }

    pub fn window_size(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn test_id() -> ContentId {
        "000102030405060708090a0b0c0d0e0f".parse().unwrap()
    }

    /// Store recording every commit; optionally fails after `fail_after`
    /// successful commits.
    struct RecordingStore {
        writes: Mutex<Vec<(u64, Vec<u8>)>>,
        fail: AtomicBool,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }

        fn writes(&self) -> Vec<(u64, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentStore for RecordingStore {
        async fn create_placeholder(&self, _id: &ContentId, _size: u64) -> Result<()> {
            Ok(())
        }

        async fn commit(&self, _id: &ContentId, offset: u64, data: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(Error::StorageWrite(std::io::Error::other("disk full")));
            }
            self.writes.lock().unwrap().push((offset, data.to_vec()));
            Ok(())
        }

        async fn register(&self, _id: &ContentId, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn discard(&self, _id: &ContentId) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(StagingBuffer::new(10, 8, 0).is_err());
        assert!(StagingBuffer::new(10, 3, 4).is_err());
        assert!(StagingBuffer::new(10, 10, 4).is_err());
        assert!(StagingBuffer::new(10, 8, 4).is_ok());
    }

    #[tokio::test]
    async fn guarded_sequence_keeps_invariants_and_order() {
        let staging = StagingBuffer::new(10, 8, 4).unwrap();
        let store = RecordingStore::new();
        let id = test_id();

        let payload: Vec<u8> = (0u8..10).collect();
        let mut appended = 0usize;
        let mut committed = 0u64;

        // Interleave guarded appends (3 bytes at a time) and commits.
        while committed < 10 {
            if appended < 10 {
                let n = 3.min(10 - appended);
                if staging.can_append(n as u64) {
                    staging.append(&payload[appended..appended + n]).unwrap();
                    appended += n;
                }
            }
            if staging.can_commit_segment() {
                committed += staging.commit_segment(&store, &id).await.unwrap();
            }

            let b = staging.buffered_bytes();
            let c = staging.committed_bytes();
            assert!(c <= b && b <= 10);
            assert!(b - c <= 8);
            assert_eq!(staging.is_buffer_complete(), b == 10);
            assert_eq!(staging.is_commit_complete(), c == 10);
        }

        // Commits are FIFO, gap-free, and byte-identical to the appends.
        let writes = store.writes();
        assert_eq!(writes.len(), 3);
        let mut reassembled = Vec::new();
        let mut expected_offset = 0;
        for (offset, data) in &writes {
            assert_eq!(*offset, expected_offset);
            expected_offset += data.len() as u64;
            reassembled.extend_from_slice(data);
        }
        assert_eq!(reassembled, payload);
        assert_eq!(writes[0].1.len(), 4);
        assert_eq!(writes[1].1.len(), 4);
        assert_eq!(writes[2].1.len(), 2);
    }

    #[tokio::test]
    async fn append_exceeding_window_is_rejected() {
        let staging = StagingBuffer::new(100, 8, 4).unwrap();
        staging.append(&[1u8; 8]).unwrap();

        let err = staging.append(&[2u8; 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferOverflow {
                requested: 1,
                available: 0
            }
        ));
        assert_eq!(staging.buffered_bytes(), 8);
        assert!(!staging.can_append(1));

        // Draining one segment reopens the window.
        let store = RecordingStore::new();
        staging.commit_segment(&store, &test_id()).await.unwrap();
        assert!(staging.can_append(4));
        staging.append(&[3u8; 4]).unwrap();
    }

    #[tokio::test]
    async fn append_past_total_is_rejected() {
        let staging = StagingBuffer::new(6, 8, 4).unwrap();
        staging.append(&[1u8; 6]).unwrap();
        assert!(staging.is_buffer_complete());
        let err = staging.append(&[2u8; 1]).unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { .. }));
    }

    #[tokio::test]
    async fn tail_commit_requires_complete_buffer() {
        let staging = StagingBuffer::new(6, 8, 4).unwrap();
        let store = RecordingStore::new();

        staging.append(&[1u8; 5]).unwrap();
        // One full segment is ready, the 1-byte remainder is not a tail yet.
        assert!(staging.can_commit_segment());
        staging.commit_segment(&store, &test_id()).await.unwrap();
        assert!(!staging.can_commit_segment());
        assert!(matches!(
            staging.commit_segment(&store, &test_id()).await,
            Err(Error::NoSegmentReady)
        ));

        staging.append(&[2u8; 1]).unwrap();
        assert!(staging.can_commit_segment());
        assert_eq!(staging.commit_segment(&store, &test_id()).await.unwrap(), 2);
        assert!(staging.is_commit_complete());
        assert!(!staging.can_commit_segment());
    }

    #[tokio::test]
    async fn storage_failure_leaves_commit_cursor() {
        let staging = StagingBuffer::new(8, 8, 4).unwrap();
        let store = RecordingStore::new();
        staging.append(&[7u8; 8]).unwrap();

        store.fail.store(true, Ordering::Relaxed);
        let err = staging.commit_segment(&store, &test_id()).await.unwrap_err();
        assert!(matches!(err, Error::StorageWrite(_)));
        assert_eq!(staging.committed_bytes(), 0);

        store.fail.store(false, Ordering::Relaxed);
        staging.commit_segment(&store, &test_id()).await.unwrap();
        assert_eq!(staging.committed_bytes(), 4);
    }

    #[tokio::test]
    async fn concurrent_producer_and_consumer_drain_in_order() {
        let staging = Arc::new(StagingBuffer::new(1000, 64, 16).unwrap());
        let store = Arc::new(RecordingStore::new());
        let cancel = CancellationToken::new();
        let id = test_id();

        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let producer = tokio::spawn({
            let staging = Arc::clone(&staging);
            let cancel = cancel.clone();
            let payload = payload.clone();
            async move {
                // Chunk sizes that do not divide the segment size.
                for chunk in payload.chunks(13) {
                    staging.wait_room(chunk.len() as u64, &cancel).await?;
                    staging.append(chunk)?;
                }
                Ok::<(), Error>(())
            }
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
                Ok::<(), Error>(())
            }
        });

        producer.await.unwrap().unwrap();
        consumer.await.unwrap().unwrap();

        assert!(staging.is_buffer_complete());
        assert!(staging.is_commit_complete());
        let reassembled: Vec<u8> = store
            .writes()
            .iter()
            .flat_map(|(_, data)| data.clone())
            .collect();
        assert_eq!(reassembled, payload);
    }

    #[tokio::test]
    async fn waits_resolve_on_cancellation() {
        let staging = Arc::new(StagingBuffer::new(100, 8, 4).unwrap());
        staging.append(&[0u8; 8]).unwrap();

        let cancel = CancellationToken::new();
        let waiter = tokio::spawn({
            let staging = Arc::clone(&staging);
            let cancel = cancel.clone();
            async move { staging.wait_room(1, &cancel).await }
        });

        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
    }
}
