use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::pfs0::ContentId;

/// Storage backend that accepts fixed-granularity segment writes into
/// pre-sized placeholders.
///
/// A placeholder becomes visible under its final name only through
/// [`register`](ContentStore::register); an aborted stream must end in
/// [`discard`](ContentStore::discard) so no half-written content is ever
/// presented as complete.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Allocate a placeholder of exactly `size` bytes for `id`.
    async fn create_placeholder(&self, id: &ContentId, size: u64) -> Result<()>;

    /// Write one segment at the absolute `offset` into the placeholder.
    async fn commit(&self, id: &ContentId, offset: u64, data: &[u8]) -> Result<()>;

    /// Finalize a completely written placeholder under `name`.
    async fn register(&self, id: &ContentId, name: &str) -> Result<()>;

    /// Remove an incomplete placeholder.
    async fn discard(&self, id: &ContentId) -> Result<()>;
}

/// Content store keeping placeholders as `<id>.part` files in a directory.
pub struct FileContentStore {
    root: PathBuf,
    open: Mutex<HashMap<ContentId, File>>,
}

impl FileContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(Error::StorageWrite)?;
        Ok(Self {
            root,
            open: Mutex::new(HashMap::new()),
        })
    }

    fn placeholder_path(&self, id: &ContentId) -> PathBuf {
        self.root.join(format!("{id}.part"))
    }

    fn take_open(&self, id: &ContentId) -> Option<File> {
        self.open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(id)
    }
}

fn write_all_at(file: &File, offset: u64, data: &[u8]) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_all_at(data, offset)
    }

    #[cfg(not(unix))]
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn create_placeholder(&self, id: &ContentId, size: u64) -> Result<()> {
        let file = File::create(self.placeholder_path(id)).map_err(Error::StorageWrite)?;
        file.set_len(size).map_err(Error::StorageWrite)?;
        self.open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(*id, file);
        Ok(())
    }

    async fn commit(&self, id: &ContentId, offset: u64, data: &[u8]) -> Result<()> {
        let open = self
            .open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let file = open.get(id).ok_or_else(|| {
            Error::StorageWrite(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no open placeholder for {id}"),
            ))
        })?;
        write_all_at(file, offset, data).map_err(Error::StorageWrite)
    }

    async fn register(&self, id: &ContentId, name: &str) -> Result<()> {
        drop(self.take_open(id));
        tokio::fs::rename(self.placeholder_path(id), self.root.join(name))
            .await
            .map_err(Error::StorageWrite)
    }

    async fn discard(&self, id: &ContentId) -> Result<()> {
        drop(self.take_open(id));
        match tokio::fs::remove_file(self.placeholder_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageWrite(e)),
        }
    }
}
