use async_trait::async_trait;
use std::path::Path;

use super::{ChunkSink, RangeFetch};
use crate::error::{Error, Result};

/// Chunk size used when streaming a local file.
const STREAM_CHUNK: usize = 64 * 1024;

/// Local file fetcher with random access support
pub struct LocalFileFetcher {
    file: std::fs::File,
    size: u64,
}

impl LocalFileFetcher {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::Transport(e.into()))?;
        let size = file
            .metadata()
            .map_err(|e| Error::Transport(e.into()))?
            .len();
        Ok(Self { file, size })
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(buf, offset)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            // &File implements Read + Seek; concurrent readers would race
            // the shared cursor, but reads here are sequential per fetcher.
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
        }
    }
}

#[async_trait]
impl RangeFetch for LocalFileFetcher {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_exact_at(offset, buf)
            .map_err(|e| Error::Transport(e.into()))
    }

    async fn stream_range(
        &self,
        offset: u64,
        length: u64,
        sink: &mut dyn ChunkSink,
    ) -> Result<()> {
        let mut buf = vec![0u8; STREAM_CHUNK.min(length as usize).max(1)];
        let mut delivered: u64 = 0;

        while delivered < length {
            let n = buf.len().min((length - delivered) as usize);
            self.read_exact_at(offset + delivered, &mut buf[..n])
                .map_err(|e| Error::Transport(e.into()))?;
            sink.accept(&buf[..n]).await?;
            delivered += n as u64;
        }

        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
