use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;

use super::{ChunkSink, RangeFetch};
use crate::error::{Error, Result};

/// HTTP Range fetcher for remote NSP containers
pub struct HttpRangeFetcher {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeFetcher {
    /// Create a new HTTP Range fetcher
    ///
    /// This will send a HEAD request to verify Range support and get file size
    pub async fn new(url: String) -> Result<Self> {
        // Per-read timeouts rather than a whole-request deadline: a
        // streamed range can legitimately take minutes to deliver.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(30))
            .build()?;

        // Send HEAD request to check capabilities
        let resp = client.head(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Transport(anyhow!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        // Check if server supports Range requests
        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            return Err(Error::Transport(anyhow!(
                "remote server does not support Range requests"
            )));
        }

        // Get file size from Content-Length
        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Transport(anyhow!("remote server did not return Content-Length")))?;

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        })
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<()> {
        let end = offset.checked_add(length);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::Transport(anyhow!(
                "range {}+{} extends past the end of the source ({} bytes)",
                offset,
                length,
                self.size
            ))),
        }
    }
}

#[async_trait]
impl RangeFetch for HttpRangeFetcher {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_range(offset, buf.len() as u64)?;

        let end = offset + buf.len() as u64 - 1;
        let mut received = 0;
        let mut retry_count = 0;

        while received < buf.len() {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        return Err(Error::Transport(anyhow!(
                            "HTTP request failed with status: {}",
                            resp.status()
                        )));
                    }

                    let bytes = resp.bytes().await?;
                    let chunk_len = bytes.len().min(buf.len() - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(Error::Transport(anyhow!("max retries exceeded: {e}")));
                    }
                    tracing::warn!(retry = retry_count, max = self.max_retry, error = %e, "connection error, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn stream_range(
        &self,
        offset: u64,
        length: u64,
        sink: &mut dyn ChunkSink,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        self.check_range(offset, length)?;

        let end = offset + length - 1;
        let mut delivered: u64 = 0;
        let mut retry_count = 0;

        // The stream is re-issued from the current position after a
        // timeout or connection drop, up to max_retry attempts.
        while delivered < length {
            let range = format!("bytes={}-{}", offset + delivered, end);

            let mut resp = match self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await
            {
                Ok(resp) if resp.status() == reqwest::StatusCode::PARTIAL_CONTENT => resp,
                Ok(resp) => {
                    return Err(Error::Transport(anyhow!(
                        "HTTP request failed with status: {}",
                        resp.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(Error::Transport(anyhow!("max retries exceeded: {e}")));
                    }
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => {
                        // A misbehaving server may send more than requested.
                        let take = (chunk.len() as u64).min(length - delivered) as usize;
                        sink.accept(&chunk[..take]).await?;
                        delivered += take as u64;
                        self.transferred_bytes
                            .fetch_add(take as u64, Ordering::Relaxed);
                        if delivered == length {
                            break;
                        }
                    }
                    Ok(None) => {
                        // Body ended short of the requested range; reissue
                        // from the current position.
                        retry_count += 1;
                        if retry_count >= self.max_retry {
                            return Err(Error::Transport(anyhow!(
                                "stream ended early: {delivered} of {length} bytes delivered"
                            )));
                        }
                        break;
                    }
                    Err(e) if e.is_timeout() => {
                        retry_count += 1;
                        if retry_count >= self.max_retry {
                            return Err(Error::Transport(anyhow!("max retries exceeded: {e}")));
                        }
                        tracing::warn!(retry = retry_count, delivered, "stream stalled, reconnecting");
                        tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
