//! Pulls file content from whichever peer has it
//!
//! A transfer moves through `Requesting → AwaitingChunks → Writing* →
//! Complete`, or stops early with an [`AbortReason`]. Chunks are written
//! strictly in order through a [`ReorderBuffer`]; the path stays locked for
//! the whole write so the watcher's echo of it is never announced.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ripple_broker::{Broker, ConsumeOptions, Message, QueueOptions, Subscription};
use ripple_proto::{
    local_path, ChunkOrder, FileChunk, TransferRequest, FILE_REQUESTS_EXCHANGE,
    JSON_CONTENT_TYPE, ORDER_HEADER,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::{AbortReason, Result, SyncError};
use crate::hasher::ContentHasher;
use crate::locks::{LockRegistry, LockToken, PathLock};
use crate::reorder::{Placement, ReorderBuffer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterConfig {
    /// Longest gap between two chunks before the responder is presumed
    /// gone. `None` waits forever.
    pub chunk_timeout: Option<Duration>,
    /// How long the path stays locked after the file is closed, covering
    /// watcher events that trail our own write.
    pub lock_linger: Duration,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: Some(Duration::from_secs(30)),
            lock_linger: Duration::from_millis(250),
        }
    }
}

/// Summary of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub path: String,
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub duplicates: u64,
    /// Orders still buffered when the sentinel arrived (lost data)
    pub leftover_chunks: Vec<u64>,
    /// Written content hashes to the requested checksum
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(TransferReport),
    /// Another transfer for the same path already produced this content
    AlreadyCurrent,
}

pub struct TransferRequester {
    node_id: String,
    root: PathBuf,
    broker: Arc<dyn Broker>,
    locks: LockRegistry,
    hasher: ContentHasher,
    config: RequesterConfig,
}

impl TransferRequester {
    pub fn new(
        node_id: impl Into<String>,
        root: impl Into<PathBuf>,
        broker: Arc<dyn Broker>,
        locks: LockRegistry,
        hasher: ContentHasher,
        config: RequesterConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            root: root.into(),
            broker,
            locks,
            hasher,
            config,
        }
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.config
    }

    /// Fetch `path` at `checksum` from any peer and write it under the root.
    pub async fn request_file(&self, path: &str, checksum: &str) -> Result<TransferOutcome> {
        let destination = local_path(&self.root, path)?;

        // Consume before publishing so the reply queue lives exactly as long
        // as this call; chunks buffer in it while we wait for the lock.
        let reply_queue = self
            .broker
            .declare_queue(QueueOptions::ephemeral(None))
            .await?;
        let mut chunks = self
            .broker
            .consume(&reply_queue, ConsumeOptions::auto_ack())
            .await?;

        let request = TransferRequest::new(&self.node_id, path, checksum);
        let message = Message::new(request.to_bytes()?)
            .with_content_type(JSON_CONTENT_TYPE)
            .with_reply_to(&reply_queue);
        self.broker
            .publish(FILE_REQUESTS_EXCHANGE, "", message)
            .await?;
        info!("Requesting file {} on {}", path, reply_queue);

        let Some(lock) = self.lock_for(path, &destination, checksum).await else {
            info!("{} already current after concurrent transfer", path);
            return Ok(TransferOutcome::AlreadyCurrent);
        };

        let result = self
            .receive(path, &destination, checksum, chunks.as_mut())
            .await;
        drop(chunks);

        match &result {
            Ok(report) => info!(
                "Finished receiving {} ({} chunks, {} bytes)",
                path, report.chunks_written, report.bytes_written
            ),
            Err(e) => warn!("{}", e),
        }

        if !self.config.lock_linger.is_zero() {
            tokio::time::sleep(self.config.lock_linger).await;
        }
        drop(lock);

        result.map(TransferOutcome::Completed)
    }

    /// Take the path lock. If another transfer holds it, wait for that one
    /// and return `None` when it already left the wanted content behind.
    async fn lock_for(&self, path: &str, destination: &Path, checksum: &str) -> Option<PathLock> {
        match self.locks.try_acquire(path) {
            LockToken::Acquired(lock) => Some(lock),
            LockToken::Pending(pending) => {
                debug!("Waiting for in-flight transfer of {}", path);
                pending.wait().await;

                let current = self.hasher.checksum_async(destination.to_path_buf()).await;
                if current == checksum {
                    return None;
                }
                Some(self.locks.acquire(path).await)
            }
        }
    }

    async fn receive(
        &self,
        path: &str,
        destination: &Path,
        checksum: &str,
        chunks: &mut dyn Subscription,
    ) -> Result<TransferReport> {
        let io_abort =
            |e: std::io::Error| SyncError::aborted(path, AbortReason::Io(e.to_string()));

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_abort)?;
        }
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(io_abort)?;
        debug!("Waiting for {} to be transferred", path);

        let mut buffer = ReorderBuffer::new();
        let mut bytes_written = 0u64;
        let mut duplicates = 0u64;

        loop {
            let next = match self.config.chunk_timeout {
                Some(limit) => tokio::time::timeout(limit, chunks.next_delivery())
                    .await
                    .map_err(|_| SyncError::aborted(path, AbortReason::ResponderAbsent))?,
                None => chunks.next_delivery().await,
            };
            let delivery =
                next.ok_or_else(|| SyncError::aborted(path, AbortReason::StreamClosed))?;

            let chunk = FileChunk::from_parts(
                delivery.message.header(ORDER_HEADER),
                delivery.message.body.clone(),
            )
            .map_err(|e| SyncError::aborted(path, AbortReason::BadHeader(e.to_string())))?;

            let order = match chunk.order {
                ChunkOrder::End => break,
                ChunkOrder::Data(order) => order,
            };

            match buffer.accept(order, chunk.payload) {
                Placement::Ready(payloads) => {
                    for payload in payloads {
                        file.write_all(&payload).await.map_err(io_abort)?;
                        bytes_written += payload.len() as u64;
                    }
                    debug!("Wrote {} through chunk {}", path, buffer.written());
                }
                Placement::Buffered => {
                    debug!(
                        "Chunk {} of {} arrived early (expecting {})",
                        order,
                        path,
                        buffer.next_expected()
                    );
                }
                Placement::Duplicate => {
                    duplicates += 1;
                    debug!("Discarding duplicate chunk {} of {}", order, path);
                }
            }
        }

        file.flush().await.map_err(io_abort)?;
        drop(file);

        let leftover_chunks = buffer.pending_orders();
        if !leftover_chunks.is_empty() {
            warn!(
                "Transfer of {} ended with chunks {:?} still buffered; data was lost",
                path, leftover_chunks
            );
        }

        let verified = self.hasher.checksum_async(destination.to_path_buf()).await == checksum;
        if !verified {
            warn!("Received content of {} does not match checksum {}", path, checksum);
        }

        Ok(TransferReport {
            path: path.to_string(),
            chunks_written: buffer.written(),
            bytes_written,
            duplicates,
            leftover_chunks,
            verified,
        })
    }
}
