//! Serves content requests from peers

use std::path::PathBuf;
use std::sync::Arc;

use bytes::BytesMut;
use ripple_broker::{
    Broker, ConsumeOptions, Delivery, ExchangeKind, Message, QueueOptions, Subscription,
    DEFAULT_EXCHANGE,
};
use ripple_proto::{
    chunk_count, local_path, request_queue_name, FileChunk, TransferRequest, Validator,
    COUNT_HEADER, DEFAULT_CHUNK_SIZE, FILE_REQUESTS_EXCHANGE, OCTET_STREAM_CONTENT_TYPE,
    ORDER_HEADER,
};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::hasher::ContentHasher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    /// Payload size of every data chunk but the last
    pub chunk_size: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What happened to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    Sent { chunks: u64, bytes: u64 },
    /// We have no file at that path
    Missing,
    /// Local content changed since the request was made
    Stale { local: String },
}

pub struct TransferResponder {
    node_id: String,
    root: PathBuf,
    broker: Arc<dyn Broker>,
    hasher: ContentHasher,
    config: ResponderConfig,
}

impl TransferResponder {
    pub fn new(
        node_id: impl Into<String>,
        root: impl Into<PathBuf>,
        broker: Arc<dyn Broker>,
        hasher: ContentHasher,
        config: ResponderConfig,
    ) -> Result<Self> {
        Validator::validate_chunk_size(config.chunk_size)?;
        Ok(Self {
            node_id: node_id.into(),
            root: root.into(),
            broker,
            hasher,
            config,
        })
    }

    /// Declare and bind this node's request queue and start consuming it.
    ///
    /// One unsettled request at a time; the next is delivered once the
    /// current one is acked or rejected.
    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        self.broker
            .declare_exchange(FILE_REQUESTS_EXCHANGE, ExchangeKind::Fanout)
            .await?;
        let queue = self
            .broker
            .declare_queue(QueueOptions::ephemeral(Some(request_queue_name(
                &self.node_id,
            ))))
            .await?;
        self.broker
            .bind_queue(&queue, FILE_REQUESTS_EXCHANGE, "")
            .await?;
        let subscription = self
            .broker
            .consume(&queue, ConsumeOptions::manual_ack().with_prefetch(1))
            .await?;
        debug!("Responder for {} consuming {}", self.node_id, queue);
        Ok(subscription)
    }

    /// Settle a request delivery and decide whether it needs serving.
    ///
    /// Returns the request and its reply queue when it does.
    pub fn admit(&self, delivery: Delivery) -> Option<(TransferRequest, String)> {
        let request = match TransferRequest::from_bytes(&delivery.message.body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting malformed transfer request: {}", e);
                delivery.reject(false);
                return None;
            }
        };
        let Some(reply_to) = delivery.message.reply_to.clone() else {
            warn!("Rejecting request for {} without reply queue", request.path);
            delivery.reject(false);
            return None;
        };
        delivery.ack();

        if request.requestor == self.node_id {
            return None;
        }
        Some((request, reply_to))
    }

    /// Stream the requested file to `reply_to` if we still hold that content
    pub async fn serve(&self, request: &TransferRequest, reply_to: &str) -> Result<ServeOutcome> {
        let path = local_path(&self.root, &request.path)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                debug!("{} asked for {}, which we don't have", request.requestor, request.path);
                return Ok(ServeOutcome::Missing);
            }
        }

        let local = self.hasher.checksum_async(path.clone()).await;
        if local != request.checksum {
            debug!(
                "Not serving {}: content changed since request ({} != {})",
                request.path, local, request.checksum
            );
            return Ok(ServeOutcome::Stale { local });
        }

        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        let count = chunk_count(size, self.config.chunk_size).to_string();
        info!(
            "Sending {} to {} ({} bytes, {} chunks)",
            request.path, request.requestor, size, count
        );

        let mut order = 0u64;
        let mut bytes = 0u64;
        loop {
            let block = self.read_block(&mut file).await?;
            if block.is_empty() {
                break;
            }
            order += 1;
            bytes += block.len() as u64;
            let message = chunk_message(FileChunk::data(order, block.freeze()), &count);
            self.broker
                .publish(DEFAULT_EXCHANGE, reply_to, message)
                .await?;
        }

        let sentinel = chunk_message(FileChunk::sentinel(), &count);
        self.broker
            .publish(DEFAULT_EXCHANGE, reply_to, sentinel)
            .await?;

        debug!("Sent {} in {} chunks", request.path, order);
        Ok(ServeOutcome::Sent { chunks: order, bytes })
    }

    /// Fill one chunk, short only at end of file
    async fn read_block(&self, file: &mut tokio::fs::File) -> std::io::Result<BytesMut> {
        let mut block = BytesMut::zeroed(self.config.chunk_size);
        let mut filled = 0;
        while filled < block.len() {
            let n = file.read(&mut block[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        block.truncate(filled);
        Ok(block)
    }

    /// Consume requests until the subscription ends, serving each on its
    /// own task.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        let mut requests = self.subscribe().await?;

        Ok(tokio::spawn(async move {
            while let Some(delivery) = requests.next_delivery().await {
                let Some((request, reply_to)) = self.admit(delivery) else {
                    continue;
                };
                let responder = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = responder.serve(&request, &reply_to).await {
                        error!("Failed to send {} to {}: {}", request.path, request.requestor, e);
                    }
                });
            }
            debug!("Request stream for {} ended", self.node_id);
        }))
    }
}

fn chunk_message(chunk: FileChunk, count: &str) -> Message {
    Message::new(chunk.payload)
        .with_content_type(OCTET_STREAM_CONTENT_TYPE)
        .with_header(ORDER_HEADER, chunk.order.to_header())
        .with_header(COUNT_HEADER, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_broker::MemoryBroker;
    use ripple_proto::ChunkOrder;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        broker: MemoryBroker,
        responder: TransferResponder,
        replies: Box<dyn Subscription>,
        reply_to: String,
    }

    async fn fixture(chunk_size: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let broker = MemoryBroker::new();
        let responder = TransferResponder::new(
            "node-a",
            dir.path(),
            Arc::new(broker.clone()),
            ContentHasher::default(),
            ResponderConfig { chunk_size },
        )
        .unwrap();
        let reply_to = broker
            .declare_queue(QueueOptions::ephemeral(None))
            .await
            .unwrap();
        let replies = broker
            .consume(&reply_to, ConsumeOptions::auto_ack())
            .await
            .unwrap();
        Fixture {
            dir,
            broker,
            responder,
            replies,
            reply_to,
        }
    }

    async fn collect(replies: &mut Box<dyn Subscription>) -> Vec<(FileChunk, String)> {
        let mut chunks = Vec::new();
        loop {
            let delivery = replies.next_delivery().await.unwrap();
            let count = delivery.message.header(COUNT_HEADER).unwrap().to_string();
            let chunk = FileChunk::from_parts(
                delivery.message.header(ORDER_HEADER),
                delivery.message.body.clone(),
            )
            .unwrap();
            let done = chunk.is_sentinel();
            chunks.push((chunk, count));
            if done {
                return chunks;
            }
        }
    }

    #[tokio::test]
    async fn test_streams_fixed_size_chunks_then_sentinel() {
        let mut fx = fixture(4).await;
        std::fs::write(fx.dir.path().join("data.bin"), b"0123456789").unwrap();
        let request = TransferRequest::new(
            "node-b",
            "data.bin",
            ContentHasher::hash_bytes(b"0123456789").to_hex(),
        );

        let outcome = fx.responder.serve(&request, &fx.reply_to).await.unwrap();
        assert_eq!(outcome, ServeOutcome::Sent { chunks: 3, bytes: 10 });

        let chunks = collect(&mut fx.replies).await;
        let payloads: Vec<&[u8]> = chunks.iter().map(|(c, _)| c.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&b"0123"[..], b"4567", b"89", b""]);
        assert_eq!(chunks[0].0.order, ChunkOrder::Data(1));
        assert_eq!(chunks[2].0.order, ChunkOrder::Data(3));
        assert!(chunks.iter().all(|(_, count)| count == "3"));
    }

    #[tokio::test]
    async fn test_empty_file_sends_only_sentinel() {
        let mut fx = fixture(4).await;
        std::fs::write(fx.dir.path().join("empty"), b"").unwrap();
        let checksum = ContentHasher::hash_bytes(b"").to_hex();
        let request = TransferRequest::new("node-b", "empty", checksum);

        let outcome = fx.responder.serve(&request, &fx.reply_to).await.unwrap();
        assert_eq!(outcome, ServeOutcome::Sent { chunks: 0, bytes: 0 });

        let chunks = collect(&mut fx.replies).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1, "0");
    }

    #[tokio::test]
    async fn test_changed_content_sends_nothing() {
        let fx = fixture(4).await;
        std::fs::write(fx.dir.path().join("notes.txt"), b"edited since").unwrap();
        let request = TransferRequest::new(
            "node-b",
            "notes.txt",
            ContentHasher::hash_bytes(b"original").to_hex(),
        );

        let outcome = fx.responder.serve(&request, &fx.reply_to).await.unwrap();
        assert!(matches!(outcome, ServeOutcome::Stale { .. }));
        assert_eq!(fx.broker.queue_depth(&fx.reply_to), Some(0));
    }

    #[tokio::test]
    async fn test_missing_file_sends_nothing() {
        let fx = fixture(4).await;
        let request = TransferRequest::new("node-b", "nope.txt", "00".repeat(32));
        let outcome = fx.responder.serve(&request, &fx.reply_to).await.unwrap();
        assert_eq!(outcome, ServeOutcome::Missing);
        assert_eq!(fx.broker.queue_depth(&fx.reply_to), Some(0));
    }

    #[tokio::test]
    async fn test_vanished_reply_queue_drops_chunks() {
        let fx = fixture(4).await;
        std::fs::write(fx.dir.path().join("a.txt"), b"abcdefgh").unwrap();
        let checksum = ContentHasher::hash_bytes(b"abcdefgh").to_hex();
        let request = TransferRequest::new("node-b", "a.txt", checksum);

        let Fixture {
            responder,
            replies,
            reply_to,
            broker,
            dir: _dir,
        } = fx;
        drop(replies);
        assert!(!broker.has_queue(&reply_to));

        // Unroutable chunks are dropped by the broker, not an error here
        let outcome = responder.serve(&request, &reply_to).await.unwrap();
        assert!(matches!(outcome, ServeOutcome::Sent { chunks: 2, .. }));
    }

    #[tokio::test]
    async fn test_publish_failure_aborts() {
        let fx = fixture(4).await;
        std::fs::write(fx.dir.path().join("a.txt"), b"abc").unwrap();
        let request =
            TransferRequest::new("node-b", "a.txt", ContentHasher::hash_bytes(b"abc").to_hex());

        fx.broker.close();
        assert!(fx.responder.serve(&request, &fx.reply_to).await.is_err());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let broker = MemoryBroker::new();
        let result = TransferResponder::new(
            "node-a",
            "/tmp",
            Arc::new(broker),
            ContentHasher::default(),
            ResponderConfig { chunk_size: 0 },
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_admit_settles_requests() {
        let fx = fixture(4).await;
        let mut requests = fx.responder.subscribe().await.unwrap();
        let queue = request_queue_name("node-a");

        let from_peer = TransferRequest::new("node-b", "a.txt", "00".repeat(32));
        let from_self = TransferRequest::new("node-a", "a.txt", "00".repeat(32));

        fx.broker
            .publish(
                FILE_REQUESTS_EXCHANGE,
                "",
                Message::new(from_peer.to_bytes().unwrap()).with_reply_to("amq.gen-x"),
            )
            .await
            .unwrap();
        let admitted = fx.responder.admit(requests.next_delivery().await.unwrap());
        assert_eq!(admitted, Some((from_peer, "amq.gen-x".to_string())));

        fx.broker
            .publish(
                FILE_REQUESTS_EXCHANGE,
                "",
                Message::new(from_self.to_bytes().unwrap()).with_reply_to("amq.gen-y"),
            )
            .await
            .unwrap();
        assert_eq!(fx.responder.admit(requests.next_delivery().await.unwrap()), None);

        fx.broker
            .publish(FILE_REQUESTS_EXCHANGE, "", Message::new("not json"))
            .await
            .unwrap();
        assert_eq!(fx.responder.admit(requests.next_delivery().await.unwrap()), None);

        let no_reply = TransferRequest::new("node-b", "a.txt", "00".repeat(32));
        fx.broker
            .publish(
                FILE_REQUESTS_EXCHANGE,
                "",
                Message::new(no_reply.to_bytes().unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(fx.responder.admit(requests.next_delivery().await.unwrap()), None);

        // Rejected without requeue, so nothing is redelivered
        assert_eq!(fx.broker.queue_depth(&queue), Some(0));
    }
}
