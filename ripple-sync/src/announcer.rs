//! Publishes local file changes to every peer

use std::path::PathBuf;
use std::sync::Arc;

use ripple_broker::{Broker, ExchangeKind, Message};
use ripple_proto::{relative_path, Change, ChangeKind, CHANGES_EXCHANGE, JSON_CONTENT_TYPE};
use tracing::{debug, info};

use crate::errors::Result;
use crate::event::FileEvent;
use crate::hasher::ContentHasher;
use crate::locks::LockRegistry;

pub struct ChangeAnnouncer {
    node_id: String,
    root: PathBuf,
    hasher: ContentHasher,
    locks: LockRegistry,
    broker: Arc<dyn Broker>,
}

impl ChangeAnnouncer {
    pub fn new(
        node_id: impl Into<String>,
        root: impl Into<PathBuf>,
        hasher: ContentHasher,
        locks: LockRegistry,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            root: root.into(),
            hasher,
            locks,
            broker,
        }
    }

    /// Declare the `changes` exchange
    pub async fn setup(&self) -> Result<()> {
        self.broker
            .declare_exchange(CHANGES_EXCHANGE, ExchangeKind::Fanout)
            .await?;
        debug!("Announcer for {} declared exchange {}", self.node_id, CHANGES_EXCHANGE);
        Ok(())
    }

    /// Publish a Change for a local event.
    ///
    /// Returns `None` when nothing was published: the path is locked by an
    /// inbound transfer, or content vanished before it could be hashed.
    pub async fn announce(&self, event: &FileEvent) -> Result<Option<Change>> {
        let path = relative_path(&self.root, &event.path)?;
        if self.suppressed(&path) {
            return Ok(None);
        }

        let kind = ChangeKind::from(event.kind);
        let checksum = if kind.carries_content() {
            let checksum = self.hasher.checksum_async(event.path.clone()).await;
            if checksum.is_empty() {
                debug!("Not announcing {} of {}: content unavailable", kind, path);
                return Ok(None);
            }
            checksum
        } else {
            String::new()
        };

        // Hashing can take a while; a transfer may have started meanwhile
        if self.suppressed(&path) {
            return Ok(None);
        }

        let change = Change::new(&self.node_id, path, kind, checksum);
        let body = change.to_bytes()?;
        let message = Message::new(body).with_content_type(JSON_CONTENT_TYPE);
        self.broker.publish(CHANGES_EXCHANGE, "", message).await?;

        info!("Announced {} of {} ({}B path)", change.kind, change.path, change.path.len());
        Ok(Some(change))
    }

    fn suppressed(&self, path: &str) -> bool {
        let locked = self.locks.is_locked(path);
        if locked {
            debug!("Suppressing event for {}: inbound transfer in flight", path);
        }
        locked
    }
}
