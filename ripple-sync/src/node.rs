//! One participant in the sync group, wired together

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ripple_broker::Broker;
use ripple_proto::{Change, Validator};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::announcer::ChangeAnnouncer;
use crate::consumer::ChangeConsumer;
use crate::errors::Result;
use crate::event::FileEvent;
use crate::hasher::{ContentHasher, HasherConfig};
use crate::locks::LockRegistry;
use crate::requester::{RequesterConfig, TransferRequester};
use crate::resolver::ConflictResolver;
use crate::responder::{ResponderConfig, TransferResponder};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Sync root; every announced path is relative to it
    pub root: PathBuf,
    pub hasher: HasherConfig,
    pub requester: RequesterConfig,
    pub responder: ResponderConfig,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            root: root.into(),
            hasher: HasherConfig::default(),
            requester: RequesterConfig::default(),
            responder: ResponderConfig::default(),
        }
    }
}

pub struct SyncNode {
    config: NodeConfig,
    locks: LockRegistry,
    announcer: Arc<ChangeAnnouncer>,
    consumer: Arc<ChangeConsumer>,
    responder: Arc<TransferResponder>,
    requester: Arc<TransferRequester>,
}

impl SyncNode {
    pub fn new(config: NodeConfig, broker: Arc<dyn Broker>) -> Result<Self> {
        Validator::validate_node_id(&config.node_id)?;

        let locks = LockRegistry::new();
        let hasher = ContentHasher::new(config.hasher);

        let requester = Arc::new(TransferRequester::new(
            &config.node_id,
            &config.root,
            broker.clone(),
            locks.clone(),
            hasher.clone(),
            config.requester.clone(),
        ));
        let resolver = Arc::new(ConflictResolver::new(
            &config.root,
            locks.clone(),
            requester.clone(),
        ));
        let consumer = Arc::new(ChangeConsumer::new(&config.node_id, broker.clone(), resolver));
        let responder = Arc::new(TransferResponder::new(
            &config.node_id,
            &config.root,
            broker.clone(),
            hasher.clone(),
            config.responder.clone(),
        )?);
        let announcer = Arc::new(ChangeAnnouncer::new(
            &config.node_id,
            &config.root,
            hasher,
            locks.clone(),
            broker,
        ));

        Ok(Self {
            config,
            locks,
            announcer,
            consumer,
            responder,
            requester,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.node_id
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn requester(&self) -> &Arc<TransferRequester> {
        &self.requester
    }

    /// Declare topology and start consuming changes and requests.
    ///
    /// Broker setup failures are returned; the node is unusable without its
    /// queues.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>> {
        self.announcer.setup().await?;
        let consumer = self.consumer.clone().start().await?;
        let responder = self.responder.clone().start().await?;
        info!(
            "Node {} syncing {}",
            self.config.node_id,
            self.config.root.display()
        );
        Ok(vec![consumer, responder])
    }

    pub async fn announce(&self, event: &FileEvent) -> Result<Option<Change>> {
        self.announcer.announce(event).await
    }

    /// Announce every event from `events`, each on its own task
    pub fn forward_events(&self, mut events: mpsc::Receiver<FileEvent>) -> JoinHandle<()> {
        let announcer = self.announcer.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let announcer = announcer.clone();
                tokio::spawn(async move {
                    if let Err(e) = announcer.announce(&event).await {
                        error!("Failed to announce {}: {}", event.path.display(), e);
                    }
                });
            }
        })
    }
}
