use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use ripple_broker::{AmqpBroker, Broker, MemoryBroker};
use ripple_sync::{NodeConfig, SyncNode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::watcher::FileWatcher;

/// Buffered filesystem events per node before the watcher thread blocks
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Dial the configured broker, or start an in-process one when no URL is set
pub async fn connect_broker(config: &DaemonConfig) -> Result<Arc<dyn Broker>> {
    match &config.broker_url {
        Some(url) => {
            let broker = AmqpBroker::connect(url)
                .await
                .context("Failed to connect to broker")?;
            Ok(Arc::new(broker))
        }
        None => {
            info!("No broker_url configured; syncing between local nodes only");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}

/// Runs every configured node against one shared broker
pub struct Daemon {
    broker: Arc<dyn Broker>,
    nodes: Vec<SyncNode>,
    watchers: Vec<FileWatcher>,
    tasks: Vec<JoinHandle<()>>,
    running: bool,
}

impl Daemon {
    /// Connect to the configured broker and build the nodes
    pub async fn connect(config: &DaemonConfig) -> Result<Self> {
        let broker = connect_broker(config).await?;
        Self::new(config, broker)
    }

    /// Build the nodes on `broker`, creating missing sync roots
    pub fn new(config: &DaemonConfig, broker: Arc<dyn Broker>) -> Result<Self> {
        if config.nodes.is_empty() {
            bail!("No nodes configured");
        }

        let mut seen = HashSet::new();
        let mut nodes = Vec::new();

        for mut node_config in config.node_configs() {
            if !seen.insert(node_config.node_id.clone()) {
                bail!("Node id {} configured twice", node_config.node_id);
            }
            node_config.root = prepare_root(&node_config)?;
            let node = SyncNode::new(node_config, broker.clone())
                .context("Failed to build sync node")?;
            nodes.push(node);
        }

        Ok(Self {
            broker,
            nodes,
            watchers: Vec::new(),
            tasks: Vec::new(),
            running: false,
        })
    }

    pub fn nodes(&self) -> &[SyncNode] {
        &self.nodes
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start consumers, responders and watchers for every node
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("Daemon already running");
        }
        info!("Starting ripple daemon with {} node(s)", self.nodes.len());

        for node in &self.nodes {
            let handles = node
                .start()
                .await
                .with_context(|| format!("Failed to set up broker topology for {}", node.id()))?;
            self.tasks.extend(handles);

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let mut watcher = FileWatcher::new(node.root().to_path_buf());
            watcher.start(tx)?;
            self.watchers.push(watcher);
            self.tasks.push(node.forward_events(rx));
        }

        self.running = true;
        info!("Ripple daemon started");
        Ok(())
    }

    /// Stop watching, close the broker and wait for node tasks to drain
    pub async fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        info!("Shutting down ripple daemon");

        // Dropping the watchers closes the event channels
        for mut watcher in self.watchers.drain(..) {
            watcher.stop();
        }
        self.broker.shutdown().await;

        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                warn!("Node task ended abnormally: {}", e);
            }
        }
        self.running = false;
        info!("Ripple daemon stopped");
    }

    /// Start, then run until ctrl-c
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        self.shutdown().await;
        Ok(())
    }
}

/// Notify reports canonical paths on some platforms, so roots are
/// canonicalized up front to keep relative paths computable.
fn prepare_root(config: &NodeConfig) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("Failed to create sync root {}", config.root.display()))?;
    let root = config
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve sync root {}", config.root.display()))?;
    debug!("Node {} uses root {}", config.node_id, root.display());
    Ok(root)
}
