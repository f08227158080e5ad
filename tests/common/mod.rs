#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ripple::broker::MemoryBroker;
use ripple::sync::{
    FileEvent, FileEventKind, NodeConfig, RequesterConfig, ResponderConfig, SyncNode,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Nodes sharing one in-memory broker, each with its own temp root
pub struct Cluster {
    pub broker: MemoryBroker,
    pub nodes: Vec<SyncNode>,
    tasks: Vec<JoinHandle<()>>,
    _dirs: Vec<TempDir>,
}

pub struct ClusterOptions {
    pub chunk_size: usize,
    pub chunk_timeout: Duration,
    pub lock_linger: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_timeout: Duration::from_secs(5),
            lock_linger: Duration::from_millis(50),
        }
    }
}

impl Cluster {
    pub async fn start(ids: &[&str]) -> Self {
        Self::start_with(ids, ClusterOptions::default()).await
    }

    pub async fn start_with(ids: &[&str], options: ClusterOptions) -> Self {
        let broker = MemoryBroker::new();
        let mut nodes = Vec::new();
        let mut dirs = Vec::new();
        let mut tasks = Vec::new();

        for id in ids {
            let dir = TempDir::new().unwrap();
            let mut config = NodeConfig::new(*id, dir.path());
            config.requester = RequesterConfig {
                chunk_timeout: Some(options.chunk_timeout),
                lock_linger: options.lock_linger,
            };
            config.responder = ResponderConfig {
                chunk_size: options.chunk_size,
            };

            let node = SyncNode::new(config, Arc::new(broker.clone())).unwrap();
            tasks.extend(node.start().await.unwrap());
            nodes.push(node);
            dirs.push(dir);
        }

        Self {
            broker,
            nodes,
            tasks,
            _dirs: dirs,
        }
    }

    pub fn node(&self, id: &str) -> &SyncNode {
        self.nodes.iter().find(|node| node.id() == id).unwrap()
    }

    /// Write a file under a node's root and announce it as the watcher would
    pub async fn write_and_announce(&self, id: &str, path: &str, content: &[u8]) {
        let node = self.node(id);
        let file = node.root().join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file, content).unwrap();
        node.announce(&FileEvent::new(file, FileEventKind::Created))
            .await
            .unwrap()
            .unwrap();
    }

    pub async fn stop(mut self) {
        self.broker.close();
        for task in self.tasks.drain(..) {
            tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .unwrap()
                .unwrap();
        }
    }
}

pub fn file_at(node: &SyncNode, path: &str) -> PathBuf {
    node.root().join(path)
}

/// Poll until `condition` holds or `limit` passes
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn has_content(path: &Path, expected: &[u8]) -> bool {
    std::fs::read(path).map(|c| c == expected).unwrap_or(false)
}
