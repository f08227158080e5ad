//! Full pipeline: filesystem watcher → announcer → peer transfer

mod common;

use std::time::Duration;

use common::{has_content, wait_until};
use ripple::daemon::{Daemon, DaemonConfig, NodeEntry};
use tempfile::TempDir;

fn two_node_config(dir: &TempDir) -> DaemonConfig {
    DaemonConfig {
        nodes: ["alpha", "beta"]
            .iter()
            .map(|id| NodeEntry {
                id: id.to_string(),
                root: dir.path().join(id),
            })
            .collect(),
        chunk_timeout_secs: 5,
        lock_linger_ms: 300,
        ..DaemonConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watched_edit_reaches_other_node() {
    let dir = TempDir::new().unwrap();
    let mut daemon = Daemon::connect(&two_node_config(&dir)).await.unwrap();
    daemon.start().await.unwrap();

    // Give the watchers time to register
    tokio::time::sleep(Duration::from_millis(200)).await;

    let alpha_root = daemon.nodes()[0].root().to_path_buf();
    let beta_root = daemon.nodes()[1].root().to_path_buf();
    std::fs::create_dir_all(alpha_root.join("docs")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(alpha_root.join("docs/plan.md"), b"# plan\n").unwrap();

    let mirrored = beta_root.join("docs/plan.md");
    assert!(wait_until(Duration::from_secs(10), || has_content(&mirrored, b"# plan\n")).await);

    daemon.shutdown().await;
    assert!(!daemon.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hidden_files_stay_local() {
    let dir = TempDir::new().unwrap();
    let mut daemon = Daemon::connect(&two_node_config(&dir)).await.unwrap();
    daemon.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let alpha_root = daemon.nodes()[0].root().to_path_buf();
    let beta_root = daemon.nodes()[1].root().to_path_buf();
    std::fs::write(alpha_root.join(".secret"), b"x").unwrap();
    std::fs::write(alpha_root.join("visible.txt"), b"y").unwrap();

    let visible = beta_root.join("visible.txt");
    assert!(wait_until(Duration::from_secs(10), || has_content(&visible, b"y")).await);
    assert!(!beta_root.join(".secret").exists());

    daemon.shutdown().await;
}
