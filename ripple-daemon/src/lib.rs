//! Daemon runtime for ripple: configuration, filesystem watching, and the
//! process that runs one or more sync nodes.

pub mod config;
pub mod daemon;
pub mod watcher;

pub use config::{get_config_path, DaemonConfig, NodeEntry};
pub use daemon::{connect_broker, Daemon};
pub use watcher::{convert_notify_event, FileWatcher};
