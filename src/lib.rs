//! Ripple: peer-to-peer folder sync over a publish/subscribe broker
//!
//! Re-exports the workspace crates under one name.

pub use ripple_broker as broker;
pub use ripple_daemon as daemon;
pub use ripple_proto as proto;
pub use ripple_sync as sync;

pub use ripple_broker::{Broker, MemoryBroker};
pub use ripple_proto::{Change, ChangeKind, TransferRequest};
pub use ripple_sync::{NodeConfig, SyncError, SyncNode};
