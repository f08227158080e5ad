//! Change propagation and chunked file transfer between ripple nodes
//!
//! A node is made of a handful of cooperating parts:
//! - [`ChangeAnnouncer`] publishes local filesystem events as [`Change`]s
//! - [`ChangeConsumer`] receives peers' changes and hands them to the
//!   [`ConflictResolver`]
//! - [`TransferRequester`] pulls announced content from whichever peer has it
//! - [`TransferResponder`] streams local files to requesting peers
//! - [`LockRegistry`] keeps our own inbound writes from being re-announced
//!
//! [`SyncNode`] wires them together over a shared [`Broker`](ripple_broker::Broker).
//!
//! [`Change`]: ripple_proto::Change

pub mod announcer;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod hasher;
pub mod locks;
pub mod node;
pub mod reorder;
pub mod requester;
pub mod resolver;
pub mod responder;

pub use announcer::ChangeAnnouncer;
pub use consumer::ChangeConsumer;
pub use errors::{AbortReason, Result, SyncError};
pub use event::{FileEvent, FileEventKind};
pub use hasher::{ContentHash, ContentHasher, HasherConfig, DEFAULT_BLOCK_SIZE};
pub use locks::{LockRegistry, LockToken, PathLock, PendingLock};
pub use node::{NodeConfig, SyncNode};
pub use reorder::{Placement, ReorderBuffer};
pub use requester::{RequesterConfig, TransferOutcome, TransferReport, TransferRequester};
pub use resolver::{ConflictResolver, Resolution};
pub use responder::{ResponderConfig, ServeOutcome, TransferResponder};
