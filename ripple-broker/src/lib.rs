//! # Ripple broker abstraction
//!
//! Nodes never talk to each other directly. Every record travels through a
//! publish/subscribe broker with AMQP-style topology:
//!
//! ```text
//!  publish(exchange, key) ──► Exchange ──bind──► Queue ──consume──► Subscription
//!                              fanout            durable / exclusive     │
//!                              direct            auto-delete             ▼
//!  publish("", queue)  ─────────────────────────►                    Delivery
//!                                                                  ack / reject
//! ```
//!
//! - [`Broker`]: declare, bind, publish and consume primitives
//! - [`Subscription`]: stream of [`Delivery`] values from one queue
//! - [`MemoryBroker`]: in-process implementation shared by every node in a
//!   process, also used throughout the test suites
//! - [`AmqpBroker`]: AMQP 0-9-1 client for nodes on different hosts
//!
//! Delivery is at-least-once: a delivery dropped without being settled goes
//! back on its queue.

pub mod amqp;
pub mod errors;
pub mod memory;
pub mod message;

use async_trait::async_trait;

pub use amqp::AmqpBroker;
pub use errors::{BrokerError, Result};
pub use memory::MemoryBroker;
pub use message::{Acknowledger, Delivery, Headers, Message};

/// The nameless exchange that routes straight to the queue named by the
/// routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Routing behaviour of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Copy every message to every bound queue
    Fanout,
    /// Deliver to queues whose binding key equals the routing key
    Direct,
}

/// Queue declaration parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// `None` asks the broker to generate a unique name
    pub name: Option<String>,
    /// Survives with no consumer attached, buffering messages
    pub durable: bool,
    /// Only one consumer at a time
    pub exclusive: bool,
    /// Removed when its last consumer goes away
    pub auto_delete: bool,
}

impl QueueOptions {
    /// A named queue that keeps buffering while nobody consumes it
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// A single-consumer queue that disappears with its consumer
    pub fn ephemeral(name: Option<String>) -> Self {
        Self {
            name,
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Consumer parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Maximum unsettled deliveries outstanding; `None` for unlimited
    pub prefetch: Option<usize>,
    /// Deliveries are settled by the broker as they are handed out
    pub auto_ack: bool,
}

impl ConsumeOptions {
    pub fn manual_ack() -> Self {
        Self::default()
    }

    pub fn auto_ack() -> Self {
        Self {
            prefetch: None,
            auto_ack: true,
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = Some(prefetch);
        self
    }
}

/// Broker primitives a node relies on
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare an exchange; redeclaring with the same kind is a no-op
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()>;

    /// Declare a queue and return its (possibly generated) name
    async fn declare_queue(&self, options: QueueOptions) -> Result<String>;

    /// Route messages from `exchange` into `queue`
    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> Result<()>;

    /// Publish without waiting for any consumer. Messages that match no
    /// queue are dropped.
    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()>;

    /// Start consuming from a queue
    async fn consume(&self, queue: &str, options: ConsumeOptions)
        -> Result<Box<dyn Subscription>>;

    /// Close the connection. Open subscriptions end and later calls fail.
    async fn shutdown(&self);
}

/// Deliveries from one queue, in broker order
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery, or `None` once the queue or broker is gone
    async fn next_delivery(&mut self) -> Option<Delivery>;

    /// Name of the queue being consumed
    fn queue(&self) -> &str;
}
