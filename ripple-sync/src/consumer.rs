//! Receives peers' change announcements

use std::sync::Arc;

use ripple_broker::{Broker, ConsumeOptions, Delivery, ExchangeKind, QueueOptions, Subscription};
use ripple_proto::{Change, CHANGES_EXCHANGE};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::resolver::ConflictResolver;

pub struct ChangeConsumer {
    node_id: String,
    broker: Arc<dyn Broker>,
    resolver: Arc<ConflictResolver>,
}

impl ChangeConsumer {
    pub fn new(
        node_id: impl Into<String>,
        broker: Arc<dyn Broker>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            broker,
            resolver,
        }
    }

    /// Attach this node's durable queue to the `changes` exchange.
    ///
    /// The queue is named after the node, so announcements published while
    /// the node is away are delivered when it comes back.
    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        self.broker
            .declare_exchange(CHANGES_EXCHANGE, ExchangeKind::Fanout)
            .await?;
        let queue = self
            .broker
            .declare_queue(QueueOptions::durable(&self.node_id))
            .await?;
        self.broker.bind_queue(&queue, CHANGES_EXCHANGE, "").await?;
        let subscription = self
            .broker
            .consume(&queue, ConsumeOptions::manual_ack())
            .await?;
        debug!("Consumer for {} attached to {}", self.node_id, queue);
        Ok(subscription)
    }

    /// Settle a delivery and return the change if it came from a peer.
    ///
    /// Valid changes are acked before any work happens; redelivering them
    /// would not help a failed resolution.
    pub fn admit(&self, delivery: Delivery) -> Option<Change> {
        let change = match Change::from_bytes(&delivery.message.body) {
            Ok(change) => change,
            Err(e) => {
                warn!("Dropping malformed change: {}", e);
                delivery.reject(false);
                return None;
            }
        };
        delivery.ack();

        if change.source == self.node_id {
            return None;
        }
        debug!("Received {} of {} from {}", change.kind, change.path, change.source);
        Some(change)
    }

    /// Consume until the subscription ends, resolving each change on its
    /// own task.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        let mut changes = self.subscribe().await?;

        Ok(tokio::spawn(async move {
            while let Some(delivery) = changes.next_delivery().await {
                let Some(change) = self.admit(delivery) else {
                    continue;
                };
                let resolver = self.resolver.clone();
                tokio::spawn(async move {
                    match resolver.resolve(&change).await {
                        Ok(resolution) => {
                            info!("Resolved {} of {}: {:?}", change.kind, change.path, resolution)
                        }
                        Err(e) => error!(
                            "Failed to resolve {} of {}: {}",
                            change.kind, change.path, e
                        ),
                    }
                });
            }
            debug!("Change stream for {} ended", self.node_id);
        }))
    }
}
