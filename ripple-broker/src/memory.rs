//! In-process broker
//!
//! Queues are plain `VecDeque`s guarded by a mutex, with a `Notify` to wake
//! consumers. All nodes in one process share a single `MemoryBroker` clone.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::errors::{BrokerError, Result};
use crate::message::{Acknowledger, Delivery, Message};
use crate::{Broker, ConsumeOptions, ExchangeKind, QueueOptions, Subscription, DEFAULT_EXCHANGE};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Binding {
    queue: String,
    key: String,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Message>,
    unacked: usize,
    consumers: usize,
    deleted: bool,
}

#[derive(Debug)]
struct Queue {
    name: String,
    options: QueueOptions,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn push(&self, message: Message) {
        lock(&self.state).messages.push_back(message);
        self.notify.notify_waiters();
    }

    fn settle(&self, requeue: Option<Message>) {
        {
            let mut state = lock(&self.state);
            state.unacked = state.unacked.saturating_sub(1);
            if let Some(message) = requeue {
                state.messages.push_front(message);
            }
        }
        self.notify.notify_waiters();
    }
}

#[derive(Debug, Default)]
struct Topology {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Arc<Queue>>,
}

#[derive(Debug, Default)]
struct Inner {
    topology: Mutex<Topology>,
    closed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    fn remove_queue(&self, name: &str) {
        let mut topology = lock(&self.topology);
        if let Some(queue) = topology.queues.remove(name) {
            lock(&queue.state).deleted = true;
            queue.notify.notify_waiters();
        }
        for exchange in topology.exchanges.values_mut() {
            exchange.bindings.retain(|binding| binding.queue != name);
        }
        debug!("Deleted queue {}", name);
    }
}

/// Broker living entirely in this process
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the "connection": every later operation fails and open
    /// subscriptions end.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topology = lock(&self.inner.topology);
        for queue in topology.queues.values() {
            queue.notify.notify_waiters();
        }
        info!("Memory broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        lock(&self.inner.topology).queues.contains_key(name)
    }

    /// Messages waiting in a queue (not yet handed to a consumer)
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        let topology = lock(&self.inner.topology);
        topology
            .queues
            .get(name)
            .map(|queue| lock(&queue.state).messages.len())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        self.inner.ensure_open()?;
        if name.is_empty() {
            return Err(BrokerError::InvalidName(
                "the default exchange cannot be declared".to_string(),
            ));
        }

        let mut topology = lock(&self.inner.topology);
        match topology.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::ExchangeMismatch {
                name: name.to_string(),
                existing: existing.kind,
                requested: kind,
            }),
            Some(_) => Ok(()),
            None => {
                topology.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                debug!("Declared {:?} exchange {}", kind, name);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, options: QueueOptions) -> Result<String> {
        self.inner.ensure_open()?;

        let name = match &options.name {
            Some(name) if name.is_empty() => {
                return Err(BrokerError::InvalidName("empty queue name".to_string()))
            }
            Some(name) => name.clone(),
            None => format!("amq.gen-{}", uuid::Uuid::new_v4().simple()),
        };

        let mut topology = lock(&self.inner.topology);
        if !topology.queues.contains_key(&name) {
            topology.queues.insert(
                name.clone(),
                Arc::new(Queue {
                    name: name.clone(),
                    options,
                    state: Mutex::new(QueueState::default()),
                    notify: Notify::new(),
                }),
            );
            debug!("Declared queue {}", name);
        }

        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> Result<()> {
        self.inner.ensure_open()?;

        let mut topology = lock(&self.inner.topology);
        if !topology.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let target = topology
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        let already_bound = target
            .bindings
            .iter()
            .any(|binding| binding.queue == queue && binding.key == binding_key);
        if !already_bound {
            target.bindings.push(Binding {
                queue: queue.to_string(),
                key: binding_key.to_string(),
            });
        }

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()> {
        self.inner.ensure_open()?;

        let targets: Vec<Arc<Queue>> = {
            let topology = lock(&self.inner.topology);
            if exchange == DEFAULT_EXCHANGE {
                topology.queues.get(routing_key).cloned().into_iter().collect()
            } else {
                let source = topology
                    .exchanges
                    .get(exchange)
                    .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
                source
                    .bindings
                    .iter()
                    .filter(|binding| match source.kind {
                        ExchangeKind::Fanout => true,
                        ExchangeKind::Direct => binding.key == routing_key,
                    })
                    .filter_map(|binding| topology.queues.get(&binding.queue).cloned())
                    .collect()
            }
        };

        if targets.is_empty() {
            debug!(
                "Dropping unroutable message (exchange {:?}, key {:?})",
                exchange, routing_key
            );
            return Ok(());
        }

        for queue in targets {
            queue.push(message.clone());
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Box<dyn Subscription>> {
        self.inner.ensure_open()?;

        let queue = lock(&self.inner.topology)
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        {
            let mut state = lock(&queue.state);
            if queue.options.exclusive && state.consumers > 0 {
                return Err(BrokerError::QueueLocked(queue.name.clone()));
            }
            state.consumers += 1;
        }

        Ok(Box::new(MemorySubscription {
            broker: self.inner.clone(),
            queue,
            options,
        }))
    }

    async fn shutdown(&self) {
        self.close();
    }
}

struct MemoryAcker {
    queue: Arc<Queue>,
    message: Message,
}

impl Acknowledger for MemoryAcker {
    fn ack(self: Box<Self>) {
        self.queue.settle(None);
    }

    fn reject(self: Box<Self>, requeue: bool) {
        let message = if requeue { Some(self.message) } else { None };
        self.queue.settle(message);
    }
}

struct MemorySubscription {
    broker: Arc<Inner>,
    queue: Arc<Queue>,
    options: ConsumeOptions,
}

impl MemorySubscription {
    /// Hand out the head of the queue if the prefetch window allows it.
    /// `Err(())` means the subscription is finished.
    fn try_take(&self) -> std::result::Result<Option<Delivery>, ()> {
        if self.broker.ensure_open().is_err() {
            return Err(());
        }

        let mut state = lock(&self.queue.state);
        if state.deleted {
            return Err(());
        }

        let within_window = self
            .options
            .prefetch
            .map_or(true, |limit| state.unacked < limit);
        if !within_window {
            return Ok(None);
        }

        let Some(message) = state.messages.pop_front() else {
            return Ok(None);
        };

        if self.options.auto_ack {
            return Ok(Some(Delivery::auto_acked(message)));
        }

        state.unacked += 1;
        let acker = MemoryAcker {
            queue: self.queue.clone(),
            message: message.clone(),
        };
        Ok(Some(Delivery::new(message, Some(Box::new(acker)))))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take() {
                Ok(Some(delivery)) => return Some(delivery),
                Ok(None) => {}
                Err(()) => return None,
            }

            notified.await;
        }
    }

    fn queue(&self) -> &str {
        &self.queue.name
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let remaining = {
            let mut state = lock(&self.queue.state);
            state.consumers = state.consumers.saturating_sub(1);
            state.consumers
        };

        if remaining == 0 && self.queue.options.auto_delete {
            self.broker.remove_queue(&self.queue.name);
        }
    }
}
