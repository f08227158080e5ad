use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Out-of-band string metadata attached to a message
pub type Headers = BTreeMap<String, String>;

/// A message as published to, and delivered from, the broker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub headers: Headers,
    /// Queue the receiver should answer on
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Settles a delivery with the broker that produced it
pub trait Acknowledger: Send {
    fn ack(self: Box<Self>);
    fn reject(self: Box<Self>, requeue: bool);
}

/// A message handed to a consumer.
///
/// Deliveries from manual-ack consumers must be settled with [`ack`] or
/// [`reject`]. One dropped unsettled is requeued, as a broker would on
/// channel loss.
///
/// [`ack`]: Delivery::ack
/// [`reject`]: Delivery::reject
pub struct Delivery {
    pub message: Message,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(message: Message, acker: Option<Box<dyn Acknowledger>>) -> Self {
        Self { message, acker }
    }

    /// Already settled by the broker (auto-ack consumer)
    pub fn auto_acked(message: Message) -> Self {
        Self::new(message, None)
    }

    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.ack();
        }
    }

    pub fn reject(mut self, requeue: bool) {
        if let Some(acker) = self.acker.take() {
            acker.reject(requeue);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.acker.is_none()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.reject(true);
        }
    }
}
