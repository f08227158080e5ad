use thiserror::Error;

use crate::ExchangeKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker connection closed")]
    Closed,

    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Exchange {name} already declared as {existing:?}, requested {requested:?}")]
    ExchangeMismatch {
        name: String,
        existing: ExchangeKind,
        requested: ExchangeKind,
    },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue {0} is exclusive and already has a consumer")]
    QueueLocked(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
