//! Error types for sync operations

use std::fmt;

use thiserror::Error;

/// Why a transfer stopped before its end-of-stream marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A chunk arrived without a usable `Order` header
    BadHeader(String),
    /// Opening or writing the destination failed
    Io(String),
    /// No chunk arrived within the idle timeout
    ResponderAbsent,
    /// The reply queue went away before the sentinel
    StreamClosed,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::BadHeader(detail) => write!(f, "bad chunk header ({})", detail),
            AbortReason::Io(detail) => write!(f, "io error ({})", detail),
            AbortReason::ResponderAbsent => write!(f, "responder absent"),
            AbortReason::StreamClosed => write!(f, "reply stream closed"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] ripple_broker::BrokerError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ripple_proto::ProtoError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ripple_proto::ValidationError),

    #[error("Transfer of {path} aborted: {reason}")]
    TransferAborted { path: String, reason: AbortReason },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub(crate) fn aborted(path: &str, reason: AbortReason) -> Self {
        SyncError::TransferAborted {
            path: path.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
