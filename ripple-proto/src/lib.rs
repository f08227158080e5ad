//! Wire records for the ripple sync protocol
//!
//! - [`Change`]: a filesystem mutation announced on the `changes` exchange
//! - [`TransferRequest`]: a content pull published on `file-requests`
//! - [`FileChunk`]: one ordered fragment streamed to a reply queue

pub mod change;
pub mod chunk;
pub mod errors;
pub mod transfer;
pub mod validation;

pub use change::{Change, ChangeKind};
pub use chunk::{
    chunk_count, ChunkOrder, FileChunk, COUNT_HEADER, DEFAULT_CHUNK_SIZE, ORDER_HEADER,
    SENTINEL_ORDER,
};
pub use errors::{ProtoError, Result};
pub use transfer::TransferRequest;
pub use validation::{local_path, relative_path, ValidationError, Validator};

/// Fanout exchange carrying [`Change`] records
pub const CHANGES_EXCHANGE: &str = "changes";

/// Fanout exchange carrying [`TransferRequest`] records
pub const FILE_REQUESTS_EXCHANGE: &str = "file-requests";

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Name of a node's request queue on the `file-requests` exchange
pub fn request_queue_name(node_id: &str) -> String {
    format!("{}-files", node_id)
}
