//! File chunks streamed to a requester's reply queue
//!
//! The body of each message is raw bytes. Sequencing travels in two string
//! headers: `Order` (1-based, `-1` marks the end of the stream) and `Count`
//! (total data chunks, informational only).

use std::fmt;

use bytes::Bytes;

use crate::errors::{ProtoError, Result};

pub const ORDER_HEADER: &str = "Order";
pub const COUNT_HEADER: &str = "Count";

/// Wire value of the end-of-stream sentinel
pub const SENTINEL_ORDER: i64 = -1;

/// Default payload size of a data chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Position of a chunk in its transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkOrder {
    /// 1-based data chunk
    Data(u64),
    /// Terminal marker, no payload
    End,
}

impl ChunkOrder {
    /// Parse the `Order` header value
    pub fn parse(value: &str) -> Result<Self> {
        let order: i64 = value
            .trim()
            .parse()
            .map_err(|_| ProtoError::BadOrder(value.to_string()))?;

        match order {
            SENTINEL_ORDER => Ok(ChunkOrder::End),
            n if n >= 1 => Ok(ChunkOrder::Data(n as u64)),
            _ => Err(ProtoError::BadOrder(value.to_string())),
        }
    }

    /// Render as an `Order` header value
    pub fn to_header(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChunkOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkOrder::Data(n) => write!(f, "{}", n),
            ChunkOrder::End => write!(f, "{}", SENTINEL_ORDER),
        }
    }
}

/// One unit of a streamed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub order: ChunkOrder,
    pub payload: Bytes,
}

impl FileChunk {
    pub fn data(order: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            order: ChunkOrder::Data(order),
            payload: payload.into(),
        }
    }

    pub fn sentinel() -> Self {
        Self {
            order: ChunkOrder::End,
            payload: Bytes::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.order == ChunkOrder::End
    }

    /// Rebuild a chunk from a delivery's `Order` header and body.
    ///
    /// A missing or unparseable header is an error; the sentinel's body is
    /// ignored.
    pub fn from_parts(order_header: Option<&str>, payload: Bytes) -> Result<Self> {
        let order = order_header.ok_or(ProtoError::MissingHeader(ORDER_HEADER))?;
        let order = ChunkOrder::parse(order)?;
        let payload = match order {
            ChunkOrder::End => Bytes::new(),
            ChunkOrder::Data(_) => payload,
        };
        Ok(Self { order, payload })
    }
}

/// Number of data chunks a file of `size` bytes splits into
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size)
}
