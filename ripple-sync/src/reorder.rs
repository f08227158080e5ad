//! Reassembly of chunks that arrive out of order

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use bytes::Bytes;

/// What the buffer did with an incoming chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Payloads that are now contiguous, in write order
    Ready(Vec<Bytes>),
    /// Held until its predecessors arrive
    Buffered,
    /// Already written or already held
    Duplicate,
}

/// Per-transfer holding area keyed by chunk order.
///
/// Every held key is strictly greater than the last order handed out for
/// writing.
#[derive(Debug)]
pub struct ReorderBuffer {
    next_expected: u64,
    pending: BTreeMap<u64, Bytes>,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            pending: BTreeMap::new(),
        }
    }

    pub fn accept(&mut self, order: u64, payload: Bytes) -> Placement {
        if order < self.next_expected {
            return Placement::Duplicate;
        }

        if order > self.next_expected {
            return match self.pending.entry(order) {
                Entry::Vacant(slot) => {
                    slot.insert(payload);
                    Placement::Buffered
                }
                Entry::Occupied(_) => Placement::Duplicate,
            };
        }

        let mut ready = vec![payload];
        self.next_expected += 1;
        while let Some(next) = self.pending.remove(&self.next_expected) {
            ready.push(next);
            self.next_expected += 1;
        }
        Placement::Ready(ready)
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Chunks handed out for writing so far
    pub fn written(&self) -> u64 {
        self.next_expected - 1
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Orders still held, ascending
    pub fn pending_orders(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }
}
