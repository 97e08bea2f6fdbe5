//! Two-way exchange between one producer and the broker.
//!
//! ```text
//!   producer (executor)                      consumers (via broker)
//!        │ push_raw ──────► [ raw queue ] ──────► pop_raw │
//!        │ pop_processed ◄─ [ processed ] ◄── push_processed │
//! ```
//!
//! Each direction is a [`BoundedQueue`] with its own lock, so a producer
//! filling the raw queue never blocks one draining processed items.
//! Every operation comes in a blocking and a timed flavour. Timed pushes
//! hand the item back on timeout; timed pops return `None`.

use crate::bounded::BoundedQueue;
use crate::item::{PortId, WorkItem};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Default capacity of each queue of a port.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Capacities of the two queues of a [`BufferPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Capacity of the raw (producer to consumer) queue.
    pub raw_capacity: usize,
    /// Capacity of the processed (consumer to producer) queue.
    pub processed_capacity: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            raw_capacity: DEFAULT_BUFFER_SIZE,
            processed_capacity: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl PortConfig {
    /// Same capacity for both queues.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw_capacity: capacity,
            processed_capacity: capacity,
        }
    }

    /// Set the raw queue capacity.
    pub fn with_raw_capacity(mut self, capacity: usize) -> Self {
        self.raw_capacity = capacity;
        self
    }

    /// Set the processed queue capacity.
    pub fn with_processed_capacity(mut self, capacity: usize) -> Self {
        self.processed_capacity = capacity;
        self
    }
}

/// Bounded raw/processed queue pair owned by one producer.
pub struct BufferPort<W> {
    raw: BoundedQueue<W>,
    processed: BoundedQueue<W>,
    id: Mutex<Option<PortId>>,
    first_raw_retrieval: Mutex<Option<Instant>>,
}

impl<W: WorkItem> BufferPort<W> {
    /// Creates a port with default capacities.
    pub fn new() -> Self {
        Self::with_config(PortConfig::default())
    }

    /// Creates a port with the given capacities.
    pub fn with_config(config: PortConfig) -> Self {
        Self {
            raw: BoundedQueue::new(config.raw_capacity),
            processed: BoundedQueue::new(config.processed_capacity),
            id: Mutex::new(None),
            first_raw_retrieval: Mutex::new(None),
        }
    }

    /// Id assigned by the broker, if the port is enrolled.
    pub fn id(&self) -> Option<PortId> {
        *self.id.lock()
    }

    pub(crate) fn set_id(&self, id: Option<PortId>) {
        *self.id.lock() = id;
    }

    // =========================================================================
    // Producer side
    // =========================================================================

    /// Queues an item for processing, waiting for space indefinitely.
    ///
    /// The item is stamped with this port's id so that the broker can route
    /// it back. Fails only if the port is closed.
    pub fn push_raw(&self, mut item: W) -> Result<(), W> {
        item.tag_mut().port = self.id();
        self.raw.push(item)
    }

    /// Queues an item for processing, waiting at most `timeout` for space.
    pub fn push_raw_timeout(&self, mut item: W, timeout: Duration) -> Result<(), W> {
        item.tag_mut().port = self.id();
        self.raw.push_timeout(item, timeout)
    }

    /// Takes a processed item, waiting indefinitely.
    ///
    /// Returns `None` only once the port is closed and drained.
    pub fn pop_processed(&self) -> Option<W> {
        self.processed.pop()
    }

    /// Takes a processed item, waiting at most `timeout`.
    pub fn pop_processed_timeout(&self, timeout: Duration) -> Option<W> {
        self.processed.pop_timeout(timeout)
    }

    /// Takes a processed item if one is queued.
    pub fn try_pop_processed(&self) -> Option<W> {
        self.processed.try_pop()
    }

    // =========================================================================
    // Consumer side
    // =========================================================================

    /// Takes a raw item, waiting indefinitely.
    pub fn pop_raw(&self) -> Option<W> {
        let item = self.raw.pop();
        if item.is_some() {
            self.note_raw_retrieval();
        }
        item
    }

    /// Takes a raw item, waiting at most `timeout`.
    pub fn pop_raw_timeout(&self, timeout: Duration) -> Option<W> {
        let item = self.raw.pop_timeout(timeout);
        if item.is_some() {
            self.note_raw_retrieval();
        }
        item
    }

    /// Takes a raw item if one is queued.
    pub fn try_pop_raw(&self) -> Option<W> {
        let item = self.raw.try_pop();
        if item.is_some() {
            self.note_raw_retrieval();
        }
        item
    }

    /// Returns a processed item, waiting for space indefinitely.
    pub fn push_processed(&self, item: W) -> Result<(), W> {
        self.processed.push(item)
    }

    /// Returns a processed item, waiting at most `timeout` for space.
    pub fn push_processed_timeout(&self, item: W, timeout: Duration) -> Result<(), W> {
        self.processed.push_timeout(item, timeout)
    }

    // =========================================================================
    // State
    // =========================================================================

    fn note_raw_retrieval(&self) {
        let mut first = self.first_raw_retrieval.lock();
        if first.is_none() {
            *first = Some(Instant::now());
        }
    }

    /// Time at which a consumer first took a raw item from this port.
    pub fn first_raw_retrieval(&self) -> Option<Instant> {
        *self.first_raw_retrieval.lock()
    }

    /// Number of items waiting to be processed.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Number of processed items waiting to be collected.
    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// Closes both queues. Blocked callers wake up; queued items remain
    /// available to pops.
    pub fn close(&self) {
        self.raw.close();
        self.processed.close();
    }

    /// Returns true once the port has been closed.
    pub fn is_closed(&self) -> bool {
        self.raw.is_closed()
    }
}

impl<W: WorkItem> Default for BufferPort<W> {
    fn default() -> Self {
        Self::new()
    }
}
