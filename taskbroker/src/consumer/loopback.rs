//! In-process stand-in for a network of remote peers.
//!
//! Each simulated peer is a thread that takes items from a shared inbound
//! queue, processes them after an optional delay and sends them back. Loss
//! can be injected deterministically with `drop_every`, which makes the
//! transport useful for exercising best-effort paths in tests and demos.

use super::remote::{Transport, TransportError};
use crate::bounded::BoundedQueue;
use crate::item::{run_item, WorkItem};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PEER_POLL: Duration = Duration::from_millis(50);

/// Configuration for a [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Number of simulated peers (default: 2)
    pub peers: usize,
    /// Delay added to every item
    pub latency: Duration,
    /// Lose every n-th processed item
    pub drop_every: Option<usize>,
    /// Capacity of the in-flight queues
    pub capacity: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            peers: 2,
            latency: Duration::ZERO,
            drop_every: None,
            capacity: 1024,
        }
    }
}

impl LoopbackConfig {
    /// Set the number of peers (at least one).
    pub fn with_peers(mut self, peers: usize) -> Self {
        self.peers = peers.max(1);
        self
    }

    /// Set the per-item latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Lose every n-th item; `0` disables loss.
    pub fn with_drop_every(mut self, n: usize) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }
}

/// Transport whose peers are local threads.
pub struct LoopbackTransport<W> {
    inbound: Arc<BoundedQueue<W>>,
    outbound: Arc<BoundedQueue<W>>,
    stop: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    dropped: Arc<AtomicUsize>,
    peers: usize,
}

impl<W: WorkItem> LoopbackTransport<W> {
    /// Starts the simulated peers.
    pub fn new(config: LoopbackConfig) -> std::io::Result<Self> {
        let inbound = Arc::new(BoundedQueue::new(config.capacity));
        let outbound = Arc::new(BoundedQueue::new(config.capacity));
        let stop = CancellationToken::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        let sequence = Arc::new(AtomicUsize::new(0));
        let peers = config.peers.max(1);

        let mut handles = Vec::with_capacity(peers);
        for i in 0..peers {
            let inbound = Arc::clone(&inbound);
            let outbound = Arc::clone(&outbound);
            let stop = stop.clone();
            let dropped = Arc::clone(&dropped);
            let sequence = Arc::clone(&sequence);
            let config = config.clone();
            let handle = thread::Builder::new()
                .name(format!("loopback-peer-{}", i))
                .spawn(move || {
                    peer_loop(&inbound, &outbound, &stop, &dropped, &sequence, &config)
                })?;
            handles.push(handle);
        }

        Ok(Self {
            inbound,
            outbound,
            stop,
            handles: Mutex::new(handles),
            dropped,
            peers,
        })
    }

    /// Number of items lost on purpose so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

fn peer_loop<W: WorkItem>(
    inbound: &BoundedQueue<W>,
    outbound: &BoundedQueue<W>,
    stop: &CancellationToken,
    dropped: &AtomicUsize,
    sequence: &AtomicUsize,
    config: &LoopbackConfig,
) {
    while !stop.is_cancelled() {
        let Some(mut item) = inbound.pop_timeout(PEER_POLL) else {
            continue;
        };
        if !config.latency.is_zero() {
            thread::sleep(config.latency);
        }
        if let Err(message) = run_item(&mut item) {
            tracing::warn!(error = %message, "Loopback peer caught a panic");
        }

        let n = sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if config.drop_every.is_some_and(|every| n % every == 0) {
            dropped.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        if outbound.push_timeout(item, PEER_POLL * 4).is_err() {
            dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl<W: WorkItem> Transport<W> for LoopbackTransport<W> {
    fn send(&self, item: W) -> Result<(), TransportError> {
        if self.stop.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.inbound.push(item).map_err(|_| TransportError::Closed)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<W>, TransportError> {
        match self.outbound.pop_timeout(timeout) {
            Some(item) => Ok(Some(item)),
            None if self.outbound.is_closed() => Err(TransportError::Closed),
            None => Ok(None),
        }
    }

    fn peers(&self) -> Option<usize> {
        Some(self.peers)
    }

    fn close(&self) {
        self.stop.cancel();
        self.inbound.close();
        self.outbound.close();
        for handle in std::mem::take(&mut *self.handles.lock()) {
            let _ = handle.join();
        }
    }
}

impl<W> Drop for LoopbackTransport<W> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.inbound.close();
        self.outbound.close();
    }
}
