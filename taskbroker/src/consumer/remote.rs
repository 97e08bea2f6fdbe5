//! Best-effort consumer that forwards items to remote peers.
//!
//! The wire format and connection handling belong to a [`Transport`]. This
//! consumer only moves items between the broker and the transport:
//!
//! ```text
//!   broker.get ──► dispatcher thread ──► transport.send ──► peers
//!   broker.put ◄── collector thread  ◄── transport.receive ◄─┘
//! ```
//!
//! A peer may vanish with items in flight, so this consumer never promises
//! full return.

use super::worker::{LoopTimeouts, WorkerGroup};
use super::{default_name, Consumer, ConsumerError, ProcessingUnits};
use crate::broker::{BrokerLink, Delivery};
use crate::item::WorkItem;
use crate::log::{Logger, TracingLogger};
use crate::panic::ProcessingFault;
use crate::{log_debug, log_info, log_warn};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport is shut down.
    #[error("transport closed")]
    Closed,

    /// The item could not be delivered to any peer.
    #[error("send failed: {0}")]
    Send(String),

    /// Receiving failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Connection to remote processing peers.
pub trait Transport<W: WorkItem>: Send + Sync + 'static {
    /// Hands an item to some peer.
    fn send(&self, item: W) -> Result<(), TransportError>;

    /// Waits up to `timeout` for a processed item from any peer.
    fn receive(&self, timeout: Duration) -> Result<Option<W>, TransportError>;

    /// Number of connected peers, if known.
    fn peers(&self) -> Option<usize> {
        None
    }

    /// Releases the transport. Called once on consumer shutdown.
    fn close(&self) {}
}

/// Configuration for a [`RemoteConsumer`].
#[derive(Debug, Clone)]
pub struct RemoteConsumerConfig {
    /// Loop timeouts
    pub timeouts: LoopTimeouts,
    /// Guess of the number of peers, used when the transport doesn't know
    pub expected_peers: usize,
    /// Consumer name; generated if not set
    pub name: Option<String>,
}

impl Default for RemoteConsumerConfig {
    fn default() -> Self {
        Self {
            timeouts: LoopTimeouts::default(),
            expected_peers: 1,
            name: None,
        }
    }
}

impl RemoteConsumerConfig {
    /// Set the loop timeouts.
    pub fn with_timeouts(mut self, timeouts: LoopTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the expected number of peers.
    pub fn with_expected_peers(mut self, peers: usize) -> Self {
        self.expected_peers = peers;
        self
    }

    /// Set the consumer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Consumer relaying items through a [`Transport`].
pub struct RemoteConsumer<W: WorkItem, T: Transport<W>> {
    name: String,
    config: RemoteConsumerConfig,
    transport: Arc<T>,
    group: WorkerGroup,
    logger: Arc<dyn Logger>,
    _item: PhantomData<fn() -> W>,
}

impl<W: WorkItem, T: Transport<W>> RemoteConsumer<W, T> {
    /// Creates a consumer logging through `tracing`.
    pub fn new(transport: T, config: RemoteConsumerConfig) -> Arc<Self> {
        Self::with_logger(transport, config, Arc::new(TracingLogger))
    }

    /// Creates a consumer with an explicit logger.
    pub fn with_logger(
        transport: T,
        config: RemoteConsumerConfig,
        logger: Arc<dyn Logger>,
    ) -> Arc<Self> {
        let name = config.name.clone().unwrap_or_else(|| default_name("remote"));
        Arc::new(Self {
            group: WorkerGroup::new(&name),
            name,
            config,
            transport: Arc::new(transport),
            logger,
            _item: PhantomData,
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn spawn_dispatcher(&self, link: BrokerLink<W>) -> Result<(), ConsumerError> {
        let stop = self.group.token();
        let transport = Arc::clone(&self.transport);
        let logger = Arc::clone(&self.logger);
        let timeout = self.config.timeouts.retrieve;
        let name = format!("{}-dispatch", self.name);

        self.group.spawn(name.clone(), move || {
            while !stop.is_cancelled() {
                let item = match link.get(timeout) {
                    Ok(Some(item)) => item,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                let position = item.tag().position;
                match transport.send(item) {
                    Ok(()) => {}
                    Err(TransportError::Closed) => break,
                    Err(e) => log_warn!(logger, "{}: item {} lost: {}", name, position, e),
                }
            }
            log_debug!(logger, "{} stopped", name);
        })
    }

    fn spawn_collector(&self, link: BrokerLink<W>) -> Result<(), ConsumerError> {
        let stop = self.group.token();
        let transport = Arc::clone(&self.transport);
        let logger = Arc::clone(&self.logger);
        let timeouts = self.config.timeouts;
        let name = format!("{}-collect", self.name);

        self.group.spawn(name.clone(), move || {
            while !stop.is_cancelled() {
                let item = match transport.receive(timeouts.retrieve) {
                    Ok(Some(item)) => item,
                    Ok(None) => continue,
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        log_warn!(logger, "{}: {}", name, e);
                        continue;
                    }
                };
                match link.put(item, timeouts.submit) {
                    Ok(Delivery::Delivered) => {}
                    Ok(other) => log_debug!(logger, "{}: item not delivered ({:?})", name, other),
                    Err(_) => break,
                }
            }
            log_debug!(logger, "{} stopped", name);
        })
    }
}

impl<W: WorkItem, T: Transport<W>> Consumer<W> for RemoteConsumer<W, T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn mnemonic(&self) -> &'static str {
        "remote"
    }

    fn capable_of_full_return(&self) -> bool {
        false
    }

    fn processing_units_estimate(&self) -> ProcessingUnits {
        ProcessingUnits::estimate(
            self.transport
                .peers()
                .unwrap_or(self.config.expected_peers),
        )
    }

    fn async_start_processing(&self, link: BrokerLink<W>) -> Result<(), ConsumerError> {
        self.group.begin()?;
        self.spawn_dispatcher(link.clone())?;
        self.spawn_collector(link)?;
        log_info!(self.logger, "Remote consumer '{}' started", self.name);
        Ok(())
    }

    fn shutdown(&self) {
        if self.group.is_stopped() {
            return;
        }
        self.group.shutdown();
        self.transport.close();
    }

    fn is_stopped(&self) -> bool {
        self.group.is_stopped()
    }

    fn take_faults(&self) -> Vec<ProcessingFault> {
        self.group.take_faults()
    }
}
