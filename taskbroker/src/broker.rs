//! Many-to-many router between buffer ports and consumers.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  ┌────────────┐        ┌──────────────────────────┐
//! │ Executor A │  │ Executor B │        │        Consumers         │
//! │ BufferPort │  │ BufferPort │        │ (threads, remote peers)  │
//! └─────┬──────┘  └─────┬──────┘        └────────────┬─────────────┘
//!       │ weak ref      │ weak ref                   │ BrokerLink
//!       ▼               ▼                            ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Broker                               │
//! │  ports:  ring of (PortId, Weak<BufferPort>)  ── round-robin get │
//! │  routes: DashMap<PortId, Weak<BufferPort>>   ── exact put       │
//! │  consumers + "all capable of full return" flag                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The broker is constructed explicitly and shared as `Arc<Broker<W>>`.
//! Executors own their ports; the broker only keeps weak references, so a
//! port whose executor went away is purged on the next enrolment.
//! Consumers hold a [`BrokerLink`] (a weak handle) so that dropping the last
//! strong reference to the broker also stops their loops.

use crate::buffer_port::BufferPort;
use crate::consumer::{Consumer, ConsumerError, ProcessingUnits};
use crate::item::{PortId, WorkItem};
use crate::log::{Logger, TracingLogger};
use crate::telemetry::{NullTelemetrySink, TelemetryEvent, TelemetrySink};
use crate::{log_debug, log_info, log_warn};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default maximum number of simultaneously enrolled ports.
pub const DEFAULT_MAX_PORTS: usize = 10_000;

/// Errors from broker registration.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker has not been initialized, or has been finalized.
    #[error("broker is not running")]
    NotRunning,

    /// The port registry is full.
    #[error("cannot enrol more than {max} buffer ports")]
    TooManyPorts { max: usize },

    /// The port is already enrolled.
    #[error("{0} is already enrolled")]
    PortAlreadyEnrolled(PortId),

    /// A consumer with the same name is already enrolled.
    #[error("a consumer named '{0}' is already enrolled")]
    DuplicateConsumer(String),

    /// The consumer failed to start.
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

/// Broker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum number of enrolled ports
    pub max_ports: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_ports: DEFAULT_MAX_PORTS,
        }
    }
}

impl BrokerConfig {
    /// Set the maximum number of enrolled ports.
    pub fn with_max_ports(mut self, max_ports: usize) -> Self {
        self.max_ports = max_ports.max(1);
        self
    }
}

impl From<&crate::config::BrokerSettings> for BrokerConfig {
    fn from(settings: &crate::config::BrokerSettings) -> Self {
        Self::default().with_max_ports(settings.max_ports)
    }
}

/// Result of returning a processed item through the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Delivery {
    /// The item reached its port's processed queue.
    Delivered,
    /// The originating port is no longer enrolled. The item was dropped.
    PortGone,
    /// The processed queue stayed full. The item was dropped.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Finalized,
}

struct PortEntry<W> {
    id: PortId,
    port: Weak<BufferPort<W>>,
}

impl<W: WorkItem> PortEntry<W> {
    fn live(&self) -> Option<Arc<BufferPort<W>>> {
        self.port.upgrade().filter(|p| !p.is_closed())
    }
}

/// Registry and router of buffer ports and consumers.
pub struct Broker<W: WorkItem> {
    config: BrokerConfig,
    lifecycle: RwLock<Lifecycle>,
    ports: RwLock<Vec<PortEntry<W>>>,
    routes: DashMap<PortId, Weak<BufferPort<W>>>,
    cursor: AtomicUsize,
    next_id: Mutex<u64>,
    port_generation: Mutex<u64>,
    port_enrolled: Condvar,
    consumers: Mutex<Vec<Arc<dyn Consumer<W>>>>,
    full_return: Mutex<Option<bool>>,
    full_return_known: Condvar,
    logger: Arc<dyn Logger>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl<W: WorkItem> Broker<W> {
    /// Creates a broker logging through `tracing`, without telemetry.
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Self::with_observers(config, Arc::new(TracingLogger), Arc::new(NullTelemetrySink))
    }

    /// Creates a broker with explicit logger and telemetry sink.
    pub fn with_observers(
        config: BrokerConfig,
        logger: Arc<dyn Logger>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            lifecycle: RwLock::new(Lifecycle::Created),
            ports: RwLock::new(Vec::new()),
            routes: DashMap::new(),
            cursor: AtomicUsize::new(0),
            next_id: Mutex::new(0),
            port_generation: Mutex::new(0),
            port_enrolled: Condvar::new(),
            consumers: Mutex::new(Vec::new()),
            full_return: Mutex::new(None),
            full_return_known: Condvar::new(),
            logger,
            telemetry,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the broker for enrolment.
    pub fn init(&self) {
        let mut lifecycle = self.lifecycle.write();
        if *lifecycle != Lifecycle::Running {
            *lifecycle = Lifecycle::Running;
            log_info!(self.logger, "Broker initialized");
        }
    }

    /// Returns true between [`init`](Self::init) and [`finalize`](Self::finalize).
    pub fn is_running(&self) -> bool {
        *self.lifecycle.read() == Lifecycle::Running
    }

    /// Shuts down every consumer, waits for their loops to finish, then
    /// closes and forgets every port. Idempotent.
    pub fn finalize(&self) {
        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle != Lifecycle::Running {
                return;
            }
            *lifecycle = Lifecycle::Finalized;
        }

        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in &consumers {
            consumer.shutdown();
            let faults = consumer.take_faults();
            for fault in &faults {
                log_warn!(self.logger, "{}", fault);
            }
            self.telemetry.emit(TelemetryEvent::ConsumerStopped {
                name: consumer.name().to_string(),
                faults: faults.len(),
            });
        }

        let ports = std::mem::take(&mut *self.ports.write());
        self.routes.clear();
        for entry in ports {
            if let Some(port) = entry.port.upgrade() {
                port.set_id(None);
                port.close();
            }
            self.telemetry
                .emit(TelemetryEvent::PortDeregistered { port: entry.id });
        }

        *self.full_return.lock() = None;
        self.full_return_known.notify_all();
        self.port_enrolled.notify_all();

        log_info!(
            self.logger,
            "Broker finalized, {} consumer(s) stopped",
            consumers.len()
        );
    }

    // =========================================================================
    // Ports
    // =========================================================================

    /// Registers a port for routing and assigns its id.
    ///
    /// Ports that have been dropped or closed since their enrolment are
    /// purged first.
    pub fn enrol_port(&self, port: &Arc<BufferPort<W>>) -> Result<PortId, BrokerError> {
        let lifecycle = self.lifecycle.read();
        if *lifecycle != Lifecycle::Running {
            return Err(BrokerError::NotRunning);
        }

        if let Some(id) = port.id() {
            if self.routes.contains_key(&id) {
                return Err(BrokerError::PortAlreadyEnrolled(id));
            }
        }

        let mut ports = self.ports.write();
        self.purge_dead_ports(&mut ports);
        if ports.len() >= self.config.max_ports {
            return Err(BrokerError::TooManyPorts {
                max: self.config.max_ports,
            });
        }

        let id = self.next_free_id();
        port.set_id(Some(id));
        ports.push(PortEntry {
            id,
            port: Arc::downgrade(port),
        });
        self.routes.insert(id, Arc::downgrade(port));
        drop(ports);
        drop(lifecycle);

        *self.port_generation.lock() += 1;
        self.port_enrolled.notify_all();

        log_debug!(self.logger, "Enrolled {}", id);
        self.telemetry.emit(TelemetryEvent::PortEnrolled { port: id });
        Ok(id)
    }

    /// Removes a port from the registry. Returns false if it was not enrolled.
    ///
    /// Items still travelling towards the port are dropped when they return.
    pub fn deregister_port(&self, id: PortId) -> bool {
        let removed = self.routes.remove(&id);
        self.ports.write().retain(|entry| entry.id != id);

        match removed {
            Some((_, port)) => {
                if let Some(port) = port.upgrade() {
                    port.set_id(None);
                }
                log_debug!(self.logger, "Deregistered {}", id);
                self.telemetry.emit(TelemetryEvent::PortDeregistered { port: id });
                true
            }
            None => false,
        }
    }

    /// Number of enrolled ports, dead or alive.
    pub fn n_ports(&self) -> usize {
        self.ports.read().len()
    }

    fn purge_dead_ports(&self, ports: &mut Vec<PortEntry<W>>) {
        ports.retain(|entry| {
            if entry.live().is_some() {
                return true;
            }
            self.routes.remove(&entry.id);
            log_debug!(self.logger, "Purged disconnected {}", entry.id);
            self.telemetry
                .emit(TelemetryEvent::PortDeregistered { port: entry.id });
            false
        });
    }

    /// Next id not currently in use.
    fn next_free_id(&self) -> PortId {
        let mut next = self.next_id.lock();
        loop {
            let candidate = PortId(*next);
            *next = next.wrapping_add(1);
            if !self.routes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn live_ports(&self) -> Vec<Arc<BufferPort<W>>> {
        self.ports
            .read()
            .iter()
            .filter_map(PortEntry::live)
            .collect()
    }

    // =========================================================================
    // Consumers
    // =========================================================================

    /// Registers a consumer and starts its processing loop.
    ///
    /// Re-evaluates the full-return flag as the conjunction over all
    /// enrolled consumers.
    pub fn enrol_consumer(
        self: &Arc<Self>,
        consumer: Arc<dyn Consumer<W>>,
    ) -> Result<(), BrokerError> {
        let lifecycle = self.lifecycle.read();
        if *lifecycle != Lifecycle::Running {
            return Err(BrokerError::NotRunning);
        }

        let mut consumers = self.consumers.lock();
        if consumers.iter().any(|c| c.name() == consumer.name()) {
            log_warn!(
                self.logger,
                "Rejecting consumer '{}': name already enrolled",
                consumer.name()
            );
            return Err(BrokerError::DuplicateConsumer(consumer.name().to_string()));
        }

        consumer.async_start_processing(BrokerLink::new(self))?;
        let capable = consumer.capable_of_full_return();
        consumers.push(Arc::clone(&consumer));
        let all_capable = consumers.iter().all(|c| c.capable_of_full_return());
        drop(consumers);
        drop(lifecycle);

        *self.full_return.lock() = Some(all_capable);
        self.full_return_known.notify_all();

        log_info!(
            self.logger,
            "Enrolled consumer '{}' ({}), full return: {}",
            consumer.name(),
            consumer.mnemonic(),
            all_capable
        );
        self.telemetry.emit(TelemetryEvent::ConsumerEnrolled {
            name: consumer.name().to_string(),
            capable_of_full_return: capable,
        });
        Ok(())
    }

    /// Returns true if every enrolled consumer guarantees full return.
    ///
    /// Blocks until at least one consumer has been enrolled. Returns false
    /// if the broker is finalized while waiting.
    pub fn capable_of_full_return(&self) -> bool {
        let mut flag = self.full_return.lock();
        loop {
            if let Some(capable) = *flag {
                return capable;
            }
            if *self.lifecycle.read() == Lifecycle::Finalized {
                return false;
            }
            self.full_return_known
                .wait_for(&mut flag, Duration::from_millis(100));
        }
    }

    /// Like [`capable_of_full_return`](Self::capable_of_full_return), but
    /// gives up after `timeout`.
    pub fn capable_of_full_return_timeout(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut flag = self.full_return.lock();
        while flag.is_none() {
            if self
                .full_return_known
                .wait_until(&mut flag, deadline)
                .timed_out()
            {
                break;
            }
        }
        *flag
    }

    /// Number of enrolled consumers.
    pub fn n_consumers(&self) -> usize {
        self.consumers.lock().len()
    }

    /// Sum of the processing-unit estimates of all consumers.
    pub fn processing_units_estimate(&self) -> ProcessingUnits {
        self.consumers
            .lock()
            .iter()
            .map(|c| c.processing_units_estimate())
            .fold(ProcessingUnits::exact(0), ProcessingUnits::combine)
    }

    // =========================================================================
    // Routing (consumer side)
    // =========================================================================

    /// Takes a raw item from some enrolled port.
    ///
    /// Every live port is tried once without blocking, starting at a cursor
    /// that advances with every call. If all are empty, waits up to
    /// `timeout` on the port under the cursor.
    pub fn get(&self, timeout: Duration) -> Option<W> {
        let ports = self.live_ports();
        if ports.is_empty() {
            let mut generation = self.port_generation.lock();
            self.port_enrolled.wait_for(&mut generation, timeout);
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % ports.len();
        for offset in 0..ports.len() {
            let port = &ports[(start + offset) % ports.len()];
            if let Some(item) = port.try_pop_raw() {
                return Some(item);
            }
        }
        ports[start].pop_raw_timeout(timeout)
    }

    /// Returns a processed item to the port it came from.
    ///
    /// Items whose port is gone, or whose processed queue stays full for
    /// `timeout`, are dropped with a warning.
    pub fn put(&self, item: W, timeout: Duration) -> Delivery {
        let tag = item.tag();
        let Some(id) = tag.port else {
            log_warn!(
                self.logger,
                "Dropping item {} of iteration {}: no port id",
                tag.position,
                tag.iteration
            );
            return Delivery::PortGone;
        };

        let port = self.routes.get(&id).and_then(|entry| entry.value().upgrade());
        let Some(port) = port else {
            log_warn!(
                self.logger,
                "Dropping item {} of iteration {}: {} is gone",
                tag.position,
                tag.iteration,
                id
            );
            return Delivery::PortGone;
        };

        match port.push_processed_timeout(item, timeout) {
            Ok(()) => Delivery::Delivered,
            Err(item) => {
                log_warn!(
                    self.logger,
                    "Dropping item {} of iteration {}: {} did not accept it within {:?}",
                    item.tag().position,
                    item.tag().iteration,
                    id,
                    timeout
                );
                Delivery::TimedOut
            }
        }
    }
}

// =============================================================================
// Broker link
// =============================================================================

/// The broker has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("broker is gone")]
pub struct LinkClosed;

/// Weak handle through which consumers talk to the broker.
pub struct BrokerLink<W: WorkItem> {
    broker: Weak<Broker<W>>,
}

impl<W: WorkItem> Clone for BrokerLink<W> {
    fn clone(&self) -> Self {
        Self {
            broker: Weak::clone(&self.broker),
        }
    }
}

impl<W: WorkItem> BrokerLink<W> {
    /// Creates a link to `broker`.
    pub fn new(broker: &Arc<Broker<W>>) -> Self {
        Self {
            broker: Arc::downgrade(broker),
        }
    }

    /// See [`Broker::get`].
    pub fn get(&self, timeout: Duration) -> Result<Option<W>, LinkClosed> {
        let broker = self.broker.upgrade().ok_or(LinkClosed)?;
        Ok(broker.get(timeout))
    }

    /// See [`Broker::put`].
    pub fn put(&self, item: W, timeout: Duration) -> Result<Delivery, LinkClosed> {
        let broker = self.broker.upgrade().ok_or(LinkClosed)?;
        Ok(broker.put(item, timeout))
    }

    /// Returns true while the broker is alive.
    pub fn is_connected(&self) -> bool {
        self.broker.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::testing::StaticConsumer;
    use crate::item::testing::Counter;
    use crate::log::NoOpLogger;
    use crate::telemetry::RecordingTelemetrySink;

    fn broker() -> Arc<Broker<Counter>> {
        let broker = Broker::with_observers(
            BrokerConfig::default(),
            Arc::new(NoOpLogger),
            Arc::new(NullTelemetrySink),
        );
        broker.init();
        broker
    }

    #[test]
    fn test_enrol_requires_init() {
        let broker: Arc<Broker<Counter>> = Broker::new(BrokerConfig::default());
        let port = Arc::new(BufferPort::new());
        assert!(matches!(
            broker.enrol_port(&port),
            Err(BrokerError::NotRunning)
        ));
    }

    #[test]
    fn test_port_ids_are_unique() {
        let broker = broker();
        let a = Arc::new(BufferPort::new());
        let b = Arc::new(BufferPort::new());

        let id_a = broker.enrol_port(&a).unwrap();
        let id_b = broker.enrol_port(&b).unwrap();

        assert_ne!(id_a, id_b);
        assert_eq!(a.id(), Some(id_a));
        assert_eq!(broker.n_ports(), 2);
        assert!(matches!(
            broker.enrol_port(&a),
            Err(BrokerError::PortAlreadyEnrolled(_))
        ));
    }

    #[test]
    fn test_dead_ports_are_purged_on_enrolment() {
        let broker = broker();
        let dropped = Arc::new(BufferPort::new());
        broker.enrol_port(&dropped).unwrap();
        drop(dropped);

        let closed = Arc::new(BufferPort::new());
        broker.enrol_port(&closed).unwrap();
        closed.close();

        let live = Arc::new(BufferPort::new());
        broker.enrol_port(&live).unwrap();
        assert_eq!(broker.n_ports(), 1);
    }

    #[test]
    fn test_max_ports() {
        let broker = Broker::with_observers(
            BrokerConfig::default().with_max_ports(1),
            Arc::new(NoOpLogger),
            Arc::new(NullTelemetrySink),
        );
        broker.init();
        let a: Arc<BufferPort<Counter>> = Arc::new(BufferPort::new());
        let b = Arc::new(BufferPort::new());
        broker.enrol_port(&a).unwrap();
        assert!(matches!(
            broker.enrol_port(&b),
            Err(BrokerError::TooManyPorts { max: 1 })
        ));
    }

    #[test]
    fn test_get_round_robins_across_ports() {
        let broker = broker();
        let a = Arc::new(BufferPort::new());
        let b = Arc::new(BufferPort::new());
        broker.enrol_port(&a).unwrap();
        broker.enrol_port(&b).unwrap();

        for i in 0..3 {
            a.push_raw(Counter::new(i)).unwrap();
            b.push_raw(Counter::new(100 + i)).unwrap();
        }

        let mut from_a = 0;
        let mut from_b = 0;
        for _ in 0..4 {
            let item = broker.get(Duration::from_millis(10)).unwrap();
            if item.id < 100 {
                from_a += 1;
            } else {
                from_b += 1;
            }
        }
        assert_eq!(from_a, 2);
        assert_eq!(from_b, 2);
    }

    #[test]
    fn test_get_without_ports_times_out() {
        let broker = broker();
        assert!(broker.get(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_put_routes_by_port_id() {
        let broker = broker();
        let a = Arc::new(BufferPort::new());
        let b = Arc::new(BufferPort::new());
        broker.enrol_port(&a).unwrap();
        broker.enrol_port(&b).unwrap();

        b.push_raw(Counter::new(5)).unwrap();
        let item = broker.get(Duration::from_millis(10)).unwrap();
        assert_eq!(broker.put(item, Duration::from_millis(10)), Delivery::Delivered);

        assert_eq!(a.processed_len(), 0);
        assert_eq!(b.pop_processed().unwrap().id, 5);
    }

    #[test]
    fn test_put_to_deregistered_port_drops_item() {
        let broker = broker();
        let port = Arc::new(BufferPort::new());
        let id = broker.enrol_port(&port).unwrap();
        port.push_raw(Counter::new(1)).unwrap();
        let item = broker.get(Duration::from_millis(10)).unwrap();

        assert!(broker.deregister_port(id));
        assert!(!broker.deregister_port(id));
        assert_eq!(broker.put(item, Duration::from_millis(10)), Delivery::PortGone);
        assert_eq!(port.processed_len(), 0);
    }

    #[test]
    fn test_put_without_port_id() {
        let broker = broker();
        assert_eq!(
            broker.put(Counter::new(0), Duration::from_millis(10)),
            Delivery::PortGone
        );
    }

    #[test]
    fn test_full_return_is_conjunction() {
        let broker = broker();
        broker
            .enrol_consumer(StaticConsumer::new("a", true))
            .unwrap();
        broker
            .enrol_consumer(StaticConsumer::new("b", true))
            .unwrap();
        assert!(broker.capable_of_full_return());

        broker
            .enrol_consumer(StaticConsumer::new("c", false))
            .unwrap();
        assert!(!broker.capable_of_full_return());
        assert_eq!(broker.n_consumers(), 3);
    }

    #[test]
    fn test_full_return_unknown_without_consumers() {
        let broker = broker();
        assert_eq!(
            broker.capable_of_full_return_timeout(Duration::from_millis(10)),
            None
        );
    }

    #[test]
    fn test_full_return_blocks_until_first_consumer() {
        let broker = broker();
        let waiter = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.capable_of_full_return())
        };
        std::thread::sleep(Duration::from_millis(20));
        broker
            .enrol_consumer(StaticConsumer::new("late", true))
            .unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_duplicate_consumer_name_rejected() {
        let broker = broker();
        broker
            .enrol_consumer(StaticConsumer::new("same", true))
            .unwrap();
        assert!(matches!(
            broker.enrol_consumer(StaticConsumer::new("same", true)),
            Err(BrokerError::DuplicateConsumer(_))
        ));
        assert_eq!(broker.n_consumers(), 1);
    }

    #[test]
    fn test_finalize_stops_consumers_and_closes_ports() {
        let telemetry = RecordingTelemetrySink::new();
        let broker = Broker::with_observers(
            BrokerConfig::default(),
            Arc::new(NoOpLogger),
            telemetry.clone(),
        );
        broker.init();
        let consumer = StaticConsumer::new("a", true);
        broker.enrol_consumer(consumer.clone()).unwrap();
        let port: Arc<BufferPort<Counter>> = Arc::new(BufferPort::new());
        broker.enrol_port(&port).unwrap();

        broker.finalize();
        broker.finalize();

        assert!(consumer.is_started());
        assert!(consumer.was_shut_down());
        assert!(port.is_closed());
        assert_eq!(port.id(), None);
        assert_eq!(broker.n_consumers(), 0);
        assert_eq!(broker.n_ports(), 0);
        assert!(!broker.is_running());
        assert!(!broker.capable_of_full_return());
        assert_eq!(telemetry.count("consumer_stopped"), 1);
        assert_eq!(telemetry.count("port_deregistered"), 1);
    }

    #[test]
    fn test_link_reports_closed_broker() {
        let broker = broker();
        let link = BrokerLink::new(&broker);
        assert!(link.is_connected());
        drop(broker);
        assert!(!link.is_connected());
        assert_eq!(link.get(Duration::from_millis(1)).unwrap_err(), LinkClosed);
    }
}
