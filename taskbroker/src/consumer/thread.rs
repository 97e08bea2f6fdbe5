//! In-process consumers backed by OS threads.

use super::worker::{process_loop, LoopTimeouts, WorkerGroup};
use super::{default_name, Consumer, ConsumerError, ProcessingUnits};
use crate::broker::BrokerLink;
use crate::item::WorkItem;
use crate::log::{Logger, TracingLogger};
use crate::log_info;
use crate::panic::ProcessingFault;
use std::sync::Arc;
use std::time::Duration;

/// Default number of worker threads of a [`ThreadConsumer`].
pub const DEFAULT_THREADS_PER_WORKER: usize = 4;

/// Configuration for a [`ThreadConsumer`].
#[derive(Debug, Clone)]
pub struct ThreadConsumerConfig {
    /// Number of worker threads (default: 4)
    pub threads: usize,
    /// Whether to promise full return (default: true)
    pub capable_of_full_return: bool,
    /// Loop timeouts
    pub timeouts: LoopTimeouts,
    /// Consumer name; generated if not set
    pub name: Option<String>,
}

impl Default for ThreadConsumerConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS_PER_WORKER,
            capable_of_full_return: true,
            timeouts: LoopTimeouts::default(),
            name: None,
        }
    }
}

impl ThreadConsumerConfig {
    /// Set the number of worker threads (at least one).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Override the full-return promise.
    ///
    /// Turning it off makes executors fall back to timed waits, which is
    /// useful to exercise best-effort code paths without a network.
    pub fn with_full_return(mut self, capable: bool) -> Self {
        self.capable_of_full_return = capable;
        self
    }

    /// Set the loop timeouts.
    pub fn with_timeouts(mut self, timeouts: LoopTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the consumer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl From<&crate::config::ConsumerSettings> for ThreadConsumerConfig {
    fn from(settings: &crate::config::ConsumerSettings) -> Self {
        Self::default()
            .with_threads(settings.threads)
            .with_full_return(settings.capable_of_full_return)
            .with_timeouts(LoopTimeouts {
                retrieve: Duration::from_millis(settings.retrieve_timeout_ms),
                submit: Duration::from_millis(settings.submit_timeout_ms),
            })
    }
}

/// Consumer running the processing loop on N threads.
pub struct ThreadConsumer {
    name: String,
    config: ThreadConsumerConfig,
    group: WorkerGroup,
    logger: Arc<dyn Logger>,
}

impl ThreadConsumer {
    /// Creates a consumer logging through `tracing`.
    pub fn new(config: ThreadConsumerConfig) -> Arc<Self> {
        Self::with_logger(config, Arc::new(TracingLogger))
    }

    /// Creates a consumer with an explicit logger.
    pub fn with_logger(config: ThreadConsumerConfig, logger: Arc<dyn Logger>) -> Arc<Self> {
        let name = config.name.clone().unwrap_or_else(|| default_name("thread"));
        Arc::new(Self {
            group: WorkerGroup::new(&name),
            name,
            config,
            logger,
        })
    }

    /// Returns true while the worker threads are running.
    pub fn is_running(&self) -> bool {
        self.group.is_running()
    }
}

impl<W: WorkItem> Consumer<W> for ThreadConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn mnemonic(&self) -> &'static str {
        "thread"
    }

    fn capable_of_full_return(&self) -> bool {
        self.config.capable_of_full_return
    }

    fn processing_units_estimate(&self) -> ProcessingUnits {
        ProcessingUnits::exact(self.config.threads)
    }

    fn async_start_processing(&self, link: BrokerLink<W>) -> Result<(), ConsumerError> {
        self.group.begin()?;
        for i in 0..self.config.threads {
            let link = link.clone();
            let stop = self.group.token();
            let faults = self.group.faults();
            let logger = Arc::clone(&self.logger);
            let timeouts = self.config.timeouts;
            self.group.spawn(format!("{}-{}", self.name, i), move || {
                process_loop(link, stop, timeouts, faults, logger)
            })?;
        }
        log_info!(
            self.logger,
            "Consumer '{}' started {} worker thread(s)",
            self.name,
            self.config.threads
        );
        Ok(())
    }

    fn shutdown(&self) {
        self.group.shutdown();
    }

    fn is_stopped(&self) -> bool {
        self.group.is_stopped()
    }

    fn take_faults(&self) -> Vec<ProcessingFault> {
        self.group.take_faults()
    }
}

/// Consumer running the processing loop on a single thread.
///
/// Mostly useful for debugging: items are processed strictly one at a time,
/// in the order the broker hands them out.
pub struct SerialConsumer {
    name: String,
    timeouts: LoopTimeouts,
    group: WorkerGroup,
    logger: Arc<dyn Logger>,
}

impl SerialConsumer {
    /// Creates a serial consumer with a generated name.
    pub fn new() -> Arc<Self> {
        Self::named(default_name("serial"))
    }

    /// Creates a serial consumer with the given name.
    pub fn named(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            group: WorkerGroup::new(&name),
            name,
            timeouts: LoopTimeouts::default(),
            logger: Arc::new(TracingLogger),
        })
    }
}

impl<W: WorkItem> Consumer<W> for SerialConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn mnemonic(&self) -> &'static str {
        "serial"
    }

    fn capable_of_full_return(&self) -> bool {
        true
    }

    fn processing_units_estimate(&self) -> ProcessingUnits {
        ProcessingUnits::exact(1)
    }

    fn async_start_processing(&self, link: BrokerLink<W>) -> Result<(), ConsumerError> {
        self.group.begin()?;
        let stop = self.group.token();
        let faults = self.group.faults();
        let logger = Arc::clone(&self.logger);
        let timeouts = self.timeouts;
        self.group.spawn(self.name.clone(), move || {
            process_loop(link, stop, timeouts, faults, logger)
        })
    }

    fn shutdown(&self) {
        self.group.shutdown();
    }

    fn is_stopped(&self) -> bool {
        self.group.is_stopped()
    }

    fn take_faults(&self) -> Vec<ProcessingFault> {
        self.group.take_faults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerConfig};
    use crate::buffer_port::BufferPort;
    use crate::item::testing::Counter;
    use crate::log::NoOpLogger;
    use crate::telemetry::NullTelemetrySink;
    use std::time::Duration;

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
    fn test_config_builder() {
        let config = ThreadConsumerConfig::default()
            .with_threads(0)
            .with_full_return(false)
            .with_name("workers");
        assert_eq!(config.threads, 1);
        assert!(!config.capable_of_full_return);
        assert_eq!(config.name.as_deref(), Some("workers"));
    }

    #[test]
    fn test_thread_consumer_processes_items() {
        let broker = broker();
        let port = Arc::new(BufferPort::new());
        broker.enrol_port(&port).unwrap();

        let consumer = ThreadConsumer::with_logger(
            ThreadConsumerConfig::default().with_threads(3),
            Arc::new(NoOpLogger),
        );
        broker.enrol_consumer(consumer.clone()).unwrap();
        assert!(consumer.is_running());

        for i in 0..20 {
            port.push_raw(Counter::new(i)).unwrap();
        }
        let mut ids: Vec<usize> = (0..20)
            .map(|_| port.pop_processed_timeout(Duration::from_secs(5)).unwrap().id)
            .collect();
        ids.sort();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());

        broker.finalize();
        assert!(!consumer.is_running());
    }

    #[test]
    fn test_serial_consumer_processes_items() {
        let broker = broker();
        let port = Arc::new(BufferPort::new());
        broker.enrol_port(&port).unwrap();
        broker.enrol_consumer(SerialConsumer::named("one")).unwrap();

        port.push_raw(Counter::new(3)).unwrap();
        let item = port.pop_processed_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(item.value, 1);
        broker.finalize();
    }

    #[test]
    fn test_thread_consumer_cannot_start_twice() {
        let broker = broker();
        let consumer = ThreadConsumer::with_logger(
            ThreadConsumerConfig::default().with_threads(1),
            Arc::new(NoOpLogger),
        );
        let link = BrokerLink::new(&broker);
        Consumer::<Counter>::async_start_processing(&*consumer, link.clone()).unwrap();
        assert!(matches!(
            Consumer::<Counter>::async_start_processing(&*consumer, link),
            Err(ConsumerError::AlreadyStarted(_))
        ));
        Consumer::<Counter>::shutdown(&*consumer);
        assert!(Consumer::<Counter>::is_stopped(&*consumer));
    }
}
