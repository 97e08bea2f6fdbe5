//! Consumers pull raw items from the broker, process them and push them
//! back.
//!
//! A consumer owns one or more background loops. Starting is non-blocking;
//! stopping is cooperative: the stop flag is checked between items, never
//! in the middle of `process()`.
//!
//! # Variants
//!
//! | Consumer | Loops | Full return |
//! |----------|-------|-------------|
//! | [`SerialConsumer`] | one thread | yes |
//! | [`ThreadConsumer`] | N threads | yes, unless overridden |
//! | [`RemoteConsumer`] | dispatcher + collector over a [`Transport`] | no |
//!
//! "Full return" means every item taken from the broker is guaranteed to
//! come back, barring crashes. A remote peer can vanish with items in
//! flight, so remote consumers never make that promise.

mod loopback;
mod remote;
mod thread;
mod worker;

pub use loopback::{LoopbackConfig, LoopbackTransport};
pub use remote::{RemoteConsumer, RemoteConsumerConfig, Transport, TransportError};
pub use thread::{
    SerialConsumer, ThreadConsumer, ThreadConsumerConfig, DEFAULT_THREADS_PER_WORKER,
};
pub use worker::{LoopTimeouts, DEFAULT_RETRIEVE_TIMEOUT, DEFAULT_SUBMIT_TIMEOUT};

use crate::broker::BrokerLink;
use crate::item::WorkItem;
use crate::panic::ProcessingFault;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors from consumer start-up.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// `async_start_processing` was called twice.
    #[error("consumer '{0}' is already running")]
    AlreadyStarted(String),

    /// The consumer has been shut down and cannot be restarted.
    #[error("consumer '{0}' has been shut down")]
    Stopped(String),
}

/// How many items a consumer can work on at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingUnits {
    /// Number of processing units
    pub count: usize,
    /// False if `count` is a guess (e.g. remote peers)
    pub exact: bool,
}

impl ProcessingUnits {
    /// An exact count.
    pub fn exact(count: usize) -> Self {
        Self { count, exact: true }
    }

    /// An estimated count.
    pub fn estimate(count: usize) -> Self {
        Self {
            count,
            exact: false,
        }
    }

    /// Sum of two counts; exact only if both are.
    pub fn combine(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            exact: self.exact && other.exact,
        }
    }
}

/// A processing backend enrolled with the broker.
pub trait Consumer<W: WorkItem>: Send + Sync {
    /// Unique name within one broker.
    fn name(&self) -> &str;

    /// Short name of the consumer kind.
    fn mnemonic(&self) -> &'static str;

    /// Returns true if every item taken is guaranteed to come back.
    fn capable_of_full_return(&self) -> bool;

    /// How many items this consumer can work on concurrently.
    fn processing_units_estimate(&self) -> ProcessingUnits;

    /// Starts the processing loop(s). Returns without waiting for them.
    fn async_start_processing(&self, link: BrokerLink<W>) -> Result<(), ConsumerError>;

    /// Asks the loops to stop and waits for them. Idempotent.
    fn shutdown(&self);

    /// Returns true once a shutdown has been requested.
    fn is_stopped(&self) -> bool;

    /// Panics caught while processing, since the last call.
    fn take_faults(&self) -> Vec<ProcessingFault>;
}

static NEXT_CONSUMER: AtomicUsize = AtomicUsize::new(0);

/// Default consumer name: `<mnemonic>-<n>`, unique within the process.
pub(crate) fn default_name(mnemonic: &str) -> String {
    format!(
        "{}-{}",
        mnemonic,
        NEXT_CONSUMER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// Consumer that runs no loop and reports a fixed capability.
    pub struct StaticConsumer {
        name: String,
        full_return: bool,
        started: AtomicBool,
        stopped: AtomicBool,
    }

    impl StaticConsumer {
        pub fn new(name: &str, full_return: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                full_return,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            })
        }

        pub fn is_started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        pub fn was_shut_down(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    impl<W: WorkItem> Consumer<W> for StaticConsumer {
        fn name(&self) -> &str {
            &self.name
        }

        fn mnemonic(&self) -> &'static str {
            "static"
        }

        fn capable_of_full_return(&self) -> bool {
            self.full_return
        }

        fn processing_units_estimate(&self) -> ProcessingUnits {
            ProcessingUnits::exact(1)
        }

        fn async_start_processing(&self, _link: BrokerLink<W>) -> Result<(), ConsumerError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn take_faults(&self) -> Vec<ProcessingFault> {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_units_combine() {
        let total = ProcessingUnits::exact(4).combine(ProcessingUnits::exact(2));
        assert_eq!(total, ProcessingUnits::exact(6));

        let total = total.combine(ProcessingUnits::estimate(3));
        assert_eq!(total.count, 9);
        assert!(!total.exact);
    }

    #[test]
    fn test_default_names_are_unique() {
        let a = default_name("thread");
        let b = default_name("thread");
        assert_ne!(a, b);
        assert!(a.starts_with("thread-"));
    }
}
