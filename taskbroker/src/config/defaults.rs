//! Default values for every setting, and `ConfigFile::default()`.

use std::num::NonZeroUsize;

use super::file::config_directory;
use super::settings::*;
use crate::broker::DEFAULT_MAX_PORTS;
use crate::buffer_port::DEFAULT_BUFFER_SIZE;
use crate::consumer::{DEFAULT_RETRIEVE_TIMEOUT, DEFAULT_SUBMIT_TIMEOUT};
use crate::executor::{
    DEFAULT_MAX_RESUBMISSIONS, DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE, DEFAULT_WAIT_FACTOR,
};
use crate::logging::DEFAULT_LOG_FILE;
use crate::pool::default_pool_threads;

/// Default strategy for the CLI runner.
pub const DEFAULT_STRATEGY: StrategyKind = StrategyKind::Broker;

/// Default number of workers the broker executor plans for.
pub const DEFAULT_EXPECTED_WORKERS: usize = 4;

/// Default threads per thread consumer.
pub const DEFAULT_CONSUMER_THREADS: usize = crate::consumer::DEFAULT_THREADS_PER_WORKER;

/// Default expected workers as a `NonZeroUsize`.
pub fn default_expected_workers() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_EXPECTED_WORKERS).unwrap_or(NonZeroUsize::MIN)
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings {
                strategy: DEFAULT_STRATEGY,
                max_resubmissions: Some(DEFAULT_MAX_RESUBMISSIONS),
                threads: default_pool_threads(),
            },
            broker: BrokerSettings {
                expected_workers: default_expected_workers(),
                wait_factor: DEFAULT_WAIT_FACTOR,
                min_partial_return_percentage: DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE,
                raw_capacity: DEFAULT_BUFFER_SIZE,
                processed_capacity: DEFAULT_BUFFER_SIZE,
                max_ports: DEFAULT_MAX_PORTS,
            },
            consumer: ConsumerSettings {
                threads: DEFAULT_CONSUMER_THREADS,
                capable_of_full_return: true,
                retrieve_timeout_ms: DEFAULT_RETRIEVE_TIMEOUT.as_millis() as u64,
                submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT.as_millis() as u64,
            },
            logging: LoggingSettings {
                directory: config_directory().join("logs"),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
