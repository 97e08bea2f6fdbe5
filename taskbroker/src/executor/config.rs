//! Executor configuration.
//!
//! [`ExecutorConfig`] holds what every strategy shares (the resubmission
//! policy). [`BrokerExecutorConfig`] adds the knobs of the broker-backed
//! strategy's wait heuristics.

use crate::buffer_port::PortConfig;
use std::num::NonZeroUsize;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default number of resubmission rounds within one `work_on` call.
pub const DEFAULT_MAX_RESUBMISSIONS: u32 = 5;

/// Default multiplier applied to the estimated time for a full return.
pub const DEFAULT_WAIT_FACTOR: f64 = 2.0;

/// Default minimum share of items that must return before giving up (off).
pub const DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE: u8 = 0;

// =============================================================================
// Executor Configuration
// =============================================================================

/// Configuration shared by all execution strategies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// How many times unreturned items are resubmitted within one call.
    ///
    /// `None` means no limit: `work_on` keeps resubmitting until every item
    /// has returned.
    pub max_resubmissions: Option<u32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_resubmissions: Some(DEFAULT_MAX_RESUBMISSIONS),
        }
    }
}

impl ExecutorConfig {
    /// Set the resubmission limit.
    pub fn with_max_resubmissions(mut self, max: Option<u32>) -> Self {
        self.max_resubmissions = max;
        self
    }
}

impl From<&crate::config::ExecutorSettings> for ExecutorConfig {
    fn from(settings: &crate::config::ExecutorSettings) -> Self {
        Self {
            max_resubmissions: settings.max_resubmissions,
        }
    }
}

// =============================================================================
// Broker Executor Configuration
// =============================================================================

/// Configuration of the broker-backed strategy.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerExecutorConfig {
    /// Multiplier on the estimated time for all items to return.
    /// `0.0` disables timeouts: every cycle waits for a full return.
    pub wait_factor: f64,

    /// Multiplier used for the very first estimate, made from a single
    /// returned item. Derived from the expected number of workers.
    pub initial_wait_factor: f64,

    /// Stop waiting as soon as at least this percentage of the cycle's
    /// items has returned, leaving the rest pending. `0` disables the check.
    pub min_partial_return_percentage: u8,

    /// Capacities of the executor's buffer port.
    pub port: PortConfig,
}

impl BrokerExecutorConfig {
    /// Creates a configuration for a deployment with roughly
    /// `expected_workers` items processed in parallel.
    ///
    /// The first timeout is estimated from a single returned item. With N
    /// workers a batch takes about `first_item × expected / N`, hence an
    /// initial wait factor of `1 / N`.
    pub fn new(expected_workers: NonZeroUsize) -> Self {
        Self {
            wait_factor: DEFAULT_WAIT_FACTOR,
            initial_wait_factor: 1.0 / expected_workers.get() as f64,
            min_partial_return_percentage: DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE,
            port: PortConfig::default(),
        }
    }

    /// Set the wait factor. Negative values are treated as `0.0`.
    pub fn with_wait_factor(mut self, factor: f64) -> Self {
        self.wait_factor = sanitize_factor(factor);
        self
    }

    /// Override the initial wait factor.
    pub fn with_initial_wait_factor(mut self, factor: f64) -> Self {
        self.initial_wait_factor = sanitize_factor(factor);
        self
    }

    /// Set the minimum partial return percentage (clamped to 100).
    pub fn with_min_partial_return_percentage(mut self, percentage: u8) -> Self {
        self.min_partial_return_percentage = percentage.min(100);
        self
    }

    /// Set the buffer port capacities.
    pub fn with_port_config(mut self, port: PortConfig) -> Self {
        self.port = port;
        self
    }

    /// Returns true if timeouts are disabled.
    pub fn waits_for_full_return(&self) -> bool {
        self.wait_factor == 0.0
    }
}

impl From<&crate::config::BrokerSettings> for BrokerExecutorConfig {
    fn from(settings: &crate::config::BrokerSettings) -> Self {
        Self::new(settings.expected_workers)
            .with_wait_factor(settings.wait_factor)
            .with_min_partial_return_percentage(settings.min_partial_return_percentage)
            .with_port_config(
                PortConfig::default()
                    .with_raw_capacity(settings.raw_capacity)
                    .with_processed_capacity(settings.processed_capacity),
            )
    }
}

fn sanitize_factor(factor: f64) -> f64 {
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_resubmissions, Some(DEFAULT_MAX_RESUBMISSIONS));
    }

    #[test]
    fn test_unlimited_resubmissions() {
        let config = ExecutorConfig::default().with_max_resubmissions(None);
        assert_eq!(config.max_resubmissions, None);
    }

    #[test]
    fn test_initial_wait_factor_is_inverse_of_workers() {
        let config = BrokerExecutorConfig::new(workers(4));
        assert_eq!(config.initial_wait_factor, 0.25);
        assert_eq!(config.wait_factor, DEFAULT_WAIT_FACTOR);
        assert!(!config.waits_for_full_return());
    }

    #[test]
    fn test_invalid_factors_disable_timeouts() {
        let config = BrokerExecutorConfig::new(workers(1)).with_wait_factor(-1.0);
        assert!(config.waits_for_full_return());

        let config = BrokerExecutorConfig::new(workers(1)).with_wait_factor(f64::NAN);
        assert!(config.waits_for_full_return());
    }

    #[test]
    fn test_partial_return_percentage_clamped() {
        let config =
            BrokerExecutorConfig::new(workers(1)).with_min_partial_return_percentage(150);
        assert_eq!(config.min_partial_return_percentage, 100);
    }
}
