//! Wait-budget estimation for best-effort broker cycles.
//!
//! The estimator is pure arithmetic over durations and counts; the
//! broker-backed strategy feeds it the measurements.
//!
//! - First cycle ever, after the first item:
//!   `first_item_elapsed × expected × initial_wait_factor`
//! - First cycle ever, every later item:
//!   `(elapsed / returned) × expected × wait_factor`
//! - Every later cycle, once at its start:
//!   `previous_average × expected × wait_factor`

use std::time::Duration;

/// Scales a duration, saturating instead of overflowing.
pub(crate) fn scale(duration: Duration, factor: f64) -> Duration {
    let secs = duration.as_secs_f64() * factor;
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Turns return-time measurements into wait budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutEstimator {
    wait_factor: f64,
    initial_wait_factor: f64,
    average_return: Option<Duration>,
}

impl TimeoutEstimator {
    /// Creates an estimator without any measurement yet.
    pub fn new(wait_factor: f64, initial_wait_factor: f64) -> Self {
        Self {
            wait_factor,
            initial_wait_factor,
            average_return: None,
        }
    }

    /// Average time per returned item measured in the last cycle that
    /// returned anything.
    pub fn average_return(&self) -> Option<Duration> {
        self.average_return
    }

    /// Returns true until a cycle has been recorded.
    pub fn is_first_cycle(&self) -> bool {
        self.average_return.is_none()
    }

    /// Budget after the first item of the first cycle came back.
    pub fn from_first_item(&self, elapsed: Duration, expected: usize) -> Duration {
        scale(elapsed, expected as f64 * self.initial_wait_factor)
    }

    /// Budget revised from the running average of the first cycle.
    pub fn from_running_average(
        &self,
        elapsed: Duration,
        returned: usize,
        expected: usize,
    ) -> Duration {
        if returned == 0 {
            return self.from_first_item(elapsed, expected);
        }
        let average = elapsed.div_f64(returned as f64);
        scale(average, expected as f64 * self.wait_factor)
    }

    /// Budget for a later cycle, from the previous cycle's average.
    ///
    /// `None` before any cycle has been recorded.
    pub fn from_previous_cycle(&self, expected: usize) -> Option<Duration> {
        self.average_return
            .map(|average| scale(average, expected as f64 * self.wait_factor))
    }

    /// Records a finished cycle. Cycles that returned nothing keep the
    /// previous average.
    pub fn record_cycle(&mut self, elapsed: Duration, returned: usize) {
        if returned > 0 {
            self.average_return = Some(elapsed.div_f64(returned as f64));
        }
    }
}
