//! Telemetry for submission cycles and broker membership.
//!
//! Executors and the broker emit structured events through a
//! [`TelemetrySink`]. They don't know how events are consumed: a sink may
//! log them, aggregate them, or record them for inspection in tests.
//!
//! # Example
//!
//! ```
//! use taskbroker::telemetry::{TelemetryEvent, TelemetrySink};
//!
//! struct PrintSink;
//!
//! impl TelemetrySink for PrintSink {
//!     fn emit(&self, event: TelemetryEvent) {
//!         println!("{}", event.event_type());
//!     }
//! }
//! ```

use crate::executor::CycleState;
use crate::item::PortId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Telemetry Events
// =============================================================================

/// Events emitted by executors and the broker.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    // -------------------------------------------------------------------------
    // Cycle Events
    // -------------------------------------------------------------------------
    /// A `work_on` call started.
    CycleStarted {
        caller: String,
        iteration: u64,
        expected: usize,
    },

    /// Pending items were handed to the execution strategy.
    ItemsSubmitted {
        iteration: u64,
        resubmission: u32,
        count: usize,
    },

    /// The broker-backed executor revised its wait budget.
    TimeoutEstimated { iteration: u64, timeout: Duration },

    /// An item from an earlier iteration came back.
    OldItemReceived {
        iteration: u64,
        item_iteration: u64,
        position: usize,
    },

    /// Items still pending are being submitted again.
    Resubmitting {
        iteration: u64,
        attempt: u32,
        pending: usize,
    },

    /// A `work_on` call finished.
    CycleFinished {
        caller: String,
        iteration: u64,
        state: CycleState,
        returned: usize,
        not_returned: usize,
        old: usize,
        erroneous: usize,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Broker Events
    // -------------------------------------------------------------------------
    /// A buffer port joined the broker.
    PortEnrolled { port: PortId },

    /// A buffer port left the broker.
    PortDeregistered { port: PortId },

    /// A consumer joined the broker and started processing.
    ConsumerEnrolled {
        name: String,
        capable_of_full_return: bool,
    },

    /// A consumer was shut down.
    ConsumerStopped { name: String, faults: usize },
}

impl TelemetryEvent {
    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CycleStarted { .. } => "cycle_started",
            Self::ItemsSubmitted { .. } => "items_submitted",
            Self::TimeoutEstimated { .. } => "timeout_estimated",
            Self::OldItemReceived { .. } => "old_item_received",
            Self::Resubmitting { .. } => "resubmitting",
            Self::CycleFinished { .. } => "cycle_finished",
            Self::PortEnrolled { .. } => "port_enrolled",
            Self::PortDeregistered { .. } => "port_deregistered",
            Self::ConsumerEnrolled { .. } => "consumer_enrolled",
            Self::ConsumerStopped { .. } => "consumer_stopped",
        }
    }

    /// Returns the iteration this event belongs to, if any.
    pub fn iteration(&self) -> Option<u64> {
        match self {
            Self::CycleStarted { iteration, .. }
            | Self::ItemsSubmitted { iteration, .. }
            | Self::TimeoutEstimated { iteration, .. }
            | Self::OldItemReceived { iteration, .. }
            | Self::Resubmitting { iteration, .. }
            | Self::CycleFinished { iteration, .. } => Some(*iteration),
            Self::PortEnrolled { .. }
            | Self::PortDeregistered { .. }
            | Self::ConsumerEnrolled { .. }
            | Self::ConsumerStopped { .. } => None,
        }
    }
}

// =============================================================================
// Telemetry Sink Trait
// =============================================================================

/// Sink for telemetry events.
///
/// Implementations must be thread-safe: the broker emits from whichever
/// thread enrols a port or consumer.
pub trait TelemetrySink: Send + Sync {
    /// Called when a telemetry event occurs. Should be fast and non-blocking.
    fn emit(&self, event: TelemetryEvent);
}

// =============================================================================
// Built-in Sink Implementations
// =============================================================================

/// No-op sink for when telemetry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::CycleStarted {
                caller,
                iteration,
                expected,
            } => {
                tracing::debug!(
                    caller = %caller,
                    iteration = iteration,
                    expected = expected,
                    "Cycle started"
                );
            }
            TelemetryEvent::ItemsSubmitted {
                iteration,
                resubmission,
                count,
            } => {
                tracing::trace!(
                    iteration = iteration,
                    resubmission = resubmission,
                    count = count,
                    "Items submitted"
                );
            }
            TelemetryEvent::TimeoutEstimated { iteration, timeout } => {
                tracing::trace!(
                    iteration = iteration,
                    timeout_ms = timeout.as_millis(),
                    "Timeout estimated"
                );
            }
            TelemetryEvent::OldItemReceived {
                iteration,
                item_iteration,
                position,
            } => {
                tracing::debug!(
                    iteration = iteration,
                    item_iteration = item_iteration,
                    position = position,
                    "Old item received"
                );
            }
            TelemetryEvent::Resubmitting {
                iteration,
                attempt,
                pending,
            } => {
                tracing::info!(
                    iteration = iteration,
                    attempt = attempt,
                    pending = pending,
                    "Resubmitting unreturned items"
                );
            }
            TelemetryEvent::CycleFinished {
                caller,
                iteration,
                state,
                returned,
                not_returned,
                old,
                erroneous,
                duration,
            } => {
                if *state == CycleState::Complete {
                    tracing::debug!(
                        caller = %caller,
                        iteration = iteration,
                        returned = returned,
                        old = old,
                        erroneous = erroneous,
                        duration_ms = duration.as_millis(),
                        "Cycle complete"
                    );
                } else {
                    tracing::warn!(
                        caller = %caller,
                        iteration = iteration,
                        state = %state,
                        returned = returned,
                        not_returned = not_returned,
                        old = old,
                        erroneous = erroneous,
                        duration_ms = duration.as_millis(),
                        "Cycle incomplete"
                    );
                }
            }
            TelemetryEvent::PortEnrolled { port } => {
                tracing::debug!(port = %port, "Port enrolled");
            }
            TelemetryEvent::PortDeregistered { port } => {
                tracing::debug!(port = %port, "Port deregistered");
            }
            TelemetryEvent::ConsumerEnrolled {
                name,
                capable_of_full_return,
            } => {
                tracing::info!(
                    consumer = %name,
                    full_return = capable_of_full_return,
                    "Consumer enrolled"
                );
            }
            TelemetryEvent::ConsumerStopped { name, faults } => {
                tracing::info!(consumer = %name, faults = faults, "Consumer stopped");
            }
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetrySink {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events of the given type.
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
