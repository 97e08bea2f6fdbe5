//! The executor: one submission cycle per `work_on` call.

use super::brokered::BrokerStrategy;
use super::config::{BrokerExecutorConfig, ExecutorConfig};
use super::cycle::{tidy_old_items, CycleContext, CycleReport, CycleState};
use super::error::ExecutorError;
use super::serial::SerialStrategy;
use super::strategy::ExecutionStrategy;
use super::threaded::ThreadPoolStrategy;
use crate::broker::Broker;
use crate::item::{SlotStatus, WorkItem};
use crate::pool::PoolConfig;
use crate::telemetry::{NullTelemetrySink, TelemetryEvent, TelemetrySink};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// Executor running on the calling thread.
pub type SerialExecutor<W> = Executor<W, SerialStrategy>;

/// Executor backed by a local worker pool.
pub type ThreadPoolExecutor<W> = Executor<W, ThreadPoolStrategy<W>>;

/// Executor backed by a shared broker.
pub type BrokerExecutor<W> = Executor<W, BrokerStrategy<W>>;

/// Drives submission cycles over a batch of work items.
///
/// One executor belongs to one producer. Each [`work_on`](Self::work_on)
/// call is an iteration with its own counter value; items coming back from
/// an earlier iteration are told apart by that counter.
pub struct Executor<W: WorkItem, S: ExecutionStrategy<W>> {
    strategy: S,
    config: ExecutorConfig,
    iteration: u64,
    initialized: bool,
    state: CycleState,
    last_report: Option<CycleReport>,
    telemetry: Arc<dyn TelemetrySink>,
    _item: PhantomData<fn() -> W>,
}

impl<W: WorkItem, S: ExecutionStrategy<W>> Executor<W, S> {
    /// Creates an executor around a strategy.
    pub fn new(strategy: S, config: ExecutorConfig) -> Self {
        Self {
            strategy,
            config,
            iteration: 0,
            initialized: false,
            state: CycleState::Idle,
            last_report: None,
            telemetry: Arc::new(NullTelemetrySink),
            _item: PhantomData,
        }
    }

    /// Sends cycle events to `sink`.
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Initializes the strategy. Called lazily by the first cycle with
    /// pending items; calling it again is a no-op.
    pub fn init(&mut self) -> Result<(), ExecutorError> {
        if !self.initialized {
            self.strategy.init()?;
            self.initialized = true;
            tracing::debug!(strategy = self.strategy.name(), "Executor initialized");
        }
        Ok(())
    }

    /// Releases the strategy's resources. Also done on drop.
    pub fn finalize(&mut self) {
        if self.initialized {
            self.strategy.finalize();
            self.initialized = false;
            tracing::debug!(strategy = self.strategy.name(), "Executor finalized");
        }
    }

    /// Counter value the next `work_on` call will use.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Current cycle state.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Summary of the last `work_on` call.
    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    pub fn max_resubmissions(&self) -> Option<u32> {
        self.config.max_resubmissions
    }

    /// Set the resubmission limit; `None` resubmits until everything returned.
    pub fn set_max_resubmissions(&mut self, max: Option<u32>) {
        self.config.max_resubmissions = max;
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Processes every `Pending` slot of `items`.
    ///
    /// Returned items are written back into their slot and the mask entry
    /// becomes `Processed` or `Failed`. Slots whose item did not come back
    /// stay `Pending`, ready for the next call. Items from earlier calls
    /// that come back meanwhile are appended to `old_items`, which is kept
    /// sorted by submission position.
    ///
    /// With `resubmit`, pending items are submitted again until they all
    /// returned or the resubmission limit is reached. A strategy that
    /// accepted a partial return ends the call without resubmitting.
    ///
    /// Returns true if every pending item came back.
    pub fn work_on(
        &mut self,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        resubmit: bool,
        caller: &str,
    ) -> Result<bool, ExecutorError> {
        if items.len() != mask.len() {
            return Err(ExecutorError::InvalidArgument(format!(
                "{} items but {} mask entries",
                items.len(),
                mask.len()
            )));
        }

        let iteration = self.iteration;
        self.iteration += 1;
        let expected = mask.iter().filter(|s| **s == SlotStatus::Pending).count();
        let mut ctx = CycleContext::new(iteration, expected);

        if expected == 0 {
            self.finish(caller, &ctx, CycleState::Complete);
            return Ok(true);
        }

        self.init()?;
        self.telemetry.emit(TelemetryEvent::CycleStarted {
            caller: caller.to_string(),
            iteration,
            expected,
        });
        tracing::debug!(
            caller = caller,
            iteration = iteration,
            expected = expected,
            strategy = self.strategy.name(),
            "Cycle started"
        );

        self.state = CycleState::Submitting;
        let result = match self.strategy.iteration_init(&ctx) {
            Ok(()) => self.run_rounds(items, mask, old_items, resubmit, &mut ctx),
            Err(e) => Err(e),
        };
        self.strategy.iteration_finalize(&ctx);
        tidy_old_items(old_items);

        match result {
            Ok(complete) => {
                let state = if complete {
                    CycleState::Complete
                } else if ctx.partial_return_accepted {
                    CycleState::PartialReturn
                } else {
                    CycleState::TimedOutIncomplete
                };
                self.finish(caller, &ctx, state);
                Ok(complete)
            }
            Err(e) => {
                tracing::error!(
                    caller = caller,
                    iteration = iteration,
                    error = %e,
                    "Cycle aborted"
                );
                self.state = CycleState::Idle;
                Err(e)
            }
        }
    }

    fn run_rounds(
        &mut self,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        resubmit: bool,
        ctx: &mut CycleContext,
    ) -> Result<bool, ExecutorError> {
        loop {
            ctx.round_started = Instant::now();
            ctx.submitted = 0;
            for (position, item) in items.iter_mut().enumerate() {
                if mask[position] != SlotStatus::Pending {
                    continue;
                }
                let tag = item.tag_mut();
                tag.iteration = ctx.iteration;
                tag.position = position;
                tag.resubmission = ctx.resubmission;
                tag.outcome = None;
                self.strategy.submit(position, item, ctx)?;
                ctx.submitted += 1;
            }
            self.telemetry.emit(TelemetryEvent::ItemsSubmitted {
                iteration: ctx.iteration,
                resubmission: ctx.resubmission,
                count: ctx.submitted,
            });

            self.state = CycleState::Waiting;
            let old_before = old_items.len();
            let complete = self
                .strategy
                .wait_for_return(items, mask, old_items, ctx)?;

            for item in &old_items[old_before..] {
                self.telemetry.emit(TelemetryEvent::OldItemReceived {
                    iteration: ctx.iteration,
                    item_iteration: item.tag().iteration,
                    position: item.tag().position,
                });
            }
            if let Some(timeout) = self.strategy.estimated_timeout() {
                self.telemetry.emit(TelemetryEvent::TimeoutEstimated {
                    iteration: ctx.iteration,
                    timeout,
                });
            }

            if complete {
                return Ok(true);
            }
            if ctx.partial_return_accepted {
                tracing::debug!(
                    iteration = ctx.iteration,
                    returned = ctx.returned,
                    pending = ctx.outstanding,
                    "Partial return accepted"
                );
                return Ok(false);
            }
            let limit_reached = self
                .config
                .max_resubmissions
                .is_some_and(|max| ctx.resubmission >= max);
            if !resubmit || limit_reached {
                return Ok(false);
            }

            ctx.resubmission += 1;
            self.state = CycleState::Resubmitting;
            tracing::debug!(
                iteration = ctx.iteration,
                attempt = ctx.resubmission,
                pending = ctx.outstanding,
                "Resubmitting pending items"
            );
            self.telemetry.emit(TelemetryEvent::Resubmitting {
                iteration: ctx.iteration,
                attempt: ctx.resubmission,
                pending: ctx.outstanding,
            });
        }
    }

    fn finish(&mut self, caller: &str, ctx: &CycleContext, state: CycleState) {
        let report = CycleReport {
            caller: caller.to_string(),
            iteration: ctx.iteration,
            state,
            expected: ctx.expected,
            returned: ctx.returned,
            not_returned: ctx.outstanding,
            old: ctx.old_received,
            erroneous: ctx.erroneous,
            resubmissions: ctx.resubmission,
            duration: ctx.started.elapsed(),
        };

        if ctx.expected > 0 {
            self.telemetry.emit(TelemetryEvent::CycleFinished {
                caller: report.caller.clone(),
                iteration: report.iteration,
                state,
                returned: report.returned,
                not_returned: report.not_returned,
                old: report.old,
                erroneous: report.erroneous,
                duration: report.duration,
            });
            tracing::debug!(
                caller = caller,
                iteration = report.iteration,
                state = %state,
                returned = report.returned,
                not_returned = report.not_returned,
                old = report.old,
                "Cycle finished"
            );
        }

        self.state = state;
        self.last_report = Some(report);
    }
}

impl<W: WorkItem, S: ExecutionStrategy<W>> Drop for Executor<W, S> {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl<W: WorkItem> Executor<W, SerialStrategy> {
    /// Creates an executor that processes items on the calling thread.
    pub fn serial(config: ExecutorConfig) -> Self {
        Self::new(SerialStrategy::new(), config)
    }
}

impl<W: WorkItem> Executor<W, ThreadPoolStrategy<W>> {
    /// Creates an executor backed by a worker pool.
    pub fn thread_pool(config: ExecutorConfig, pool: PoolConfig) -> Self {
        Self::new(ThreadPoolStrategy::new(pool), config)
    }
}

impl<W: WorkItem> Executor<W, BrokerStrategy<W>> {
    /// Creates an executor submitting through `broker`.
    ///
    /// The broker must be initialized before the first cycle.
    pub fn brokered(
        broker: Arc<Broker<W>>,
        config: ExecutorConfig,
        broker_config: BrokerExecutorConfig,
    ) -> Self {
        Self::new(BrokerStrategy::new(broker, broker_config), config)
    }
}
