//! Execution through a broker and whatever consumers are enrolled on it.
//!
//! The strategy owns one [`BufferPort`], enrolled on `init`. Every round it
//! pushes clones of the pending items into the raw queue and collects
//! processed items from the other side. How long it collects depends on
//! the consumers:
//!
//! - **Full return**: every consumer guarantees to return every item, or
//!   the wait factor is 0. Blocks until nothing is pending.
//! - **Timed**: some consumer is best-effort. Waits for a budget derived
//!   from measured return times (see [`TimeoutEstimator`]) and leaves the
//!   rest pending.
//!
//! In both modes a non-zero partial-return minimum ends the wait as soon as
//! that share of the cycle's items is back.
//!
//! Submitting never blocks on a full raw queue for long: while waiting for
//! space, processed items are taken off the port and kept until the wait,
//! so consumers are never stuck on a full processed queue.

use super::config::BrokerExecutorConfig;
use super::cycle::{file_returned_item, CycleContext, Filed};
use super::error::ExecutorError;
use super::strategy::ExecutionStrategy;
use super::timeout::TimeoutEstimator;
use crate::broker::Broker;
use crate::buffer_port::BufferPort;
use crate::item::{SlotStatus, WorkItem};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a submission waits for raw queue space before draining the
/// processed queue again.
const SUBMIT_POLL: Duration = Duration::from_millis(10);

/// Slice used when a budget is too large to express as a deadline.
const UNBOUNDED_POLL: Duration = Duration::from_secs(1);

/// Strategy backed by a shared [`Broker`].
pub struct BrokerStrategy<W: WorkItem> {
    broker: Arc<Broker<W>>,
    config: BrokerExecutorConfig,
    port: Option<Arc<BufferPort<W>>>,
    /// Processed items taken off the port while submitting.
    early: Vec<W>,
    estimator: TimeoutEstimator,
    full_return: bool,
    /// Time spent and items received so far in the running cycle.
    measured: (Duration, usize),
    last_timeout: Option<Duration>,
}

impl<W: WorkItem> BrokerStrategy<W> {
    pub fn new(broker: Arc<Broker<W>>, config: BrokerExecutorConfig) -> Self {
        let estimator = TimeoutEstimator::new(config.wait_factor, config.initial_wait_factor);
        Self {
            broker,
            config,
            port: None,
            early: Vec::new(),
            estimator,
            full_return: false,
            measured: (Duration::ZERO, 0),
            last_timeout: None,
        }
    }

    /// The executor's port, once enrolled.
    pub fn port(&self) -> Option<&Arc<BufferPort<W>>> {
        self.port.as_ref()
    }

    /// The broker this strategy submits to.
    pub fn broker(&self) -> &Arc<Broker<W>> {
        &self.broker
    }

    /// Return-time estimator, for inspection.
    pub fn estimator(&self) -> &TimeoutEstimator {
        &self.estimator
    }

    /// Whether the running (or last) cycle waited for a full return.
    pub fn is_full_return(&self) -> bool {
        self.full_return
    }

    fn enrolled_port(&self) -> Result<Arc<BufferPort<W>>, ExecutorError> {
        match &self.port {
            Some(port) if !port.is_closed() => Ok(Arc::clone(port)),
            _ => Err(ExecutorError::PortClosed),
        }
    }

    fn wait_for_full_return(
        &mut self,
        port: &BufferPort<W>,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        ctx: &mut CycleContext,
    ) -> Result<bool, ExecutorError> {
        while !ctx.is_complete() {
            if self.accept_partial_return(ctx) {
                return Ok(false);
            }
            let item = port.pop_processed().ok_or(ExecutorError::EmptyRetrieval)?;
            file_returned_item(item, items, mask, old_items, ctx)?;
        }
        Ok(true)
    }

    fn wait_timed(
        &mut self,
        port: &BufferPort<W>,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        ctx: &mut CycleContext,
        mut returned: usize,
    ) -> Result<bool, ExecutorError> {
        let expected = ctx.submitted;
        let revising = self.estimator.is_first_cycle();
        let mut clock_start = ctx.round_started;

        let budget = if let Some(budget) = self.estimator.from_previous_cycle(expected) {
            budget
        } else if self.measured.1 > 0 {
            self.estimator
                .from_running_average(self.measured.0, self.measured.1, expected)
        } else {
            if returned == 0 {
                // Nothing measured yet: wait as long as it takes for one item.
                loop {
                    let item = port.pop_processed().ok_or(ExecutorError::EmptyRetrieval)?;
                    if file_returned_item(item, items, mask, old_items, ctx)? == Filed::Current {
                        break;
                    }
                }
                returned = 1;
            }
            clock_start = port
                .first_raw_retrieval()
                .filter(|first| *first >= ctx.round_started)
                .unwrap_or(ctx.round_started);
            self.estimator
                .from_first_item(clock_start.elapsed(), expected)
        };
        let mut deadline = clock_start.checked_add(budget);
        self.last_timeout = Some(budget);
        tracing::debug!(
            iteration = ctx.iteration,
            resubmission = ctx.resubmission,
            timeout_ms = budget.as_millis() as u64,
            "Wait budget estimated"
        );

        while !ctx.is_complete() {
            if self.accept_partial_return(ctx) {
                break;
            }
            let now = Instant::now();
            let wait = match deadline {
                Some(deadline) if now >= deadline => break,
                Some(deadline) => deadline - now,
                None => UNBOUNDED_POLL,
            };

            let Some(item) = port.pop_processed_timeout(wait) else {
                if port.is_closed() {
                    return Err(ExecutorError::PortClosed);
                }
                continue;
            };
            if file_returned_item(item, items, mask, old_items, ctx)? != Filed::Current {
                continue;
            }
            returned += 1;

            if revising {
                let budget = self.estimator.from_running_average(
                    self.measured.0 + clock_start.elapsed(),
                    self.measured.1 + returned,
                    expected,
                );
                deadline = clock_start.checked_add(budget);
                self.last_timeout = Some(budget);
            }
        }

        self.measured.0 += clock_start.elapsed();
        self.measured.1 += returned;
        Ok(ctx.is_complete())
    }

    /// Marks the cycle as partially returned once the configured minimum
    /// share is back.
    fn accept_partial_return(&self, ctx: &mut CycleContext) -> bool {
        if !ctx.partial_return_reached(self.config.min_partial_return_percentage) {
            return false;
        }
        if !ctx.partial_return_accepted {
            tracing::debug!(
                iteration = ctx.iteration,
                returned = ctx.returned,
                expected = ctx.expected,
                minimum = self.config.min_partial_return_percentage,
                "Partial-return minimum reached"
            );
        }
        ctx.partial_return_accepted = true;
        true
    }

    fn drain_processed(&mut self, port: &BufferPort<W>) {
        while let Some(item) = port.try_pop_processed() {
            self.early.push(item);
        }
    }
}

impl<W: WorkItem> ExecutionStrategy<W> for BrokerStrategy<W> {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn init(&mut self) -> Result<(), ExecutorError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = Arc::new(BufferPort::with_config(self.config.port));
        let id = self.broker.enrol_port(&port)?;
        tracing::debug!(port = %id, "Executor port enrolled");
        self.port = Some(port);
        Ok(())
    }

    fn finalize(&mut self) {
        if let Some(port) = self.port.take() {
            if let Some(id) = port.id() {
                self.broker.deregister_port(id);
            }
            port.close();
        }
        self.early.clear();
    }

    fn iteration_init(&mut self, _ctx: &CycleContext) -> Result<(), ExecutorError> {
        self.enrolled_port()?;
        self.full_return =
            self.config.waits_for_full_return() || self.broker.capable_of_full_return();
        self.measured = (Duration::ZERO, 0);
        self.last_timeout = None;
        Ok(())
    }

    fn submit(
        &mut self,
        _position: usize,
        item: &mut W,
        _ctx: &CycleContext,
    ) -> Result<(), ExecutorError> {
        let port = self.enrolled_port()?;
        self.drain_processed(&port);

        let mut item = item.clone();
        loop {
            match port.push_raw_timeout(item, SUBMIT_POLL) {
                Ok(()) => return Ok(()),
                Err(_) if port.is_closed() => return Err(ExecutorError::PortClosed),
                Err(rejected) => {
                    item = rejected;
                    self.drain_processed(&port);
                }
            }
        }
    }

    fn wait_for_return(
        &mut self,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        ctx: &mut CycleContext,
    ) -> Result<bool, ExecutorError> {
        let port = self.enrolled_port()?;
        let mut returned = 0;
        for item in std::mem::take(&mut self.early) {
            if file_returned_item(item, items, mask, old_items, ctx)? == Filed::Current {
                returned += 1;
            }
        }

        if self.full_return {
            self.wait_for_full_return(&port, items, mask, old_items, ctx)
        } else {
            self.wait_timed(&port, items, mask, old_items, ctx, returned)
        }
    }

    fn iteration_finalize(&mut self, _ctx: &CycleContext) {
        if !self.full_return {
            let (elapsed, returned) = self.measured;
            self.estimator.record_cycle(elapsed, returned);
        }
    }

    fn estimated_timeout(&self) -> Option<Duration> {
        self.last_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::buffer_port::PortConfig;
    use crate::consumer::testing::StaticConsumer;
    use crate::consumer::{ThreadConsumer, ThreadConsumerConfig};
    use crate::item::testing::Counter;
    use crate::log::NoOpLogger;
    use crate::telemetry::NullTelemetrySink;
    use std::num::NonZeroUsize;

    fn broker() -> Arc<Broker<Counter>> {
        let broker = Broker::with_observers(
            BrokerConfig::default(),
            Arc::new(NoOpLogger),
            Arc::new(NullTelemetrySink),
        );
        broker.init();
        broker
    }

    fn config() -> BrokerExecutorConfig {
        BrokerExecutorConfig::new(NonZeroUsize::new(2).unwrap())
    }

    fn stamp(items: &mut [Counter], iteration: u64) {
        for (position, item) in items.iter_mut().enumerate() {
            item.tag.iteration = iteration;
            item.tag.position = position;
        }
    }

    #[test]
    fn test_init_enrols_and_finalize_deregisters() {
        let broker = broker();
        let mut strategy = BrokerStrategy::new(Arc::clone(&broker), config());
        strategy.init().unwrap();
        assert_eq!(broker.n_ports(), 1);
        let port = Arc::clone(strategy.port().unwrap());
        assert!(port.id().is_some());

        strategy.finalize();
        assert_eq!(broker.n_ports(), 0);
        assert!(port.is_closed());
        assert!(strategy.port().is_none());
    }

    #[test]
    fn test_init_fails_on_stopped_broker() {
        let broker: Arc<Broker<Counter>> = Broker::new(BrokerConfig::default());
        let mut strategy = BrokerStrategy::new(broker, config());
        assert!(matches!(
            strategy.init(),
            Err(ExecutorError::Broker(crate::broker::BrokerError::NotRunning))
        ));
    }

    #[test]
    fn test_full_return_round() {
        let broker = broker();
        let consumer = ThreadConsumer::with_logger(
            ThreadConsumerConfig::default().with_threads(2),
            Arc::new(NoOpLogger),
        );
        broker.enrol_consumer(consumer).unwrap();

        let mut strategy = BrokerStrategy::new(Arc::clone(&broker), config());
        strategy.init().unwrap();

        let mut items: Vec<Counter> = (0..10).map(Counter::new).collect();
        stamp(&mut items, 0);
        let mut mask = vec![SlotStatus::Pending; 10];
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 10);

        strategy.iteration_init(&ctx).unwrap();
        assert!(strategy.is_full_return());
        for position in 0..items.len() {
            strategy.submit(position, &mut items[position], &ctx).unwrap();
        }
        ctx.submitted = 10;
        let complete = strategy
            .wait_for_return(&mut items, &mut mask, &mut old, &mut ctx)
            .unwrap();
        strategy.iteration_finalize(&ctx);

        assert!(complete);
        assert!(mask.iter().all(|s| *s == SlotStatus::Processed));
        assert!(items.iter().all(|item| item.value == 1));
        assert!(strategy.estimator().is_first_cycle());
        strategy.finalize();
        broker.finalize();
    }

    #[test]
    fn test_timed_round_gives_up_on_lost_items() {
        let broker = broker();
        // Best-effort consumer that never processes anything.
        broker
            .enrol_consumer(StaticConsumer::new("silent", false))
            .unwrap();

        let mut strategy = BrokerStrategy::new(Arc::clone(&broker), config());
        strategy.init().unwrap();
        let port = Arc::clone(strategy.port().unwrap());

        let mut items: Vec<Counter> = (0..4).map(Counter::new).collect();
        stamp(&mut items, 0);
        let mut mask = vec![SlotStatus::Pending; 4];
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 4);

        strategy.iteration_init(&ctx).unwrap();
        assert!(!strategy.is_full_return());
        for position in 0..items.len() {
            strategy.submit(position, &mut items[position], &ctx).unwrap();
        }
        ctx.submitted = 4;

        // Play the consumer by hand: return only item 2.
        let mut raw = Vec::new();
        while let Some(item) = port.try_pop_raw() {
            raw.push(item);
        }
        assert_eq!(raw.len(), 4);
        let mut item = raw.swap_remove(2);
        item.process();
        item.tag.outcome = Some(crate::item::ProcessingOutcome::Processed);
        port.push_processed(item).unwrap();

        let complete = strategy
            .wait_for_return(&mut items, &mut mask, &mut old, &mut ctx)
            .unwrap();
        strategy.iteration_finalize(&ctx);

        assert!(!complete);
        assert_eq!(mask[2], SlotStatus::Processed);
        assert_eq!(ctx.outstanding, 3);
        assert!(strategy.estimated_timeout().is_some());
        assert!(!strategy.estimator().is_first_cycle());
        strategy.finalize();
        broker.finalize();
    }

    #[test]
    fn test_batch_larger_than_port_capacity_returns_fully() {
        let broker = broker();
        let consumer = ThreadConsumer::with_logger(
            ThreadConsumerConfig::default().with_threads(2),
            Arc::new(NoOpLogger),
        );
        broker.enrol_consumer(consumer).unwrap();

        let mut strategy = BrokerStrategy::new(
            Arc::clone(&broker),
            config().with_port_config(PortConfig::with_capacity(2)),
        );
        strategy.init().unwrap();

        let mut items: Vec<Counter> = (0..20).map(Counter::new).collect();
        stamp(&mut items, 0);
        let mut mask = vec![SlotStatus::Pending; 20];
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 20);

        strategy.iteration_init(&ctx).unwrap();
        assert!(strategy.is_full_return());
        for position in 0..items.len() {
            strategy.submit(position, &mut items[position], &ctx).unwrap();
        }
        ctx.submitted = 20;
        let complete = strategy
            .wait_for_return(&mut items, &mut mask, &mut old, &mut ctx)
            .unwrap();

        assert!(complete);
        assert!(mask.iter().all(|s| *s == SlotStatus::Processed));
        for (position, item) in items.iter().enumerate() {
            assert_eq!(item.id, position);
            assert_eq!(item.value, 1);
        }
        strategy.finalize();
        broker.finalize();
    }

    #[test]
    fn test_partial_return_minimum_ends_full_return_wait() {
        let broker = broker();
        // Full-return consumer that never runs; items are returned by hand.
        broker
            .enrol_consumer(StaticConsumer::new("manual", true))
            .unwrap();

        let mut strategy = BrokerStrategy::new(
            Arc::clone(&broker),
            config().with_min_partial_return_percentage(50),
        );
        strategy.init().unwrap();
        let port = Arc::clone(strategy.port().unwrap());

        let mut items: Vec<Counter> = (0..4).map(Counter::new).collect();
        stamp(&mut items, 0);
        let mut mask = vec![SlotStatus::Pending; 4];
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 4);

        strategy.iteration_init(&ctx).unwrap();
        assert!(strategy.is_full_return());
        for position in 0..items.len() {
            strategy.submit(position, &mut items[position], &ctx).unwrap();
        }
        ctx.submitted = 4;

        for _ in 0..2 {
            let mut item = port.try_pop_raw().unwrap();
            item.process();
            item.tag.outcome = Some(crate::item::ProcessingOutcome::Processed);
            port.push_processed(item).unwrap();
        }

        let complete = strategy
            .wait_for_return(&mut items, &mut mask, &mut old, &mut ctx)
            .unwrap();

        assert!(!complete);
        assert!(ctx.partial_return_accepted);
        assert_eq!(ctx.returned, 2);
        assert_eq!(ctx.outstanding, 2);
        assert_eq!(mask[..2], [SlotStatus::Processed, SlotStatus::Processed]);
        assert_eq!(mask[2..], [SlotStatus::Pending, SlotStatus::Pending]);
        strategy.finalize();
        broker.finalize();
    }

    #[test]
    fn test_submit_after_finalize_is_port_closed() {
        let broker = broker();
        let mut strategy = BrokerStrategy::new(Arc::clone(&broker), config());
        strategy.init().unwrap();
        strategy.finalize();

        let ctx = CycleContext::new(0, 1);
        let mut item = Counter::new(0);
        assert!(matches!(
            strategy.submit(0, &mut item, &ctx),
            Err(ExecutorError::PortClosed)
        ));
    }
}
