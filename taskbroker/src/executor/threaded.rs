//! Execution on a local worker pool.

use super::cycle::{file_returned_item, CycleContext};
use super::error::ExecutorError;
use super::strategy::ExecutionStrategy;
use crate::item::{run_item, SlotStatus, WorkItem};
use crate::pool::{PoolConfig, WorkerPool};
use parking_lot::Mutex;
use std::sync::Arc;

/// Schedules one pool job per item and waits for the pool to drain.
///
/// Jobs work on clones. An item that panics comes back marked failed, the
/// same as under the serial strategy, and its message is kept for
/// [`take_errors`](Self::take_errors).
pub struct ThreadPoolStrategy<W> {
    config: PoolConfig,
    pool: Option<WorkerPool>,
    results: Arc<Mutex<Vec<W>>>,
    panics: Arc<Mutex<Vec<String>>>,
    errors: Vec<String>,
}

impl<W: WorkItem> ThreadPoolStrategy<W> {
    /// Creates a strategy; the pool is built on first use.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pool: None,
            results: Arc::new(Mutex::new(Vec::new())),
            panics: Arc::new(Mutex::new(Vec::new())),
            errors: Vec::new(),
        }
    }

    /// Number of pool threads, once the pool exists.
    pub fn threads(&self) -> Option<usize> {
        self.pool.as_ref().map(WorkerPool::threads)
    }

    /// Removes and returns the messages of items that panicked.
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    fn pool(&mut self) -> Result<&WorkerPool, ExecutorError> {
        if self.pool.is_none() {
            let pool = WorkerPool::new(self.config.clone())?;
            tracing::debug!(threads = pool.threads(), "Worker pool started");
            self.pool = Some(pool);
        }
        self.pool
            .as_ref()
            .ok_or_else(|| ExecutorError::InvalidArgument("worker pool unavailable".into()))
    }
}

impl<W: WorkItem> ExecutionStrategy<W> for ThreadPoolStrategy<W> {
    fn name(&self) -> &'static str {
        "thread-pool"
    }

    fn init(&mut self) -> Result<(), ExecutorError> {
        self.pool().map(|_| ())
    }

    fn finalize(&mut self) {
        // Dropping the pool waits for outstanding jobs.
        self.pool = None;
        self.results.lock().clear();
        self.panics.lock().clear();
    }

    fn submit(
        &mut self,
        _position: usize,
        item: &mut W,
        _ctx: &CycleContext,
    ) -> Result<(), ExecutorError> {
        let mut job_item = item.clone();
        let results = Arc::clone(&self.results);
        let panics = Arc::clone(&self.panics);
        self.pool()?.schedule(move || {
            if let Err(message) = run_item(&mut job_item) {
                panics.lock().push(message);
            }
            results.lock().push(job_item);
        });
        Ok(())
    }

    fn wait_for_return(
        &mut self,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        ctx: &mut CycleContext,
    ) -> Result<bool, ExecutorError> {
        let panics = Arc::clone(&self.panics);
        let pool = self.pool()?;
        pool.wait_for_drain();
        let mut errors = std::mem::take(&mut *panics.lock());
        errors.extend(pool.take_errors());
        if !errors.is_empty() {
            tracing::warn!(
                iteration = ctx.iteration,
                count = errors.len(),
                "Items panicked in the worker pool"
            );
            self.errors.extend(errors);
        }

        let returned = std::mem::take(&mut *self.results.lock());
        for item in returned {
            file_returned_item(item, items, mask, old_items, ctx)?;
        }
        Ok(ctx.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::testing::Counter;

    fn submit_all(
        strategy: &mut ThreadPoolStrategy<Counter>,
        items: &mut [Counter],
        ctx: &CycleContext,
    ) {
        for (position, item) in items.iter_mut().enumerate() {
            item.tag.iteration = ctx.iteration;
            item.tag.position = position;
            strategy.submit(position, item, ctx).unwrap();
        }
    }

    #[test]
    fn test_pool_returns_every_item() {
        let mut strategy = ThreadPoolStrategy::new(PoolConfig::default().with_threads(3));
        strategy.init().unwrap();
        assert_eq!(strategy.threads(), Some(3));

        let mut items: Vec<Counter> = (0..20).map(Counter::new).collect();
        let mut mask = vec![SlotStatus::Pending; 20];
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 20);

        submit_all(&mut strategy, &mut items, &ctx);
        let complete = strategy
            .wait_for_return(&mut items, &mut mask, &mut old, &mut ctx)
            .unwrap();

        assert!(complete);
        assert!(mask.iter().all(|s| *s == SlotStatus::Processed));
        for (position, item) in items.iter().enumerate() {
            assert_eq!(item.id, position);
            assert_eq!(item.value, 1);
        }
    }

    #[test]
    fn test_panicking_item_returns_failed() {
        let mut strategy = ThreadPoolStrategy::new(PoolConfig::default().with_threads(2));
        let mut items: Vec<Counter> = (0..3).map(Counter::new).collect();
        items[2].panic = true;
        let mut mask = vec![SlotStatus::Pending; 3];
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 3);

        submit_all(&mut strategy, &mut items, &ctx);
        let complete = strategy
            .wait_for_return(&mut items, &mut mask, &mut old, &mut ctx)
            .unwrap();

        assert!(complete);
        assert_eq!(mask[2], SlotStatus::Failed);
        assert_eq!(items[2].tag.position, 2);
        assert_eq!(ctx.erroneous, 1);
        assert_eq!(mask[..2], [SlotStatus::Processed, SlotStatus::Processed]);

        let errors = strategy.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("counter 2 exploded"));
    }
}
