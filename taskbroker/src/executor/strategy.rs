//! The seam between the submission cycle and the place items run.

use super::cycle::CycleContext;
use super::error::ExecutorError;
use crate::item::{SlotStatus, WorkItem};
use std::time::Duration;

/// How an [`Executor`](super::Executor) gets its items processed.
///
/// The executor drives the cycle: it stamps tags, calls [`submit`] for
/// every pending slot, then [`wait_for_return`] once per round. A strategy
/// only moves items and files what comes back, using
/// [`file_returned_item`](super::file_returned_item).
///
/// [`submit`]: ExecutionStrategy::submit
/// [`wait_for_return`]: ExecutionStrategy::wait_for_return
pub trait ExecutionStrategy<W: WorkItem>: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// One-time setup, run lazily before the first cycle.
    fn init(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Releases resources. Called when the executor is dropped.
    fn finalize(&mut self) {}

    /// Called at the start of every `work_on` call that has pending items.
    fn iteration_init(&mut self, _ctx: &CycleContext) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Hands the item at `position` over for processing.
    ///
    /// The item's tag is already stamped for the running iteration.
    fn submit(
        &mut self,
        position: usize,
        item: &mut W,
        ctx: &CycleContext,
    ) -> Result<(), ExecutorError>;

    /// Collects returned items of the running round.
    ///
    /// Returns true if every submitted item of the round came back.
    fn wait_for_return(
        &mut self,
        items: &mut [W],
        mask: &mut [SlotStatus],
        old_items: &mut Vec<W>,
        ctx: &mut CycleContext,
    ) -> Result<bool, ExecutorError>;

    /// Called at the end of every `work_on` call that had pending items.
    fn iteration_finalize(&mut self, _ctx: &CycleContext) {}

    /// Wait budget of the last round, for strategies that time out.
    fn estimated_timeout(&self) -> Option<Duration> {
        None
    }
}
