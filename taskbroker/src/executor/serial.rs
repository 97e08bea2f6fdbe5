//! In-place execution on the calling thread.

use super::cycle::CycleContext;
use super::error::ExecutorError;
use super::strategy::ExecutionStrategy;
use crate::item::{run_item, ProcessingOutcome, SlotStatus, WorkItem};

/// Runs every item directly inside `submit`.
///
/// Always returns everything, so a serial executor never resubmits.
/// Panics in `process()` are caught; the item is marked failed and the
/// message kept for [`take_errors`](Self::take_errors).
#[derive(Debug, Default)]
pub struct SerialStrategy {
    ran: Vec<usize>,
    errors: Vec<String>,
}

impl SerialStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the messages of items that panicked.
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}

impl<W: WorkItem> ExecutionStrategy<W> for SerialStrategy {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn iteration_init(&mut self, _ctx: &CycleContext) -> Result<(), ExecutorError> {
        self.ran.clear();
        Ok(())
    }

    fn submit(
        &mut self,
        position: usize,
        item: &mut W,
        ctx: &CycleContext,
    ) -> Result<(), ExecutorError> {
        if let Err(message) = run_item(item) {
            tracing::warn!(
                iteration = ctx.iteration,
                position = position,
                error = %message,
                "Item panicked during serial execution"
            );
            self.errors.push(message);
        }
        self.ran.push(position);
        Ok(())
    }

    fn wait_for_return(
        &mut self,
        items: &mut [W],
        mask: &mut [SlotStatus],
        _old_items: &mut Vec<W>,
        ctx: &mut CycleContext,
    ) -> Result<bool, ExecutorError> {
        for position in self.ran.drain(..) {
            let outcome = items[position]
                .tag()
                .outcome
                .unwrap_or(ProcessingOutcome::Failed);
            let status = SlotStatus::from(outcome);
            mask[position] = status;
            ctx.outstanding -= 1;
            ctx.returned += 1;
            if status == SlotStatus::Failed {
                ctx.erroneous += 1;
            }
        }
        Ok(ctx.is_complete())
    }
}
