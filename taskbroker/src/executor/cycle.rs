//! Per-call bookkeeping of a submission cycle.
//!
//! One `work_on` call is one iteration. Within it, pending items may be
//! submitted several times (resubmission rounds). Everything that comes
//! back is filed here: into its slot if it belongs to the running
//! iteration, into the old items if it belongs to an earlier one.

use super::error::ExecutorError;
use crate::item::{SlotStatus, WorkItem};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// State of an executor's submission cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// No `work_on` call in progress.
    Idle,
    /// Pending items are being handed to the strategy.
    Submitting,
    /// Waiting for items to come back.
    Waiting,
    /// Some items did not return and are submitted again.
    Resubmitting,
    /// Every pending item returned.
    Complete,
    /// Enough items returned to meet the partial-return minimum; the rest
    /// stay pending and are not resubmitted.
    PartialReturn,
    /// The call ended with items still pending.
    TimedOutIncomplete,
}

impl CycleState {
    /// Returns true for the states a call ends in.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CycleState::Complete | CycleState::PartialReturn | CycleState::TimedOutIncomplete
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Submitting => "submitting",
            CycleState::Waiting => "waiting",
            CycleState::Resubmitting => "resubmitting",
            CycleState::Complete => "complete",
            CycleState::PartialReturn => "partial return",
            CycleState::TimedOutIncomplete => "timed out incomplete",
        };
        f.write_str(name)
    }
}

/// Summary of one `work_on` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Tag passed by the caller
    pub caller: String,
    /// Iteration counter of the call
    pub iteration: u64,
    /// Terminal state
    pub state: CycleState,
    /// Items pending when the call started
    pub expected: usize,
    /// Items of this iteration that came back
    pub returned: usize,
    /// Items still pending when the call ended
    pub not_returned: usize,
    /// Items of earlier iterations received during the call
    pub old: usize,
    /// Returned items whose processing failed
    pub erroneous: usize,
    /// Resubmission rounds used
    pub resubmissions: u32,
    /// Wall time of the call
    pub duration: Duration,
}

impl CycleReport {
    /// Returns true if every pending item came back.
    pub fn is_complete(&self) -> bool {
        self.state == CycleState::Complete
    }

    /// Returns true if any returned item failed.
    pub fn has_errors(&self) -> bool {
        self.erroneous > 0
    }
}

/// Mutable state of the running iteration, shared with the strategy.
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// Iteration counter of the running call
    pub iteration: u64,
    /// Current resubmission round, 0 for the first submission
    pub resubmission: u32,
    /// Items pending when the call started
    pub expected: usize,
    /// Items submitted in the current round
    pub submitted: usize,
    /// Items still pending
    pub outstanding: usize,
    /// Items of this iteration returned so far
    pub returned: usize,
    /// Returned items whose processing failed
    pub erroneous: usize,
    /// Items of earlier iterations received so far
    pub old_received: usize,
    /// When the call started
    pub started: Instant,
    /// When the current round started submitting
    pub round_started: Instant,
    /// Set by the strategy when it stopped waiting because the
    /// partial-return minimum was met
    pub partial_return_accepted: bool,
}

impl CycleContext {
    pub(crate) fn new(iteration: u64, expected: usize) -> Self {
        let now = Instant::now();
        Self {
            iteration,
            resubmission: 0,
            expected,
            submitted: 0,
            outstanding: expected,
            returned: 0,
            erroneous: 0,
            old_received: 0,
            started: now,
            round_started: now,
            partial_return_accepted: false,
        }
    }

    /// Returns true once nothing is pending.
    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    /// Returns true once at least `percentage` percent of the expected
    /// items have returned. A percentage of 0 never matches.
    pub fn partial_return_reached(&self, percentage: u8) -> bool {
        let percentage = usize::from(percentage);
        percentage > 0 && self.returned * 100 >= percentage * self.expected
    }
}

/// Where a returned item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filed {
    /// Written into its slot of the running batch.
    Current,
    /// Its slot was already filled; discarded.
    Duplicate,
    /// Came back without having been processed; the slot stays pending.
    Unprocessed,
    /// Belongs to an earlier iteration; appended to the old items.
    Old,
    /// Belongs to an earlier iteration but failed; discarded.
    Discarded,
}

/// Files a returned item into the batch or the old items.
///
/// A position outside the batch means producer and consumers disagree on
/// what was submitted, which is fatal.
pub fn file_returned_item<W: WorkItem>(
    item: W,
    items: &mut [W],
    mask: &mut [SlotStatus],
    old_items: &mut Vec<W>,
    ctx: &mut CycleContext,
) -> Result<Filed, ExecutorError> {
    let tag = item.tag();

    if tag.iteration == ctx.iteration {
        let position = tag.position;
        if position >= items.len() {
            return Err(ExecutorError::PositionOutOfRange {
                position,
                batch_size: items.len(),
            });
        }
        if mask[position] != SlotStatus::Pending {
            return Ok(Filed::Duplicate);
        }
        let Some(outcome) = tag.outcome else {
            tracing::debug!(
                iteration = ctx.iteration,
                position = position,
                "Item returned unprocessed"
            );
            return Ok(Filed::Unprocessed);
        };

        let status = SlotStatus::from(outcome);
        mask[position] = status;
        items[position] = item;
        ctx.outstanding -= 1;
        ctx.returned += 1;
        if status == SlotStatus::Failed {
            ctx.erroneous += 1;
        }
        return Ok(Filed::Current);
    }

    if tag.iteration < ctx.iteration && tag.is_processed() {
        old_items.push(item);
        ctx.old_received += 1;
        return Ok(Filed::Old);
    }

    tracing::debug!(
        iteration = ctx.iteration,
        item_iteration = tag.iteration,
        position = tag.position,
        "Discarding returned item"
    );
    Ok(Filed::Discarded)
}

/// Sorts old items by position and removes repeats.
///
/// Items from different iterations at the same position are both kept,
/// the older one first.
pub(crate) fn tidy_old_items<W: WorkItem>(old_items: &mut Vec<W>) {
    old_items.sort_by_key(|item| (item.tag().position, item.tag().iteration));
    old_items.dedup_by_key(|item| (item.tag().position, item.tag().iteration));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::testing::Counter;
    use crate::item::ProcessingOutcome;

    fn returned(iteration: u64, position: usize, outcome: ProcessingOutcome) -> Counter {
        let mut item = Counter::new(position);
        item.tag.iteration = iteration;
        item.tag.position = position;
        item.tag.outcome = Some(outcome);
        item
    }

    fn batch(n: usize) -> (Vec<Counter>, Vec<SlotStatus>) {
        ((0..n).map(Counter::new).collect(), vec![SlotStatus::Pending; n])
    }

    #[test]
    fn test_current_item_fills_its_slot() {
        let (mut items, mut mask) = batch(3);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(4, 3);

        let mut item = returned(4, 1, ProcessingOutcome::Processed);
        item.value = 42;
        let filed = file_returned_item(item, &mut items, &mut mask, &mut old, &mut ctx).unwrap();

        assert_eq!(filed, Filed::Current);
        assert_eq!(items[1].value, 42);
        assert_eq!(mask[1], SlotStatus::Processed);
        assert_eq!(ctx.outstanding, 2);
        assert_eq!(ctx.returned, 1);
    }

    #[test]
    fn test_failed_item_counts_as_erroneous() {
        let (mut items, mut mask) = batch(2);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 2);

        let item = returned(0, 0, ProcessingOutcome::Failed);
        file_returned_item(item, &mut items, &mut mask, &mut old, &mut ctx).unwrap();
        assert_eq!(mask[0], SlotStatus::Failed);
        assert_eq!(ctx.erroneous, 1);
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let (mut items, mut mask) = batch(2);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 2);

        let first = returned(0, 0, ProcessingOutcome::Processed);
        let second = returned(0, 0, ProcessingOutcome::Processed);
        file_returned_item(first, &mut items, &mut mask, &mut old, &mut ctx).unwrap();
        let filed = file_returned_item(second, &mut items, &mut mask, &mut old, &mut ctx).unwrap();
        assert_eq!(filed, Filed::Duplicate);
        assert_eq!(ctx.returned, 1);
    }

    #[test]
    fn test_unprocessed_item_leaves_slot_pending() {
        let (mut items, mut mask) = batch(1);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 1);

        let mut item = Counter::new(0);
        item.tag.position = 0;
        let filed = file_returned_item(item, &mut items, &mut mask, &mut old, &mut ctx).unwrap();
        assert_eq!(filed, Filed::Unprocessed);
        assert_eq!(mask[0], SlotStatus::Pending);
        assert_eq!(ctx.outstanding, 1);
    }

    #[test]
    fn test_stale_item_goes_to_old_items() {
        let (mut items, mut mask) = batch(2);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(5, 2);

        let stale = returned(4, 1, ProcessingOutcome::Processed);
        let filed = file_returned_item(stale, &mut items, &mut mask, &mut old, &mut ctx).unwrap();
        assert_eq!(filed, Filed::Old);
        assert_eq!(old.len(), 1);
        assert_eq!(mask, vec![SlotStatus::Pending; 2]);
        assert_eq!(ctx.old_received, 1);
    }

    #[test]
    fn test_stale_failed_item_is_discarded() {
        let (mut items, mut mask) = batch(1);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(5, 1);

        let stale = returned(3, 0, ProcessingOutcome::Failed);
        let filed = file_returned_item(stale, &mut items, &mut mask, &mut old, &mut ctx).unwrap();
        assert_eq!(filed, Filed::Discarded);
        assert!(old.is_empty());
    }

    #[test]
    fn test_position_out_of_range_is_fatal() {
        let (mut items, mut mask) = batch(2);
        let mut old = Vec::new();
        let mut ctx = CycleContext::new(0, 2);

        let item = returned(0, 2, ProcessingOutcome::Processed);
        let err = file_returned_item(item, &mut items, &mut mask, &mut old, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::PositionOutOfRange {
                position: 2,
                batch_size: 2
            }
        ));
    }

    #[test]
    fn test_tidy_old_items() {
        let mut old = vec![
            returned(1, 3, ProcessingOutcome::Processed),
            returned(0, 2, ProcessingOutcome::Processed),
            returned(1, 0, ProcessingOutcome::Processed),
            returned(1, 3, ProcessingOutcome::Processed),
            returned(0, 3, ProcessingOutcome::Processed),
        ];
        tidy_old_items(&mut old);
        let keys: Vec<_> = old
            .iter()
            .map(|i| (i.tag.iteration, i.tag.position))
            .collect();
        assert_eq!(keys, vec![(1, 0), (0, 2), (0, 3), (1, 3)]);
    }

    #[test]
    fn test_cycle_state_display() {
        assert_eq!(CycleState::TimedOutIncomplete.to_string(), "timed out incomplete");
        assert_eq!(CycleState::PartialReturn.to_string(), "partial return");
        assert!(CycleState::Complete.is_terminal());
        assert!(CycleState::PartialReturn.is_terminal());
        assert!(!CycleState::Waiting.is_terminal());
    }

    #[test]
    fn test_partial_return_reached() {
        let mut ctx = CycleContext::new(0, 4);
        assert!(!ctx.partial_return_reached(50));

        ctx.returned = 1;
        assert!(!ctx.partial_return_reached(50));
        ctx.returned = 2;
        assert!(ctx.partial_return_reached(50));
        assert!(!ctx.partial_return_reached(51));
        assert!(!ctx.partial_return_reached(0));

        ctx.returned = 4;
        assert!(ctx.partial_return_reached(100));
    }
}
