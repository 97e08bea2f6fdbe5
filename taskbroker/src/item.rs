//! Work item contract and submission bookkeeping.
//!
//! A work item is any payload that can be processed somewhere else and
//! brought back. The executor stamps each item with a [`SubmissionTag`]
//! before it leaves, and reads the tag again when the item returns, so
//! that it can decide which slot of the batch the item belongs to.

use std::fmt;

/// Identifier of a buffer port, assigned by the broker on enrolment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Result of running an item's `process()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// `process()` reported success.
    Processed,
    /// `process()` reported failure or panicked.
    Failed,
}

/// Bookkeeping attached to every work item.
///
/// Set by the executor on submission, except for `outcome` which is set by
/// whoever ran the item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionTag {
    /// Iteration counter of the `work_on` call that submitted the item.
    pub iteration: u64,
    /// Index of the item within its batch.
    pub position: usize,
    /// Port the item must be returned to.
    pub port: Option<PortId>,
    /// How many times the item was resubmitted within its iteration.
    pub resubmission: u32,
    /// Outcome of the last processing attempt.
    pub outcome: Option<ProcessingOutcome>,
}

impl SubmissionTag {
    /// Returns true if the item has been run and reported success.
    pub fn is_processed(&self) -> bool {
        self.outcome == Some(ProcessingOutcome::Processed)
    }
}

/// Capability every payload must expose.
///
/// # Example
///
/// ```
/// use taskbroker::item::{SubmissionTag, WorkItem};
///
/// #[derive(Clone, Default)]
/// struct Square {
///     value: u64,
///     tag: SubmissionTag,
/// }
///
/// impl WorkItem for Square {
///     fn process(&mut self) -> bool {
///         self.value *= self.value;
///         true
///     }
///
///     fn tag(&self) -> &SubmissionTag {
///         &self.tag
///     }
///
///     fn tag_mut(&mut self) -> &mut SubmissionTag {
///         &mut self.tag
///     }
/// }
/// ```
pub trait WorkItem: Clone + Send + 'static {
    /// Performs the work. Returns false if the computation failed.
    fn process(&mut self) -> bool;

    /// Submission bookkeeping.
    fn tag(&self) -> &SubmissionTag;

    /// Mutable submission bookkeeping.
    fn tag_mut(&mut self) -> &mut SubmissionTag;
}

/// Status of one slot of a batch handed to `work_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Still needs processing. Submitted by the next `work_on` call.
    Pending,
    /// Returned and processed successfully.
    Processed,
    /// Returned, but processing failed.
    Failed,
    /// Never submitted.
    Skip,
}

impl SlotStatus {
    /// True for slots whose item came back, successfully or not.
    pub fn is_returned(self) -> bool {
        matches!(self, SlotStatus::Processed | SlotStatus::Failed)
    }
}

impl From<ProcessingOutcome> for SlotStatus {
    fn from(outcome: ProcessingOutcome) -> Self {
        match outcome {
            ProcessingOutcome::Processed => SlotStatus::Processed,
            ProcessingOutcome::Failed => SlotStatus::Failed,
        }
    }
}

/// Runs `process()` on an item and records the outcome in its tag.
///
/// Panics inside `process()` are caught and recorded as
/// [`ProcessingOutcome::Failed`]; the panic message is returned so the
/// caller can collect it.
pub(crate) fn run_item<W: WorkItem>(item: &mut W) -> Result<(), String> {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| item.process()));
    match result {
        Ok(true) => {
            item.tag_mut().outcome = Some(ProcessingOutcome::Processed);
            Ok(())
        }
        Ok(false) => {
            item.tag_mut().outcome = Some(ProcessingOutcome::Failed);
            Ok(())
        }
        Err(payload) => {
            item.tag_mut().outcome = Some(ProcessingOutcome::Failed);
            Err(crate::panic::panic_message(payload.as_ref()))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Counter;
    use super::*;

    #[test]
    fn test_run_item_success() {
        let mut item = Counter::new(1);
        assert!(run_item(&mut item).is_ok());
        assert_eq!(item.value, 1);
        assert!(item.tag().is_processed());
    }

    #[test]
    fn test_run_item_failure() {
        let mut item = Counter::new(1);
        item.fail = true;
        assert!(run_item(&mut item).is_ok());
        assert_eq!(item.tag().outcome, Some(ProcessingOutcome::Failed));
    }

    #[test]
    fn test_run_item_panic_is_caught() {
        let mut item = Counter::new(7);
        item.panic = true;
        let err = run_item(&mut item).unwrap_err();
        assert!(err.contains("counter 7 exploded"));
        assert_eq!(item.tag().outcome, Some(ProcessingOutcome::Failed));
    }

    #[test]
    fn test_slot_status_from_outcome() {
        assert_eq!(
            SlotStatus::from(ProcessingOutcome::Processed),
            SlotStatus::Processed
        );
        assert_eq!(SlotStatus::from(ProcessingOutcome::Failed), SlotStatus::Failed);
        assert!(SlotStatus::Failed.is_returned());
        assert!(!SlotStatus::Pending.is_returned());
        assert!(!SlotStatus::Skip.is_returned());
    }

    #[test]
    fn test_port_id_display() {
        assert_eq!(PortId(3).to_string(), "port-3");
    }
}
