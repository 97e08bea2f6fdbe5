//! Batch executor with pluggable execution strategies.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Executor<W, S>                            │
//! │  work_on(items, mask, old_items, resubmit, caller)          │
//! │  iteration counter, resubmission rounds, cycle reports      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 ExecutionStrategy<W>                         │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌───────────────┐  │
//! │  │ Serial       │  │ ThreadPool       │  │ Broker        │  │
//! │  │ in place     │  │ WorkerPool jobs  │  │ BufferPort +  │  │
//! │  │              │  │                  │  │ consumers     │  │
//! │  └──────────────┘  └──────────────────┘  └───────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Cycle
//!
//! ```text
//! Idle → Submitting → Waiting → (Resubmitting → Waiting)* → Complete
//!                                                        └→ TimedOutIncomplete
//! ```
//!
//! Every pending slot is tagged with the iteration counter and its position
//! and handed to the strategy. What comes back is filed by its tag: into
//! its slot, or into `old_items` if it belongs to an earlier iteration.
//! Slots that didn't come back stay `Pending`.
//!
//! # Example
//!
//! ```
//! use taskbroker::executor::{ExecutorConfig, SerialExecutor};
//! use taskbroker::item::{SlotStatus, SubmissionTag, WorkItem};
//!
//! #[derive(Clone, Default)]
//! struct Double {
//!     value: u64,
//!     tag: SubmissionTag,
//! }
//!
//! impl WorkItem for Double {
//!     fn process(&mut self) -> bool {
//!         self.value *= 2;
//!         true
//!     }
//!     fn tag(&self) -> &SubmissionTag {
//!         &self.tag
//!     }
//!     fn tag_mut(&mut self) -> &mut SubmissionTag {
//!         &mut self.tag
//!     }
//! }
//!
//! let mut executor = SerialExecutor::serial(ExecutorConfig::default());
//! let mut items = vec![Double { value: 21, ..Default::default() }];
//! let mut mask = vec![SlotStatus::Pending];
//! let mut old = Vec::new();
//!
//! let complete = executor
//!     .work_on(&mut items, &mut mask, &mut old, true, "example")
//!     .unwrap();
//! assert!(complete);
//! assert_eq!(items[0].value, 42);
//! ```

mod brokered;
mod config;
mod core;
mod cycle;
mod error;
mod serial;
mod strategy;
mod threaded;
mod timeout;

pub use brokered::BrokerStrategy;
pub use config::{
    BrokerExecutorConfig, ExecutorConfig, DEFAULT_MAX_RESUBMISSIONS,
    DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE, DEFAULT_WAIT_FACTOR,
};
pub use core::{BrokerExecutor, Executor, SerialExecutor, ThreadPoolExecutor};
pub use cycle::{file_returned_item, CycleContext, CycleReport, CycleState, Filed};
pub use error::ExecutorError;
pub use serial::SerialStrategy;
pub use strategy::ExecutionStrategy;
pub use threaded::ThreadPoolStrategy;
pub use timeout::TimeoutEstimator;
