//! taskbroker - broker-mediated task distribution
//!
//! Producers hand batches of work items to an [`executor::Executor`]; the
//! executor gets them processed serially, on a local pool, or through a
//! shared [`broker::Broker`] that routes them to any number of consumers
//! (local threads, remote peers) and routes the results back.
//!
//! ```text
//! Executor ──► BufferPort ──► Broker ──► Consumer ──► process()
//!    ▲             │            │            │
//!    └─ work_on ◄──┘ processed ◄┘ ◄─ put ────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::num::NonZeroUsize;
//! use taskbroker::broker::{Broker, BrokerConfig};
//! use taskbroker::consumer::{ThreadConsumer, ThreadConsumerConfig};
//! use taskbroker::executor::{BrokerExecutor, BrokerExecutorConfig, ExecutorConfig};
//! use taskbroker::item::{SlotStatus, SubmissionTag, WorkItem};
//!
//! #[derive(Clone, Default)]
//! struct Job {
//!     input: u64,
//!     output: u64,
//!     tag: SubmissionTag,
//! }
//!
//! impl WorkItem for Job {
//!     fn process(&mut self) -> bool {
//!         self.output = self.input * self.input;
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
//! let broker = Broker::new(BrokerConfig::default());
//! broker.init();
//! broker
//!     .enrol_consumer(ThreadConsumer::new(ThreadConsumerConfig::default()))
//!     .unwrap();
//!
//! let mut executor = BrokerExecutor::brokered(
//!     broker.clone(),
//!     ExecutorConfig::default(),
//!     BrokerExecutorConfig::new(NonZeroUsize::new(4).unwrap()),
//! );
//! let mut jobs: Vec<Job> = (0..100).map(|i| Job { input: i, ..Default::default() }).collect();
//! let mut mask = vec![SlotStatus::Pending; jobs.len()];
//! let mut old = Vec::new();
//! executor.work_on(&mut jobs, &mut mask, &mut old, true, "main").unwrap();
//!
//! drop(executor);
//! broker.finalize();
//! ```

pub mod bounded;
pub mod broker;
pub mod buffer_port;
pub mod config;
pub mod consumer;
pub mod executor;
pub mod item;
pub mod log;
pub mod logging;
pub mod panic;
pub mod pool;
pub mod telemetry;

/// Version of the library and CLI, taken from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
