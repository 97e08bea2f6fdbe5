//! Executor error types.

use crate::broker::BrokerError;
use crate::pool::PoolError;
use thiserror::Error;

/// Errors returned by `work_on` and strategy lifecycle hooks.
///
/// Items that don't return in time are not errors; they stay pending in
/// the mask. These variants are contract violations or setup failures.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The arguments of a `work_on` call are inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A returned item of the running iteration points outside the batch.
    #[error("returned item has position {position} but the batch holds {batch_size} items")]
    PositionOutOfRange { position: usize, batch_size: usize },

    /// A blocking retrieval came back empty while items were outstanding.
    #[error("retrieval returned no item while items were outstanding")]
    EmptyRetrieval,

    /// The executor's buffer port was closed under it.
    #[error("buffer port is closed")]
    PortClosed,

    /// Broker registration failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The worker pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),
}
