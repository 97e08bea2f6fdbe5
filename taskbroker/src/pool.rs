//! Worker pool with drain-wait and deferred error collection.
//!
//! Thin layer over a dedicated `rayon` pool. Closures are scheduled
//! fire-and-forget; [`WorkerPool::wait_for_drain`] blocks until every
//! scheduled closure has finished. A panicking closure never takes the pool
//! down: its message is collected and handed out by
//! [`WorkerPool::take_errors`] once the caller is ready to look.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use thiserror::Error;

use crate::panic::panic_message;

/// Default number of pool threads: the number of CPU cores.
pub fn default_pool_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Errors from pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The underlying thread pool could not be built.
    #[error("failed to build worker pool: {0}")]
    Build(String),
}

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub threads: usize,
    /// Prefix of the worker thread names
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: default_pool_threads(),
            thread_name: "pool".to_string(),
        }
    }
}

impl PoolConfig {
    /// Set the number of worker threads (at least one).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl From<&crate::config::ExecutorSettings> for PoolConfig {
    fn from(settings: &crate::config::ExecutorSettings) -> Self {
        Self::default().with_threads(settings.threads)
    }
}

#[derive(Default)]
struct Shared {
    pending: Mutex<usize>,
    drained: Condvar,
    errors: Mutex<Vec<String>>,
}

impl Shared {
    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
    threads: usize,
}

impl WorkerPool {
    /// Builds a pool from the given configuration.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let threads = config.threads.max(1);
        let prefix = config.thread_name;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;

        Ok(Self {
            pool,
            shared: Arc::new(Shared::default()),
            threads,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `job` on one of the pool threads.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.shared.pending.lock() += 1;
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                tracing::warn!(error = %message, "Pool job panicked");
                shared.errors.lock().push(message);
            }
            shared.finish_one();
        });
    }

    /// Blocks until every scheduled job has finished.
    pub fn wait_for_drain(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    /// Number of jobs scheduled but not yet finished.
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Returns true if any job panicked since the last [`take_errors`](Self::take_errors).
    pub fn has_errors(&self) -> bool {
        !self.shared.errors.lock().is_empty()
    }

    /// Removes and returns the messages of jobs that panicked.
    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.shared.errors.lock())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.wait_for_drain();
    }
}
