//! The processing loop shared by local consumers, and the thread group that
//! runs it.

use super::ConsumerError;
use crate::broker::{BrokerLink, Delivery};
use crate::item::{run_item, WorkItem};
use crate::log::Logger;
use crate::panic::{current_worker_name, ProcessingFault};
use crate::{log_debug, log_trace, log_warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default wait for a raw item before checking the stop flag again.
pub const DEFAULT_RETRIEVE_TIMEOUT: Duration = Duration::from_millis(200);

/// Default wait for space in the processed queue.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_millis(200);

/// Timeouts of a processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimeouts {
    /// How long to wait for a raw item
    pub retrieve: Duration,
    /// How long to wait for space when returning an item
    pub submit: Duration,
}

impl Default for LoopTimeouts {
    fn default() -> Self {
        Self {
            retrieve: DEFAULT_RETRIEVE_TIMEOUT,
            submit: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

/// Pull, process, push back, until stopped or the broker is gone.
pub(crate) fn process_loop<W: WorkItem>(
    link: BrokerLink<W>,
    stop: CancellationToken,
    timeouts: LoopTimeouts,
    faults: Arc<Mutex<Vec<ProcessingFault>>>,
    logger: Arc<dyn Logger>,
) {
    let worker = current_worker_name();
    log_debug!(logger, "{} started", worker);

    while !stop.is_cancelled() {
        let mut item = match link.get(timeouts.retrieve) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(_) => break,
        };

        if let Err(message) = run_item(&mut item) {
            let fault = ProcessingFault {
                worker: worker.clone(),
                iteration: item.tag().iteration,
                position: item.tag().position,
                message,
            };
            log_warn!(logger, "{}", fault);
            faults.lock().push(fault);
        }

        match link.put(item, timeouts.submit) {
            Ok(Delivery::Delivered) => {}
            Ok(other) => log_trace!(logger, "{}: item not delivered ({:?})", worker, other),
            Err(_) => break,
        }
    }

    log_debug!(logger, "{} stopped", worker);
}

/// Background threads sharing one stop token and one fault list.
pub(crate) struct WorkerGroup {
    owner: String,
    stop: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    faults: Arc<Mutex<Vec<ProcessingFault>>>,
}

impl WorkerGroup {
    pub(crate) fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            stop: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            faults: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Marks the group as started. Fails on a second start or after shutdown.
    pub(crate) fn begin(&self) -> Result<(), ConsumerError> {
        if self.stop.is_cancelled() {
            return Err(ConsumerError::Stopped(self.owner.clone()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConsumerError::AlreadyStarted(self.owner.clone()));
        }
        Ok(())
    }

    pub(crate) fn spawn<F>(&self, name: String, body: F) -> Result<(), ConsumerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(body)
            .map_err(ConsumerError::Spawn)?;
        self.handles.lock().push(handle);
        Ok(())
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub(crate) fn faults(&self) -> Arc<Mutex<Vec<ProcessingFault>>> {
        Arc::clone(&self.faults)
    }

    pub(crate) fn take_faults(&self) -> Vec<ProcessingFault> {
        std::mem::take(&mut *self.faults.lock())
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stop.is_cancelled()
    }

    /// Cancels the token and joins every thread except the calling one.
    pub(crate) fn shutdown(&self) {
        self.stop.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        // Threads notice on their next poll; joining here could self-join.
        self.stop.cancel();
    }
}
