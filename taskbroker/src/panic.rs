//! Panic capture at worker boundaries.
//!
//! A work item that panics inside `process()` must not take its worker
//! thread down with it, nor abort the batch it belongs to. Worker loops and
//! pool closures catch the unwind, turn the payload into a
//! [`ProcessingFault`] and keep going. Faults are collected and handed to
//! whoever asks after the work has drained.

use std::any::Any;
use std::fmt;

/// A panic caught while processing a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingFault {
    /// Name of the thread or worker that caught the panic.
    pub worker: String,
    /// Iteration the item was submitted in.
    pub iteration: u64,
    /// Position of the item within its batch.
    pub position: usize,
    /// Panic message, if the payload carried one.
    pub message: String,
}

impl fmt::Display for ProcessingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: item {} of iteration {} panicked: {}",
            self.worker, self.position, self.iteration, self.message
        )
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Name of the current thread, or `"unnamed"`.
pub(crate) fn current_worker_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}
