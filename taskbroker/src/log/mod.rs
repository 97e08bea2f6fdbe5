//! Logger handle passed to brokers and consumers.
//!
//! Long-lived components (the broker, consumer loops) take an
//! `Arc<dyn Logger>` instead of calling `tracing` directly, so that tests
//! can silence them or capture what they say.
//!
//! - [`TracingLogger`]: forwards to `tracing`, the default everywhere
//! - [`NoOpLogger`]: discards everything
//! - [`MemoryLogger`]: keeps every line for later inspection
//!
//! ```
//! use taskbroker::log::{LogLevel, Logger, MemoryLogger};
//! use taskbroker::log_warn;
//!
//! let logger = MemoryLogger::new();
//! log_warn!(logger, "port {} is gone", 3);
//! assert!(logger.contains(LogLevel::Warn, "port 3"));
//! ```

mod backends;
mod logger;

pub use backends::{MemoryLogger, NoOpLogger, TracingLogger};
pub use logger::{LogLevel, Logger};
