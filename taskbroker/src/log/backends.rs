use super::logger::{LogLevel, Logger};
use parking_lot::Mutex;
use std::fmt::Arguments;
use std::sync::Arc;

/// Forwards to the `tracing` macros of the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        match level {
            LogLevel::Trace => tracing::trace!("{}", args),
            LogLevel::Debug => tracing::debug!("{}", args),
            LogLevel::Info => tracing::info!("{}", args),
            LogLevel::Warn => tracing::warn!("{}", args),
            LogLevel::Error => tracing::error!("{}", args),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    #[inline]
    fn log(&self, _level: LogLevel, _args: Arguments<'_>) {}
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lines logged so far, oldest first.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    /// Returns true if a line of `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }

    /// Number of lines at `level`.
    pub fn count(&self, level: LogLevel) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        self.lines.lock().push((level, args.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log_debug, log_error, log_info};

    #[test]
    fn test_memory_logger_records_levels() {
        let logger = MemoryLogger::new();
        log_info!(logger, "enrolled {}", "port-1");
        log_error!(logger, "lost {} items", 2);
        log_info!(logger, "done");

        assert_eq!(logger.count(LogLevel::Info), 2);
        assert!(logger.contains(LogLevel::Error, "lost 2 items"));
        assert!(!logger.contains(LogLevel::Info, "lost"));
        assert_eq!(logger.lines()[0], (LogLevel::Info, "enrolled port-1".to_string()));
    }

    #[test]
    fn test_loggers_as_trait_objects() {
        let loggers: Vec<Arc<dyn Logger>> = vec![
            Arc::new(TracingLogger),
            Arc::new(NoOpLogger),
            MemoryLogger::new(),
        ];
        for logger in &loggers {
            log_debug!(logger, "shared across {} loggers", loggers.len());
        }
    }
}
