//! CLI error handling with user-friendly messages.
//!
//! Every command returns `Result<(), CliError>`; `main` prints the error
//! and exits with code 1.

use std::fmt;
use std::process;
use taskbroker::broker::BrokerError;
use taskbroker::config::ConfigFileError;
use taskbroker::consumer::ConsumerError;
use taskbroker::executor::ExecutorError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid command-line combination
    Config(String),
    /// Config file could not be read or written
    ConfigFile(ConfigFileError),
    /// Broker rejected a registration
    Broker(BrokerError),
    /// A consumer could not be started
    Consumer(ConsumerError),
    /// A cycle failed
    Executor(ExecutorError),
    /// Transport or I/O failure
    Io(std::io::Error),
    /// The blocking workload task panicked or was aborted
    Task(String),
    /// Report could not be serialized
    Json(serde_json::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::ConfigFile(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Fix the value in the config file, or delete the key to use the default.");
                eprintln!("Run 'taskbroker config path' to locate the file.");
            }
            CliError::Broker(BrokerError::TooManyPorts { .. }) => {
                eprintln!();
                eprintln!("Raise [broker] max_ports in the config file.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Broker(e) => write!(f, "Broker error: {}", e),
            CliError::Consumer(e) => write!(f, "Consumer error: {}", e),
            CliError::Executor(e) => write!(f, "Execution failed: {}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::Task(msg) => write!(f, "Workload task failed: {}", msg),
            CliError::Json(e) => write!(f, "Failed to serialize report: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Broker(e) => Some(e),
            CliError::Consumer(e) => Some(e),
            CliError::Executor(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<BrokerError> for CliError {
    fn from(e: BrokerError) -> Self {
        CliError::Broker(e)
    }
}

impl From<ConsumerError> for CliError {
    fn from(e: ConsumerError) -> Self {
        CliError::Consumer(e)
    }
}

impl From<ExecutorError> for CliError {
    fn from(e: ExecutorError) -> Self {
        CliError::Executor(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_includes_cause() {
        let err = CliError::from(BrokerError::DuplicateConsumer("local".to_string()));
        assert_eq!(
            err.to_string(),
            "Broker error: a consumer named 'local' is already enrolled"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_message_has_no_source() {
        let err = CliError::Config("--consumer requires --mode broker".to_string());
        assert!(err.to_string().starts_with("Configuration error:"));
        assert!(err.source().is_none());
    }
}
