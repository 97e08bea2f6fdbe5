//! Settings structs, one per `[section]` of `config.ini`.
//!
//! Pure data. Defaults live in [`super::defaults`], parsing in
//! [`super::parser`], serialization in [`super::writer`].

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub executor: ExecutorSettings,
    pub broker: BrokerSettings,
    pub consumer: ConsumerSettings,
    pub logging: LoggingSettings,
}

/// Where `work_on` runs items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Serial,
    Threads,
    Broker,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Serial => "serial",
            StrategyKind::Threads => "threads",
            StrategyKind::Broker => "broker",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(StrategyKind::Serial),
            "threads" | "thread-pool" => Ok(StrategyKind::Threads),
            "broker" => Ok(StrategyKind::Broker),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Default execution strategy
    pub strategy: StrategyKind,
    /// Resubmission rounds per `work_on` call; `None` is unlimited
    pub max_resubmissions: Option<u32>,
    /// Worker pool size for the thread-pool strategy
    pub threads: usize,
}

/// `[broker]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Number of items expected to be processed in parallel
    pub expected_workers: NonZeroUsize,
    /// Multiplier on the estimated full-return time; 0 disables timeouts
    pub wait_factor: f64,
    /// Stop waiting once this share of items returned
    pub min_partial_return_percentage: u8,
    /// Raw queue capacity of executor ports
    pub raw_capacity: usize,
    /// Processed queue capacity of executor ports
    pub processed_capacity: usize,
    /// Maximum number of enrolled ports
    pub max_ports: usize,
}

/// `[consumer]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Worker threads per thread consumer
    pub threads: usize,
    /// Whether thread consumers promise full return
    pub capable_of_full_return: bool,
    /// Worker loop retrieval timeout in milliseconds
    pub retrieve_timeout_ms: u64,
    /// Worker loop submission timeout in milliseconds
    pub submit_timeout_ms: u64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory holding the log file
    pub directory: PathBuf,
    /// Log file name
    pub file: String,
}
