//! User configuration file (`~/.taskbroker/config.ini`).
//!
//! Each section maps onto the builder configs of one component through a
//! `From<&Settings>` impl next to that config:
//!
//! | Section | Settings | Feeds |
//! |---------|----------|-------|
//! | `[executor]` | [`ExecutorSettings`] | `ExecutorConfig`, `PoolConfig` |
//! | `[broker]` | [`BrokerSettings`] | `BrokerConfig`, `BrokerExecutorConfig` |
//! | `[consumer]` | [`ConsumerSettings`] | `ThreadConsumerConfig` |
//! | `[logging]` | [`LoggingSettings`] | `logging::init_logging_from` |
//!
//! # Example
//!
//! ```
//! use taskbroker::config::ConfigFile;
//! use taskbroker::executor::{BrokerExecutorConfig, ExecutorConfig};
//!
//! let config = ConfigFile::default();
//! let executor = ExecutorConfig::from(&config.executor);
//! let broker = BrokerExecutorConfig::from(&config.broker);
//! assert_eq!(executor.max_resubmissions, Some(5));
//! assert_eq!(broker.initial_wait_factor, 0.25);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    default_expected_workers, DEFAULT_CONSUMER_THREADS, DEFAULT_EXPECTED_WORKERS,
    DEFAULT_STRATEGY,
};
pub use file::{
    config_directory, config_file_path, ensure_exists_at, ConfigFileError, CONFIG_DIR_NAME,
};
pub use settings::{
    BrokerSettings, ConfigFile, ConsumerSettings, ExecutorSettings, LoggingSettings,
    StrategyKind,
};
