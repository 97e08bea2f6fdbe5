//! `ConfigFile` → commented INI text, as written to `config.ini`.

use super::settings::ConfigFile;

/// Renders a configuration with an explanatory comment above every key.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let max_resubmissions = config
        .executor
        .max_resubmissions
        .map(|n| n.to_string())
        .unwrap_or_else(|| "unlimited".to_string());

    format!(
        r#"[executor]
; Where work_on runs items: serial, threads or broker
strategy = {}
; Resubmission rounds for items that did not return, or 'unlimited'
max_resubmissions = {}
; Worker pool size of the threads strategy
threads = {}

[broker]
; Number of items processed in parallel across all consumers.
; The first wait budget is derived from it.
expected_workers = {}
; Multiplier on the estimated time for all items to return.
; 0 waits for every item, even with best-effort consumers.
wait_factor = {}
; Stop waiting once this percentage of items returned (0 = off)
min_partial_return_percentage = {}
; Capacities of the raw and processed queues of each executor port
raw_capacity = {}
processed_capacity = {}
; Maximum number of ports enrolled at once
max_ports = {}

[consumer]
; Worker threads per thread consumer
threads = {}
; Whether thread consumers promise to return every item
capable_of_full_return = {}
; Worker loop timeouts in milliseconds
retrieve_timeout_ms = {}
submit_timeout_ms = {}

[logging]
; Directory and name of the log file (truncated on every start)
directory = {}
file = {}
"#,
        config.executor.strategy,
        max_resubmissions,
        config.executor.threads,
        config.broker.expected_workers,
        config.broker.wait_factor,
        config.broker.min_partial_return_percentage,
        config.broker.raw_capacity,
        config.broker.processed_capacity,
        config.broker.max_ports,
        config.consumer.threads,
        config.consumer.capable_of_full_return,
        config.consumer.retrieve_timeout_ms,
        config.consumer.submit_timeout_ms,
        config.logging.directory.display(),
        config.logging.file,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::StrategyKind;
    use tempfile::TempDir;

    #[test]
    fn test_written_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.executor.strategy = StrategyKind::Serial;
        config.executor.max_resubmissions = None;
        config.broker.wait_factor = 1.5;
        config.consumer.capable_of_full_return = false;
        config.logging.directory = temp_dir.path().join("logs");
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_every_key_is_commented() {
        let text = to_config_string(&ConfigFile::default());
        for section in ["[executor]", "[broker]", "[consumer]", "[logging]"] {
            assert!(text.contains(section), "missing {}", section);
        }
        assert!(text.contains("max_resubmissions = 5"));
        assert!(text.contains("; Multiplier on the estimated time"));
    }
}
