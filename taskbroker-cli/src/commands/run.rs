//! `taskbroker run` - drives a synthetic workload through an executor.
//!
//! Each iteration hands a fresh batch to `work_on` and prints the cycle
//! report, as text or as one JSON object per line. Ctrl-C stops the run
//! after the current iteration.

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskbroker::broker::{Broker, BrokerConfig};
use taskbroker::config::{config_file_path, ConfigFile, StrategyKind};
use taskbroker::consumer::{
    LoopbackConfig, LoopbackTransport, RemoteConsumer, RemoteConsumerConfig, ThreadConsumer,
    ThreadConsumerConfig,
};
use taskbroker::executor::{
    BrokerExecutor, BrokerExecutorConfig, CycleReport, ExecutionStrategy, Executor,
    ExecutorConfig, SerialExecutor, ThreadPoolExecutor,
};
use taskbroker::logging::init_logging_from;
use taskbroker::pool::PoolConfig;
use taskbroker::telemetry::{TelemetrySink, TracingTelemetrySink};
use tokio_util::sync::CancellationToken;

use super::workload::{SyntheticItem, Workload};
use crate::error::CliError;

const CALLER: &str = "taskbroker-cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Process items in place on the calling thread
    Serial,
    /// Process items on a local worker pool
    Threads,
    /// Route items through a broker to consumers
    Broker,
}

impl From<Mode> for StrategyKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Serial => StrategyKind::Serial,
            Mode::Threads => StrategyKind::Threads,
            Mode::Broker => StrategyKind::Broker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConsumerKind {
    /// Local worker threads that return every item
    Thread,
    /// Simulated remote peers that may lose items
    Loopback,
}

/// Options of `taskbroker run`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Config file (default: ~/.taskbroker/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Execution strategy (default: [executor] strategy)
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Consumer enrolled with the broker
    #[arg(long, value_enum, default_value = "thread")]
    pub consumer: ConsumerKind,

    /// Items per batch
    #[arg(long, default_value = "64")]
    pub items: usize,

    /// Number of work_on calls
    #[arg(long, default_value = "5")]
    pub iterations: u64,

    /// Simulated processing time per item in milliseconds
    #[arg(long, default_value = "2")]
    pub work_ms: u64,

    /// Every n-th item reports failure (0 = none)
    #[arg(long, default_value = "0")]
    pub fail_every: usize,

    /// Loopback peers lose every n-th item (0 = none)
    #[arg(long, default_value = "0")]
    pub drop_every: usize,

    /// Number of loopback peers
    #[arg(long, default_value = "2")]
    pub peers: usize,

    /// Override [broker] wait_factor
    #[arg(long)]
    pub wait_factor: Option<f64>,

    /// Override [executor] max_resubmissions
    #[arg(long)]
    pub max_resubmissions: Option<u32>,

    /// Don't resubmit items that did not return
    #[arg(long)]
    pub no_resubmit: bool,

    /// Print one JSON report per iteration
    #[arg(long)]
    pub json: bool,
}

/// A validated run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub strategy: StrategyKind,
    pub consumer: ConsumerKind,
    pub workload: Workload,
    pub iterations: u64,
    pub drop_every: usize,
    pub peers: usize,
    pub resubmit: bool,
    pub json: bool,
}

impl RunPlan {
    /// Checks the arguments and applies their overrides to `config`.
    pub fn resolve(args: &RunArgs, config: &mut ConfigFile) -> Result<Self, CliError> {
        let strategy = args
            .mode
            .map(StrategyKind::from)
            .unwrap_or(config.executor.strategy);

        if strategy != StrategyKind::Broker && args.consumer == ConsumerKind::Loopback {
            return Err(CliError::Config(
                "--consumer loopback requires --mode broker".to_string(),
            ));
        }
        if args.drop_every > 0 && args.consumer != ConsumerKind::Loopback {
            return Err(CliError::Config(
                "--drop-every only applies to --consumer loopback".to_string(),
            ));
        }
        if let Some(factor) = args.wait_factor {
            if !factor.is_finite() || factor < 0.0 {
                return Err(CliError::Config(format!(
                    "--wait-factor must be zero or positive, got {}",
                    factor
                )));
            }
            config.broker.wait_factor = factor;
        }
        if let Some(max) = args.max_resubmissions {
            config.executor.max_resubmissions = Some(max);
        }

        Ok(Self {
            strategy,
            consumer: args.consumer,
            workload: Workload {
                items: args.items,
                work: Duration::from_millis(args.work_ms),
                fail_every: args.fail_every,
            },
            iterations: args.iterations,
            drop_every: args.drop_every,
            peers: args.peers.max(1),
            resubmit: !args.no_resubmit,
            json: args.json,
        })
    }
}

/// Runs `taskbroker run`.
pub async fn run(args: RunArgs) -> Result<(), CliError> {
    let path = args.config.clone().unwrap_or_else(config_file_path);
    let mut config = ConfigFile::load_from(&path)?;
    let plan = RunPlan::resolve(&args, &mut config)?;

    let guard = init_logging_from(&config.logging)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;
    tracing::info!(
        strategy = %plan.strategy,
        items = plan.workload.items,
        iterations = plan.iterations,
        log = %guard.path().display(),
        "Starting run"
    );

    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let worker_plan = plan.clone();
    let mut task =
        tokio::task::spawn_blocking(move || execute(&worker_plan, &config, &worker_cancel));

    let result = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, finishing the current iteration...");
            cancel.cancel();
            task.await
        }
    };
    let reports = result.map_err(|e| CliError::Task(e.to_string()))??;

    if !plan.json {
        print_summary(&reports);
    }
    Ok(())
}

/// Builds the executor for `plan` and runs every iteration.
pub fn execute(
    plan: &RunPlan,
    config: &ConfigFile,
    cancel: &CancellationToken,
) -> Result<Vec<CycleReport>, CliError> {
    let executor_config = ExecutorConfig::from(&config.executor);
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetrySink);

    match plan.strategy {
        StrategyKind::Serial => {
            let mut executor = SerialExecutor::serial(executor_config).with_telemetry(telemetry);
            drive(&mut executor, plan, cancel)
        }
        StrategyKind::Threads => {
            let mut executor = ThreadPoolExecutor::thread_pool(
                executor_config,
                PoolConfig::from(&config.executor),
            )
            .with_telemetry(telemetry);
            drive(&mut executor, plan, cancel)
        }
        StrategyKind::Broker => {
            let broker: Arc<Broker<SyntheticItem>> =
                Broker::new(BrokerConfig::from(&config.broker));
            broker.init();

            let result = enrol_consumer(&broker, plan, config).and_then(|()| {
                let mut executor = BrokerExecutor::brokered(
                    broker.clone(),
                    executor_config,
                    BrokerExecutorConfig::from(&config.broker),
                )
                .with_telemetry(telemetry);
                drive(&mut executor, plan, cancel)
            });

            broker.finalize();
            result
        }
    }
}

fn enrol_consumer(
    broker: &Arc<Broker<SyntheticItem>>,
    plan: &RunPlan,
    config: &ConfigFile,
) -> Result<(), CliError> {
    match plan.consumer {
        ConsumerKind::Thread => {
            broker.enrol_consumer(ThreadConsumer::new(ThreadConsumerConfig::from(
                &config.consumer,
            )))?;
        }
        ConsumerKind::Loopback => {
            let transport = LoopbackTransport::<SyntheticItem>::new(
                LoopbackConfig::default()
                    .with_peers(plan.peers)
                    .with_drop_every(plan.drop_every),
            )?;
            broker.enrol_consumer(RemoteConsumer::new(
                transport,
                RemoteConsumerConfig::default().with_expected_peers(plan.peers),
            ))?;
        }
    }
    Ok(())
}

fn drive<S: ExecutionStrategy<SyntheticItem>>(
    executor: &mut Executor<SyntheticItem, S>,
    plan: &RunPlan,
    cancel: &CancellationToken,
) -> Result<Vec<CycleReport>, CliError> {
    executor.init()?;
    let mut reports = Vec::with_capacity(plan.iterations as usize);
    let mut old_items = Vec::new();

    for iteration in 0..plan.iterations {
        if cancel.is_cancelled() {
            tracing::info!(iteration, "Run cancelled");
            break;
        }
        let (mut items, mut mask) = plan.workload.batch(iteration);
        old_items.clear();
        executor.work_on(&mut items, &mut mask, &mut old_items, plan.resubmit, CALLER)?;

        if let Some(report) = executor.last_report() {
            print_report(report, plan.json)?;
            reports.push(report.clone());
        }
    }

    executor.finalize();
    Ok(reports)
}

fn print_report(report: &CycleReport, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!(
            "iteration {:>3}: {:<20} {}/{} returned, {} failed, {} old, {} resubmissions, {:.1?}",
            report.iteration,
            report.state.to_string(),
            report.returned,
            report.expected,
            report.erroneous,
            report.old,
            report.resubmissions,
            report.duration
        );
    }
    Ok(())
}

fn print_summary(reports: &[CycleReport]) {
    let expected: usize = reports.iter().map(|r| r.expected).sum();
    let returned: usize = reports.iter().map(|r| r.returned).sum();
    let old: usize = reports.iter().map(|r| r.old).sum();
    let complete = reports.iter().filter(|r| r.is_complete()).count();
    let elapsed: Duration = reports.iter().map(|r| r.duration).sum();

    println!();
    println!("Run Summary");
    println!("===========");
    println!("Iterations:  {} ({} complete)", reports.len(), complete);
    println!("Returned:    {}/{}", returned, expected);
    println!("Old items:   {}", old);
    println!("Time:        {:.2?}", elapsed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use taskbroker::executor::CycleState;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn args(line: &[&str]) -> RunArgs {
        let mut argv = vec!["taskbroker"];
        argv.extend_from_slice(line);
        TestCli::parse_from(argv).run
    }

    fn plan(line: &[&str]) -> (RunPlan, ConfigFile) {
        let mut config = ConfigFile::default();
        let plan = RunPlan::resolve(&args(line), &mut config).unwrap();
        (plan, config)
    }

    #[test]
    fn test_defaults_follow_config() {
        let (plan, _) = plan(&[]);
        assert_eq!(plan.strategy, ConfigFile::default().executor.strategy);
        assert_eq!(plan.consumer, ConsumerKind::Thread);
        assert_eq!(plan.workload.items, 64);
        assert!(plan.resubmit);
    }

    #[test]
    fn test_overrides_applied_to_config() {
        let (plan, config) = plan(&[
            "--mode",
            "broker",
            "--wait-factor",
            "0",
            "--max-resubmissions",
            "1",
            "--no-resubmit",
        ]);
        assert_eq!(plan.strategy, StrategyKind::Broker);
        assert_eq!(config.broker.wait_factor, 0.0);
        assert_eq!(config.executor.max_resubmissions, Some(1));
        assert!(!plan.resubmit);
    }

    #[test]
    fn test_loopback_requires_broker_mode() {
        let mut config = ConfigFile::default();
        let err = RunPlan::resolve(
            &args(&["--mode", "serial", "--consumer", "loopback"]),
            &mut config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--mode broker"));
    }

    #[test]
    fn test_drop_every_requires_loopback() {
        let mut config = ConfigFile::default();
        assert!(RunPlan::resolve(&args(&["--drop-every", "3"]), &mut config).is_err());
    }

    #[test]
    fn test_serial_run() {
        let (plan, config) = plan(&["--mode", "serial", "--items", "8", "--iterations", "3", "--work-ms", "0"]);
        let reports = execute(&plan, &config, &CancellationToken::new()).unwrap();

        assert_eq!(reports.len(), 3);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.iteration, i as u64);
            assert_eq!(report.state, CycleState::Complete);
            assert_eq!(report.returned, 8);
            assert_eq!(report.caller, CALLER);
        }
    }

    #[test]
    fn test_thread_pool_run_counts_failures() {
        let (plan, config) = plan(&[
            "--mode",
            "threads",
            "--items",
            "10",
            "--iterations",
            "1",
            "--work-ms",
            "0",
            "--fail-every",
            "5",
        ]);
        let reports = execute(&plan, &config, &CancellationToken::new()).unwrap();
        assert_eq!(reports[0].returned, 10);
        assert_eq!(reports[0].erroneous, 2);
    }

    #[test]
    fn test_broker_run_with_thread_consumer() {
        let (plan, config) = plan(&[
            "--mode",
            "broker",
            "--items",
            "32",
            "--iterations",
            "2",
            "--work-ms",
            "1",
            "--wait-factor",
            "0",
        ]);
        let reports = execute(&plan, &config, &CancellationToken::new()).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.returned == 32));
    }

    #[test]
    fn test_cancelled_run_stops_before_first_iteration() {
        let (plan, config) = plan(&["--mode", "serial", "--work-ms", "0"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reports = execute(&plan, &config, &cancel).unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let (plan, config) = plan(&["--mode", "serial", "--items", "2", "--iterations", "1"]);
        let reports = execute(&plan, &config, &CancellationToken::new()).unwrap();
        let json: serde_json::Value = serde_json::to_value(&reports[0]).unwrap();
        assert_eq!(json["state"], "complete");
        assert_eq!(json["expected"], 2);
    }
}
