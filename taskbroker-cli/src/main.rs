//! taskbroker CLI - Command-line interface
//!
//! Runs synthetic workloads through the taskbroker executors and manages
//! the configuration file.

mod commands;
mod error;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::run::RunArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "taskbroker")]
#[command(version = taskbroker::VERSION)]
#[command(about = "Broker-mediated task distribution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload and print a report per iteration
    Run(RunArgs),

    /// View or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
