//! Configuration CLI commands.
//!
//! `config path`, `config show` and `config init`.

use clap::Subcommand;
use std::path::PathBuf;
use taskbroker::config::{config_file_path, ensure_exists_at, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration (file values over defaults)
    Show {
        /// Read this file instead of ~/.taskbroker/config.ini
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Write a default configuration file unless one exists
    Init {
        /// Write here instead of ~/.taskbroker/config.ini
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(),
        ConfigCommands::Show { file } => run_show(file),
        ConfigCommands::Init { file } => run_init(file),
    }
}

fn run_path() -> Result<(), CliError> {
    let path = config_file_path();
    println!("{}", path.display());
    if !path.exists() {
        println!("(file does not exist, defaults are in effect)");
    }
    Ok(())
}

fn run_show(file: Option<PathBuf>) -> Result<(), CliError> {
    let path = file.unwrap_or_else(config_file_path);
    let config = ConfigFile::load_from(&path)?;
    println!("; {}", path.display());
    print!("{}", config.to_ini_string());
    Ok(())
}

fn run_init(file: Option<PathBuf>) -> Result<(), CliError> {
    let path = file.unwrap_or_else(config_file_path);
    if ensure_exists_at(&path)? {
        println!("Wrote default configuration to {}", path.display());
    } else {
        println!("Configuration already exists at {}", path.display());
    }
    Ok(())
}
