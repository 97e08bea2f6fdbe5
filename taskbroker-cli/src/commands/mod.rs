//! CLI subcommands.
//!
//! - `run`: drive a synthetic workload through an executor
//! - `config`: locate, print or create the configuration file

pub mod config;
pub mod run;
mod workload;
