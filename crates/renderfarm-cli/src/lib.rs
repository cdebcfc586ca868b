//! renderfarm CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use renderfarm_common::telemetry::LogFormat;

/// renderfarm - render farm control plane provisioning
#[derive(Parser, Debug)]
#[command(name = "renderfarm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (json or pretty)
    #[arg(long, global = true, default_value = "json", env = "RENDERFARM_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a farm configuration without provisioning anything
    Validate(commands::validate::ValidateArgs),
    /// Run every unit against the in-memory backend and print the result
    Synth(commands::synth::SynthArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Validate(args) => commands::validate::run(args),
            Commands::Synth(args) => commands::synth::run(args).await,
        }
    }
}
