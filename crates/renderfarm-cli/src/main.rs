//! renderfarm CLI
//!
//! Validates render farm configurations and synthesizes their resources.

use clap::Parser;

use renderfarm_cli::{Cli, Result};
use renderfarm_common::telemetry::{init_logging, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    cli.run().await
}
