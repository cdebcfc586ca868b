//! CLI commands

use std::path::PathBuf;

use clap::Args;
use tracing::debug;

use renderfarm_common::FarmConfig;

use crate::{Error, Result};

pub mod synth;
pub mod validate;

/// Where the farm configuration comes from
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Farm configuration file (.yaml, .yml or .json)
    #[arg(short, long, env = "RENDERFARM_CONFIG")]
    pub config: PathBuf,

    /// Deployment region; overrides the file and the environment
    #[arg(long)]
    pub region: Option<String>,

    /// Account id; overrides the file and the environment
    #[arg(long)]
    pub account: Option<String>,
}

impl ConfigArgs {
    /// Load the file, then apply environment and flag overrides
    pub fn load(&self) -> Result<FarmConfig> {
        if !self.config.exists() {
            return Err(Error::ConfigNotFound {
                path: self.config.clone(),
            });
        }

        let mut config = FarmConfig::load(&self.config)?;
        config.apply_env_overrides();

        if let Some(region) = &self.region {
            debug!(%region, "Region overridden from command line");
            config.region = region.clone();
        }
        if let Some(account) = &self.account {
            config.account = Some(account.clone());
        }
        Ok(config)
    }
}

/// Format rows as a column-aligned table with headers
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let format_row = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(headers.to_vec())];
    for row in rows {
        lines.push(format_row(
            row.iter().take(widths.len()).map(String::as_str).collect(),
        ));
    }
    lines.join("\n")
}
