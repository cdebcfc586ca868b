//! Synth command
//!
//! Runs the full orchestration against the in-memory backend and prints
//! the report together with every recorded manifest.

use std::sync::Arc;

use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::info;

use renderfarm_provision::{Capabilities, ResourceManifest, SynthBackend};
use renderfarm_topology::{OrchestrationReport, TopologyOrchestrator, UnitKind};

use super::ConfigArgs;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Args, Debug)]
pub struct SynthArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Only materialize these units (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub units: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

/// What `synth` prints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthOutput {
    pub report: OrchestrationReport,
    pub manifests: Vec<ResourceManifest>,
}

pub async fn run(args: SynthArgs) -> Result<()> {
    let output = synthesize(&args).await?;
    println!("{}", render(&output, args.format)?);
    Ok(())
}

/// Load the config and run it against a fresh synth backend
pub async fn synthesize(args: &SynthArgs) -> Result<SynthOutput> {
    let config = args.config.load()?;
    let selection = parse_units(&args.units)?;

    let mut backend = SynthBackend::new(&config.region);
    if let Some(account) = &config.account {
        backend = backend.with_account(account);
    }
    let backend = Arc::new(backend);

    let mut orchestrator =
        TopologyOrchestrator::new(config, Capabilities::from_backend(backend.clone()));
    if let Some(units) = selection {
        orchestrator = orchestrator.with_selection(units);
    }

    let report = orchestrator.run().await?;
    let manifests = backend.manifests();
    info!(manifests = manifests.len(), "Synthesis complete");

    Ok(SynthOutput { report, manifests })
}

fn parse_units(names: &[String]) -> Result<Option<Vec<UnitKind>>> {
    if names.is_empty() {
        return Ok(None);
    }
    names
        .iter()
        .map(|name| name.trim().parse::<UnitKind>().map_err(Error::invalid_argument))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

pub fn render(output: &SynthOutput, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(output)?,
        OutputFormat::Yaml => serde_yaml::to_string(output)?,
    })
}
