//! Validate command

use clap::Args;
use tracing::info;

use renderfarm_common::FarmConfig;
use renderfarm_provision::FleetComposer;
use renderfarm_topology::TopologyPlan;

use super::{format_table, ConfigArgs};
use crate::Result;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let config = args.config.load()?;
    println!("{}", summarize(&config)?);
    Ok(())
}

/// Validate `config` and describe what it would provision
///
/// Makes no capability call.
pub fn summarize(config: &FarmConfig) -> Result<String> {
    config.validate()?;
    let fleets = FleetComposer::new(&config.region).validate(&config.fleets)?;
    let plan = TopologyPlan::from_config(config, None)?;
    info!(fleets = fleets.len(), "Configuration valid");

    let units: Vec<String> = plan.order().iter().map(ToString::to_string).collect();
    let mut out = format!(
        "Configuration valid: {} in {}\nUnits: {}\nTLS: {}\n",
        config.endpoint_fqdn(),
        config.region,
        units.join(" -> "),
        if config.tls.enabled { "enabled" } else { "disabled" },
    );

    if !fleets.is_empty() {
        let rows: Vec<Vec<String>> = fleets
            .iter()
            .map(|fleet| {
                vec![
                    fleet.definition.name.clone(),
                    fleet.definition.os_family.to_string(),
                    fleet.image_id.clone(),
                    fleet
                        .instance_classes
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(","),
                    fleet.definition.max_capacity.to_string(),
                ]
            })
            .collect();
        out.push('\n');
        out.push_str(&format_table(
            &["FLEET", "OS", "IMAGE", "CLASSES", "MAX"],
            &rows,
        ));
    }

    Ok(out)
}
