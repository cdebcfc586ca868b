//! Which units a configuration needs and how they depend on each other

use tracing::{debug, warn};

use crate::sequence::UnitSequence;
use crate::unit::{ProvisioningUnit, UnitKind};
use renderfarm_common::{Error, FarmConfig, NetworkSource, Result};

/// The unit graph for one configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyPlan {
    units: Vec<ProvisioningUnit>,
    sequence: UnitSequence,
}

impl TopologyPlan {
    /// Plan every unit `config` needs
    ///
    /// - network only when it is synthesized
    /// - control plane always
    /// - storage only when configured
    /// - fleet only when at least one fleet is declared
    ///
    /// With a `selection`, units outside it stay in the plan but are not
    /// materialized. Selecting a unit the config does not need is an error.
    pub fn from_config(config: &FarmConfig, selection: Option<&[UnitKind]>) -> Result<Self> {
        let source = config.network_source()?;

        let kinds: Vec<UnitKind> = UnitKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                UnitKind::Network => matches!(source, NetworkSource::Synthesize),
                UnitKind::ControlPlane => true,
                UnitKind::Storage => config.storage.is_some(),
                UnitKind::Fleet => !config.fleets.is_empty(),
            })
            .collect();

        if let Some(selection) = selection {
            if let Some(unknown) = selection.iter().find(|kind| !kinds.contains(kind)) {
                return Err(Error::validation_for_field(
                    "units",
                    "units",
                    format!("unit {unknown} is not part of this deployment"),
                ));
            }
        }

        let units: Vec<ProvisioningUnit> = kinds
            .iter()
            .map(|kind| ProvisioningUnit {
                kind: *kind,
                depends_on: producers_of(*kind, &kinds),
                selected: selection.map_or(true, |s| s.contains(kind)),
            })
            .collect();

        let sequence = UnitSequence::from_units(&units)?;

        if source.is_external() {
            debug!("Network supplied externally, network unit skipped");
        }
        for unit in units.iter().filter(|u| !u.selected) {
            warn!(unit = %unit.kind, "Unit not selected, it will stay planned");
        }

        Ok(Self { units, sequence })
    }

    /// Units in declaration order
    pub fn units(&self) -> &[ProvisioningUnit] {
        &self.units
    }

    /// Unit of `kind`, if planned
    pub fn unit(&self, kind: UnitKind) -> Option<&ProvisioningUnit> {
        self.units.iter().find(|u| u.kind == kind)
    }

    /// Computed sequence
    pub fn sequence(&self) -> &UnitSequence {
        &self.sequence
    }

    /// Units in materialization order
    pub fn order(&self) -> Vec<UnitKind> {
        self.sequence.order()
    }
}

// Planned units `kind` reads from. An externally supplied network is not
// planned, so units reading only from it have no provisioning dependency.
fn producers_of(kind: UnitKind, planned: &[UnitKind]) -> Vec<UnitKind> {
    kind.reads_from()
        .iter()
        .copied()
        .filter(|producer| planned.contains(producer))
        .collect()
}
