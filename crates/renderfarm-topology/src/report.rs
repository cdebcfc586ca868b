//! Result of one orchestration run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::outputs::PublishedOutputs;
use crate::unit::{UnitKind, UnitState};
use renderfarm_common::{Error, Result};

/// Final state of one planned unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    /// Unit kind
    pub unit: UnitKind,
    /// State when the run ended
    pub state: UnitState,
    /// Whether the run was asked to materialize it
    pub selected: bool,
}

/// Everything a run produced
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationReport {
    /// Planned units in materialization order
    pub units: Vec<UnitReport>,
    /// Values published between units
    pub outputs: PublishedOutputs,
    /// Durable outputs for operators (e.g. `VpcId`)
    pub stack_outputs: BTreeMap<String, String>,
    /// Account-scoped roles requested in this run
    pub roles: Vec<String>,
}

impl OrchestrationReport {
    /// State of `unit`, if it was planned
    pub fn state_of(&self, unit: UnitKind) -> Option<UnitState> {
        self.units.iter().find(|u| u.unit == unit).map(|u| u.state)
    }

    /// Units that reached `Provisioned`, in order
    pub fn provisioned(&self) -> Vec<UnitKind> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Provisioned)
            .map(|u| u.unit)
            .collect()
    }

    /// Pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization_for_kind("json", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioned_lists_only_finished_units() {
        let report = OrchestrationReport {
            units: vec![
                UnitReport {
                    unit: UnitKind::ControlPlane,
                    state: UnitState::Provisioned,
                    selected: true,
                },
                UnitReport {
                    unit: UnitKind::Fleet,
                    state: UnitState::Planned,
                    selected: false,
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.provisioned(), vec![UnitKind::ControlPlane]);
        assert_eq!(report.state_of(UnitKind::Fleet), Some(UnitState::Planned));
        assert_eq!(report.state_of(UnitKind::Network), None);

        let json = report.to_json_pretty().expect("should serialize");
        assert!(json.contains("\"control-plane\""));
        assert!(json.contains("\"stackOutputs\""));
    }
}
