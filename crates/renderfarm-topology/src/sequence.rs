//! Topological order of a plan's units
//!
//! Kahn's algorithm in groups: every unit in group N depends only on units
//! in groups 0..N-1. Units within a group keep plan declaration order.

use std::collections::HashSet;

use tracing::debug;

use crate::unit::{ProvisioningUnit, UnitKind};
use renderfarm_common::{Error, Result};

/// Units whose dependencies are all in earlier groups
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitGroup {
    /// Units of this group, in declaration order
    pub units: Vec<UnitKind>,
}

/// Ordered groups of one plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitSequence {
    groups: Vec<UnitGroup>,
}

impl UnitSequence {
    /// Compute the sequence for `units`
    ///
    /// Edges to units outside `units` are ignored. A cycle is an internal
    /// error naming the units that could not be placed.
    pub fn from_units(units: &[ProvisioningUnit]) -> Result<Self> {
        let known: HashSet<UnitKind> = units.iter().map(|u| u.kind).collect();
        let mut placed: HashSet<UnitKind> = HashSet::new();
        let mut groups = Vec::new();

        while placed.len() < known.len() {
            let group = UnitGroup {
                units: units
                    .iter()
                    .filter(|u| !placed.contains(&u.kind))
                    .filter(|u| {
                        u.depends_on
                            .iter()
                            .filter(|d| known.contains(d))
                            .all(|d| placed.contains(d))
                    })
                    .map(|u| u.kind)
                    .collect(),
            };

            if group.units.is_empty() {
                let stuck: Vec<String> = units
                    .iter()
                    .filter(|u| !placed.contains(&u.kind))
                    .map(|u| u.kind.to_string())
                    .collect();
                return Err(Error::internal_with_context(
                    "sequence",
                    format!("dependency cycle between units: {}", stuck.join(", ")),
                ));
            }

            debug!(group = groups.len(), units = ?group.units, "Computed unit group");
            placed.extend(group.units.iter().copied());
            groups.push(group);
        }

        Ok(Self { groups })
    }

    /// Groups in order
    pub fn groups(&self) -> &[UnitGroup] {
        &self.groups
    }

    /// Every unit, flattened in order
    pub fn order(&self) -> Vec<UnitKind> {
        self.groups
            .iter()
            .flat_map(|g| g.units.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(kind: UnitKind, depends_on: &[UnitKind]) -> ProvisioningUnit {
        ProvisioningUnit {
            kind,
            depends_on: depends_on.to_vec(),
            selected: true,
        }
    }

    #[test]
    fn linear_chain_orders_network_first() {
        let sequence = UnitSequence::from_units(&[
            unit(UnitKind::Network, &[]),
            unit(UnitKind::ControlPlane, &[UnitKind::Network]),
            unit(UnitKind::Fleet, &[UnitKind::ControlPlane]),
        ])
        .expect("sequence should compute");
        assert_eq!(
            sequence.order(),
            vec![UnitKind::Network, UnitKind::ControlPlane, UnitKind::Fleet]
        );
        assert_eq!(sequence.groups().len(), 3);
    }

    #[test]
    fn independent_units_share_a_group_in_declaration_order() {
        let sequence = UnitSequence::from_units(&[
            unit(UnitKind::Network, &[]),
            unit(UnitKind::ControlPlane, &[UnitKind::Network]),
            unit(UnitKind::Storage, &[UnitKind::Network]),
            unit(UnitKind::Fleet, &[UnitKind::ControlPlane]),
        ])
        .expect("sequence should compute");
        assert_eq!(
            sequence.groups()[1].units,
            vec![UnitKind::ControlPlane, UnitKind::Storage]
        );
    }

    #[test]
    fn edges_to_absent_units_are_ignored() {
        let sequence = UnitSequence::from_units(&[
            unit(UnitKind::ControlPlane, &[UnitKind::Network]),
            unit(UnitKind::Fleet, &[UnitKind::ControlPlane]),
        ])
        .expect("sequence should compute");
        assert_eq!(sequence.order(), vec![UnitKind::ControlPlane, UnitKind::Fleet]);
    }

    #[test]
    fn cycles_are_internal_errors() {
        let err = UnitSequence::from_units(&[
            unit(UnitKind::ControlPlane, &[UnitKind::Fleet]),
            unit(UnitKind::Fleet, &[UnitKind::ControlPlane]),
        ])
        .expect_err("cycle should fail");
        assert!(err.to_string().contains("[sequence]"));
        assert!(err.to_string().contains("control-plane, fleet"));
    }
}
