//! Provisioning units and their declared contracts

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An independently deployable group of resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// Synthesized network
    Network,
    /// DNS zone, repository, endpoint, worker security group
    ControlPlane,
    /// Shared file systems
    Storage,
    /// Worker fleets and their roster
    Fleet,
}

impl UnitKind {
    /// Every kind in declaration order
    pub const ALL: [UnitKind; 4] = [
        UnitKind::Network,
        UnitKind::ControlPlane,
        UnitKind::Storage,
        UnitKind::Fleet,
    ];

    /// Outputs this unit must find before it may run
    pub fn inputs(&self) -> &'static [OutputKey] {
        match self {
            UnitKind::Network => &[],
            UnitKind::ControlPlane => &[OutputKey::NetworkId],
            UnitKind::Storage => &[OutputKey::NetworkId],
            UnitKind::Fleet => &[
                OutputKey::NetworkId,
                OutputKey::EndpointRef,
                OutputKey::WorkerSecurityGroupIds,
            ],
        }
    }

    /// Outputs this unit publishes once provisioned
    ///
    /// The control plane passes the network id through, so the fleet reads
    /// everything it needs from the control plane alone.
    pub fn outputs(&self) -> &'static [OutputKey] {
        match self {
            UnitKind::Network => &[OutputKey::NetworkId],
            UnitKind::ControlPlane => &[
                OutputKey::NetworkId,
                OutputKey::EndpointRef,
                OutputKey::WorkerSecurityGroupIds,
            ],
            UnitKind::Storage => &[OutputKey::FileSystems],
            UnitKind::Fleet => &[OutputKey::FleetRoster],
        }
    }

    /// Units whose outputs this unit consumes
    pub fn reads_from(&self) -> &'static [UnitKind] {
        match self {
            UnitKind::Network => &[],
            UnitKind::ControlPlane | UnitKind::Storage => &[UnitKind::Network],
            UnitKind::Fleet => &[UnitKind::ControlPlane],
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Network => write!(f, "network"),
            UnitKind::ControlPlane => write!(f, "control-plane"),
            UnitKind::Storage => write!(f, "storage"),
            UnitKind::Fleet => write!(f, "fleet"),
        }
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(UnitKind::Network),
            "control-plane" | "controlplane" => Ok(UnitKind::ControlPlane),
            "storage" => Ok(UnitKind::Storage),
            "fleet" | "fleets" => Ok(UnitKind::Fleet),
            other => Err(format!(
                "unknown unit '{other}' (expected network, control-plane, storage or fleet)"
            )),
        }
    }
}

/// Lifecycle of a unit within one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitState {
    /// Inputs not yet available
    Planned,
    /// Every producer it depends on is provisioned
    Ready,
    /// Resources materialized, outputs published
    Provisioned,
}

/// Keys of the values units publish to each other
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKey {
    /// The resolved network
    NetworkId,
    /// The live job-queue endpoint
    EndpointRef,
    /// Security groups attached to workers
    WorkerSecurityGroupIds,
    /// Shared file systems
    FileSystems,
    /// Created fleets
    FleetRoster,
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKey::NetworkId => write!(f, "network-id"),
            OutputKey::EndpointRef => write!(f, "endpoint-ref"),
            OutputKey::WorkerSecurityGroupIds => write!(f, "worker-security-group-ids"),
            OutputKey::FileSystems => write!(f, "file-systems"),
            OutputKey::FleetRoster => write!(f, "fleet-roster"),
        }
    }
}

/// A unit of one plan with its dependency edges resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningUnit {
    /// Unit kind
    pub kind: UnitKind,
    /// Units in the same plan producing this unit's inputs
    pub depends_on: Vec<UnitKind>,
    /// Whether this run materializes the unit
    pub selected: bool,
}
