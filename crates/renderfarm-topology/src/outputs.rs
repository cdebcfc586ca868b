//! Typed outputs published between units
//!
//! Each unit reads its inputs through a getter that names the consuming
//! unit, so an absent value surfaces as `MissingDependency { unit, output }`
//! rather than a panic or a default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::unit::{OutputKey, UnitKind};
use renderfarm_common::{Error, NetworkContext, Result};
use renderfarm_provision::{EndpointHandle, FleetHandle, ProvisionedStorage};

/// Values published so far in one run
#[derive(Debug, Default)]
pub struct UnitOutputs {
    network: Option<NetworkContext>,
    endpoint: Option<EndpointHandle>,
    worker_security_groups: Option<Vec<String>>,
    storage: Option<ProvisionedStorage>,
    fleets: Option<Vec<FleetHandle>>,
}

impl UnitOutputs {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` has been published
    pub fn has(&self, key: OutputKey) -> bool {
        match key {
            OutputKey::NetworkId => self.network.is_some(),
            OutputKey::EndpointRef => self.endpoint.is_some(),
            OutputKey::WorkerSecurityGroupIds => self.worker_security_groups.is_some(),
            OutputKey::FileSystems => self.storage.is_some(),
            OutputKey::FleetRoster => self.fleets.is_some(),
        }
    }

    /// Fail with the first of `consumer`'s inputs that is absent
    pub fn require_inputs(&self, consumer: UnitKind) -> Result<()> {
        match consumer.inputs().iter().find(|key| !self.has(**key)) {
            Some(key) => Err(Error::missing_dependency(consumer.to_string(), key.to_string())),
            None => Ok(()),
        }
    }

    /// Resolved network
    pub fn network(&self, consumer: UnitKind) -> Result<&NetworkContext> {
        self.network
            .as_ref()
            .ok_or_else(|| missing(consumer, OutputKey::NetworkId))
    }

    /// Live endpoint
    pub fn endpoint(&self, consumer: UnitKind) -> Result<&EndpointHandle> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| missing(consumer, OutputKey::EndpointRef))
    }

    /// Worker security group ids
    pub fn worker_security_groups(&self, consumer: UnitKind) -> Result<&[String]> {
        self.worker_security_groups
            .as_deref()
            .ok_or_else(|| missing(consumer, OutputKey::WorkerSecurityGroupIds))
    }

    /// Publish the resolved network
    pub fn publish_network(&mut self, network: NetworkContext) {
        self.network = Some(network);
    }

    /// Publish the control plane's outputs together
    ///
    /// The network the endpoint was placed in is published again so that
    /// consumers of the control plane see the same network it ran in.
    pub fn publish_control_plane(
        &mut self,
        network: NetworkContext,
        endpoint: EndpointHandle,
        worker_security_groups: Vec<String>,
    ) {
        self.network = Some(network);
        self.endpoint = Some(endpoint);
        self.worker_security_groups = Some(worker_security_groups);
    }

    /// Publish created storage
    pub fn publish_storage(&mut self, storage: ProvisionedStorage) {
        self.storage = Some(storage);
    }

    /// Publish the fleet roster
    pub fn publish_fleets(&mut self, fleets: Vec<FleetHandle>) {
        self.fleets = Some(fleets);
    }

    /// Serializable snapshot
    pub fn snapshot(&self) -> PublishedOutputs {
        PublishedOutputs {
            network_id: self.network.as_ref().map(|n| n.network_id.clone()),
            endpoint_ref: self.endpoint.as_ref().map(EndpointHandle::endpoint_ref),
            worker_security_group_ids: self.worker_security_groups.clone().unwrap_or_default(),
            file_systems: self
                .storage
                .as_ref()
                .map(ProvisionedStorage::outputs)
                .unwrap_or_default(),
            fleets: self.fleets.clone().unwrap_or_default(),
        }
    }
}

fn missing(consumer: UnitKind, key: OutputKey) -> Error {
    Error::missing_dependency(consumer.to_string(), key.to_string())
}

/// String-serializable outputs of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedOutputs {
    /// Network id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// Endpoint reference, e.g. `https://renderqueue.deadline.internal:4433`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_ref: Option<String>,
    /// Worker security group ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_security_group_ids: Vec<String>,
    /// File system outputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_systems: BTreeMap<String, String>,
    /// Created fleets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fleets: Vec<FleetHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderfarm_common::NetworkOwnership;

    fn endpoint() -> EndpointHandle {
        EndpointHandle {
            endpoint_id: "rq-1".to_string(),
            address: "renderqueue.deadline.internal".to_string(),
            port: 4433,
            tls: true,
            security_group_id: "sg-rq".to_string(),
        }
    }

    fn network() -> NetworkContext {
        NetworkContext {
            network_id: "vpc-1".to_string(),
            cidr_block: "10.0.0.0/16".parse().expect("valid cidr"),
            subnets: Vec::new(),
            ownership: NetworkOwnership::External,
        }
    }

    #[test]
    fn absent_inputs_name_consumer_and_key() {
        let outputs = UnitOutputs::new();
        let err = outputs
            .endpoint(UnitKind::Fleet)
            .expect_err("endpoint should be missing");
        assert_eq!(
            err.to_string(),
            "unit fleet is missing dependency output endpoint-ref"
        );
    }

    #[test]
    fn require_inputs_reports_first_gap_in_declared_order() {
        let mut outputs = UnitOutputs::new();
        outputs.publish_network(network());
        assert!(outputs.require_inputs(UnitKind::ControlPlane).is_ok());

        match outputs.require_inputs(UnitKind::Fleet) {
            Err(Error::MissingDependency { unit, output }) => {
                assert_eq!(unit, "fleet");
                assert_eq!(output, "endpoint-ref");
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }

        outputs.publish_control_plane(network(), endpoint(), vec!["sg-workers".to_string()]);
        assert!(outputs.require_inputs(UnitKind::Fleet).is_ok());
    }

    #[test]
    fn control_plane_alone_satisfies_fleet_inputs() {
        let mut outputs = UnitOutputs::new();
        outputs.publish_control_plane(network(), endpoint(), vec!["sg-workers".to_string()]);
        assert!(outputs.require_inputs(UnitKind::Fleet).is_ok());
        assert_eq!(
            outputs.network(UnitKind::Fleet).map(|n| n.network_id.as_str()).ok(),
            Some("vpc-1")
        );
    }

    #[test]
    fn snapshot_serializes_endpoint_reference() {
        let mut outputs = UnitOutputs::new();
        outputs.publish_control_plane(network(), endpoint(), vec!["sg-workers".to_string()]);
        let snapshot = outputs.snapshot();
        assert_eq!(
            snapshot.endpoint_ref.as_deref(),
            Some("https://renderqueue.deadline.internal:4433")
        );
        let json = serde_json::to_value(&snapshot).expect("should serialize");
        assert_eq!(json["workerSecurityGroupIds"][0], "sg-workers");
        assert_eq!(json["networkId"], "vpc-1");
        assert!(json.get("fileSystems").is_none());
    }
}
