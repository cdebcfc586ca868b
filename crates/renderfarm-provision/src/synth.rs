//! In-memory backend that records manifests instead of creating resources
//!
//! Implements every capability with deterministic identifiers
//! (`vpc-00000001`, `sg-00000002`, ...) so a full orchestration can run
//! without a cloud account. Used by `renderfarm synth` and the
//! integration tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::capability::{
    ControlPlaneCapability, FleetCapability, NetworkCapability, RoleCapability, StorageCapability,
};
use crate::endpoint::{
    DnsZoneRef, DnsZoneRequest, EndpointHandle, EndpointRequest, RepositoryRef,
    RepositoryRequest, VersionRef,
};
use crate::fleet::{FleetHandle, FleetRequest, RosterRequest};
use crate::manifest::{resource_types, ResourceManifest};
use crate::network::NetworkRequest;
use crate::role::{RoleRef, RoleRequest};
use crate::security::{Peer, SecurityGroupRef, SecurityGroupRequest};
use crate::storage::{FileSystemRef, FileSystemRequest};
use renderfarm_common::{
    Error, NetworkContext, NetworkOwnership, Result, SubnetDescriptor,
};

/// Account used in role ARNs when none is configured
pub const DEFAULT_SYNTH_ACCOUNT: &str = "000000000000";

#[derive(Debug, Default)]
struct SynthState {
    counter: u32,
    manifests: Vec<ResourceManifest>,
    calls: Vec<String>,
    ingress_rules: u32,
}

/// Capability backend that only records what it was asked to create
#[derive(Debug)]
pub struct SynthBackend {
    region: String,
    account: String,
    zones: Vec<String>,
    existing: BTreeMap<String, NetworkContext>,
    fail_on: Option<String>,
    state: Mutex<SynthState>,
}

impl SynthBackend {
    /// Backend for `region` with three zones (`<region>a`, `b`, `c`)
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let zones = ["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{region}{suffix}"))
            .collect();
        Self {
            region,
            account: DEFAULT_SYNTH_ACCOUNT.to_string(),
            zones,
            existing: BTreeMap::new(),
            fail_on: None,
            state: Mutex::new(SynthState::default()),
        }
    }

    /// Report these zones for the region
    pub fn with_zones<I, S>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// Account used in role ARNs
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Make a network visible to lookups
    pub fn with_existing_network(mut self, network: NetworkContext) -> Self {
        self.existing.insert(network.network_id.clone(), network);
        self
    }

    /// Fail every call of `operation` with a non-retryable provider error
    pub fn failing_on(mut self, operation: impl Into<String>) -> Self {
        self.fail_on = Some(operation.into());
        self
    }

    /// Region this backend reports for
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Manifests recorded so far, in creation order
    pub fn manifests(&self) -> Vec<ResourceManifest> {
        self.state.lock().manifests.clone()
    }

    /// Manifests of one resource type
    pub fn manifests_of(&self, resource_type: &str) -> Vec<ResourceManifest> {
        self.state
            .lock()
            .manifests
            .iter()
            .filter(|m| m.resource_type == resource_type)
            .cloned()
            .collect()
    }

    /// Capability operations called so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    fn begin(&self, capability: &str, operation: &str) -> Result<()> {
        self.state.lock().calls.push(operation.to_string());
        if self.fail_on.as_deref() == Some(operation) {
            return Err(Error::provider_permanent(
                capability,
                format!("{operation} rejected by synth backend"),
            ));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.counter += 1;
        format!("{}-{:08}", prefix, state.counter)
    }

    fn record(&self, manifest: ResourceManifest) {
        debug!(
            resource_type = %manifest.resource_type,
            logical_id = %manifest.logical_id,
            physical_id = manifest.physical_id.as_deref().unwrap_or(""),
            "Recorded manifest"
        );
        self.state.lock().manifests.push(manifest);
    }
}

#[async_trait]
impl NetworkCapability for SynthBackend {
    async fn availability_zones(&self, region: &str) -> Result<Vec<String>> {
        self.begin("network", "availability_zones")?;
        if region != self.region {
            return Ok(Vec::new());
        }
        Ok(self.zones.clone())
    }

    async fn lookup_network(&self, network_id: &str) -> Result<Option<NetworkContext>> {
        self.begin("network", "lookup_network")?;
        Ok(self.existing.get(network_id).cloned())
    }

    async fn synthesize_network(&self, request: &NetworkRequest) -> Result<NetworkContext> {
        self.begin("network", "synthesize_network")?;
        let network_id = self.next_id("vpc");

        let subnets: Vec<SubnetDescriptor> = request
            .subnets
            .iter()
            .map(|planned| SubnetDescriptor {
                subnet_id: self.next_id("subnet"),
                purpose: planned.purpose,
                availability_zone: planned.availability_zone.clone(),
                cidr_block: Some(planned.cidr_block),
            })
            .collect();

        // manifests come back as [network, subnets.., nat gateways..]
        for (index, manifest) in request.to_manifests().into_iter().enumerate() {
            let physical_id = match manifest.resource_type.as_str() {
                resource_types::VPC => network_id.clone(),
                resource_types::SUBNET => index
                    .checked_sub(1)
                    .and_then(|i| subnets.get(i))
                    .map(|s| s.subnet_id.clone())
                    .unwrap_or_default(),
                _ => self.next_id("nat"),
            };
            self.record(manifest.with_physical_id(physical_id));
        }

        Ok(NetworkContext {
            network_id,
            cidr_block: request.cidr_block,
            subnets,
            ownership: NetworkOwnership::Owned,
        })
    }

    async fn create_security_group(
        &self,
        request: &SecurityGroupRequest,
    ) -> Result<SecurityGroupRef> {
        self.begin("network", "create_security_group")?;
        let security_group_id = self.next_id("sg");
        self.record(request.to_manifest().with_physical_id(&security_group_id));
        Ok(SecurityGroupRef { security_group_id })
    }
}

fn resolve_full_version(version: &str) -> Option<String> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.is_empty()
        || parts.len() > 4
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    let mut full: Vec<&str> = parts;
    full.resize(4, "0");
    Some(full.join("."))
}

#[async_trait]
impl ControlPlaneCapability for SynthBackend {
    async fn resolve_version(&self, version: &str) -> Result<VersionRef> {
        self.begin("control-plane", "resolve_version")?;
        let resolved = resolve_full_version(version).ok_or_else(|| {
            Error::validation_for_field(
                "config",
                "controlPlaneVersion",
                format!("'{version}' is not a dotted numeric version"),
            )
        })?;
        self.record(
            ResourceManifest::new(resource_types::VERSION_QUERY, "VersionQuery")
                .with_properties(serde_json::json!({ "version": version }))
                .with_physical_id(&resolved),
        );
        Ok(VersionRef {
            requested: version.to_string(),
            resolved,
        })
    }

    async fn create_dns_zone(&self, request: &DnsZoneRequest) -> Result<DnsZoneRef> {
        self.begin("control-plane", "create_dns_zone")?;
        let zone_id = self.next_id("Z");
        self.record(request.to_manifest().with_physical_id(&zone_id));
        Ok(DnsZoneRef {
            zone_id,
            zone_name: request.zone_name.clone(),
        })
    }

    async fn create_repository(&self, request: &RepositoryRequest) -> Result<RepositoryRef> {
        self.begin("control-plane", "create_repository")?;
        let repository_id = self.next_id("repo");
        self.record(request.to_manifest().with_physical_id(&repository_id));
        Ok(RepositoryRef { repository_id })
    }

    async fn create_endpoint(&self, request: &EndpointRequest) -> Result<EndpointHandle> {
        self.begin("control-plane", "create_endpoint")?;
        let endpoint_id = self.next_id("rq");
        let security_group_id = self.next_id("sg");
        self.record(request.to_manifest().with_physical_id(&endpoint_id));
        Ok(EndpointHandle {
            endpoint_id,
            address: request.fqdn.clone(),
            port: request.port,
            tls: request.tls.is_some(),
            security_group_id,
        })
    }

    async fn grant_ingress(&self, endpoint: &EndpointHandle, peer: &Peer, port: u16) -> Result<()> {
        self.begin("control-plane", "grant_ingress")?;
        let n = {
            let mut state = self.state.lock();
            state.ingress_rules += 1;
            state.ingress_rules
        };
        self.record(
            ResourceManifest::new(
                resource_types::SECURITY_GROUP_INGRESS,
                format!("RenderQueueIngress{n}"),
            )
            .with_properties(serde_json::json!({
                "groupId": &endpoint.security_group_id,
                "peer": peer,
                "ipProtocol": "tcp",
                "fromPort": port,
                "toPort": port,
            })),
        );
        Ok(())
    }

    async fn enable_session_manager(&self, endpoint: &EndpointHandle) -> Result<()> {
        self.begin("control-plane", "enable_session_manager")?;
        self.record(
            ResourceManifest::new(resource_types::SESSION_MANAGER_GRANT, "RenderQueueSessionManager")
                .with_properties(serde_json::json!({
                    "target": &endpoint.endpoint_id,
                    "actions": [
                        "ssmmessages:CreateControlChannel",
                        "ssmmessages:CreateDataChannel",
                        "ssmmessages:OpenControlChannel",
                        "ssmmessages:OpenDataChannel",
                        "ssm:UpdateInstanceInformation",
                    ],
                })),
        );
        Ok(())
    }
}

#[async_trait]
impl RoleCapability for SynthBackend {
    async fn create_role(&self, request: &RoleRequest) -> Result<RoleRef> {
        self.begin("role", "create_role")?;
        let arn = format!("arn:aws:iam::{}:role/{}", self.account, request.role_name);
        self.record(request.to_manifest().with_physical_id(&arn));
        Ok(RoleRef {
            role_name: request.role_name.clone(),
            arn,
        })
    }
}

#[async_trait]
impl FleetCapability for SynthBackend {
    async fn create_fleet(&self, request: &FleetRequest) -> Result<FleetHandle> {
        self.begin("fleet", "create_fleet")?;
        let fleet_id = self.next_id("sfr");
        self.record(request.to_manifest().with_physical_id(&fleet_id));
        Ok(FleetHandle {
            fleet_id,
            name: request.name.clone(),
        })
    }

    async fn configure_roster(&self, request: &RosterRequest) -> Result<()> {
        self.begin("fleet", "configure_roster")?;
        self.record(request.to_manifest());
        Ok(())
    }
}

#[async_trait]
impl StorageCapability for SynthBackend {
    async fn create_file_system(&self, request: &FileSystemRequest) -> Result<FileSystemRef> {
        self.begin("storage", "create_file_system")?;
        let file_system_id = self.next_id("fs");
        let dns_name = match request {
            FileSystemRequest::FsxOpenZfs { .. } => {
                Some(format!("{}.fsx.{}.amazonaws.com", file_system_id, self.region))
            }
            FileSystemRequest::Efs { .. } => None,
        };
        self.record(request.to_manifest().with_physical_id(&file_system_id));
        Ok(FileSystemRef {
            file_system_id,
            dns_name,
        })
    }
}
