//! Capabilities consumed from the provisioning backend
//!
//! Each trait is a narrow contract: it takes a declarative request and
//! returns a live handle. Retry and backoff belong to the implementation;
//! nothing in this crate retries a failed call.

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::endpoint::{
    DnsZoneRef, DnsZoneRequest, EndpointHandle, EndpointRequest, RepositoryRef,
    RepositoryRequest, VersionRef,
};
use crate::fleet::{FleetHandle, FleetRequest, RosterRequest};
use crate::network::NetworkRequest;
use crate::role::{RoleRef, RoleRequest};
use crate::security::{Peer, SecurityGroupRef, SecurityGroupRequest};
use crate::storage::{FileSystemRef, FileSystemRequest};
use renderfarm_common::{NetworkContext, Result};

/// Network lookup and synthesis
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkCapability: Send + Sync {
    /// Availability zones of the deployment region, in provider order
    async fn availability_zones(&self, region: &str) -> Result<Vec<String>>;

    /// Look up an existing network; `None` when nothing matches
    async fn lookup_network(&self, network_id: &str) -> Result<Option<NetworkContext>>;

    /// Create a new network from a subnet plan
    async fn synthesize_network(&self, request: &NetworkRequest) -> Result<NetworkContext>;

    /// Create a security group in a network
    async fn create_security_group(
        &self,
        request: &SecurityGroupRequest,
    ) -> Result<SecurityGroupRef>;
}

/// Control-plane (job queue) provisioning
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneCapability: Send + Sync {
    /// Resolve a control-plane version string to installable artifacts
    async fn resolve_version(&self, version: &str) -> Result<VersionRef>;

    /// Create a private DNS zone associated with a network
    async fn create_dns_zone(&self, request: &DnsZoneRequest) -> Result<DnsZoneRef>;

    /// Create the repository the endpoint serves
    async fn create_repository(&self, request: &RepositoryRequest) -> Result<RepositoryRef>;

    /// Create the job-queue endpoint
    async fn create_endpoint(&self, request: &EndpointRequest) -> Result<EndpointHandle>;

    /// Allow `peer` to reach the endpoint on `port`
    async fn grant_ingress(&self, endpoint: &EndpointHandle, peer: &Peer, port: u16)
        -> Result<()>;

    /// Grant session-manager terminal access to the endpoint's hosts
    async fn enable_session_manager(&self, endpoint: &EndpointHandle) -> Result<()>;
}

/// Account-scoped role creation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleCapability: Send + Sync {
    /// Create a role
    async fn create_role(&self, request: &RoleRequest) -> Result<RoleRef>;
}

/// Elastic fleet provisioning
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FleetCapability: Send + Sync {
    /// Create one worker fleet
    async fn create_fleet(&self, request: &FleetRequest) -> Result<FleetHandle>;

    /// Hand the complete fleet roster to the control plane in one call
    async fn configure_roster(&self, request: &RosterRequest) -> Result<()>;
}

/// Shared file systems
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageCapability: Send + Sync {
    /// Create a file system
    async fn create_file_system(&self, request: &FileSystemRequest) -> Result<FileSystemRef>;
}

/// The full set of capabilities one orchestration run uses
#[derive(Clone)]
pub struct Capabilities {
    /// Network lookup and synthesis
    pub network: Arc<dyn NetworkCapability>,
    /// Control-plane provisioning
    pub control_plane: Arc<dyn ControlPlaneCapability>,
    /// Role creation
    pub roles: Arc<dyn RoleCapability>,
    /// Fleet provisioning
    pub fleets: Arc<dyn FleetCapability>,
    /// File systems
    pub storage: Arc<dyn StorageCapability>,
}

impl Capabilities {
    /// Use one backend for every capability
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: NetworkCapability
            + ControlPlaneCapability
            + RoleCapability
            + FleetCapability
            + StorageCapability
            + 'static,
    {
        Self {
            network: backend.clone(),
            control_plane: backend.clone(),
            roles: backend.clone(),
            fleets: backend.clone(),
            storage: backend,
        }
    }
}
