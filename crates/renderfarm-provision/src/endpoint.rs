//! Job-queue endpoint and its backing resources

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::ControlPlaneCapability;
use crate::manifest::{resource_types, ResourceManifest};
use crate::security::Peer;
use renderfarm_common::{Error, NetworkContext, Result, TransportProtocol};
use renderfarm_pki::TlsBundle;

/// Default endpoint port with external TLS
pub const TLS_PORT: u16 = 4433;

/// Default endpoint port without external TLS
pub const PLAINTEXT_PORT: u16 = 8080;

/// Repository installation timeout in seconds (20 minutes)
pub const REPOSITORY_INSTALL_TIMEOUT_SECS: u64 = 20 * 60;

/// External TLS mode of an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Terminate TLS with a certificate bundle
    Enabled,
    /// Serve without external TLS
    Disabled,
}

/// What endpoint to build
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Hostname within `zone_name`
    pub hostname: String,
    /// DNS zone
    pub zone_name: String,
    /// Network the endpoint must be placed in
    pub network_id: String,
    /// External TLS mode
    pub tls_mode: TlsMode,
    /// Protocol between the load balancer and the endpoint's hosts
    pub internal_protocol: TransportProtocol,
}

impl EndpointSpec {
    /// Fully qualified hostname (`hostname.zone`)
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.hostname, self.zone_name)
    }

    /// Port clients connect to
    pub fn default_port(&self) -> u16 {
        match self.tls_mode {
            TlsMode::Enabled => TLS_PORT,
            TlsMode::Disabled => PLAINTEXT_PORT,
        }
    }

    /// Check this endpoint against the network and the bundle it is given
    ///
    /// Runs before any capability call.
    pub fn validate(&self, network: &NetworkContext, bundle: Option<&TlsBundle>) -> Result<()> {
        if self.network_id != network.network_id {
            return Err(Error::validation_for(
                self.fqdn(),
                format!(
                    "endpoint targets network {} but the resolved network is {}",
                    self.network_id, network.network_id
                ),
            ));
        }

        if self.tls_mode == TlsMode::Enabled {
            let fqdn = self.fqdn();
            let bundle = bundle.ok_or_else(|| {
                Error::invalid_tls(&fqdn, "TLS is enabled but no certificate bundle was supplied")
            })?;
            if bundle.hostname() != fqdn {
                return Err(Error::invalid_tls(
                    &fqdn,
                    format!(
                        "certificate was issued for {}, not {}",
                        bundle.hostname(),
                        fqdn
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// Request to create a private DNS zone
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneRequest {
    /// Zone name
    pub zone_name: String,
    /// Network the zone is associated with
    pub network_id: String,
}

impl DnsZoneRequest {
    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        ResourceManifest::new(resource_types::HOSTED_ZONE, "DnsZone").with_properties(
            serde_json::json!({
                "zoneName": &self.zone_name,
                "vpcId": &self.network_id,
            }),
        )
    }
}

/// A created DNS zone
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneRef {
    /// Provider zone id
    pub zone_id: String,
    /// Zone name
    pub zone_name: String,
}

/// A resolved control-plane version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRef {
    /// Version string as configured
    pub requested: String,
    /// Fully qualified version the installers resolve to
    pub resolved: String,
}

/// What happens to a resource when the deployment is removed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Delete with the deployment
    Destroy,
    /// Keep after the deployment is removed
    Retain,
}

/// Request to create the control-plane repository
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRequest {
    /// Network the repository lives in
    pub network_id: String,
    /// Subnets for the repository's database and file system
    pub subnet_ids: Vec<String>,
    /// Version to install
    pub version: VersionRef,
    /// Installer timeout
    pub installation_timeout_secs: u64,
    /// Removal policy of the database
    pub database_removal_policy: RemovalPolicy,
    /// Removal policy of the file system
    pub filesystem_removal_policy: RemovalPolicy,
}

impl RepositoryRequest {
    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        ResourceManifest::new(resource_types::REPOSITORY, "Repository").with_properties(
            serde_json::json!({
                "vpcId": &self.network_id,
                "subnetIds": &self.subnet_ids,
                "version": &self.version.resolved,
                "repositoryInstallationTimeoutSecs": self.installation_timeout_secs,
                "removalPolicy": {
                    "database": self.database_removal_policy,
                    "filesystem": self.filesystem_removal_policy,
                },
            }),
        )
    }
}

/// A created repository
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    /// Provider repository id
    pub repository_id: String,
}

/// Backing resources the endpoint is built on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPlaneBacking {
    /// Resolved software version
    pub version: VersionRef,
    /// Private DNS zone
    pub zone: DnsZoneRef,
    /// Repository
    pub repository: RepositoryRef,
}

impl ControlPlaneBacking {
    /// Create the DNS zone, resolve the version, and create the repository
    pub async fn provision(
        capability: &dyn ControlPlaneCapability,
        network: &NetworkContext,
        zone_name: &str,
        version: &str,
    ) -> Result<Self> {
        let zone = capability
            .create_dns_zone(&DnsZoneRequest {
                zone_name: zone_name.to_string(),
                network_id: network.network_id.clone(),
            })
            .await?;

        let version = capability.resolve_version(version).await?;
        debug!(requested = %version.requested, resolved = %version.resolved, "Resolved control-plane version");

        let repository = capability
            .create_repository(&RepositoryRequest {
                network_id: network.network_id.clone(),
                subnet_ids: placement_subnet_ids(network),
                version: version.clone(),
                installation_timeout_secs: REPOSITORY_INSTALL_TIMEOUT_SECS,
                database_removal_policy: RemovalPolicy::Destroy,
                filesystem_removal_policy: RemovalPolicy::Destroy,
            })
            .await?;

        info!(
            zone = %zone.zone_name,
            repository = %repository.repository_id,
            "Provisioned control-plane backing resources"
        );

        Ok(Self {
            version,
            zone,
            repository,
        })
    }
}

pub(crate) fn placement_subnet_ids(network: &NetworkContext) -> Vec<String> {
    network
        .placement_subnets()
        .iter()
        .map(|s| s.subnet_id.clone())
        .collect()
}

/// Request to create the job-queue endpoint
#[derive(Clone, Debug)]
pub struct EndpointRequest {
    /// Hostname within the zone
    pub hostname: String,
    /// Fully qualified hostname
    pub fqdn: String,
    /// DNS zone
    pub zone: DnsZoneRef,
    /// Network
    pub network_id: String,
    /// Placement subnets
    pub subnet_ids: Vec<String>,
    /// Repository served
    pub repository: RepositoryRef,
    /// Software version
    pub version: VersionRef,
    /// Certificate bundle when external TLS is enabled
    pub tls: Option<TlsBundle>,
    /// Internal transport protocol
    pub internal_protocol: TransportProtocol,
    /// Port clients connect to
    pub port: u16,
    /// Deletion protection on the load balancer
    pub deletion_protection: bool,
}

impl EndpointRequest {
    /// Declarative form; key material is never included
    pub fn to_manifest(&self) -> ResourceManifest {
        let external_tls = self.tls.as_ref().map(|bundle| {
            serde_json::json!({
                "hostname": bundle.hostname(),
                "certificate": bundle.cert_pem(),
                "certificateChain": bundle.chain_pem(),
                "passphraseProtected": bundle.passphrase().is_some(),
            })
        });

        ResourceManifest::new(resource_types::RENDER_QUEUE, "RenderQueue").with_properties(
            serde_json::json!({
                "hostname": {
                    "hostname": &self.hostname,
                    "zone": &self.zone.zone_name,
                },
                "vpcId": &self.network_id,
                "subnetIds": &self.subnet_ids,
                "repository": &self.repository.repository_id,
                "version": &self.version.resolved,
                "trafficEncryption": {
                    "externalTLS": {
                        "enabled": external_tls.is_some(),
                        "certificate": external_tls,
                    },
                    "internalProtocol": self.internal_protocol.to_string(),
                },
                "port": self.port,
                "deletionProtection": self.deletion_protection,
            }),
        )
    }
}

/// A created endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHandle {
    /// Provider endpoint id
    pub endpoint_id: String,
    /// Fully qualified hostname
    pub address: String,
    /// Port clients connect to
    pub port: u16,
    /// Whether clients connect over TLS
    pub tls: bool,
    /// Security group guarding the endpoint
    pub security_group_id: String,
}

impl EndpointHandle {
    /// String form of the endpoint reference, e.g. `https://host.zone:4433`
    pub fn endpoint_ref(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.address, self.port)
    }
}

/// A live endpoint
pub struct Endpoint {
    handle: EndpointHandle,
    capability: Arc<dyn ControlPlaneCapability>,
    granted: Mutex<Vec<Peer>>,
}

impl Endpoint {
    /// Live handle
    pub fn handle(&self) -> &EndpointHandle {
        &self.handle
    }

    /// Ingress management for later units
    pub fn connections(&self) -> Connections<'_> {
        Connections { endpoint: self }
    }

    /// Peers granted access so far, in grant order
    pub fn granted_peers(&self) -> Vec<Peer> {
        self.granted.lock().clone()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("handle", &self.handle)
            .field("granted", &*self.granted.lock())
            .finish_non_exhaustive()
    }
}

/// Ingress grants on an endpoint
pub struct Connections<'a> {
    endpoint: &'a Endpoint,
}

impl Connections<'_> {
    /// Allow `peer` to reach the endpoint's default port
    ///
    /// Granting the same peer twice makes one call.
    pub async fn allow_default_port_from(&self, peer: &Peer) -> Result<()> {
        let already_granted = self.endpoint.granted.lock().contains(peer);
        if already_granted {
            return Ok(());
        }
        let handle = &self.endpoint.handle;
        self.endpoint
            .capability
            .grant_ingress(handle, peer, handle.port)
            .await?;
        debug!(endpoint = %handle.endpoint_id, %peer, port = handle.port, "Granted endpoint ingress");
        self.endpoint.granted.lock().push(peer.clone());
        Ok(())
    }
}

/// Builds the job-queue endpoint
#[derive(Clone)]
pub struct EndpointProvisioner {
    capability: Arc<dyn ControlPlaneCapability>,
}

impl EndpointProvisioner {
    /// Provisioner over a control-plane capability
    pub fn new(capability: Arc<dyn ControlPlaneCapability>) -> Self {
        Self { capability }
    }

    /// Create the endpoint and open its default port to the network
    ///
    /// With TLS disabled the bundle is ignored. Deletion protection is off.
    pub async fn provision(
        &self,
        network: &NetworkContext,
        spec: &EndpointSpec,
        bundle: Option<&TlsBundle>,
        backing: &ControlPlaneBacking,
    ) -> Result<Endpoint> {
        spec.validate(network, bundle)?;

        let tls = match spec.tls_mode {
            TlsMode::Enabled => bundle.cloned(),
            TlsMode::Disabled => None,
        };

        let request = EndpointRequest {
            hostname: spec.hostname.clone(),
            fqdn: spec.fqdn(),
            zone: backing.zone.clone(),
            network_id: network.network_id.clone(),
            subnet_ids: placement_subnet_ids(network),
            repository: backing.repository.clone(),
            version: backing.version.clone(),
            tls,
            internal_protocol: spec.internal_protocol,
            port: spec.default_port(),
            deletion_protection: false,
        };

        let handle = self.capability.create_endpoint(&request).await?;
        info!(
            endpoint = %handle.endpoint_ref(),
            tls = ?spec.tls_mode,
            internal_protocol = %spec.internal_protocol,
            "Created job-queue endpoint"
        );

        let endpoint = Endpoint {
            handle,
            capability: self.capability.clone(),
            granted: Mutex::new(Vec::new()),
        };
        endpoint
            .connections()
            .allow_default_port_from(&Peer::Ipv4Cidr(network.cidr_block))
            .await?;

        Ok(endpoint)
    }
}
