//! Deployment configuration
//!
//! A [`FarmConfig`] describes one render farm: where its network comes from,
//! how the job-queue endpoint is named and secured, optional shared storage,
//! and the fleets that pull work from it.
//!
//! Configuration is read from a YAML or JSON file and then overridden from
//! the environment. Override priority (highest first):
//! 1. `RENDERFARM_*` variables
//! 2. `CDK_DEFAULT_*` variables (kept for existing deployment pipelines)
//! 3. The file contents

mod fleet;

pub use fleet::{FleetDefinition, FleetMap, OsFamily};

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::network::{NetworkContext, NetworkSource};
use crate::validation::{validate_dns_label, validate_dns_name};
use crate::{
    Error, Result, DEFAULT_CONTROL_PLANE_VERSION, DEFAULT_HOSTNAME, DEFAULT_ORGANIZATION,
    DEFAULT_ORGANIZATIONAL_UNIT, DEFAULT_ZONE_NAME,
};

const REGION_ENV: [&str; 2] = ["RENDERFARM_REGION", "CDK_DEFAULT_REGION"];
const ACCOUNT_ENV: [&str; 2] = ["RENDERFARM_ACCOUNT", "CDK_DEFAULT_ACCOUNT"];
const VPC_ENV: [&str; 2] = ["RENDERFARM_VPC_ID", "CDK_DEFAULT_VPC"];

/// Transport protocol between the endpoint's load balancer and its hosts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Plain HTTP
    Http,
    /// HTTPS
    #[default]
    Https,
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportProtocol::Http => write!(f, "HTTP"),
            TransportProtocol::Https => write!(f, "HTTPS"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

fn default_organizational_unit() -> String {
    DEFAULT_ORGANIZATIONAL_UNIT.to_string()
}

/// Endpoint traffic encryption settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Terminate external TLS at the endpoint with a generated certificate
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Protocol between the endpoint and its hosts, independent of `enabled`
    #[serde(default)]
    pub internal_protocol: TransportProtocol,

    /// Organization (O) of the leaf certificate subject
    #[serde(default = "default_organization")]
    pub organization: String,

    /// Organizational unit (OU) of the leaf certificate subject
    #[serde(default = "default_organizational_unit")]
    pub organizational_unit: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            internal_protocol: TransportProtocol::Https,
            organization: default_organization(),
            organizational_unit: default_organizational_unit(),
        }
    }
}

/// Network selection as written in config
///
/// Set at most one of `vpcId` and `existing`; with neither, a network is
/// synthesized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Look up this existing network id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,

    /// Use this fully described network as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<NetworkContext>,
}

impl NetworkConfig {
    /// Resolve the config fields into a [`NetworkSource`]
    pub fn source(&self) -> Result<NetworkSource> {
        match (&self.existing, &self.vpc_id) {
            (Some(_), Some(_)) => Err(Error::validation_for_field(
                "network",
                "network",
                "set either vpcId or existing, not both",
            )),
            (Some(context), None) => Ok(NetworkSource::Existing(context.clone())),
            (None, Some(id)) if id.is_empty() => Err(Error::validation_for_field(
                "network",
                "network.vpcId",
                "vpcId cannot be empty",
            )),
            (None, Some(id)) => Ok(NetworkSource::Lookup(id.clone())),
            (None, None) => Ok(NetworkSource::Synthesize),
        }
    }
}

/// Shared storage for render workers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Provision an OpenZFS file system
    #[serde(default = "default_true")]
    pub enable_fsx_zfs: bool,

    /// Provision an elastic file system
    #[serde(default)]
    pub enable_efs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enable_fsx_zfs: true,
            enable_efs: false,
        }
    }
}

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}

fn default_zone_name() -> String {
    DEFAULT_ZONE_NAME.to_string()
}

fn default_control_plane_version() -> String {
    DEFAULT_CONTROL_PLANE_VERSION.to_string()
}

/// Complete configuration for one render farm deployment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmConfig {
    /// Deployment region (e.g. "ap-southeast-2")
    #[serde(default)]
    pub region: String,

    /// Deployment account, when pinned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Network selection
    #[serde(default)]
    pub network: NetworkConfig,

    /// Endpoint hostname within `zone_name`
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Private DNS zone for the endpoint
    #[serde(default = "default_zone_name")]
    pub zone_name: String,

    /// Control-plane software version to install
    #[serde(default = "default_control_plane_version")]
    pub control_plane_version: String,

    /// Endpoint traffic encryption
    #[serde(default)]
    pub tls: TlsConfig,

    /// Create the account-scoped resource tracker role.
    ///
    /// The resource tracker supports a single repository per account; turn
    /// this off when another deployment in the account already owns it.
    #[serde(default = "default_true")]
    pub create_resource_tracker_role: bool,

    /// Grant session-manager terminal access to the endpoint hosts
    #[serde(default = "default_true")]
    pub session_manager_access: bool,

    /// Optional shared storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Worker fleets
    #[serde(default)]
    pub fleets: FleetMap,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            account: None,
            network: NetworkConfig::default(),
            hostname: default_hostname(),
            zone_name: default_zone_name(),
            control_plane_version: default_control_plane_version(),
            tls: TlsConfig::default(),
            create_resource_tracker_role: true,
            session_manager_access: true,
            storage: None,
            fleets: FleetMap::new(),
        }
    }
}

impl FarmConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("yaml", e.to_string()))
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::serialization_for_kind("json", e.to_string()))
    }

    /// Load a config file, choosing the format from the extension
    ///
    /// `.json` is parsed as JSON; anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loading farm config");
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&data),
            _ => Self::from_yaml_str(&data),
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// A VPC id override replaces any network selection from the file.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(*key))
                .find(|value| !value.is_empty())
        };

        if let Some(region) = first(&REGION_ENV) {
            debug!(%region, "Region overridden from environment");
            self.region = region;
        }
        if let Some(account) = first(&ACCOUNT_ENV) {
            self.account = Some(account);
        }
        if let Some(vpc_id) = first(&VPC_ENV) {
            debug!(%vpc_id, "Network lookup overridden from environment");
            self.network = NetworkConfig {
                vpc_id: Some(vpc_id),
                existing: None,
            };
        }
    }

    /// Fully qualified endpoint name (`hostname.zone`)
    pub fn endpoint_fqdn(&self) -> String {
        format!("{}.{}", self.hostname, self.zone_name)
    }

    /// The network source this config selects
    pub fn network_source(&self) -> Result<NetworkSource> {
        self.network.source()
    }

    /// Validate the whole configuration
    ///
    /// Runs before any provisioning call. Fleet image and instance class
    /// resolution is checked separately by the fleet composer because it
    /// needs the instance class catalogue.
    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            return Err(Error::validation_for_field(
                "config",
                "region",
                "region is required (set it in the file or RENDERFARM_REGION)",
            ));
        }

        validate_dns_label(&self.hostname)
            .map_err(|e| Error::validation_for_field("config", "hostname", e))?;
        validate_dns_name(&self.zone_name)
            .map_err(|e| Error::validation_for_field("config", "zoneName", e))?;

        if self.control_plane_version.is_empty()
            || !self
                .control_plane_version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(Error::validation_for_field(
                "config",
                "controlPlaneVersion",
                format!(
                    "invalid control plane version '{}', expected dotted digits like 10.3.1",
                    self.control_plane_version
                ),
            ));
        }

        if self.tls.enabled && self.tls.organization.is_empty() {
            return Err(Error::validation_for_field(
                "config",
                "tls.organization",
                "organization cannot be empty when TLS is enabled",
            ));
        }

        if let NetworkSource::Existing(context) = self.network_source()? {
            context.validate()?;
        }

        if let Some(storage) = &self.storage {
            if !storage.enable_fsx_zfs && !storage.enable_efs {
                return Err(Error::validation_for_field(
                    "config",
                    "storage",
                    "storage section enables no file system",
                ));
            }
        }

        self.fleets.validate()
    }
}
