//! Declarative resource descriptions
//!
//! Every capability request can render itself as a [`ResourceManifest`]:
//! an untyped resource of a given type with JSON properties. Backends that
//! materialize nothing (the synth backend) record these instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use renderfarm_common::{Error, Result};

/// A declarative resource with untyped properties
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceManifest {
    /// Resource type (e.g. "AWS::EC2::VPC")
    pub resource_type: String,
    /// Logical id within the deployment
    pub logical_id: String,
    /// Identifier assigned when the resource was materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
    /// Resource properties (untyped)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub properties: serde_json::Value,
    /// Tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceManifest {
    /// Create a new manifest
    pub fn new(resource_type: impl Into<String>, logical_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            physical_id: None,
            properties: serde_json::Value::Null,
            tags: BTreeMap::new(),
        }
    }

    /// Set the properties for this manifest
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    /// Set the tags for this manifest
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Record the materialized identifier
    pub fn with_physical_id(mut self, physical_id: impl Into<String>) -> Self {
        self.physical_id = Some(physical_id.into());
        self
    }

    /// Serialize the manifest to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::serialization_for_kind("json", e.to_string()))
    }
}

/// Resource type names used in manifests
pub mod resource_types {
    /// Network
    pub const VPC: &str = "AWS::EC2::VPC";
    /// Subnet
    pub const SUBNET: &str = "AWS::EC2::Subnet";
    /// NAT gateway
    pub const NAT_GATEWAY: &str = "AWS::EC2::NatGateway";
    /// Security group
    pub const SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";
    /// Security group ingress rule
    pub const SECURITY_GROUP_INGRESS: &str = "AWS::EC2::SecurityGroupIngress";
    /// Private hosted zone
    pub const HOSTED_ZONE: &str = "AWS::Route53::HostedZone";
    /// Control-plane version lookup
    pub const VERSION_QUERY: &str = "Custom::RFDK_DEADLINE_INSTALLERS";
    /// Control-plane repository
    pub const REPOSITORY: &str = "RFDK::Deadline::Repository";
    /// Job-queue endpoint
    pub const RENDER_QUEUE: &str = "RFDK::Deadline::RenderQueue";
    /// Session manager access grant
    pub const SESSION_MANAGER_GRANT: &str = "AWS::IAM::Policy";
    /// Account-scoped role
    pub const ROLE: &str = "AWS::IAM::Role";
    /// Elastic worker fleet
    pub const SPOT_FLEET: &str = "RFDK::Deadline::SpotEventPluginFleet";
    /// Fleet roster configuration
    pub const SPOT_EVENT_PLUGIN_CONFIG: &str = "RFDK::Deadline::ConfigureSpotEventPlugin";
    /// OpenZFS file system
    pub const FSX_FILE_SYSTEM: &str = "AWS::FSx::FileSystem";
    /// Elastic file system
    pub const EFS_FILE_SYSTEM: &str = "AWS::EFS::FileSystem";
}
