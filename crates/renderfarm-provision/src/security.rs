//! Security groups and ingress peers

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::manifest::{resource_types, ResourceManifest};

/// Source of inbound traffic
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum Peer {
    /// An IPv4 address range
    Ipv4Cidr(Ipv4Net),
    /// Members of a security group
    SecurityGroup(String),
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Ipv4Cidr(cidr) => write!(f, "{cidr}"),
            Peer::SecurityGroup(id) => write!(f, "{id}"),
        }
    }
}

/// Transport protocol of an ingress rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

/// One inbound rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// Traffic source
    pub peer: Peer,
    /// Protocol
    pub protocol: Protocol,
    /// First port of the range
    pub from_port: u16,
    /// Last port of the range
    pub to_port: u16,
    /// Rule description
    pub description: String,
}

impl IngressRule {
    /// Rule for a single port
    pub fn port(peer: Peer, protocol: Protocol, port: u16, description: &str) -> Self {
        Self::range(peer, protocol, port, port, description)
    }

    /// Rule for a port range
    pub fn range(
        peer: Peer,
        protocol: Protocol,
        from_port: u16,
        to_port: u16,
        description: &str,
    ) -> Self {
        Self {
            peer,
            protocol,
            from_port,
            to_port,
            description: description.to_string(),
        }
    }
}

/// Request to create a security group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRequest {
    /// Logical name
    pub name: String,
    /// Provider-side group name; the provider picks one when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Description
    pub description: String,
    /// Network the group lives in
    pub network_id: String,
    /// Whether all outbound traffic is allowed
    pub allow_all_outbound: bool,
    /// Inbound rules
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroupRequest {
    /// Group with no inbound rules
    pub fn new(name: &str, description: &str, network_id: &str, allow_all_outbound: bool) -> Self {
        Self {
            name: name.to_string(),
            group_name: None,
            description: description.to_string(),
            network_id: network_id.to_string(),
            allow_all_outbound,
            ingress: Vec::new(),
        }
    }

    /// Pin the provider-side group name
    pub fn with_group_name(mut self, group_name: &str) -> Self {
        self.group_name = Some(group_name.to_string());
        self
    }

    /// Add an inbound rule
    pub fn with_ingress(mut self, rule: IngressRule) -> Self {
        self.ingress.push(rule);
        self
    }

    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        let mut properties = serde_json::json!({
            "groupDescription": &self.description,
            "vpcId": &self.network_id,
            "allowAllOutbound": self.allow_all_outbound,
            "securityGroupIngress": &self.ingress,
        });
        if let Some(group_name) = &self.group_name {
            properties["groupName"] = serde_json::Value::from(group_name.as_str());
        }
        ResourceManifest::new(resource_types::SECURITY_GROUP, &self.name).with_properties(properties)
    }
}

/// A created security group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRef {
    /// Provider security group id
    pub security_group_id: String,
}

impl SecurityGroupRef {
    /// This group as an ingress peer
    pub fn as_peer(&self) -> Peer {
        Peer::SecurityGroup(self.security_group_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lists_ingress_rules() {
        let cidr: Ipv4Net = "10.0.0.0/16".parse().expect("valid cidr");
        let request = SecurityGroupRequest::new("Storage", "NFS access", "vpc-1", false)
            .with_ingress(IngressRule::port(Peer::Ipv4Cidr(cidr), Protocol::Tcp, 2049, "NFS"));

        let manifest = request.to_manifest();
        assert_eq!(manifest.logical_id, "Storage");
        assert_eq!(manifest.properties["allowAllOutbound"], false);
        assert_eq!(manifest.properties["securityGroupIngress"][0]["fromPort"], 2049);
        assert_eq!(
            manifest.properties["securityGroupIngress"][0]["peer"]["value"],
            "10.0.0.0/16"
        );
        assert!(manifest.properties.get("groupName").is_none());
    }

    #[test]
    fn pinned_group_name_reaches_the_manifest() {
        let request = SecurityGroupRequest::new("Workers", "Render workers", "vpc-1", true)
            .with_group_name("Deadline-Render-Worker-SG");

        let manifest = request.to_manifest();
        assert_eq!(manifest.logical_id, "Workers");
        assert_eq!(manifest.properties["groupName"], "Deadline-Render-Worker-SG");
    }

    #[test]
    fn security_group_ref_converts_to_peer() {
        let group = SecurityGroupRef {
            security_group_id: "sg-1".to_string(),
        };
        assert_eq!(group.as_peer(), Peer::SecurityGroup("sg-1".to_string()));
        assert_eq!(group.as_peer().to_string(), "sg-1");
    }
}
