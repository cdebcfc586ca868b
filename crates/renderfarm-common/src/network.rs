//! Network model shared by every provisioning unit
//!
//! A [`NetworkContext`] is the single placement domain for one deployment.
//! It is either looked up (externally owned) or synthesized (owned by the
//! deployment). [`NetworkSource`] is the unresolved form taken from config.

use std::collections::HashSet;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What a subnet is for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetPurpose {
    /// Private subnet with no route to the internet
    PrivateIsolated,
    /// Private subnet routed through the shared NAT egress path
    PrivateWithEgress,
    /// Public subnet with an internet gateway route
    Public,
}

impl SubnetPurpose {
    /// True for both private flavours
    pub fn is_private(&self) -> bool {
        !matches!(self, SubnetPurpose::Public)
    }
}

impl std::fmt::Display for SubnetPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnetPurpose::PrivateIsolated => write!(f, "private-isolated"),
            SubnetPurpose::PrivateWithEgress => write!(f, "private-with-egress"),
            SubnetPurpose::Public => write!(f, "public"),
        }
    }
}

/// Who owns the network's lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkOwnership {
    /// Looked up or handed in; read-only for this deployment
    #[default]
    External,
    /// Synthesized by this deployment and destroyed with it
    Owned,
}

/// One subnet of a network
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetDescriptor {
    /// Provider subnet identifier
    pub subnet_id: String,
    /// Subnet purpose
    pub purpose: SubnetPurpose,
    /// Availability zone the subnet lives in
    pub availability_zone: String,
    /// Address range, when known (lookups may omit it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<Ipv4Net>,
}

/// A resolved network every placed resource references
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkContext {
    /// Provider network identifier (e.g. a VPC id)
    pub network_id: String,
    /// Address range of the whole network
    pub cidr_block: Ipv4Net,
    /// Subnets in provider order
    pub subnets: Vec<SubnetDescriptor>,
    /// Lifecycle owner
    #[serde(default)]
    pub ownership: NetworkOwnership,
}

impl NetworkContext {
    /// Availability zones covered by the subnets, in first-seen order
    pub fn availability_zones(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.subnets
            .iter()
            .map(|s| s.availability_zone.as_str())
            .filter(|az| seen.insert(*az))
            .collect()
    }

    /// Subnets with the given purpose, in provider order
    pub fn subnets_with_purpose(
        &self,
        purpose: SubnetPurpose,
    ) -> impl Iterator<Item = &SubnetDescriptor> {
        self.subnets.iter().filter(move |s| s.purpose == purpose)
    }

    /// Subnets used for worker and service placement
    ///
    /// Private-with-egress subnets when the network has any, otherwise the
    /// private-isolated ones.
    pub fn placement_subnets(&self) -> Vec<&SubnetDescriptor> {
        let egress: Vec<_> = self
            .subnets_with_purpose(SubnetPurpose::PrivateWithEgress)
            .collect();
        if !egress.is_empty() {
            return egress;
        }
        self.subnets_with_purpose(SubnetPurpose::PrivateIsolated)
            .collect()
    }

    /// Whether this deployment owns the network
    pub fn is_owned(&self) -> bool {
        self.ownership == NetworkOwnership::Owned
    }

    /// Check structural consistency of a handed-in or looked-up network
    pub fn validate(&self) -> Result<()> {
        if self.network_id.is_empty() {
            return Err(Error::validation_for_field(
                "network",
                "network.networkId",
                "network id cannot be empty",
            ));
        }

        if self.placement_subnets().is_empty() {
            return Err(Error::validation_for(
                &self.network_id,
                "network has no private subnets to place resources in",
            ));
        }

        let mut ids = HashSet::new();
        for subnet in &self.subnets {
            if !ids.insert(subnet.subnet_id.as_str()) {
                return Err(Error::validation_for(
                    &self.network_id,
                    format!("duplicate subnet id {}", subnet.subnet_id),
                ));
            }
            if let Some(cidr) = subnet.cidr_block {
                if !self.cidr_block.contains(&cidr) {
                    return Err(Error::validation_for(
                        &self.network_id,
                        format!(
                            "subnet {} ({}) is outside network range {}",
                            subnet.subnet_id, cidr, self.cidr_block
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Where the deployment's network comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkSource {
    /// A network handle supplied directly; used as-is
    Existing(NetworkContext),
    /// A network identifier to look up through the network capability
    Lookup(String),
    /// No network given; a new one is synthesized
    Synthesize,
}

impl NetworkSource {
    /// True when the network is supplied from outside this deployment
    pub fn is_external(&self) -> bool {
        !matches!(self, NetworkSource::Synthesize)
    }
}
