//! Network resolution
//!
//! [`NetworkResolver`] turns a [`NetworkSource`] into the one
//! [`NetworkContext`] every placed resource references. Synthesized networks
//! are planned here (address carving, subnet groups, egress) and
//! materialized through the [`NetworkCapability`].

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::NetworkCapability;
use crate::manifest::{resource_types, ResourceManifest};
use renderfarm_common::{
    Error, NetworkContext, NetworkOwnership, NetworkSource, Result, SubnetPurpose,
};

/// Address block of synthesized networks
pub const DEFAULT_NETWORK_CIDR: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 16);

/// Prefix length of each private-with-egress subnet
pub const PRIVATE_SUBNET_PREFIX: u8 = 20;

/// Prefix length of each public subnet
pub const PUBLIC_SUBNET_PREFIX: u8 = 24;

/// Number of NAT gateways shared by all private subnets
pub const NAT_GATEWAYS: u32 = 1;

/// Output name of a synthesized network's id
pub const VPC_ID_OUTPUT: &str = "VpcId";

const PRIVATE_GROUP: &str = "Private";
const PUBLIC_GROUP: &str = "Public";

/// One subnet of a network plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSubnet {
    /// Subnet group name ("Private", "Public")
    pub group: String,
    /// Purpose
    pub purpose: SubnetPurpose,
    /// Zone
    pub availability_zone: String,
    /// Address range
    pub cidr_block: Ipv4Net,
}

/// Request to synthesize a network
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    /// Deployment region
    pub region: String,
    /// Address range of the whole network
    pub cidr_block: Ipv4Net,
    /// Zones the network spans
    pub availability_zones: Vec<String>,
    /// Carved subnets, private groups first
    pub subnets: Vec<PlannedSubnet>,
    /// NAT gateways providing the shared egress path
    pub nat_gateways: u32,
}

impl NetworkRequest {
    /// Plan a network over `zones`
    ///
    /// One /20 private-with-egress subnet and one /24 public subnet per
    /// zone. All private blocks are carved before any public block.
    pub fn plan(region: &str, cidr_block: Ipv4Net, zones: &[String]) -> Result<Self> {
        if zones.is_empty() {
            return Err(Error::provider_permanent(
                "network",
                format!("no availability zones reported for region {region}"),
            ));
        }

        let mut carver = AddressCarver::new(cidr_block);
        let mut subnets = Vec::with_capacity(zones.len() * 2);

        let groups = [
            (PRIVATE_GROUP, SubnetPurpose::PrivateWithEgress, PRIVATE_SUBNET_PREFIX),
            (PUBLIC_GROUP, SubnetPurpose::Public, PUBLIC_SUBNET_PREFIX),
        ];
        for (group, purpose, prefix_len) in groups {
            for zone in zones {
                let cidr = carver.allocate(prefix_len).ok_or_else(|| {
                    Error::validation_for_field(
                        "network",
                        "network.cidrBlock",
                        format!(
                            "{} has no room for a /{} {} subnet in {}",
                            cidr_block, prefix_len, purpose, zone
                        ),
                    )
                })?;
                subnets.push(PlannedSubnet {
                    group: group.to_string(),
                    purpose,
                    availability_zone: zone.clone(),
                    cidr_block: cidr,
                });
            }
        }

        Ok(Self {
            region: region.to_string(),
            cidr_block,
            availability_zones: zones.to_vec(),
            subnets,
            nat_gateways: NAT_GATEWAYS,
        })
    }

    /// Subnets of one purpose, in zone order
    pub fn subnets_with_purpose(
        &self,
        purpose: SubnetPurpose,
    ) -> impl Iterator<Item = &PlannedSubnet> {
        self.subnets.iter().filter(move |s| s.purpose == purpose)
    }

    /// Declarative form: the network, its subnets, and the NAT gateway
    pub fn to_manifests(&self) -> Vec<ResourceManifest> {
        let mut manifests = vec![ResourceManifest::new(resource_types::VPC, "Vpc")
            .with_properties(serde_json::json!({
                "cidrBlock": self.cidr_block,
                "maxAzs": self.availability_zones.len(),
                "natGateways": self.nat_gateways,
            }))];

        let mut index_in_group = std::collections::HashMap::new();
        for subnet in &self.subnets {
            let index = index_in_group.entry(subnet.group.as_str()).or_insert(0usize);
            *index += 1;
            manifests.push(
                ResourceManifest::new(
                    resource_types::SUBNET,
                    format!("Vpc{}Subnet{}", subnet.group, index),
                )
                .with_properties(serde_json::json!({
                    "cidrBlock": subnet.cidr_block,
                    "availabilityZone": &subnet.availability_zone,
                    "subnetType": subnet.purpose,
                })),
            );
        }

        if let Some(first_public) = self.subnets_with_purpose(SubnetPurpose::Public).next() {
            for n in 1..=self.nat_gateways {
                manifests.push(
                    ResourceManifest::new(resource_types::NAT_GATEWAY, format!("VpcNatGateway{n}"))
                        .with_properties(serde_json::json!({
                            "availabilityZone": &first_public.availability_zone,
                            "subnetCidrBlock": first_public.cidr_block,
                        })),
                );
            }
        }

        manifests
    }
}

/// First-fit, prefix-aligned carving of one address block
struct AddressCarver {
    space: Ipv4Net,
    next: u64,
}

impl AddressCarver {
    fn new(space: Ipv4Net) -> Self {
        Self {
            space,
            next: u64::from(u32::from(space.network())),
        }
    }

    fn allocate(&mut self, prefix_len: u8) -> Option<Ipv4Net> {
        if prefix_len < self.space.prefix_len() || prefix_len > 32 {
            return None;
        }
        let block_size = 1u64 << (32 - prefix_len);
        let aligned = (self.next + block_size - 1) & !(block_size - 1);
        let end = aligned + block_size - 1;
        if end > u64::from(u32::from(self.space.broadcast())) {
            return None;
        }
        self.next = end + 1;
        let addr = Ipv4Addr::from(u32::try_from(aligned).ok()?);
        Ipv4Net::new(addr, prefix_len).ok()
    }
}

/// Resolves a [`NetworkSource`] into a [`NetworkContext`]
#[derive(Clone)]
pub struct NetworkResolver {
    capability: Arc<dyn NetworkCapability>,
    region: String,
    cidr_block: Ipv4Net,
}

impl NetworkResolver {
    /// Resolver for `region` synthesizing into the default address block
    pub fn new(capability: Arc<dyn NetworkCapability>, region: impl Into<String>) -> Self {
        Self {
            capability,
            region: region.into(),
            cidr_block: DEFAULT_NETWORK_CIDR,
        }
    }

    /// Synthesize into a different address block
    pub fn with_cidr_block(mut self, cidr_block: Ipv4Net) -> Self {
        self.cidr_block = cidr_block;
        self
    }

    /// Resolve any source
    ///
    /// Synthesis never touches pre-existing infrastructure: it only creates.
    pub async fn resolve(&self, source: &NetworkSource) -> Result<NetworkContext> {
        match source {
            NetworkSource::Existing(context) => {
                debug!(network_id = %context.network_id, "Using supplied network as-is");
                Ok(context.clone())
            }
            NetworkSource::Lookup(network_id) => self.lookup(network_id).await,
            NetworkSource::Synthesize => self.synthesize().await,
        }
    }

    /// Look up an existing network by id
    pub async fn lookup(&self, network_id: &str) -> Result<NetworkContext> {
        let mut context = self
            .capability
            .lookup_network(network_id)
            .await?
            .ok_or_else(|| Error::NetworkNotFound {
                network_id: network_id.to_string(),
            })?;
        context.ownership = NetworkOwnership::External;
        info!(network_id, subnets = context.subnets.len(), "Resolved existing network");
        Ok(context)
    }

    /// Plan and create a new network over every zone in the region
    pub async fn synthesize(&self) -> Result<NetworkContext> {
        let zones = self.capability.availability_zones(&self.region).await?;
        let request = NetworkRequest::plan(&self.region, self.cidr_block, &zones)?;
        debug!(
            region = %self.region,
            zones = zones.len(),
            cidr = %self.cidr_block,
            "Planned network"
        );

        let mut context = self.capability.synthesize_network(&request).await?;
        context.ownership = NetworkOwnership::Owned;

        for zone in &zones {
            let covered = context
                .subnets_with_purpose(SubnetPurpose::PrivateWithEgress)
                .any(|s| &s.availability_zone == zone);
            if !covered {
                return Err(Error::provider_permanent(
                    "network",
                    format!(
                        "synthesized network {} has no private-with-egress subnet in {}",
                        context.network_id, zone
                    ),
                ));
            }
        }

        info!(
            network_id = %context.network_id,
            zones = zones.len(),
            "Synthesized network"
        );
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockNetworkCapability;
    use renderfarm_common::SubnetDescriptor;

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|z| z.to_string()).collect()
    }

    fn context_from_request(request: &NetworkRequest) -> NetworkContext {
        NetworkContext {
            network_id: "vpc-synth".to_string(),
            cidr_block: request.cidr_block,
            subnets: request
                .subnets
                .iter()
                .enumerate()
                .map(|(i, s)| SubnetDescriptor {
                    subnet_id: format!("subnet-{i}"),
                    purpose: s.purpose,
                    availability_zone: s.availability_zone.clone(),
                    cidr_block: Some(s.cidr_block),
                })
                .collect(),
            ownership: NetworkOwnership::External,
        }
    }

    #[test]
    fn plan_carves_private_blocks_before_public() {
        let request = NetworkRequest::plan(
            "us-west-2",
            DEFAULT_NETWORK_CIDR,
            &zones(&["us-west-2a", "us-west-2b", "us-west-2c"]),
        )
        .expect("plan should succeed");

        let cidrs: Vec<String> = request.subnets.iter().map(|s| s.cidr_block.to_string()).collect();
        assert_eq!(
            cidrs,
            vec![
                "10.0.0.0/20",
                "10.0.16.0/20",
                "10.0.32.0/20",
                "10.0.48.0/24",
                "10.0.49.0/24",
                "10.0.50.0/24",
            ]
        );
        assert_eq!(request.nat_gateways, 1);
        assert_eq!(
            request
                .subnets_with_purpose(SubnetPurpose::PrivateWithEgress)
                .count(),
            3
        );
    }

    #[test]
    fn plan_fails_when_address_space_runs_out() {
        let small: Ipv4Net = "10.0.0.0/22".parse().expect("valid cidr");
        let err = NetworkRequest::plan("us-west-2", small, &zones(&["us-west-2a"]))
            .expect_err("a /20 cannot fit in a /22");
        assert!(err.is_config_error());
    }

    #[test]
    fn plan_requires_zones() {
        let err = NetworkRequest::plan("us-west-2", DEFAULT_NETWORK_CIDR, &[])
            .expect_err("no zones should fail");
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[test]
    fn manifests_include_single_nat_in_first_public_subnet() {
        let request = NetworkRequest::plan(
            "us-west-2",
            DEFAULT_NETWORK_CIDR,
            &zones(&["us-west-2a", "us-west-2b"]),
        )
        .expect("plan should succeed");
        let manifests = request.to_manifests();

        let nats: Vec<_> = manifests
            .iter()
            .filter(|m| m.resource_type == resource_types::NAT_GATEWAY)
            .collect();
        assert_eq!(nats.len(), 1);
        assert_eq!(nats[0].properties["subnetCidrBlock"], "10.0.32.0/24");
        assert!(manifests.iter().any(|m| m.logical_id == "VpcPrivateSubnet2"));
        assert!(manifests.iter().any(|m| m.logical_id == "VpcPublicSubnet1"));
    }

    #[tokio::test]
    async fn existing_network_is_passed_through_without_calls() {
        // No expectations: any capability call would panic
        let mock = MockNetworkCapability::new();
        let resolver = NetworkResolver::new(Arc::new(mock), "us-west-2");

        let request = NetworkRequest::plan("us-west-2", DEFAULT_NETWORK_CIDR, &zones(&["a"]))
            .expect("plan should succeed");
        let existing = context_from_request(&request);

        let resolved = resolver
            .resolve(&NetworkSource::Existing(existing.clone()))
            .await
            .expect("pass-through should succeed");
        assert_eq!(resolved, existing);
    }

    #[tokio::test]
    async fn lookup_miss_is_network_not_found() {
        let mut mock = MockNetworkCapability::new();
        mock.expect_lookup_network().times(1).returning(|_| Ok(None));
        let resolver = NetworkResolver::new(Arc::new(mock), "us-west-2");

        let err = resolver
            .resolve(&NetworkSource::Lookup("vpc-missing".to_string()))
            .await
            .expect_err("lookup miss should fail");
        match err {
            Error::NetworkNotFound { network_id } => assert_eq!(network_id, "vpc-missing"),
            other => panic!("expected NetworkNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_hit_is_marked_external() {
        let request = NetworkRequest::plan("us-west-2", DEFAULT_NETWORK_CIDR, &zones(&["a"]))
            .expect("plan should succeed");
        let mut found = context_from_request(&request);
        found.ownership = NetworkOwnership::Owned;

        let mut mock = MockNetworkCapability::new();
        mock.expect_lookup_network()
            .times(1)
            .returning(move |_| Ok(Some(found.clone())));
        let resolver = NetworkResolver::new(Arc::new(mock), "us-west-2");

        let context = resolver
            .resolve(&NetworkSource::Lookup("vpc-synth".to_string()))
            .await
            .expect("lookup should succeed");
        assert!(!context.is_owned());
    }

    #[tokio::test]
    async fn synthesize_covers_every_zone() {
        let mut mock = MockNetworkCapability::new();
        mock.expect_availability_zones()
            .times(1)
            .returning(|_| Ok(zones(&["us-west-2a", "us-west-2b", "us-west-2c"])));
        mock.expect_synthesize_network()
            .times(1)
            .returning(|request| Ok(context_from_request(request)));
        let resolver = NetworkResolver::new(Arc::new(mock), "us-west-2");

        let context = resolver
            .resolve(&NetworkSource::Synthesize)
            .await
            .expect("synthesis should succeed");

        assert!(context.is_owned());
        for zone in ["us-west-2a", "us-west-2b", "us-west-2c"] {
            assert!(context
                .subnets_with_purpose(SubnetPurpose::PrivateWithEgress)
                .any(|s| s.availability_zone == zone));
        }
    }

    #[tokio::test]
    async fn synthesize_rejects_context_missing_a_zone() {
        let mut mock = MockNetworkCapability::new();
        mock.expect_availability_zones()
            .returning(|_| Ok(zones(&["us-west-2a", "us-west-2b"])));
        mock.expect_synthesize_network().returning(|request| {
            let mut context = context_from_request(request);
            context.subnets.retain(|s| s.availability_zone == "us-west-2a");
            Ok(context)
        });
        let resolver = NetworkResolver::new(Arc::new(mock), "us-west-2");

        let err = resolver
            .synthesize()
            .await
            .expect_err("missing zone should fail");
        assert!(err.to_string().contains("us-west-2b"));
    }
}
