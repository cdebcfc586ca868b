//! Fleet composition
//!
//! [`FleetComposer`] fans a [`FleetMap`] out into one [`FleetRequest`] per
//! definition, in name order. Image and instance class resolution happen
//! per definition and per class name so a bad entry is reported exactly.
//! [`provision_roster`] materializes the requests and then hands the whole
//! roster to the control plane in a single call.

mod image;
mod instance;

pub use image::MachineImage;
pub use instance::{Architecture, InstanceClass, InstanceSize};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::FleetCapability;
use crate::endpoint::{placement_subnet_ids, EndpointHandle};
use crate::manifest::{resource_types, ResourceManifest};
use crate::role::RoleRef;
use renderfarm_common::{
    Error, FleetDefinition, FleetMap, NetworkContext, OsFamily, Result, FLEET_TAG_KEY,
};

/// A definition whose image and instance classes have been resolved
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedFleet {
    /// The definition as configured
    pub definition: FleetDefinition,
    /// Image id for the deployment region
    pub image_id: String,
    /// Parsed instance classes, in configured order
    pub instance_classes: Vec<InstanceClass>,
}

/// Request to create one worker fleet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetRequest {
    /// Fleet name
    pub name: String,
    /// Worker OS
    pub os_family: OsFamily,
    /// Worker image
    pub image_id: String,
    /// Instance classes the fleet may launch
    pub instance_classes: Vec<InstanceClass>,
    /// Endpoint the workers register with
    pub endpoint: EndpointHandle,
    /// Network
    pub network_id: String,
    /// Placement subnets
    pub subnet_ids: Vec<String>,
    /// Role the workers run as
    pub role: RoleRef,
    /// Security groups attached to every worker
    pub security_group_ids: Vec<String>,
    /// Upper bound on fleet size
    pub max_capacity: u32,
    /// Job routing groups
    pub groups: Vec<String>,
    /// Job routing pools
    pub pools: Vec<String>,
    /// Tags, including the derived fleet tag
    pub tags: BTreeMap<String, String>,
    /// Extra boot commands
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_data: Vec<String>,
    /// Whether the resource tracker follows these workers
    pub track_with_resource_tracker: bool,
}

impl FleetRequest {
    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        let instance_types: Vec<String> =
            self.instance_classes.iter().map(|c| c.to_string()).collect();
        ResourceManifest::new(resource_types::SPOT_FLEET, format!("{}SpotFleet", self.name))
            .with_properties(serde_json::json!({
                "fleetName": &self.name,
                "osFamily": self.os_family,
                "workerMachineImage": &self.image_id,
                "instanceTypes": instance_types,
                "renderQueue": self.endpoint.endpoint_ref(),
                "vpcId": &self.network_id,
                "vpcSubnets": &self.subnet_ids,
                "fleetRole": &self.role.arn,
                "securityGroups": &self.security_group_ids,
                "maxCapacity": self.max_capacity,
                "deadlineGroups": &self.groups,
                "deadlinePools": &self.pools,
                "userData": &self.user_data,
                "trackInstancesWithResourceTracker": self.track_with_resource_tracker,
            }))
            .with_tags(self.tags.clone())
    }
}

/// A created fleet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetHandle {
    /// Provider fleet id
    pub fleet_id: String,
    /// Fleet name
    pub name: String,
}

/// The complete roster handed to the control plane at once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRequest {
    /// Endpoint managing the fleets
    pub endpoint: EndpointHandle,
    /// Every fleet of the deployment
    pub fleets: Vec<FleetHandle>,
    /// Let the resource tracker follow fleet instances
    pub enable_resource_tracker: bool,
}

impl RosterRequest {
    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        let fleets: Vec<&str> = self.fleets.iter().map(|f| f.fleet_id.as_str()).collect();
        ResourceManifest::new(resource_types::SPOT_EVENT_PLUGIN_CONFIG, "ConfigureSpotEventPlugin")
            .with_properties(serde_json::json!({
                "renderQueue": self.endpoint.endpoint_ref(),
                "spotFleets": fleets,
                "configuration": {
                    "enableResourceTracker": self.enable_resource_tracker,
                },
            }))
    }
}

/// Expands fleet definitions into provisioning requests for one region
#[derive(Clone, Debug)]
pub struct FleetComposer {
    region: String,
}

impl FleetComposer {
    /// Composer for the deployment region
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    /// Resolve images and instance classes for every definition
    ///
    /// Needs no endpoint, so the orchestrator runs it before any
    /// provisioning call. Results are sorted by fleet name.
    pub fn validate(&self, fleets: &FleetMap) -> Result<Vec<ValidatedFleet>> {
        fleets.validate()?;
        fleets
            .sorted()
            .into_iter()
            .map(|definition| self.validate_one(definition))
            .collect()
    }

    fn validate_one(&self, definition: &FleetDefinition) -> Result<ValidatedFleet> {
        let image = MachineImage::for_fleet(definition);
        let image_id = image
            .resolve(&self.region)
            .ok_or_else(|| Error::UnresolvedImage {
                fleet: definition.name.clone(),
                region: self.region.clone(),
                os_family: definition.os_family.to_string(),
            })?
            .to_string();

        let mut instance_classes = Vec::with_capacity(definition.instance_types.len());
        for name in &definition.instance_types {
            let class = InstanceClass::parse(name).map_err(|message| Error::InvalidInstanceClass {
                fleet: definition.name.clone(),
                instance_class: name.clone(),
                message,
            })?;
            if definition.os_family == OsFamily::Windows
                && class.architecture() == Architecture::Arm64
            {
                return Err(Error::InvalidInstanceClass {
                    fleet: definition.name.clone(),
                    instance_class: name.clone(),
                    message: "arm64 instance classes cannot run windows workers".to_string(),
                });
            }
            instance_classes.push(class);
        }

        debug!(
            fleet = %definition.name,
            image = %image_id,
            classes = instance_classes.len(),
            "Validated fleet definition"
        );

        Ok(ValidatedFleet {
            definition: definition.clone(),
            image_id,
            instance_classes,
        })
    }

    /// Build one request per definition, bound to `endpoint`
    pub fn compose(
        &self,
        fleets: &FleetMap,
        endpoint: &EndpointHandle,
        network: &NetworkContext,
        role: &RoleRef,
        security_groups: &[String],
    ) -> Result<Vec<FleetRequest>> {
        let validated = self.validate(fleets)?;

        let subnet_ids = placement_subnet_ids(network);
        if subnet_ids.is_empty() {
            return Err(Error::validation_for(
                &network.network_id,
                "network has no private subnets to place fleets in",
            ));
        }

        let requests: Vec<FleetRequest> = validated
            .into_iter()
            .map(|fleet| {
                let ValidatedFleet {
                    definition,
                    image_id,
                    instance_classes,
                } = fleet;

                let mut tags = definition.tags;
                tags.insert(FLEET_TAG_KEY.to_string(), definition.name.clone());

                FleetRequest {
                    name: definition.name,
                    os_family: definition.os_family,
                    image_id,
                    instance_classes,
                    endpoint: endpoint.clone(),
                    network_id: network.network_id.clone(),
                    subnet_ids: subnet_ids.clone(),
                    role: role.clone(),
                    security_group_ids: security_groups.to_vec(),
                    max_capacity: definition.max_capacity,
                    groups: definition.groups,
                    pools: definition.pools,
                    tags,
                    user_data: definition.user_data,
                    track_with_resource_tracker: definition.track_with_resource_tracker,
                }
            })
            .collect();

        info!(fleets = requests.len(), region = %self.region, "Composed fleet requests");
        Ok(requests)
    }
}

/// Create every fleet, then configure the roster in one call
///
/// The roster call is made only after every fleet was created, so the
/// control plane never sees a partial roster.
pub async fn provision_roster(
    capability: &dyn FleetCapability,
    endpoint: &EndpointHandle,
    requests: &[FleetRequest],
    enable_resource_tracker: bool,
) -> Result<Vec<FleetHandle>> {
    let mut handles = Vec::with_capacity(requests.len());
    for request in requests {
        let handle = capability.create_fleet(request).await?;
        debug!(fleet = %handle.name, fleet_id = %handle.fleet_id, "Created fleet");
        handles.push(handle);
    }

    if handles.is_empty() {
        debug!("No fleets declared, skipping roster configuration");
        return Ok(handles);
    }

    capability
        .configure_roster(&RosterRequest {
            endpoint: endpoint.clone(),
            fleets: handles.clone(),
            enable_resource_tracker,
        })
        .await?;
    info!(fleets = handles.len(), "Configured fleet roster");

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockFleetCapability;
    use renderfarm_common::{NetworkOwnership, SubnetDescriptor, SubnetPurpose};

    const REGION: &str = "ap-southeast-2";

    fn definition(instance_types: &[&str], os_family: OsFamily) -> FleetDefinition {
        FleetDefinition {
            os_family,
            groups: vec!["blender-cloud".to_string()],
            pools: vec!["blender".to_string()],
            instance_types: instance_types.iter().map(|s| s.to_string()).collect(),
            worker_images: BTreeMap::from([(REGION.to_string(), "ami-04b0896de2d480709".to_string())]),
            max_capacity: 5,
            tags: BTreeMap::from([("team".to_string(), "lighting".to_string())]),
            ..Default::default()
        }
    }

    fn network() -> NetworkContext {
        NetworkContext {
            network_id: "vpc-1".to_string(),
            cidr_block: "10.0.0.0/16".parse().expect("valid cidr"),
            subnets: vec![
                SubnetDescriptor {
                    subnet_id: "subnet-pub".to_string(),
                    purpose: SubnetPurpose::Public,
                    availability_zone: "ap-southeast-2a".to_string(),
                    cidr_block: None,
                },
                SubnetDescriptor {
                    subnet_id: "subnet-priv".to_string(),
                    purpose: SubnetPurpose::PrivateWithEgress,
                    availability_zone: "ap-southeast-2a".to_string(),
                    cidr_block: None,
                },
            ],
            ownership: NetworkOwnership::Owned,
        }
    }

    fn endpoint() -> EndpointHandle {
        EndpointHandle {
            endpoint_id: "rq-1".to_string(),
            address: "renderqueue.deadline.internal".to_string(),
            port: 4433,
            tls: true,
            security_group_id: "sg-rq".to_string(),
        }
    }

    fn role() -> RoleRef {
        RoleRef {
            role_name: "DeadlineWorkerEC2Role".to_string(),
            arn: "arn:aws:iam::123456789012:role/DeadlineWorkerEC2Role".to_string(),
        }
    }

    #[test]
    fn compose_returns_one_tagged_request_per_fleet_in_name_order() {
        let fleets = FleetMap::new()
            .with("maya", definition(&["m5.4xlarge"], OsFamily::Windows))
            .with("blender", definition(&["c5.2xlarge"], OsFamily::Linux))
            .with("houdini", definition(&["c5.4xlarge", "c5.9xlarge"], OsFamily::Linux));

        let requests = FleetComposer::new(REGION)
            .compose(&fleets, &endpoint(), &network(), &role(), &["sg-workers".to_string()])
            .expect("compose should succeed");

        let names: Vec<_> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["blender", "houdini", "maya"]);
        for request in &requests {
            assert_eq!(request.tags.get("fleet"), Some(&request.name));
            assert_eq!(request.tags.get("team").map(String::as_str), Some("lighting"));
            assert_eq!(request.security_group_ids, vec!["sg-workers".to_string()]);
            assert_eq!(request.subnet_ids, vec!["subnet-priv".to_string()]);
            assert_eq!(request.endpoint, endpoint());
        }
        assert_eq!(requests[1].instance_classes.len(), 2);
        assert_eq!(requests[2].os_family, OsFamily::Windows);
    }

    #[test]
    fn missing_region_image_is_unresolved() {
        let mut fleet = definition(&["c5.2xlarge"], OsFamily::Linux);
        fleet.worker_images.clear();
        let fleets = FleetMap::new().with("blender", fleet);

        let err = FleetComposer::new(REGION)
            .validate(&fleets)
            .expect_err("missing image should fail");
        match err {
            Error::UnresolvedImage {
                fleet,
                region,
                os_family,
            } => {
                assert_eq!(fleet, "blender");
                assert_eq!(region, REGION);
                assert_eq!(os_family, "linux");
            }
            other => panic!("expected UnresolvedImage, got {other:?}"),
        }
    }

    #[test]
    fn bad_class_is_reported_by_name() {
        let fleets = FleetMap::new().with(
            "blender",
            definition(&["c5.2xlarge", "c5.gigantic", "c5.4xlarge"], OsFamily::Linux),
        );

        let err = FleetComposer::new(REGION)
            .validate(&fleets)
            .expect_err("bad class should fail");
        match err {
            Error::InvalidInstanceClass {
                fleet,
                instance_class,
                ..
            } => {
                assert_eq!(fleet, "blender");
                assert_eq!(instance_class, "c5.gigantic");
            }
            other => panic!("expected InvalidInstanceClass, got {other:?}"),
        }
    }

    #[test]
    fn windows_fleets_reject_arm_classes() {
        let fleets = FleetMap::new().with("maya", definition(&["c6g.large"], OsFamily::Windows));
        let err = FleetComposer::new(REGION)
            .validate(&fleets)
            .expect_err("arm class on windows should fail");
        assert_eq!(err.fleet(), Some("maya"));
    }

    #[test]
    fn duplicate_names_never_reach_composition() {
        let fleets = FleetMap::new()
            .with("blender", definition(&["c5.2xlarge"], OsFamily::Linux))
            .with("blender", definition(&["c5.2xlarge"], OsFamily::Linux));
        let err = FleetComposer::new(REGION)
            .compose(&fleets, &endpoint(), &network(), &role(), &[])
            .expect_err("duplicates should fail");
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn fleet_manifest_carries_tags_and_routing() {
        let fleets = FleetMap::new().with("blender", definition(&["c5.2xlarge"], OsFamily::Linux));
        let requests = FleetComposer::new(REGION)
            .compose(&fleets, &endpoint(), &network(), &role(), &["sg-workers".to_string()])
            .expect("compose should succeed");
        let manifest = requests[0].to_manifest();

        assert_eq!(manifest.logical_id, "blenderSpotFleet");
        assert_eq!(manifest.tags.get("fleet").map(String::as_str), Some("blender"));
        assert_eq!(manifest.properties["deadlineGroups"][0], "blender-cloud");
        assert_eq!(manifest.properties["instanceTypes"][0], "c5.2xlarge");
        assert_eq!(
            manifest.properties["renderQueue"],
            "https://renderqueue.deadline.internal:4433"
        );
    }

    #[tokio::test]
    async fn roster_is_configured_once_with_every_fleet() {
        let fleets = FleetMap::new()
            .with("blender", definition(&["c5.2xlarge"], OsFamily::Linux))
            .with("houdini", definition(&["c5.4xlarge"], OsFamily::Linux));
        let requests = FleetComposer::new(REGION)
            .compose(&fleets, &endpoint(), &network(), &role(), &[])
            .expect("compose should succeed");

        let mut mock = MockFleetCapability::new();
        mock.expect_create_fleet().times(2).returning(|request| {
            Ok(FleetHandle {
                fleet_id: format!("sfr-{}", request.name),
                name: request.name.clone(),
            })
        });
        mock.expect_configure_roster()
            .times(1)
            .withf(|roster| roster.fleets.len() == 2 && roster.enable_resource_tracker)
            .returning(|_| Ok(()));

        let handles = provision_roster(&mock, &endpoint(), &requests, true)
            .await
            .expect("roster should be provisioned");
        assert_eq!(handles[0].fleet_id, "sfr-blender");
    }

    #[tokio::test]
    async fn failed_fleet_creation_skips_roster() {
        let fleets = FleetMap::new()
            .with("blender", definition(&["c5.2xlarge"], OsFamily::Linux))
            .with("houdini", definition(&["c5.4xlarge"], OsFamily::Linux));
        let requests = FleetComposer::new(REGION)
            .compose(&fleets, &endpoint(), &network(), &role(), &[])
            .expect("compose should succeed");

        let mut mock = MockFleetCapability::new();
        mock.expect_create_fleet().returning(|request| {
            if request.name == "houdini" {
                Err(Error::provider_permanent("fleet", "capacity rejected"))
            } else {
                Ok(FleetHandle {
                    fleet_id: "sfr-1".to_string(),
                    name: request.name.clone(),
                })
            }
        });
        mock.expect_configure_roster().times(0);

        let result = provision_roster(&mock, &endpoint(), &requests, true).await;
        assert!(result.is_err());
    }
}
