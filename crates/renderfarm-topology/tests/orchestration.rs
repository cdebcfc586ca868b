//! End-to-end orchestration runs against the in-memory synth backend

use std::sync::Arc;

use renderfarm_common::{
    Error, FarmConfig, NetworkConfig, NetworkContext, NetworkOwnership, StorageConfig,
    SubnetDescriptor, SubnetPurpose,
};
use renderfarm_provision::manifest::resource_types;
use renderfarm_provision::role::{RESOURCE_TRACKER_ROLE, WORKER_ROLE};
use renderfarm_provision::{Capabilities, SynthBackend};
use renderfarm_topology::{
    OutputKey, TopologyOrchestrator, UnitKind, UnitState, ENDPOINT_OUTPUT,
    WORKER_SECURITY_GROUP_NAME, WORKER_SECURITY_GROUP_OUTPUT,
};

const REGION: &str = "ap-southeast-2";

const SCENARIO: &str = r#"
region: ap-southeast-2
hostname: renderqueue
zoneName: deadline.internal
tls:
  enabled: true
fleets:
  blender:
    osFamily: linux
    groups: [blender-cloud]
    pools: [blender]
    instanceTypes: [c5.2xlarge]
    workerImages:
      ap-southeast-2: ami-04b0896de2d480709
    maxCapacity: 5
"#;

fn scenario() -> FarmConfig {
    FarmConfig::from_yaml_str(SCENARIO).expect("scenario should parse")
}

fn backend() -> Arc<SynthBackend> {
    Arc::new(SynthBackend::new(REGION).with_account("123456789012"))
}

fn orchestrator(config: FarmConfig, backend: &Arc<SynthBackend>) -> TopologyOrchestrator {
    TopologyOrchestrator::new(config, Capabilities::from_backend(backend.clone()))
}

fn existing_network() -> NetworkContext {
    NetworkContext {
        network_id: "vpc-existing".to_string(),
        cidr_block: "172.31.0.0/16".parse().expect("valid cidr"),
        subnets: vec![
            SubnetDescriptor {
                subnet_id: "subnet-a".to_string(),
                purpose: SubnetPurpose::PrivateWithEgress,
                availability_zone: "ap-southeast-2a".to_string(),
                cidr_block: None,
            },
            SubnetDescriptor {
                subnet_id: "subnet-b".to_string(),
                purpose: SubnetPurpose::PrivateWithEgress,
                availability_zone: "ap-southeast-2b".to_string(),
                cidr_block: None,
            },
        ],
        ownership: NetworkOwnership::External,
    }
}

#[tokio::test]
async fn scenario_provisions_network_control_plane_and_fleet_in_order() {
    let backend = backend();
    let orchestrator = orchestrator(scenario(), &backend);

    let plan = orchestrator.plan().expect("plan should build");
    assert_eq!(
        plan.unit(UnitKind::ControlPlane).map(|u| u.depends_on.clone()),
        Some(vec![UnitKind::Network])
    );
    assert_eq!(
        plan.unit(UnitKind::Fleet).map(|u| u.depends_on.clone()),
        Some(vec![UnitKind::ControlPlane])
    );
    assert_eq!(
        UnitKind::ControlPlane.outputs(),
        &[
            OutputKey::NetworkId,
            OutputKey::EndpointRef,
            OutputKey::WorkerSecurityGroupIds
        ]
    );

    let report = orchestrator.run().await.expect("scenario should provision");

    let units: Vec<_> = report.units.iter().map(|u| u.unit).collect();
    assert_eq!(
        units,
        vec![UnitKind::Network, UnitKind::ControlPlane, UnitKind::Fleet]
    );
    assert!(report
        .units
        .iter()
        .all(|u| u.state == UnitState::Provisioned));

    let network_id = report.outputs.network_id.clone().expect("network id published");
    assert_eq!(report.stack_outputs.get("VpcId"), Some(&network_id));
    assert_eq!(
        report.outputs.endpoint_ref.as_deref(),
        Some("https://renderqueue.deadline.internal:4433")
    );
    assert_eq!(
        report.stack_outputs.get(ENDPOINT_OUTPUT).map(String::as_str),
        Some("https://renderqueue.deadline.internal:4433")
    );

    let worker_group = report
        .stack_outputs
        .get(WORKER_SECURITY_GROUP_OUTPUT)
        .cloned()
        .expect("worker security group published");
    assert_eq!(report.outputs.worker_security_group_ids, vec![worker_group.clone()]);

    let worker_sg = backend
        .manifests_of(resource_types::SECURITY_GROUP)
        .into_iter()
        .find(|m| m.physical_id.as_deref() == Some(worker_group.as_str()))
        .expect("worker security group recorded");
    assert_eq!(worker_sg.properties["groupName"], WORKER_SECURITY_GROUP_NAME);

    let fleets = backend.manifests_of(resource_types::SPOT_FLEET);
    assert_eq!(fleets.len(), 1);
    assert_eq!(fleets[0].properties["securityGroups"][0], worker_group.as_str());
    assert_eq!(fleets[0].properties["vpcId"], network_id.as_str());
    assert_eq!(fleets[0].tags.get("fleet").map(String::as_str), Some("blender"));
    assert_eq!(
        fleets[0].properties["renderQueue"],
        "https://renderqueue.deadline.internal:4433"
    );
}

#[tokio::test]
async fn endpoint_is_reachable_from_network_and_workers() {
    let backend = backend();
    let report = orchestrator(scenario(), &backend)
        .run()
        .await
        .expect("scenario should provision");
    let worker_group = report.outputs.worker_security_group_ids[0].clone();

    let grants = backend.manifests_of(resource_types::SECURITY_GROUP_INGRESS);
    assert_eq!(grants.len(), 2);
    assert_eq!(grants[0].properties["peer"]["value"], "10.0.0.0/16");
    assert_eq!(grants[1].properties["peer"]["value"], worker_group.as_str());
    assert!(grants.iter().all(|g| g.properties["fromPort"] == 4433));
}

#[tokio::test]
async fn manifests_never_carry_private_keys() {
    let backend = backend();
    orchestrator(scenario(), &backend)
        .run()
        .await
        .expect("scenario should provision");

    let endpoint = backend.manifests_of(resource_types::RENDER_QUEUE);
    assert_eq!(endpoint.len(), 1);
    assert_eq!(
        endpoint[0].properties["trafficEncryption"]["externalTLS"]["enabled"],
        true
    );
    for manifest in backend.manifests() {
        let json = manifest.to_json().expect("manifest should serialize");
        assert!(!json.contains("PRIVATE KEY"), "{} leaked a key", manifest.logical_id);
    }
}

#[tokio::test]
async fn missing_region_image_fails_before_any_call() {
    let mut config = scenario();
    config.region = "us-west-2".to_string();
    let backend = Arc::new(SynthBackend::new("us-west-2"));

    let err = orchestrator(config, &backend)
        .run()
        .await
        .expect_err("unmapped region should fail");
    assert!(matches!(err, Error::UnresolvedImage { ref fleet, .. } if fleet == "blender"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn bad_instance_class_fails_before_any_call() {
    let yaml = SCENARIO.replace("c5.2xlarge", "c5.enormous");
    let config = FarmConfig::from_yaml_str(&yaml).expect("config should parse");
    let backend = backend();

    let err = orchestrator(config, &backend)
        .run()
        .await
        .expect_err("bad class should fail");
    assert!(matches!(
        err,
        Error::InvalidInstanceClass { ref instance_class, .. } if instance_class == "c5.enormous"
    ));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn duplicate_fleet_names_never_reach_composition() {
    let yaml = format!(
        "{SCENARIO}  blender:\n    instanceTypes: [c5.4xlarge]\n    workerImages:\n      ap-southeast-2: ami-0\n    maxCapacity: 2\n"
    );
    let config = FarmConfig::from_yaml_str(&yaml).expect("duplicates should still parse");
    assert_eq!(config.fleets.len(), 2);
    let backend = backend();

    let err = orchestrator(config, &backend)
        .run()
        .await
        .expect_err("duplicate fleet names should fail");
    assert!(err.to_string().contains("duplicate fleet name 'blender'"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn disabled_tls_never_needs_a_certificate() {
    let mut config = scenario();
    config.tls.enabled = false;
    let backend = backend();

    let report = orchestrator(config, &backend)
        .run()
        .await
        .expect("plaintext endpoint should provision");
    assert_eq!(
        report.outputs.endpoint_ref.as_deref(),
        Some("http://renderqueue.deadline.internal:8080")
    );
    let endpoint = backend.manifests_of(resource_types::RENDER_QUEUE);
    assert_eq!(
        endpoint[0].properties["trafficEncryption"]["externalTLS"]["enabled"],
        false
    );
    assert_eq!(
        endpoint[0].properties["trafficEncryption"]["internalProtocol"],
        "HTTPS"
    );
}

#[tokio::test]
async fn looked_up_network_skips_the_network_unit() {
    let mut config = scenario();
    config.network = NetworkConfig {
        vpc_id: Some("vpc-existing".to_string()),
        existing: None,
    };
    let backend = Arc::new(SynthBackend::new(REGION).with_existing_network(existing_network()));

    let report = orchestrator(config, &backend)
        .run()
        .await
        .expect("lookup deployment should provision");

    assert_eq!(report.state_of(UnitKind::Network), None);
    assert_eq!(
        report.provisioned(),
        vec![UnitKind::ControlPlane, UnitKind::Fleet]
    );
    assert_eq!(report.outputs.network_id.as_deref(), Some("vpc-existing"));
    assert!(!report.stack_outputs.contains_key("VpcId"));
    assert_eq!(backend.call_count("synthesize_network"), 0);
    assert!(backend.manifests_of(resource_types::VPC).is_empty());
}

#[tokio::test]
async fn supplied_network_is_used_without_lookup() {
    let mut config = scenario();
    config.network = NetworkConfig {
        vpc_id: None,
        existing: Some(existing_network()),
    };
    let backend = backend();

    let report = orchestrator(config, &backend)
        .run()
        .await
        .expect("supplied network should provision");
    assert_eq!(report.outputs.network_id.as_deref(), Some("vpc-existing"));
    assert_eq!(backend.call_count("lookup_network"), 0);
    assert_eq!(backend.call_count("availability_zones"), 0);
}

#[tokio::test]
async fn lookup_miss_is_network_not_found() {
    let mut config = scenario();
    config.network = NetworkConfig {
        vpc_id: Some("vpc-missing".to_string()),
        existing: None,
    };
    let backend = backend();

    let err = orchestrator(config, &backend)
        .run()
        .await
        .expect_err("missing network should fail");
    assert!(matches!(err, Error::NetworkNotFound { ref network_id } if network_id == "vpc-missing"));
    assert_eq!(backend.call_count("create_endpoint"), 0);
}

#[tokio::test]
async fn fleet_without_control_plane_is_missing_dependency() {
    let mut config = scenario();
    config.network = NetworkConfig {
        vpc_id: Some("vpc-existing".to_string()),
        existing: None,
    };
    let backend = Arc::new(SynthBackend::new(REGION).with_existing_network(existing_network()));

    let err = orchestrator(config, &backend)
        .with_selection(vec![UnitKind::Fleet])
        .run()
        .await
        .expect_err("fleet alone should fail");
    match err {
        Error::MissingDependency { unit, output } => {
            assert_eq!(unit, "fleet");
            assert_eq!(output, "endpoint-ref");
        }
        other => panic!("expected MissingDependency, got {other:?}"),
    }
    assert_eq!(backend.call_count("create_fleet"), 0);
    assert_eq!(backend.call_count("create_role"), 0);
}

#[tokio::test]
async fn control_plane_alone_leaves_fleet_planned() {
    let mut config = scenario();
    config.network = NetworkConfig {
        vpc_id: Some("vpc-existing".to_string()),
        existing: None,
    };
    let backend = Arc::new(SynthBackend::new(REGION).with_existing_network(existing_network()));

    let report = orchestrator(config, &backend)
        .with_selection(vec![UnitKind::ControlPlane])
        .run()
        .await
        .expect("control plane alone should provision");
    assert_eq!(report.state_of(UnitKind::ControlPlane), Some(UnitState::Provisioned));
    assert_eq!(report.state_of(UnitKind::Fleet), Some(UnitState::Planned));
    assert!(report.outputs.fleets.is_empty());
}

#[tokio::test]
async fn account_roles_are_requested_once_per_run() {
    let backend = backend();
    let orchestrator = orchestrator(scenario(), &backend);

    let report = orchestrator.run().await.expect("first run should provision");
    assert_eq!(
        report.roles,
        vec![RESOURCE_TRACKER_ROLE.to_string(), WORKER_ROLE.to_string()]
    );
    assert_eq!(backend.call_count("create_role"), 2);

    // a new run starts with an empty record
    orchestrator.run().await.expect("second run should provision");
    assert_eq!(backend.call_count("create_role"), 4);
}

#[tokio::test]
async fn resource_tracker_role_is_optional() {
    let mut config = scenario();
    config.create_resource_tracker_role = false;
    config.session_manager_access = false;
    let backend = backend();

    let report = orchestrator(config, &backend)
        .run()
        .await
        .expect("run should provision");
    assert_eq!(report.roles, vec![WORKER_ROLE.to_string()]);
    assert_eq!(backend.call_count("enable_session_manager"), 0);
}

#[tokio::test]
async fn roster_is_configured_once_with_every_fleet() {
    let yaml = format!(
        "{SCENARIO}  maya:\n    osFamily: windows\n    instanceTypes: [m5.4xlarge, m5.8xlarge]\n    workerImages:\n      ap-southeast-2: ami-0c1b2c3d\n    maxCapacity: 2\n"
    );
    let config = FarmConfig::from_yaml_str(&yaml).expect("config should parse");
    let backend = backend();

    let report = orchestrator(config, &backend)
        .run()
        .await
        .expect("two fleets should provision");

    let names: Vec<_> = report.outputs.fleets.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["blender", "maya"]);
    assert_eq!(backend.call_count("create_fleet"), 2);
    assert_eq!(backend.call_count("configure_roster"), 1);

    let roster = backend.manifests_of(resource_types::SPOT_EVENT_PLUGIN_CONFIG);
    assert_eq!(
        roster[0].properties["spotFleets"]
            .as_array()
            .map(|fleets| fleets.len()),
        Some(2)
    );
    assert_eq!(
        roster[0].properties["configuration"]["enableResourceTracker"],
        true
    );

    let calls = backend.calls();
    let last_fleet = calls
        .iter()
        .rposition(|c| c == "create_fleet")
        .expect("fleets created");
    let roster_call = calls
        .iter()
        .position(|c| c == "configure_roster")
        .expect("roster configured");
    assert!(roster_call > last_fleet);
}

#[tokio::test]
async fn failed_fleet_creation_publishes_no_roster() {
    let backend = Arc::new(SynthBackend::new(REGION).failing_on("create_fleet"));

    let err = orchestrator(scenario(), &backend)
        .run()
        .await
        .expect_err("fleet failure should abort");
    assert!(matches!(err, Error::Provider { ref capability, retryable: false, .. } if capability == "fleet"));
    assert_eq!(backend.call_count("configure_roster"), 0);
    assert_eq!(backend.call_count("create_endpoint"), 1);
}

#[tokio::test]
async fn storage_unit_publishes_file_system_outputs() {
    let mut config = scenario();
    config.storage = Some(StorageConfig {
        enable_fsx_zfs: true,
        enable_efs: true,
    });
    let backend = backend();

    let report = orchestrator(config, &backend)
        .run()
        .await
        .expect("storage should provision");

    assert_eq!(report.state_of(UnitKind::Storage), Some(UnitState::Provisioned));
    let order: Vec<_> = report.units.iter().map(|u| u.unit).collect();
    assert_eq!(
        order,
        vec![
            UnitKind::Network,
            UnitKind::ControlPlane,
            UnitKind::Storage,
            UnitKind::Fleet
        ]
    );
    for key in ["FsxFileSystemId", "FsxDnsName", "EfsFileSystemId"] {
        assert!(report.stack_outputs.contains_key(key), "missing {key}");
    }

    let fsx = backend.manifests_of(resource_types::FSX_FILE_SYSTEM);
    assert_eq!(
        fsx[0].properties["subnetIds"].as_array().map(|s| s.len()),
        Some(2)
    );
}

#[tokio::test]
async fn synthesized_network_covers_every_zone_with_egress_subnets() {
    let backend = Arc::new(SynthBackend::new(REGION).with_zones([
        "ap-southeast-2a",
        "ap-southeast-2b",
    ]));
    orchestrator(scenario(), &backend)
        .run()
        .await
        .expect("scenario should provision");

    let subnets = backend.manifests_of(resource_types::SUBNET);
    for zone in ["ap-southeast-2a", "ap-southeast-2b"] {
        assert!(subnets.iter().any(|s| {
            s.properties["availabilityZone"] == zone
                && s.properties["subnetType"] == "private-with-egress"
        }));
    }
}
