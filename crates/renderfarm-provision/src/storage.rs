//! Shared worker storage
//!
//! An optional OpenZFS file system and an optional elastic file system,
//! both behind one storage security group that only the network range can
//! reach.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capability::{NetworkCapability, StorageCapability};
use crate::endpoint::placement_subnet_ids;
use crate::manifest::{resource_types, ResourceManifest};
use crate::security::{IngressRule, Peer, Protocol, SecurityGroupRef, SecurityGroupRequest};
use renderfarm_common::{Error, NetworkContext, Result, StorageConfig};

/// Storage capacity of the OpenZFS file system in GiB
pub const FSX_STORAGE_CAPACITY_GIB: u32 = 128;
/// Throughput of the OpenZFS file system in MB/s
pub const FSX_THROUGHPUT_MBPS: u32 = 160;
/// Export options of the OpenZFS root volume
pub const FSX_NFS_EXPORT_OPTIONS: &str = "rw,no_root_squash";

/// Output key for the OpenZFS file system id
pub const FSX_FILE_SYSTEM_ID_OUTPUT: &str = "FsxFileSystemId";
/// Output key for the OpenZFS DNS name
pub const FSX_DNS_NAME_OUTPUT: &str = "FsxDnsName";
/// Output key for the elastic file system id
pub const EFS_FILE_SYSTEM_ID_OUTPUT: &str = "EfsFileSystemId";

const NFS_PORT: u16 = 2049;
const PORTMAPPER_PORT: u16 = 111;
const FSX_AUX_PORTS: (u16, u16) = (20001, 20003);

/// Request to create a shared file system
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FileSystemRequest {
    /// Multi-AZ OpenZFS
    FsxOpenZfs {
        /// Network
        network_id: String,
        /// Exactly two subnets in distinct zones
        subnet_ids: Vec<String>,
        /// Subnet of the active file server
        preferred_subnet_id: String,
        /// Security group guarding the file system
        security_group_id: String,
        /// Capacity in GiB
        storage_capacity_gib: u32,
        /// Throughput in MB/s
        throughput_mbps: u32,
        /// Clients allowed by the root volume export
        nfs_export_clients: String,
        /// Export options
        nfs_export_options: String,
    },
    /// Elastic file system
    Efs {
        /// Network
        network_id: String,
        /// One mount target per subnet
        subnet_ids: Vec<String>,
        /// Security group guarding the mount targets
        security_group_id: String,
        /// Automatic backups
        enable_automatic_backups: bool,
    },
}

impl FileSystemRequest {
    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        match self {
            FileSystemRequest::FsxOpenZfs {
                network_id,
                subnet_ids,
                preferred_subnet_id,
                security_group_id,
                storage_capacity_gib,
                throughput_mbps,
                nfs_export_clients,
                nfs_export_options,
            } => ResourceManifest::new(resource_types::FSX_FILE_SYSTEM, "FsxFileSystem")
                .with_properties(serde_json::json!({
                    "fileSystemType": "OPENZFS",
                    "vpcId": network_id,
                    "subnetIds": subnet_ids,
                    "securityGroupIds": [security_group_id],
                    "storageCapacity": storage_capacity_gib,
                    "openZfsConfiguration": {
                        "deploymentType": "MULTI_AZ_1",
                        "throughputCapacity": throughput_mbps,
                        "preferredSubnetId": preferred_subnet_id,
                        "rootVolumeConfiguration": {
                            "nfsExports": [{
                                "clientConfigurations": [{
                                    "clients": nfs_export_clients,
                                    "options": nfs_export_options.split(',').collect::<Vec<_>>(),
                                }],
                            }],
                        },
                    },
                })),
            FileSystemRequest::Efs {
                network_id,
                subnet_ids,
                security_group_id,
                enable_automatic_backups,
            } => ResourceManifest::new(resource_types::EFS_FILE_SYSTEM, "EfsFileSystem")
                .with_properties(serde_json::json!({
                    "vpcId": network_id,
                    "subnetIds": subnet_ids,
                    "securityGroup": security_group_id,
                    "enableAutomaticBackups": enable_automatic_backups,
                })),
        }
    }
}

/// A created file system
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemRef {
    /// Provider file system id
    pub file_system_id: String,
    /// DNS name clients mount, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

/// Storage security group: no outbound, NFS and RPC from the network range
pub fn storage_security_group(network: &NetworkContext) -> SecurityGroupRequest {
    let peer = Peer::Ipv4Cidr(network.cidr_block);
    let mut request = SecurityGroupRequest::new(
        "StorageSecurityGroup",
        "Shared storage for render workers",
        &network.network_id,
        false,
    );
    for protocol in [Protocol::Tcp, Protocol::Udp] {
        request = request
            .with_ingress(IngressRule::port(peer.clone(), protocol, NFS_PORT, "NFS"))
            .with_ingress(IngressRule::port(
                peer.clone(),
                protocol,
                PORTMAPPER_PORT,
                "RPC portmapper",
            ))
            .with_ingress(IngressRule::range(
                peer.clone(),
                protocol,
                FSX_AUX_PORTS.0,
                FSX_AUX_PORTS.1,
                "FSx ZFS mount, lock and status",
            ));
    }
    request
}

/// File system requests for `config`, guarded by `security_group_id`
pub fn plan_file_systems(
    network: &NetworkContext,
    config: &StorageConfig,
    security_group_id: &str,
) -> Result<Vec<FileSystemRequest>> {
    let mut requests = Vec::new();

    if config.enable_fsx_zfs {
        let subnet_ids = fsx_subnets(network)?;
        requests.push(FileSystemRequest::FsxOpenZfs {
            network_id: network.network_id.clone(),
            preferred_subnet_id: subnet_ids[0].clone(),
            subnet_ids,
            security_group_id: security_group_id.to_string(),
            storage_capacity_gib: FSX_STORAGE_CAPACITY_GIB,
            throughput_mbps: FSX_THROUGHPUT_MBPS,
            nfs_export_clients: network.cidr_block.to_string(),
            nfs_export_options: FSX_NFS_EXPORT_OPTIONS.to_string(),
        });
    }

    if config.enable_efs {
        let subnet_ids = placement_subnet_ids(network);
        if subnet_ids.is_empty() {
            return Err(Error::validation_for(
                &network.network_id,
                "network has no private subnets for file system mount targets",
            ));
        }
        requests.push(FileSystemRequest::Efs {
            network_id: network.network_id.clone(),
            subnet_ids,
            security_group_id: security_group_id.to_string(),
            enable_automatic_backups: false,
        });
    }

    Ok(requests)
}

// First placement subnet of each of the first two zones, in zone order.
fn fsx_subnets(network: &NetworkContext) -> Result<Vec<String>> {
    let placement = network.placement_subnets();
    let mut subnet_ids: Vec<String> = Vec::with_capacity(2);
    let mut zones: Vec<&str> = Vec::with_capacity(2);
    for subnet in placement {
        if zones.contains(&subnet.availability_zone.as_str()) {
            continue;
        }
        zones.push(&subnet.availability_zone);
        subnet_ids.push(subnet.subnet_id.clone());
        if subnet_ids.len() == 2 {
            return Ok(subnet_ids);
        }
    }
    Err(Error::validation_for_field(
        &network.network_id,
        "storage.enableFsxZfs",
        "multi-AZ file system needs private subnets in at least two availability zones",
    ))
}

/// Storage created by one run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedStorage {
    /// Storage security group
    pub security_group: SecurityGroupRef,
    /// OpenZFS file system, when enabled
    pub fsx: Option<FileSystemRef>,
    /// Elastic file system, when enabled
    pub efs: Option<FileSystemRef>,
}

impl ProvisionedStorage {
    /// Durable outputs keyed by output name
    pub fn outputs(&self) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        if let Some(fsx) = &self.fsx {
            outputs.insert(
                FSX_FILE_SYSTEM_ID_OUTPUT.to_string(),
                fsx.file_system_id.clone(),
            );
            if let Some(dns_name) = &fsx.dns_name {
                outputs.insert(FSX_DNS_NAME_OUTPUT.to_string(), dns_name.clone());
            }
        }
        if let Some(efs) = &self.efs {
            outputs.insert(
                EFS_FILE_SYSTEM_ID_OUTPUT.to_string(),
                efs.file_system_id.clone(),
            );
        }
        outputs
    }
}

/// Create the storage security group and every enabled file system
///
/// Subnet checks run before the security group is requested.
pub async fn provision_storage(
    network_capability: &dyn NetworkCapability,
    storage_capability: &dyn StorageCapability,
    network: &NetworkContext,
    config: &StorageConfig,
) -> Result<ProvisionedStorage> {
    // dry run with a placeholder id to surface subnet errors early
    plan_file_systems(network, config, "")?;

    let security_group = network_capability
        .create_security_group(&storage_security_group(network))
        .await?;

    let mut storage = ProvisionedStorage {
        security_group: security_group.clone(),
        fsx: None,
        efs: None,
    };
    for request in plan_file_systems(network, config, &security_group.security_group_id)? {
        let created = storage_capability.create_file_system(&request).await?;
        match request {
            FileSystemRequest::FsxOpenZfs { .. } => storage.fsx = Some(created),
            FileSystemRequest::Efs { .. } => storage.efs = Some(created),
        }
    }

    info!(
        security_group = %security_group.security_group_id,
        fsx = storage.fsx.is_some(),
        efs = storage.efs.is_some(),
        "Provisioned shared storage"
    );
    Ok(storage)
}
