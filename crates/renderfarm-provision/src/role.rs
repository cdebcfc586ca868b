//! Account-scoped roles and the per-run singleton guard

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::capability::RoleCapability;
use crate::manifest::{resource_types, ResourceManifest};
use renderfarm_common::{Error, Result};

/// Role the resource tracker runs as
pub const RESOURCE_TRACKER_ROLE: &str = "DeadlineResourceTrackerAccessRole";
/// Principal trusted by the resource tracker role
pub const RESOURCE_TRACKER_PRINCIPAL: &str = "lambda.amazonaws.com";
/// Managed policy of the resource tracker role
pub const RESOURCE_TRACKER_POLICY: &str = "AWSThinkboxDeadlineResourceTrackerAccessPolicy";

/// Role fleet workers run as
pub const WORKER_ROLE: &str = "DeadlineWorkerEC2Role";
/// Principal trusted by the worker role
pub const WORKER_PRINCIPAL: &str = "ec2.amazonaws.com";
/// Managed policies of the worker role
pub const WORKER_POLICIES: [&str; 2] = [
    "AWSThinkboxDeadlineSpotEventPluginWorkerPolicy",
    "AmazonSSMManagedInstanceCore",
];

/// Request to create a role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    /// Fixed role name
    pub role_name: String,
    /// Service principal allowed to assume the role
    pub trust_principal: String,
    /// Managed policy names
    pub managed_policies: Vec<String>,
}

impl RoleRequest {
    /// Declarative form
    pub fn to_manifest(&self) -> ResourceManifest {
        ResourceManifest::new(resource_types::ROLE, &self.role_name).with_properties(
            serde_json::json!({
                "roleName": &self.role_name,
                "assumedBy": &self.trust_principal,
                "managedPolicies": &self.managed_policies,
            }),
        )
    }
}

/// A created role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    /// Role name
    pub role_name: String,
    /// Provider reference (e.g. an ARN)
    pub arn: String,
}

#[derive(Debug)]
struct RoleRecord {
    trust_principal: String,
    role: RoleRef,
}

/// Ensures each fixed role name is requested at most once per run
///
/// One guard is shared by every unit of an orchestration run and dropped
/// with it. The lock is held across the creation request, so concurrent
/// callers for the same name wait and then see the recorded reference.
/// A failed creation is not recorded.
///
/// Only this run is tracked: a role created by another deployment in the
/// same account is not detected here.
#[derive(Debug, Default)]
pub struct SingletonRoleGuard {
    record: Mutex<BTreeMap<String, RoleRecord>>,
}

impl SingletonRoleGuard {
    /// Create a guard with an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the role named `role_name`, requesting it on first use
    pub async fn ensure(
        &self,
        capability: &dyn RoleCapability,
        role_name: &str,
        trust_principal: &str,
        managed_policies: &[&str],
    ) -> Result<RoleRef> {
        let mut record = self.record.lock().await;

        if let Some(existing) = record.get(role_name) {
            if existing.trust_principal != trust_principal {
                return Err(Error::validation_for(
                    role_name,
                    format!(
                        "role already requested for principal {}, cannot request it for {}",
                        existing.trust_principal, trust_principal
                    ),
                ));
            }
            debug!(role = role_name, "Role already requested in this run");
            return Ok(existing.role.clone());
        }

        let request = RoleRequest {
            role_name: role_name.to_string(),
            trust_principal: trust_principal.to_string(),
            managed_policies: managed_policies.iter().map(|p| p.to_string()).collect(),
        };
        let role = capability.create_role(&request).await?;
        info!(role = role_name, principal = trust_principal, "Created account-scoped role");

        record.insert(
            role_name.to_string(),
            RoleRecord {
                trust_principal: trust_principal.to_string(),
                role: role.clone(),
            },
        );
        Ok(role)
    }

    /// Resource tracker role
    pub async fn ensure_resource_tracker(&self, capability: &dyn RoleCapability) -> Result<RoleRef> {
        self.ensure(
            capability,
            RESOURCE_TRACKER_ROLE,
            RESOURCE_TRACKER_PRINCIPAL,
            &[RESOURCE_TRACKER_POLICY],
        )
        .await
    }

    /// Worker instance role
    pub async fn ensure_worker(&self, capability: &dyn RoleCapability) -> Result<RoleRef> {
        self.ensure(capability, WORKER_ROLE, WORKER_PRINCIPAL, &WORKER_POLICIES)
            .await
    }

    /// Names recorded so far, sorted
    pub async fn recorded(&self) -> Vec<String> {
        self.record.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockRoleCapability;
    use std::sync::Arc;

    fn role_ref(request: &RoleRequest) -> RoleRef {
        RoleRef {
            role_name: request.role_name.clone(),
            arn: format!("arn:aws:iam::123456789012:role/{}", request.role_name),
        }
    }

    #[tokio::test]
    async fn ensure_twice_requests_once() {
        let mut mock = MockRoleCapability::new();
        mock.expect_create_role()
            .times(1)
            .returning(|request| Ok(role_ref(request)));

        let guard = SingletonRoleGuard::new();
        let first = guard
            .ensure(&mock, "R", "lambda.amazonaws.com", &["Policy"])
            .await
            .expect("first ensure should succeed");
        let second = guard
            .ensure(&mock, "R", "lambda.amazonaws.com", &["Policy"])
            .await
            .expect("second ensure should succeed");

        assert_eq!(first, second);
        assert_eq!(guard.recorded().await, vec!["R".to_string()]);
    }

    #[tokio::test]
    async fn distinct_names_are_requested_separately() {
        let mut mock = MockRoleCapability::new();
        mock.expect_create_role()
            .times(2)
            .returning(|request| Ok(role_ref(request)));

        let guard = SingletonRoleGuard::new();
        guard
            .ensure_resource_tracker(&mock)
            .await
            .expect("tracker role should be created");
        guard
            .ensure_worker(&mock)
            .await
            .expect("worker role should be created");

        assert_eq!(
            guard.recorded().await,
            vec![RESOURCE_TRACKER_ROLE.to_string(), WORKER_ROLE.to_string()]
        );
    }

    #[tokio::test]
    async fn failed_creation_is_not_recorded() {
        let mut mock = MockRoleCapability::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_create_role()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::provider_for("role", "throttled")));
        mock.expect_create_role()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|request| Ok(role_ref(request)));

        let guard = SingletonRoleGuard::new();
        let err = guard
            .ensure(&mock, "R", "lambda.amazonaws.com", &[])
            .await
            .expect_err("first attempt should fail");
        assert!(err.is_retryable());
        assert!(guard.recorded().await.is_empty());

        guard
            .ensure(&mock, "R", "lambda.amazonaws.com", &[])
            .await
            .expect("second attempt should succeed");
    }

    #[tokio::test]
    async fn conflicting_principal_is_rejected() {
        let mut mock = MockRoleCapability::new();
        mock.expect_create_role()
            .times(1)
            .returning(|request| Ok(role_ref(request)));

        let guard = SingletonRoleGuard::new();
        guard
            .ensure(&mock, "R", "lambda.amazonaws.com", &[])
            .await
            .expect("first ensure should succeed");
        let err = guard
            .ensure(&mock, "R", "ec2.amazonaws.com", &[])
            .await
            .expect_err("principal conflict should fail");
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let mut mock = MockRoleCapability::new();
        mock.expect_create_role()
            .times(1)
            .returning(|request| Ok(role_ref(request)));
        let mock = Arc::new(mock);
        let guard = Arc::new(SingletonRoleGuard::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let mock = mock.clone();
            handles.push(tokio::spawn(async move {
                guard.ensure_worker(mock.as_ref()).await
            }));
        }

        let mut refs = Vec::new();
        for handle in handles {
            refs.push(
                handle
                    .await
                    .expect("task should not panic")
                    .expect("ensure should succeed"),
            );
        }
        assert!(refs.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn role_manifest_names_principal_and_policies() {
        let manifest = RoleRequest {
            role_name: WORKER_ROLE.to_string(),
            trust_principal: WORKER_PRINCIPAL.to_string(),
            managed_policies: WORKER_POLICIES.iter().map(|p| p.to_string()).collect(),
        }
        .to_manifest();
        assert_eq!(manifest.properties["assumedBy"], "ec2.amazonaws.com");
        assert_eq!(
            manifest.properties["managedPolicies"][1],
            "AmazonSSMManagedInstanceCore"
        );
    }
}
