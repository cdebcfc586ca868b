//! Drives one provisioning run over a [`TopologyPlan`]
//!
//! A run validates everything it can before the first capability call,
//! resolves an externally supplied network as a read dependency, then walks
//! the plan's units in topological order. A unit moves `Planned → Ready`
//! only when every producer it depends on is `Provisioned` and every input
//! it declares has been published; otherwise the run stops with
//! `MissingDependency` before that unit makes any call.
//!
//! Units are awaited one at a time. Resources of units that finished before
//! a failure stay live; teardown belongs to the backend.

use std::collections::BTreeMap;

use tracing::{debug, error, info};

use crate::outputs::UnitOutputs;
use crate::plan::TopologyPlan;
use crate::report::{OrchestrationReport, UnitReport};
use crate::unit::{ProvisioningUnit, UnitKind, UnitState};
use renderfarm_common::{Error, FarmConfig, NetworkContext, Result};
use renderfarm_pki::{CertificateChain, CertificateChainBuilder, OrgFields};
use renderfarm_provision::endpoint::{EndpointSpec, TlsMode};
use renderfarm_provision::network::VPC_ID_OUTPUT;
use renderfarm_provision::{
    provision_roster, provision_storage, Capabilities, ControlPlaneBacking, EndpointProvisioner,
    FleetComposer, NetworkResolver, SecurityGroupRequest, SingletonRoleGuard,
};

/// Stack output naming the endpoint reference
pub const ENDPOINT_OUTPUT: &str = "RenderQueueEndpoint";

/// Stack output naming the worker security group
pub const WORKER_SECURITY_GROUP_OUTPUT: &str = "WorkerSecurityGroupId";

const WORKER_SECURITY_GROUP: &str = "WorkerSecurityGroup";

/// Provider-side name of the worker security group
pub const WORKER_SECURITY_GROUP_NAME: &str = "Deadline-Render-Worker-SG";

/// Fleet roster setting: the resource tracker follows fleet instances
const ROSTER_RESOURCE_TRACKER: bool = true;

/// Runs the units of one configuration against a set of capabilities
pub struct TopologyOrchestrator {
    config: FarmConfig,
    capabilities: Capabilities,
    selection: Option<Vec<UnitKind>>,
}

/// Mutable state of one run
struct RunState {
    states: BTreeMap<UnitKind, UnitState>,
    outputs: UnitOutputs,
    stack_outputs: BTreeMap<String, String>,
    guard: SingletonRoleGuard,
}

impl RunState {
    fn new(plan: &TopologyPlan) -> Self {
        Self {
            states: plan
                .units()
                .iter()
                .map(|u| (u.kind, UnitState::Planned))
                .collect(),
            outputs: UnitOutputs::new(),
            stack_outputs: BTreeMap::new(),
            guard: SingletonRoleGuard::new(),
        }
    }

    fn state(&self, kind: UnitKind) -> UnitState {
        self.states.get(&kind).copied().unwrap_or(UnitState::Planned)
    }

    // Planned -> Ready only once every producer of `unit` is provisioned.
    fn ensure_ready(&self, unit: &ProvisioningUnit) -> Result<()> {
        self.outputs.require_inputs(unit.kind)?;
        match unit
            .depends_on
            .iter()
            .find(|producer| self.state(**producer) != UnitState::Provisioned)
        {
            Some(producer) => Err(Error::missing_dependency(
                unit.kind.to_string(),
                producer.to_string(),
            )),
            None => Ok(()),
        }
    }

    fn transition(&mut self, kind: UnitKind, state: UnitState) {
        debug!(unit = %kind, ?state, "Unit state changed");
        self.states.insert(kind, state);
    }
}

impl TopologyOrchestrator {
    /// Orchestrator for `config` using `capabilities`
    pub fn new(config: FarmConfig, capabilities: Capabilities) -> Self {
        Self {
            config,
            capabilities,
            selection: None,
        }
    }

    /// Materialize only these units
    pub fn with_selection(mut self, units: Vec<UnitKind>) -> Self {
        self.selection = Some(units);
        self
    }

    /// The configuration this orchestrator runs
    pub fn config(&self) -> &FarmConfig {
        &self.config
    }

    /// The unit plan for the configuration
    pub fn plan(&self) -> Result<TopologyPlan> {
        TopologyPlan::from_config(&self.config, self.selection.as_deref())
    }

    /// Validate the configuration and every fleet without any capability call
    pub fn validate(&self) -> Result<TopologyPlan> {
        self.config.validate()?;
        let fleets = FleetComposer::new(&self.config.region).validate(&self.config.fleets)?;
        debug!(fleets = fleets.len(), "Fleet definitions resolved");
        self.plan()
    }

    /// Run every selected unit in order
    pub async fn run(&self) -> Result<OrchestrationReport> {
        let plan = self.validate()?;
        let order = plan.order();
        info!(
            units = ?order,
            region = %self.config.region,
            "Starting provisioning run"
        );

        let mut run = RunState::new(&plan);

        let source = self.config.network_source()?;
        if source.is_external() {
            let network = self.resolver().resolve(&source).await?;
            run.outputs.publish_network(network);
        }

        for kind in order {
            let Some(unit) = plan.unit(kind) else {
                continue;
            };
            if !unit.selected {
                debug!(unit = %kind, "Skipping unselected unit");
                continue;
            }

            run.ensure_ready(unit)?;
            run.transition(kind, UnitState::Ready);
            info!(unit = %kind, "Provisioning unit");

            let result = match kind {
                UnitKind::Network => self.provision_network(&mut run).await,
                UnitKind::ControlPlane => self.provision_control_plane(&mut run).await,
                UnitKind::Storage => self.provision_storage(&mut run).await,
                UnitKind::Fleet => self.provision_fleets(&mut run).await,
            };
            if let Err(e) = result {
                error!(unit = %kind, error = %e, "Unit failed");
                return Err(e);
            }

            run.transition(kind, UnitState::Provisioned);
            info!(unit = %kind, "Unit provisioned");
        }

        let roles = run.guard.recorded().await;
        let report = OrchestrationReport {
            units: plan
                .order()
                .into_iter()
                .filter_map(|kind| plan.unit(kind))
                .map(|unit| UnitReport {
                    unit: unit.kind,
                    state: run.state(unit.kind),
                    selected: unit.selected,
                })
                .collect(),
            outputs: run.outputs.snapshot(),
            stack_outputs: run.stack_outputs,
            roles,
        };
        info!(
            provisioned = report.provisioned().len(),
            "Provisioning run complete"
        );
        Ok(report)
    }

    fn resolver(&self) -> NetworkResolver {
        NetworkResolver::new(self.capabilities.network.clone(), &self.config.region)
    }

    async fn provision_network(&self, run: &mut RunState) -> Result<()> {
        let network = self.resolver().synthesize().await?;
        run.stack_outputs
            .insert(VPC_ID_OUTPUT.to_string(), network.network_id.clone());
        run.outputs.publish_network(network);
        Ok(())
    }

    fn build_chain(&self, fqdn: &str) -> Result<CertificateChain> {
        let org = OrgFields {
            organization: self.config.tls.organization.clone(),
            organizational_unit: self.config.tls.organizational_unit.clone(),
        };
        let chain = CertificateChainBuilder::new()
            .build(fqdn, &org)
            .map_err(|e| e.into_error(fqdn))?;
        let info = chain.verify().map_err(|e| e.into_error(fqdn))?;
        debug!(
            hostname = fqdn,
            issuer = %info.issuer_common_name,
            "Built endpoint certificate chain"
        );
        Ok(chain)
    }

    fn endpoint_spec(&self, network: &NetworkContext) -> EndpointSpec {
        EndpointSpec {
            hostname: self.config.hostname.clone(),
            zone_name: self.config.zone_name.clone(),
            network_id: network.network_id.clone(),
            tls_mode: if self.config.tls.enabled {
                TlsMode::Enabled
            } else {
                TlsMode::Disabled
            },
            internal_protocol: self.config.tls.internal_protocol,
        }
    }

    async fn provision_control_plane(&self, run: &mut RunState) -> Result<()> {
        let network = run.outputs.network(UnitKind::ControlPlane)?.clone();
        let control_plane = self.capabilities.control_plane.clone();

        let spec = self.endpoint_spec(&network);
        let chain = match spec.tls_mode {
            TlsMode::Enabled => Some(self.build_chain(&spec.fqdn())?),
            TlsMode::Disabled => None,
        };
        let bundle = chain.as_ref().map(|c| &c.bundle);
        spec.validate(&network, bundle)?;

        let backing = ControlPlaneBacking::provision(
            control_plane.as_ref(),
            &network,
            &self.config.zone_name,
            &self.config.control_plane_version,
        )
        .await?;

        let endpoint = EndpointProvisioner::new(control_plane.clone())
            .provision(&network, &spec, bundle, &backing)
            .await?;

        let worker_group = self
            .capabilities
            .network
            .create_security_group(
                &SecurityGroupRequest::new(
                    WORKER_SECURITY_GROUP,
                    "Render workers",
                    &network.network_id,
                    true,
                )
                .with_group_name(WORKER_SECURITY_GROUP_NAME),
            )
            .await?;
        endpoint
            .connections()
            .allow_default_port_from(&worker_group.as_peer())
            .await?;

        if self.config.session_manager_access {
            control_plane
                .enable_session_manager(endpoint.handle())
                .await?;
        }

        if self.config.create_resource_tracker_role {
            run.guard
                .ensure_resource_tracker(self.capabilities.roles.as_ref())
                .await?;
        }

        let handle = endpoint.handle().clone();
        run.stack_outputs
            .insert(ENDPOINT_OUTPUT.to_string(), handle.endpoint_ref());
        run.stack_outputs.insert(
            WORKER_SECURITY_GROUP_OUTPUT.to_string(),
            worker_group.security_group_id.clone(),
        );
        run.outputs
            .publish_control_plane(network, handle, vec![worker_group.security_group_id]);
        Ok(())
    }

    async fn provision_storage(&self, run: &mut RunState) -> Result<()> {
        let network = run.outputs.network(UnitKind::Storage)?.clone();
        let config = self.config.storage.as_ref().ok_or_else(|| {
            Error::internal_with_context("orchestrator", "storage unit planned without storage config")
        })?;

        let storage = provision_storage(
            self.capabilities.network.as_ref(),
            self.capabilities.storage.as_ref(),
            &network,
            config,
        )
        .await?;

        run.stack_outputs.extend(storage.outputs());
        run.outputs.publish_storage(storage);
        Ok(())
    }

    async fn provision_fleets(&self, run: &mut RunState) -> Result<()> {
        let network = run.outputs.network(UnitKind::Fleet)?.clone();
        let endpoint = run.outputs.endpoint(UnitKind::Fleet)?.clone();
        let security_groups = run.outputs.worker_security_groups(UnitKind::Fleet)?.to_vec();

        let role = run
            .guard
            .ensure_worker(self.capabilities.roles.as_ref())
            .await?;

        let requests = FleetComposer::new(&self.config.region).compose(
            &self.config.fleets,
            &endpoint,
            &network,
            &role,
            &security_groups,
        )?;

        let fleets = provision_roster(
            self.capabilities.fleets.as_ref(),
            &endpoint,
            &requests,
            ROSTER_RESOURCE_TRACKER,
        )
        .await?;
        run.outputs.publish_fleets(fleets);
        Ok(())
    }
}
