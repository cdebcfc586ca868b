//! Provisioning building blocks for a render farm control plane
//!
//! Each component turns resolved configuration into declarative requests
//! and hands them to a capability trait. Nothing here talks to a cloud API
//! directly; a backend implements [`capability`] and owns retries.
//!
//! ```text
//! NetworkSource ──► NetworkResolver ──► NetworkContext
//!                                           │
//!         ControlPlaneBacking ◄─────────────┤
//!                 │                         │
//!   TlsBundle ──► EndpointProvisioner ──► Endpoint ── connections() grants
//!                                           │
//!   FleetMap ──► FleetComposer ──► [FleetRequest] ──► provision_roster
//!                                           │
//!   StorageConfig ──► provision_storage ◄───┘
//! ```
//!
//! Account-scoped roles go through one [`SingletonRoleGuard`] per run.

#![deny(missing_docs)]

pub mod capability;
pub mod endpoint;
pub mod fleet;
pub mod manifest;
pub mod network;
pub mod role;
pub mod security;
pub mod storage;
pub mod synth;

pub use capability::{
    Capabilities, ControlPlaneCapability, FleetCapability, NetworkCapability, RoleCapability,
    StorageCapability,
};
pub use endpoint::{
    ControlPlaneBacking, Endpoint, EndpointHandle, EndpointProvisioner, EndpointSpec, TlsMode,
};
pub use fleet::{provision_roster, FleetComposer, FleetHandle, FleetRequest, ValidatedFleet};
pub use manifest::ResourceManifest;
pub use network::{NetworkRequest, NetworkResolver};
pub use role::{RoleRef, SingletonRoleGuard};
pub use security::{Peer, SecurityGroupRef, SecurityGroupRequest};
pub use storage::{provision_storage, ProvisionedStorage};
pub use synth::SynthBackend;
