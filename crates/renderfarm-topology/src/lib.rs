//! Provisioning units and the orchestrator that sequences them
//!
//! ## Units
//!
//! ```text
//! network ──► control-plane ──► fleet
//!    │
//!    └──────► storage
//! ```
//!
//! - **network**: only when synthesized. A looked-up or supplied network is
//!   resolved before any unit runs and published as a read dependency.
//! - **control-plane**: publishes the endpoint reference and the worker
//!   security group ids.
//! - **storage**: optional, depends on the network alone.
//! - **fleet**: consumes every control-plane output unchanged.

#![deny(missing_docs)]

mod orchestrator;
mod outputs;
mod plan;
mod report;
mod sequence;
mod unit;

pub use orchestrator::{
    TopologyOrchestrator, ENDPOINT_OUTPUT, WORKER_SECURITY_GROUP_NAME, WORKER_SECURITY_GROUP_OUTPUT,
};
pub use outputs::{PublishedOutputs, UnitOutputs};
pub use plan::TopologyPlan;
pub use report::{OrchestrationReport, UnitReport};
pub use sequence::{UnitGroup, UnitSequence};
pub use unit::{OutputKey, ProvisioningUnit, UnitKind, UnitState};
