//! Common types for renderfarm: configuration, network model, errors, and logging

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod network;
pub mod telemetry;
pub mod validation;

pub use config::{
    FarmConfig, FleetDefinition, FleetMap, NetworkConfig, OsFamily, StorageConfig, TlsConfig,
    TransportProtocol,
};
pub use error::Error;
pub use network::{
    NetworkContext, NetworkOwnership, NetworkSource, SubnetDescriptor, SubnetPurpose,
};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Tag key every fleet resource carries, valued with the fleet name
pub const FLEET_TAG_KEY: &str = "fleet";

/// Default endpoint hostname
pub const DEFAULT_HOSTNAME: &str = "renderqueue";

/// Default private DNS zone for the endpoint
pub const DEFAULT_ZONE_NAME: &str = "deadline.internal";

/// Default control-plane software version
pub const DEFAULT_CONTROL_PLANE_VERSION: &str = "10.3.1";

/// Default organization on endpoint leaf certificates
pub const DEFAULT_ORGANIZATION: &str = "RFDK-Deadline";

/// Default organizational unit on endpoint leaf certificates
pub const DEFAULT_ORGANIZATIONAL_UNIT: &str = "RenderQueueExternal";
