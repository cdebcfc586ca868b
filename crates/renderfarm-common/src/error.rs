//! Error types for render farm provisioning
//!
//! Errors are structured with fields to aid debugging when a provisioning run
//! aborts. Each variant carries the fleet, hostname, unit, or capability that
//! was being handled when the failure happened.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for renderfarm operations
#[derive(Debug, Error)]
pub enum Error {
    /// An existing network was referenced by id but the lookup found nothing
    #[error("network not found: {network_id}")]
    NetworkNotFound {
        /// The identifier that was looked up
        network_id: String,
    },

    /// The certificate chain for an endpoint could not be built
    #[error("certificate signing failed for {hostname}: {message}")]
    SigningFailure {
        /// Hostname the leaf certificate was being issued for
        hostname: String,
        /// Description of what failed
        message: String,
    },

    /// Endpoint TLS settings are inconsistent with the supplied bundle
    #[error("invalid TLS configuration for {hostname}: {message}")]
    InvalidTlsConfiguration {
        /// Fully qualified endpoint hostname
        hostname: String,
        /// Description of the inconsistency
        message: String,
    },

    /// A fleet has no machine image for the deployment region
    #[error("fleet {fleet}: no {os_family} image mapped for region {region}")]
    UnresolvedImage {
        /// Fleet name
        fleet: String,
        /// Deployment region that had no entry
        region: String,
        /// OS family of the fleet (linux, windows)
        os_family: String,
    },

    /// A fleet lists an instance class that does not parse or is unknown
    #[error("fleet {fleet}: invalid instance class '{instance_class}': {message}")]
    InvalidInstanceClass {
        /// Fleet name
        fleet: String,
        /// The offending instance class string, verbatim
        instance_class: String,
        /// Why it was rejected
        message: String,
    },

    /// A unit needed an output that no earlier unit in this run published
    #[error("unit {unit} is missing dependency output {output}")]
    MissingDependency {
        /// Unit whose inputs could not be satisfied
        unit: String,
        /// The output key that was absent
        output: String,
    },

    /// Configuration validation error
    #[error("validation error for {context}: {message}")]
    Validation {
        /// What was being validated (fleet name, "config", ...)
        context: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "fleets.blender.maxCapacity")
        field: Option<String>,
    },

    /// A provisioning capability call failed
    #[error("provider error [{capability}]: {message}")]
    Provider {
        /// Capability that failed (network, control-plane, fleet, role, storage)
        capability: String,
        /// Description of what failed
        message: String,
        /// Whether the collaborator reported the failure as retryable
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The format or resource being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "sequence", "orchestrator")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            context: "config".to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error scoped to a named entity (fleet, role, ...)
    pub fn validation_for(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with context and field path
    pub fn validation_for_field(
        context: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provider error for a capability
    pub fn provider_for(capability: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            capability: capability.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g., rejected request)
    pub fn provider_permanent(capability: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            capability: capability.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a missing-dependency error for a unit
    pub fn missing_dependency(unit: impl Into<String>, output: impl Into<String>) -> Self {
        Self::MissingDependency {
            unit: unit.into(),
            output: output.into(),
        }
    }

    /// Create a signing failure for a hostname
    pub fn signing_failure(hostname: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SigningFailure {
            hostname: hostname.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid TLS configuration error for a hostname
    pub fn invalid_tls(hostname: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTlsConfiguration {
            hostname: hostname.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with format context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only provider errors flagged retryable by the collaborator qualify.
    /// Everything else needs a configuration or code fix; nothing in this
    /// crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { retryable, .. } => *retryable,
            Error::NetworkNotFound { .. }
            | Error::SigningFailure { .. }
            | Error::InvalidTlsConfiguration { .. }
            | Error::UnresolvedImage { .. }
            | Error::InvalidInstanceClass { .. }
            | Error::MissingDependency { .. }
            | Error::Validation { .. }
            | Error::Serialization { .. }
            | Error::Internal { .. } => false,
        }
    }

    /// Fleet name if this error is about a specific fleet definition
    pub fn fleet(&self) -> Option<&str> {
        match self {
            Error::UnresolvedImage { fleet, .. } => Some(fleet),
            Error::InvalidInstanceClass { fleet, .. } => Some(fleet),
            _ => None,
        }
    }

    /// True when the error was raised by configuration checks rather than
    /// by a capability call
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::UnresolvedImage { .. }
                | Error::InvalidInstanceClass { .. }
                | Error::InvalidTlsConfiguration { .. }
        )
    }
}
