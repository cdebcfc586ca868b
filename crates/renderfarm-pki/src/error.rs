//! PKI errors and their mapping onto the provisioning error type

use thiserror::Error;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// The root private key could not be loaded for signing
    #[error("root key unavailable: {0}")]
    KeyUnavailable(String),

    /// The hostname cannot be used as a leaf identity
    #[error("invalid hostname '{hostname}': {reason}")]
    InvalidHostname {
        /// Rejected hostname
        hostname: String,
        /// Why it was rejected
        reason: String,
    },

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// A chain did not verify
    #[error("chain verification failed: {0}")]
    VerificationFailed(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

impl PkiError {
    /// Convert into the provisioning error for an endpoint hostname
    ///
    /// Hostname problems are configuration errors; everything else means
    /// the chain could not be built.
    pub fn into_error(self, hostname: &str) -> renderfarm_common::Error {
        match self {
            PkiError::InvalidHostname { reason, .. } => {
                renderfarm_common::Error::validation_for_field(hostname, "hostname", reason)
            }
            other => renderfarm_common::Error::signing_failure(hostname, other.to_string()),
        }
    }
}
