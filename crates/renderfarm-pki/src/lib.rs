//! Certificate chains for the render queue endpoint
//!
//! Every deployment mints a fresh two-level chain: a self-signed root
//! authority and a leaf identity for the endpoint's fully qualified
//! hostname. Only the leaf bundle (plus the root's public certificate as a
//! trust anchor) leaves this crate; the root private key stays inside
//! [`RootAuthority`] and is zeroized when it is dropped.

#![deny(missing_docs)]

mod authority;
mod chain;
mod error;

pub use authority::{RootAuthority, CA_VALIDITY_YEARS, CERT_VALIDITY_YEARS};
pub use chain::{
    verify_chain, CertificateChain, CertificateChainBuilder, CertificateInfo, LeafIdentity,
    OrgFields, RootIdentity, SubjectName, TlsBundle, PASSPHRASE_LEN,
};
pub use error::{PkiError, Result};

/// Common name of every deployment's root authority
pub const ROOT_COMMON_NAME: &str = "RenderFarmRootCA";

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}
