//! Chain building, transport bundles, and verification

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use crate::authority::RootAuthority;
use crate::error::{PkiError, Result};
use crate::{parse_pem, ROOT_COMMON_NAME};
use renderfarm_common::{DEFAULT_ORGANIZATION, DEFAULT_ORGANIZATIONAL_UNIT};

/// Length of generated bundle passphrases
pub const PASSPHRASE_LEN: usize = 32;

/// Organization fields of a leaf subject
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrgFields {
    /// Organization (O)
    pub organization: String,
    /// Organizational unit (OU)
    pub organizational_unit: String,
}

impl Default for OrgFields {
    fn default() -> Self {
        Self {
            organization: DEFAULT_ORGANIZATION.to_string(),
            organizational_unit: DEFAULT_ORGANIZATIONAL_UNIT.to_string(),
        }
    }
}

/// Distinguished name fields tracked for an identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectName {
    /// Common name (CN)
    pub common_name: String,
    /// Organization (O), when present
    pub organization: Option<String>,
    /// Organizational unit (OU), when present
    pub organizational_unit: Option<String>,
}

impl SubjectName {
    fn common(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            organization: None,
            organizational_unit: None,
        }
    }
}

/// Public half of the root identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootIdentity {
    /// Root subject
    pub identity: SubjectName,
    /// PEM-encoded root certificate
    pub cert_pem: String,
}

/// The leaf identity issued for one endpoint hostname
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafIdentity {
    /// Equal to the hostname the leaf was issued for
    pub common_name: String,
    /// Leaf subject
    pub subject: SubjectName,
    /// Subject of the root that signed this leaf
    pub signed_by: SubjectName,
    /// PEM-encoded leaf certificate
    pub cert_pem: String,
}

/// Leaf material packaged for import into a TLS-terminating endpoint
#[derive(Clone)]
pub struct TlsBundle {
    hostname: String,
    cert_pem: String,
    chain_pem: String,
    trust_anchor_pem: String,
    key_pem: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
}

impl TlsBundle {
    /// Hostname the leaf was issued for
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// PEM-encoded leaf certificate
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Full chain, leaf first then root
    pub fn chain_pem(&self) -> &str {
        &self.chain_pem
    }

    /// Root certificate clients need to trust the endpoint
    pub fn trust_anchor_pem(&self) -> &str {
        &self.trust_anchor_pem
    }

    /// PEM-encoded leaf private key
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Passphrase protecting the key at import, if one was generated
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().map(String::as_str)
    }
}

impl std::fmt::Debug for TlsBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsBundle")
            .field("hostname", &self.hostname)
            .field("has_passphrase", &self.passphrase.is_some())
            .finish_non_exhaustive()
    }
}

/// A root, the leaf it signed, and the leaf's transport bundle
#[derive(Clone, Debug)]
pub struct CertificateChain {
    /// Root identity (public parts only)
    pub root: RootIdentity,
    /// Leaf identity
    pub leaf: LeafIdentity,
    /// Transport bundle for the endpoint
    pub bundle: TlsBundle,
}

impl CertificateChain {
    /// Verify the leaf against the root
    pub fn verify(&self) -> Result<CertificateInfo> {
        verify_chain(&self.leaf.cert_pem, &self.root.cert_pem)
    }
}

/// Builds a fresh root and leaf for an endpoint
///
/// Nothing is cached: two builds for the same hostname produce two
/// unrelated chains.
#[derive(Clone, Debug)]
pub struct CertificateChainBuilder {
    root_common_name: String,
    with_passphrase: bool,
}

impl Default for CertificateChainBuilder {
    fn default() -> Self {
        Self {
            root_common_name: ROOT_COMMON_NAME.to_string(),
            with_passphrase: false,
        }
    }
}

impl CertificateChainBuilder {
    /// Builder with the default root common name and no passphrase
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the root common name
    pub fn with_root_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.root_common_name = common_name.into();
        self
    }

    /// Generate a random passphrase into each bundle
    pub fn with_passphrase(mut self, enabled: bool) -> Self {
        self.with_passphrase = enabled;
        self
    }

    /// Mint a root and a leaf for `hostname`
    pub fn build(&self, hostname: &str, org: &OrgFields) -> Result<CertificateChain> {
        let root = RootAuthority::generate(&self.root_common_name)?;
        self.build_with_root(&root, hostname, org)
    }

    /// Sign a leaf for `hostname` with an existing root
    pub fn build_with_root(
        &self,
        root: &RootAuthority,
        hostname: &str,
        org: &OrgFields,
    ) -> Result<CertificateChain> {
        let (cert_pem, key_pem) = root.sign_leaf(hostname, org)?;

        let root_identity = RootIdentity {
            identity: SubjectName::common(root.common_name()),
            cert_pem: root.cert_pem().to_string(),
        };

        let leaf = LeafIdentity {
            common_name: hostname.to_string(),
            subject: SubjectName {
                common_name: hostname.to_string(),
                organization: (!org.organization.is_empty()).then(|| org.organization.clone()),
                organizational_unit: (!org.organizational_unit.is_empty())
                    .then(|| org.organizational_unit.clone()),
            },
            signed_by: root_identity.identity.clone(),
            cert_pem: cert_pem.clone(),
        };

        let chain_pem = format!("{}{}", ensure_trailing_newline(&cert_pem), root.cert_pem());
        let passphrase = self.with_passphrase.then(generate_passphrase);

        let bundle = TlsBundle {
            hostname: hostname.to_string(),
            cert_pem,
            chain_pem,
            trust_anchor_pem: root.cert_pem().to_string(),
            key_pem,
            passphrase,
        };

        info!(hostname, root = %root.common_name(), "Built endpoint certificate chain");

        Ok(CertificateChain {
            root: root_identity,
            leaf,
            bundle,
        })
    }
}

fn ensure_trailing_newline(pem: &str) -> String {
    if pem.ends_with('\n') {
        pem.to_string()
    } else {
        format!("{pem}\n")
    }
}

fn generate_passphrase() -> Zeroizing<String> {
    Zeroizing::new(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSPHRASE_LEN)
            .map(char::from)
            .collect(),
    )
}

/// Information about a parsed certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// Issuer common name
    pub issuer_common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
        Ok(Self::from_x509(&cert))
    }

    fn from_x509(cert: &X509Certificate<'_>) -> Self {
        let dns_names = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name: first_common_name(cert.subject()),
            issuer_common_name: first_common_name(cert.issuer()),
            dns_names,
        }
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }
}

fn first_common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Verify that `leaf_pem` was issued by `root_pem` and is currently valid
///
/// Checks issuer/subject linkage, the signature against the root's public
/// key, and both validity windows.
pub fn verify_chain(leaf_pem: &str, root_pem: &str) -> Result<CertificateInfo> {
    let leaf_der = parse_pem(leaf_pem)?;
    let (_, leaf) = X509Certificate::from_der(&leaf_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse leaf cert: {}", e)))?;

    let root_der = parse_pem(root_pem)?;
    let (_, root) = X509Certificate::from_der(&root_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse root cert: {}", e)))?;

    if leaf.issuer() != root.subject() {
        return Err(PkiError::VerificationFailed(format!(
            "leaf issuer '{}' does not match root subject '{}'",
            leaf.issuer(),
            root.subject()
        )));
    }

    leaf.verify_signature(Some(root.public_key()))
        .map_err(|_| PkiError::VerificationFailed("signature verification failed".to_string()))?;

    if !root.validity().is_valid() {
        return Err(PkiError::VerificationFailed(
            "root certificate outside its validity window".to_string(),
        ));
    }
    if !leaf.validity().is_valid() {
        return Err(PkiError::VerificationFailed(
            "leaf certificate outside its validity window".to_string(),
        ));
    }

    Ok(CertificateInfo::from_x509(&leaf))
}
