//! Root authority that signs endpoint leaf certificates

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::chain::{CertificateInfo, OrgFields};
use crate::error::{PkiError, Result};

/// Validity period for root certificates (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Validity period for leaf certificates (1 year)
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// Compute certificate validity period from now
fn compute_validity(years: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(years * 365);
    (now, not_after)
}

/// Self-signed root authority
///
/// The private key is held as PEM (KeyPair isn't Clone) and is never
/// exposed; it is parsed only for the duration of a signing call.
pub struct RootAuthority {
    common_name: String,
    cert_pem: String,
    key_pem: Zeroizing<String>,
}

impl RootAuthority {
    /// Create a new self-signed root
    pub fn generate(common_name: &str) -> Result<Self> {
        if common_name.is_empty() {
            return Err(PkiError::CertificateGenerationFailed(
                "root common name cannot be empty".to_string(),
            ));
        }

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate root key: {}", e))
        })?;
        let key_pem = Zeroizing::new(key_pair.serialize_pem());

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create root cert: {}", e))
        })?;

        debug!(common_name, "Generated root authority");

        Ok(Self {
            common_name: common_name.to_string(),
            cert_pem: cert.pem(),
            key_pem,
        })
    }

    /// Load a root from PEM material
    ///
    /// Only the certificate is checked here. The key is parsed when a leaf
    /// is signed, so unusable key material surfaces as
    /// [`PkiError::KeyUnavailable`] at signing time.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let info = CertificateInfo::from_pem(cert_pem)?;
        Ok(Self {
            common_name: info.common_name,
            cert_pem: cert_pem.to_string(),
            key_pem: Zeroizing::new(key_pem.to_string()),
        })
    }

    /// Subject common name of the root
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// PEM-encoded root certificate (public trust anchor)
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Certificate info (validity period, names)
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.cert_pem)
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.key_pem)
            .map_err(|e| PkiError::KeyUnavailable(format!("failed to load root key: {}", e)))
    }

    /// Sign a server certificate for `hostname`
    ///
    /// Returns the leaf certificate PEM and its private key PEM.
    pub fn sign_leaf(
        &self,
        hostname: &str,
        org: &OrgFields,
    ) -> Result<(String, Zeroizing<String>)> {
        if hostname.is_empty() {
            return Err(PkiError::InvalidHostname {
                hostname: hostname.to_string(),
                reason: "hostname cannot be empty".to_string(),
            });
        }
        if hostname == self.common_name {
            return Err(PkiError::InvalidHostname {
                hostname: hostname.to_string(),
                reason: "leaf common name must differ from the root common name".to_string(),
            });
        }

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(hostname.to_string()));
        if !org.organization.is_empty() {
            dn.push(
                DnType::OrganizationName,
                DnValue::Utf8String(org.organization.clone()),
            );
        }
        if !org.organizational_unit.is_empty() {
            dn.push(
                DnType::OrganizationalUnitName,
                DnValue::Utf8String(org.organizational_unit.clone()),
            );
        }
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let san = Ia5String::try_from(hostname.to_string()).map_err(|e| {
            PkiError::InvalidHostname {
                hostname: hostname.to_string(),
                reason: format!("not a valid DNS name: {}", e),
            }
        })?;
        params.subject_alt_names = vec![SanType::DnsName(san)];

        let root_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &root_key)
            .map_err(|e| PkiError::KeyUnavailable(format!("failed to create issuer: {}", e)))?;

        let leaf_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate leaf key: {}", e))
        })?;
        let leaf_key_pem = Zeroizing::new(leaf_key.serialize_pem());

        let leaf_cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign leaf cert: {}", e))
        })?;

        debug!(hostname, root = %self.common_name, "Signed leaf certificate");

        Ok((leaf_cert.pem(), leaf_key_pem))
    }
}

impl std::fmt::Debug for RootAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootAuthority")
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}
