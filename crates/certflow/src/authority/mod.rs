//! In-process issuing authority.
//!
//! [`Authority`] is the engine the embedded CA client drives. [`LocalAuthority`]
//! implements it from an [`AuthorityConfig`](crate::AuthorityConfig): it
//! verifies tokens against provisioner keys, signs CSRs with the intermediate
//! key, renews certificates it issued and records passive revocations.
//! [`bootstrap`] creates a fresh authority on disk.

pub mod bootstrap;
mod local;

pub use local::{LocalAuthority, RevocationRecord, DEFAULT_CERT_LIFETIME_HOURS};

use chrono::{DateTime, Utc};

use crate::ca::TlsOptions;
use crate::certificate::{Certificate, PrivateKey};
use crate::Result;

/// What a verified sign token allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOptions {
    /// Provisioner that signed the token.
    pub provisioner: String,
    /// Required common name.
    pub subject: String,
    /// Required DNS/IP SANs, exactly.
    pub sans: Vec<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

/// Input to [`Authority::revoke`].
#[derive(Debug, Clone)]
pub struct RevokeOptions {
    pub serial: String,
    pub reason_code: u8,
    pub reason: String,
    /// Revoke token, when the request is token-authorized.
    pub ott: Option<String>,
    /// Client certificate, when the request is mTLS-authenticated.
    pub peer: Option<Certificate>,
}

/// An issuing authority engine.
pub trait Authority {
    /// Verifies a sign token and returns what it allows.
    fn authorize(&self, ott: &str) -> Result<SignOptions>;

    /// Signs a PEM CSR. Returns the leaf and its issuer.
    fn sign(
        &self,
        csr_pem: &str,
        options: &SignOptions,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<(Certificate, Certificate)>;

    /// Re-issues `peer` with a fresh validity window.
    ///
    /// The peer's private key is required to sign the new certificate for the
    /// same key pair; it is checked against the certificate.
    fn renew(&self, peer: &Certificate, key: &PrivateKey) -> Result<(Certificate, Certificate)>;

    /// Records a revocation.
    fn revoke(&self, options: &RevokeOptions) -> Result<()>;

    /// Recommended client TLS settings.
    fn tls_options(&self) -> Option<TlsOptions> {
        None
    }
}
