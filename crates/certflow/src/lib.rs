//! Dual-mode certificate authority client.
//!
//! `certflow` requests issuance, renewal and revocation of X.509 certificates
//! through one of two authorities behind a single [`CaClient`] contract:
//!
//! - an **embedded** authority running in-process from a local `ca.json`
//!   (offline mode, no network), or
//! - a **remote** authority reached over HTTPS, trusted through a pinned root
//!   fingerprint, an explicit root file, or mutual TLS.
//!
//! Every sign and revoke request carries a short-lived ES256 authorization
//! token whose subject and SAN claims must match the request exactly.
//!
//! # Components
//!
//! - [`provisioner`] - Provisioner registry with composable filtering
//! - [`keys`] - Provisioner key decryption (password file or prompt)
//! - [`token`] - Authorization token generation and claim peeking
//! - [`csr`] - Certificate request builder with SAN merging
//! - [`ca`] - CA client trait, embedded and remote implementations
//! - [`authority`] - In-process authority engine and bootstrap
//! - [`flow`] - Issue, revoke and renew orchestrators
//! - [`jose`] - Compact JWS/JWE primitives
//! - [`certificate`] - X.509 certificate and private key handling
//! - [`config`] - Authority configuration and flow configuration

pub mod authority;
pub mod ca;
pub mod certificate;
pub mod config;
pub mod csr;
pub mod flow;
pub mod jose;
pub mod keys;
pub mod provisioner;
pub mod token;
pub mod validity;

pub use authority::{Authority, LocalAuthority};
pub use ca::{CaClient, EmbeddedCa, RemoteCa, RevocationReason};
pub use config::{AuthorityConfig, FlowConfig};
pub use csr::{CertificateRequest, CertificateRequestBuilder, SignedRequest};
pub use flow::{IssueFlow, RenewFlow, RevokeFlow};
pub use keys::{PasswordPrompt, PasswordSource};
pub use provisioner::{Provisioner, ProvisionerChooser, ProvisionerRegistry};
pub use token::{TokenClaims, TokenGenerator, TokenKind};

/// Errors that can occur in certflow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or incomplete authority configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A named provisioner filter matched nothing.
    #[error("invalid value '{value}' for flag '--{flag}': no provisioner found")]
    ProvisionerNotFound { flag: &'static str, value: String },

    /// Several provisioners matched and no valid choice was made.
    #[error("ambiguous provisioner: {0}")]
    AmbiguousProvisioner(String),

    /// The resolved provisioner carries no encrypted signing key.
    #[error("provisioner '{0}' does not have an 'encryptedKey' property")]
    NoSigningKey(String),

    /// Decrypting the provisioner key failed.
    #[error("error decrypting provisioner key: {0}")]
    KeyDecryption(String),

    /// The token could not be parsed.
    #[error("error parsing token: {0}")]
    TokenParse(String),

    /// The token subject does not match the requested subject or serial.
    #[error("token subject '{token}' and {what} '{requested}' do not match")]
    TokenSubjectMismatch {
        token: String,
        what: &'static str,
        requested: String,
    },

    /// Requested SANs do not match the token's declared SANs.
    #[error("SAN mismatch: {0}")]
    SanMismatch(String),

    /// Two flags were combined that cannot be used together.
    #[error("flag '--{flag}' is incompatible with '--{other}'")]
    FlagConflict {
        flag: &'static str,
        other: &'static str,
    },

    /// A required flag is missing.
    #[error("flag '--{0}' is required")]
    RequiredFlag(&'static str),

    /// Unknown revocation reason string.
    #[error("unrecognized revocation reason '{0}'")]
    UnrecognizedRevocationReason(String),

    /// Network or TLS failure talking to the remote authority.
    #[error("transport error: {0}")]
    Transport(String),

    /// The authority declined the request.
    #[error("authority rejected request{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    AuthorityRejection {
        status: Option<u16>,
        message: String,
    },

    /// CSR generation or self-verification failed.
    #[error("CSR generation failed: {0}")]
    CsrGeneration(String),

    /// Certificate parsing or encoding error.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Interactive prompt failed.
    #[error("prompt failed: {0}")]
    Prompt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Error::AuthorityRejection {
            status: None,
            message: message.into(),
        }
    }
}

/// Result type for certflow operations.
pub type Result<T> = std::result::Result<T, Error>;
