//! Certificate Authority (CA) client trait and implementations.
//!
//! Flows talk to an authority only through [`CaClient`]. Two implementations
//! exist and share nothing but the trait:
//!
//! - [`EmbeddedCa`] - in-process authority driven from a local `ca.json`
//! - [`RemoteCa`] - HTTPS authority trusted through a pinned root fingerprint,
//!   a root file, or mutual TLS
//!
//! A client is built into one shape per invocation and never changes shape.

mod embedded;
mod remote;

pub use embedded::{EmbeddedCa, TlsMaterial};
pub use remote::{
    fetch_provisioners, root_file, ClientIdentity, Connector, HttpConnector, HttpTransport,
    RemoteCa, RemoteTarget, RootTrust, Transport,
};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::{self, Certificate};
use crate::{Error, Result};

/// A CA that signs, renews and revokes certificates.
pub trait CaClient {
    /// Signs a CSR authorized by the request's token.
    fn sign(&self, request: &SignRequest) -> Result<SignResponse>;

    /// Renews the certificate this client authenticates with.
    fn renew(&self) -> Result<SignResponse>;

    /// Revokes a certificate by serial.
    fn revoke(&self, request: &RevokeRequest) -> Result<RevokeResponse>;
}

impl<C: CaClient + ?Sized> CaClient for Box<C> {
    fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        (**self).sign(request)
    }

    fn renew(&self) -> Result<SignResponse> {
        (**self).renew()
    }

    fn revoke(&self, request: &RevokeRequest) -> Result<RevokeResponse> {
        (**self).revoke(request)
    }
}

/// `POST /sign` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// PEM CSR.
    pub csr: String,
    /// One-time token.
    pub ott: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

/// TLS settings an authority recommends to its clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cipher_suites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<f64>,
}

/// `POST /sign` and `POST /renew` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    /// PEM leaf certificate.
    pub crt: String,
    /// PEM issuer certificate.
    pub ca: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_options: Option<TlsOptions>,
}

impl SignResponse {
    /// Leaf then issuer.
    pub fn chain(&self) -> Result<Vec<Certificate>> {
        let mut chain = certificate::parse_chain_pem(&self.crt)?;
        if chain.is_empty() {
            return Err(Error::Certificate(
                "authority response has no leaf certificate".into(),
            ));
        }
        chain.extend(certificate::parse_chain_pem(&self.ca)?);
        Ok(chain)
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> Result<Certificate> {
        Certificate::from_pem(&self.crt)
    }
}

/// `POST /revoke` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub serial: String,
    /// Human-readable reason, passed through.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// RFC 5280 reason code.
    pub reason_code: u8,
    /// Token; empty when the request authenticates with mTLS.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ott: String,
    /// Record only; nothing is published.
    pub passive: bool,
}

impl RevokeRequest {
    /// A passive revocation; the reason string is converted to its code here.
    pub fn new(serial: impl Into<String>, reason: &str, ott: Option<String>) -> Result<Self> {
        let code = reason_to_code(reason)?;
        Ok(Self {
            serial: serial.into(),
            reason: reason.to_string(),
            reason_code: code,
            ott: ott.unwrap_or_default(),
            passive: true,
        })
    }
}

/// `POST /revoke` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub status: String,
}

/// RFC 5280 CRL reason codes. Code 7 is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 10] = [
        RevocationReason::Unspecified,
        RevocationReason::KeyCompromise,
        RevocationReason::CaCompromise,
        RevocationReason::AffiliationChanged,
        RevocationReason::Superseded,
        RevocationReason::CessationOfOperation,
        RevocationReason::CertificateHold,
        RevocationReason::RemoveFromCrl,
        RevocationReason::PrivilegeWithdrawn,
        RevocationReason::AaCompromise,
    ];

    pub fn code(self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "Unspecified",
            RevocationReason::KeyCompromise => "KeyCompromise",
            RevocationReason::CaCompromise => "CACompromise",
            RevocationReason::AffiliationChanged => "AffiliationChanged",
            RevocationReason::Superseded => "Superseded",
            RevocationReason::CessationOfOperation => "CessationOfOperation",
            RevocationReason::CertificateHold => "CertificateHold",
            RevocationReason::RemoveFromCrl => "RemoveFromCRL",
            RevocationReason::PrivilegeWithdrawn => "PrivilegeWithdrawn",
            RevocationReason::AaCompromise => "AACompromise",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RevocationReason {
    type Err = Error;

    /// Case-insensitive; the empty string is `Unspecified`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(RevocationReason::Unspecified);
        }
        RevocationReason::ALL
            .into_iter()
            .find(|reason| reason.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnrecognizedRevocationReason(s.to_string()))
    }
}

/// Maps a reason string to its RFC 5280 code.
pub fn reason_to_code(reason: &str) -> Result<u8> {
    reason.parse::<RevocationReason>().map(RevocationReason::code)
}
