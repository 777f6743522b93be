//! Certificate Signing Request (CSR) generation.
//!
//! A request is shaped by its token: the subject common name is the token
//! subject, the SANs are the caller's SANs merged with the token's SANs (the
//! subject alone when an authority token declares none), and the token's
//! `email` claim becomes an RFC 822 SAN. Every CSR is re-parsed and
//! its signature verified before it is handed back.
//!
//! # Example
//!
//! ```no_run
//! use certflow::CertificateRequestBuilder;
//!
//! # fn token() -> String { unimplemented!() }
//! let signed = CertificateRequestBuilder::new(token())
//!     .with_sans(["10.0.0.7"])
//!     .build()
//!     .unwrap();
//!
//! assert!(signed.request().pem().starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
//! ```

use std::collections::HashSet;
use std::net::IpAddr;

use rcgen::string::Ia5String;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use crate::certificate::PrivateKey;
use crate::token::peek_claims;
use crate::{Error, Result};

/// Merges caller SANs with token SANs.
///
/// Order is first occurrence, caller entries first; later duplicates and
/// empty entries are dropped.
pub fn merge_sans(caller: &[String], token: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    caller
        .iter()
        .chain(token.iter())
        .map(|san| san.trim())
        .filter(|san| !san.is_empty())
        .filter(|san| seen.insert(san.to_string()))
        .map(str::to_string)
        .collect()
}

/// Splits SANs into DNS names and IP addresses by syntax.
pub fn split_sans(sans: &[String]) -> (Vec<String>, Vec<IpAddr>) {
    let mut dns = Vec::new();
    let mut ips = Vec::new();
    for san in sans {
        match san.parse::<IpAddr>() {
            Ok(ip) => ips.push(ip),
            Err(_) => dns.push(san.clone()),
        }
    }
    (dns, ips)
}

/// Builds a CSR from a token.
#[derive(Debug, Clone)]
pub struct CertificateRequestBuilder {
    token: String,
    sans: Vec<String>,
}

impl CertificateRequestBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            sans: Vec::new(),
        }
    }

    /// Caller-supplied SANs, merged ahead of the token's.
    pub fn with_sans<I, S>(mut self, sans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sans = sans.into_iter().map(Into::into).collect();
        self
    }

    /// Generates a P-256 key pair and a self-verified CSR.
    pub fn build(&self) -> Result<SignedRequest> {
        let claims = peek_claims(&self.token)?;

        let mut sans = merge_sans(&self.sans, &claims.sans);
        if sans.is_empty() && claims.is_authority_token() {
            sans.push(claims.sub.clone());
        }
        let (dns_names, ip_addresses) = split_sans(&sans);

        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::CsrGeneration(format!("key generation failed: {e}")))?;

        let mut params = CertificateParams::new(vec![])
            .map_err(|e| Error::CsrGeneration(format!("failed to create params: {e}")))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, claims.sub.clone());
        params.distinguished_name = dn;

        for name in &dns_names {
            let ia5 = Ia5String::try_from(name.clone())
                .map_err(|e| Error::CsrGeneration(format!("invalid DNS SAN '{name}': {e}")))?;
            params.subject_alt_names.push(SanType::DnsName(ia5));
        }
        params
            .subject_alt_names
            .extend(ip_addresses.iter().copied().map(SanType::IpAddress));
        if let Some(email) = claims.email.as_deref().filter(|e| !e.is_empty()) {
            let ia5 = Ia5String::try_from(email.to_string())
                .map_err(|e| Error::CsrGeneration(format!("invalid email SAN '{email}': {e}")))?;
            params.subject_alt_names.push(SanType::Rfc822Name(ia5));
        }

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::CsrGeneration(format!("CSR serialization failed: {e}")))?;
        let pem = csr
            .pem()
            .map_err(|e| Error::CsrGeneration(format!("CSR PEM encoding failed: {e}")))?;

        let request = CertificateRequest::parse(csr.der().to_vec(), pem)?;
        tracing::debug!(
            cn = %request.common_name,
            dns = request.dns_names.len(),
            ips = request.ip_addresses.len(),
            "built certificate request"
        );

        Ok(SignedRequest {
            request,
            private_key: PrivateKey::from_pem(&key_pair.serialize_pem())?,
        })
    }
}

/// A parsed, signature-verified CSR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pem: String,
    der: Vec<u8>,
    common_name: String,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    email_addresses: Vec<String>,
}

impl CertificateRequest {
    /// Parses a PEM CSR and checks its signature.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let parsed = pem::parse(pem_str)
            .map_err(|e| Error::CsrGeneration(format!("failed to parse PEM: {e}")))?;
        if parsed.tag() != "CERTIFICATE REQUEST" {
            return Err(Error::CsrGeneration(format!(
                "expected a CERTIFICATE REQUEST PEM block, found {}",
                parsed.tag()
            )));
        }
        Self::parse(parsed.into_contents(), pem_str.to_string())
    }

    fn parse(der: Vec<u8>, pem: String) -> Result<Self> {
        let (_, csr) = X509CertificationRequest::from_der(&der)
            .map_err(|e| Error::CsrGeneration(format!("failed to parse CSR: {e}")))?;

        // Proof of possession of the private key.
        csr.verify_signature()
            .map_err(|e| Error::CsrGeneration(format!("CSR signature verification failed: {e}")))?;

        let common_name = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        let mut email_addresses = Vec::new();
        if let Some(extensions) = csr.requested_extensions() {
            for ext in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = ext {
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(d) => dns_names.push(d.to_string()),
                            GeneralName::RFC822Name(e) => email_addresses.push(e.to_string()),
                            GeneralName::IPAddress(bytes) => match bytes.len() {
                                4 => {
                                    if let Ok(octets) = <[u8; 4]>::try_from(*bytes) {
                                        ip_addresses.push(IpAddr::from(octets));
                                    }
                                }
                                16 => {
                                    if let Ok(octets) = <[u8; 16]>::try_from(*bytes) {
                                        ip_addresses.push(IpAddr::from(octets));
                                    }
                                }
                                _ => {}
                            },
                            _ => {}
                        }
                    }
                }
            }
        }

        Ok(Self {
            pem,
            der,
            common_name,
            dns_names,
            ip_addresses,
            email_addresses,
        })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    pub fn email_addresses(&self) -> &[String] {
        &self.email_addresses
    }

    /// DNS and IP SANs as strings, DNS first.
    pub fn sans(&self) -> Vec<String> {
        self.dns_names
            .iter()
            .cloned()
            .chain(self.ip_addresses.iter().map(IpAddr::to_string))
            .collect()
    }
}

/// A CSR and the private key it was generated with.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    request: CertificateRequest,
    private_key: PrivateKey,
}

impl SignedRequest {
    pub fn request(&self) -> &CertificateRequest {
        &self.request
    }

    /// PEM private key; the caller persists it.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn into_parts(self) -> (CertificateRequest, PrivateKey) {
        (self.request, self.private_key)
    }
}
