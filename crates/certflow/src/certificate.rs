//! X.509 certificate and private key handling.

use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};

use crate::{Error, Result};

/// An X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// DER-encoded certificate data.
    der: Vec<u8>,
    /// PEM representation (cached).
    pem: String,
}

impl Certificate {
    /// Creates a certificate from DER-encoded bytes.
    pub fn from_der(der: Vec<u8>) -> Self {
        let pem = pem::encode(&pem::Pem::new("CERTIFICATE", der.clone()));
        Self { der, pem }
    }

    /// Creates a certificate from a single PEM block.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let parsed = pem::parse(pem_str)
            .map_err(|e| Error::Certificate(format!("failed to parse PEM: {e}")))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(Error::Certificate(format!(
                "expected a CERTIFICATE PEM block, found {}",
                parsed.tag()
            )));
        }
        Ok(Self::from_der(parsed.into_contents()))
    }

    /// Returns the DER-encoded certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    /// Lowercase hex SHA-256 of the DER encoding.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.der)
    }

    fn parsed(&self) -> Result<X509Certificate<'_>> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
        Ok(cert)
    }

    /// Serial number in decimal.
    pub fn serial(&self) -> Result<String> {
        Ok(self.parsed()?.tbs_certificate.serial.to_string())
    }

    /// Subject common name, if any.
    pub fn common_name(&self) -> Result<Option<String>> {
        let cert = self.parsed()?;
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_string);
        Ok(cn)
    }

    /// DNS, IP and email SANs, in that order of buckets.
    pub fn subject_alt_names(&self) -> Result<(Vec<String>, Vec<IpAddr>, Vec<String>)> {
        let cert = self.parsed()?;
        let mut dns = Vec::new();
        let mut ips = Vec::new();
        let mut emails = Vec::new();

        for ext in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for name in &san.general_names {
                    match name {
                        GeneralName::DNSName(d) => dns.push(d.to_string()),
                        GeneralName::RFC822Name(e) => emails.push(e.to_string()),
                        GeneralName::IPAddress(bytes) => {
                            if let Some(ip) = ip_from_bytes(bytes) {
                                ips.push(ip);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok((dns, ips, emails))
    }

    /// Returns the certificate's not-after (expiry) time.
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let timestamp = self.parsed()?.validity().not_after.timestamp();
        DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| Error::Certificate("invalid not_after timestamp".to_string()))
    }

    /// Returns the certificate's not-before time.
    pub fn not_before(&self) -> Result<DateTime<Utc>> {
        let timestamp = self.parsed()?.validity().not_before.timestamp();
        DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| Error::Certificate("invalid not_before timestamp".to_string()))
    }

    /// Checks that `issuer` signed this certificate.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        let cert = self.parsed()?;
        let issuer = issuer.parsed()?;
        cert.verify_signature(Some(issuer.public_key()))
            .map_err(|e| Error::Certificate(format!("certificate signature check failed: {e}")))
    }

    /// Raw subject public key (for P-256, the uncompressed SEC1 point).
    pub fn public_key_bits(&self) -> Result<Vec<u8>> {
        Ok(self.parsed()?.public_key().subject_public_key.data.to_vec())
    }
}

/// A PEM-encoded private key.
#[derive(Clone)]
pub struct PrivateKey {
    pem: String,
}

impl PrivateKey {
    /// Creates a private key from PEM-encoded data.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if !pem.contains("PRIVATE KEY") {
            return Err(Error::Certificate("not a private key PEM".to_string()));
        }
        Ok(Self {
            pem: pem.to_string(),
        })
    }

    /// Reads a PEM private key file.
    pub fn read(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::Certificate(format!("error reading {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    /// Returns the PEM-encoded private key.
    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    /// Uncompressed public point of a PKCS#8 P-256 key.
    pub fn public_key_bits(&self) -> Result<Vec<u8>> {
        use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

        let der = pem::parse(&self.pem)
            .map_err(|e| Error::Certificate(format!("failed to parse PEM: {e}")))?
            .into_contents();
        let key_pair = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &der,
            &ring::rand::SystemRandom::new(),
        )
        .map_err(|e| Error::Certificate(format!("unsupported private key: {e}")))?;
        Ok(key_pair.public_key().as_ref().to_vec())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pem", &"[REDACTED]")
            .finish()
    }
}

/// Lowercase hex SHA-256 of a DER certificate.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Parses every CERTIFICATE block in `pem_str`, in order.
pub fn parse_chain_pem(pem_str: &str) -> Result<Vec<Certificate>> {
    let blocks = pem::parse_many(pem_str)
        .map_err(|e| Error::Certificate(format!("failed to parse PEM: {e}")))?;
    Ok(blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| Certificate::from_der(block.into_contents()))
        .collect())
}

/// Reads a PEM certificate chain file. An empty chain is an error.
pub fn read_chain(path: &Path) -> Result<Vec<Certificate>> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| Error::Certificate(format!("error reading {}: {e}", path.display())))?;
    let chain = parse_chain_pem(&pem)?;
    if chain.is_empty() {
        return Err(Error::Certificate(format!(
            "{} contains no certificates",
            path.display()
        )));
    }
    Ok(chain)
}

/// Concatenated PEM for a chain.
pub fn chain_pem(chain: &[Certificate]) -> String {
    chain.iter().map(Certificate::to_pem).collect()
}

/// Writes a file with restricted permissions (0600), creating parent
/// directories.
pub fn write_private_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        // mode() only applies on create
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(content.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, content)?;
    }

    Ok(())
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(names: &[&str]) -> Certificate {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_der(cert.der().to_vec())
    }

    #[test]
    fn pem_roundtrip_keeps_der() {
        let cert = self_signed(&["a.example.com"]);
        let again = Certificate::from_pem(cert.to_pem()).unwrap();
        assert_eq!(again.der(), cert.der());
        assert_eq!(again.fingerprint(), cert.fingerprint());
        assert_eq!(cert.fingerprint().len(), 64);
    }

    #[test]
    fn reads_sans() {
        let cert = self_signed(&["a.example.com", "10.0.0.1"]);
        let (dns, ips, emails) = cert.subject_alt_names().unwrap();
        assert_eq!(dns, vec!["a.example.com".to_string()]);
        assert_eq!(ips, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert!(emails.is_empty());
    }

    #[test]
    fn chain_parsing_keeps_order() {
        let a = self_signed(&["a.example.com"]);
        let b = self_signed(&["b.example.com"]);
        let chain = parse_chain_pem(&chain_pem(&[a.clone(), b.clone()])).unwrap();
        assert_eq!(chain, vec![a, b]);
    }

    #[test]
    fn read_chain_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.crt");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(read_chain(&path), Err(Error::Certificate(_))));
    }

    #[test]
    fn self_signed_verifies_against_itself() {
        let cert = self_signed(&["a.example.com"]);
        cert.verify_issued_by(&cert).unwrap();
        let other = self_signed(&["b.example.com"]);
        assert!(cert.verify_issued_by(&other).is_err());
    }

    #[test]
    fn key_matches_its_certificate() {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = CertificateParams::new(vec!["a.example.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let cert = Certificate::from_der(cert.der().to_vec());
        let pk = PrivateKey::from_pem(&key.serialize_pem()).unwrap();
        assert_eq!(pk.public_key_bits().unwrap(), cert.public_key_bits().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/leaf.key");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "old").unwrap();

        write_private_file(&path, "new").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn private_key_debug_redacted() {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let pk = PrivateKey::from_pem(&key.serialize_pem()).unwrap();
        assert!(format!("{pk:?}").contains("REDACTED"));
    }
}
