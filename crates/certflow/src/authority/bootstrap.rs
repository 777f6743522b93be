//! Creates a fresh authority on disk.
//!
//! Layout under the target directory:
//!
//! ```text
//! certs/root_ca.crt           root certificate
//! certs/intermediate_ca.crt   intermediate certificate
//! secrets/root_ca_key         root key (0600)
//! secrets/intermediate_ca_key intermediate key (0600)
//! config/ca.json              authority configuration
//! db/revocations.jsonl        revocation log (created on first revoke)
//! ```

use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::certificate::{self, Certificate};
use crate::config::{AuthorityConfig, AuthoritySection, RootPaths};
use crate::jose::Jwk;
use crate::keys;
use crate::provisioner::Provisioner;
use crate::{Error, Result};

/// CA certificates are valid for ten years.
const CA_VALIDITY_DAYS: i64 = 3650;

/// Inputs for [`init`].
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Directory to create the authority in.
    pub dir: PathBuf,
    /// Name used in the CA certificate subjects.
    pub name: String,
    /// DNS names the authority answers on; the first derives audiences.
    pub dns_names: Vec<String>,
    /// Name of the JWK provisioner to create.
    pub provisioner: String,
    /// Password protecting the provisioner key.
    pub password: String,
}

/// What [`init`] created.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub config_path: PathBuf,
    pub root_path: PathBuf,
    pub root_fingerprint: String,
    pub provisioner_kid: String,
    pub config: AuthorityConfig,
}

/// Creates root and intermediate CAs, one JWK provisioner and `ca.json`.
///
/// Fails if `config/ca.json` already exists.
pub fn init(options: &BootstrapOptions) -> Result<Bootstrap> {
    if options.dns_names.iter().all(|d| d.trim().is_empty()) {
        return Err(Error::RequiredFlag("dns"));
    }
    if options.password.is_empty() {
        return Err(Error::Configuration(
            "provisioner password cannot be empty".into(),
        ));
    }

    let dir = &options.dir;
    let config_path = dir.join("config/ca.json");
    if config_path.exists() {
        return Err(Error::Configuration(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    // Root CA
    let root_key = generate_key("root")?;
    let root_params = ca_params(&format!("{} Root CA", options.name), 1)?;
    let root_cert = root_params
        .self_signed(&root_key)
        .map_err(|e| Error::Certificate(format!("root certificate generation failed: {e}")))?;
    let root = Certificate::from_der(root_cert.der().to_vec());

    // Intermediate CA, signed by the root
    let intermediate_key = generate_key("intermediate")?;
    let intermediate_params = ca_params(&format!("{} Intermediate CA", options.name), 0)?;
    let root_issuer = Issuer::from_params(&root_params, &root_key);
    let intermediate_cert = intermediate_params
        .signed_by(&intermediate_key, &root_issuer)
        .map_err(|e| {
            Error::Certificate(format!("intermediate certificate generation failed: {e}"))
        })?;
    let intermediate = Certificate::from_der(intermediate_cert.der().to_vec());

    // Provisioner
    let jwk = Jwk::generate_p256()?;
    let encrypted = keys::encrypt_key(&jwk, options.password.as_bytes())?;
    let provisioner = Provisioner::jwk(&options.provisioner, jwk, Some(encrypted));
    let provisioner_kid = provisioner.kid().to_string();

    let root_path = dir.join("certs/root_ca.crt");
    write_public(&root_path, root.to_pem())?;
    write_public(&dir.join("certs/intermediate_ca.crt"), intermediate.to_pem())?;
    certificate::write_private_file(&dir.join("secrets/root_ca_key"), &root_key.serialize_pem())?;
    certificate::write_private_file(
        &dir.join("secrets/intermediate_ca_key"),
        &intermediate_key.serialize_pem(),
    )?;

    // Paths are relative to config/, where ca.json lives.
    let config = AuthorityConfig {
        root: RootPaths::One(PathBuf::from("../certs/root_ca.crt")),
        crt: PathBuf::from("../certs/intermediate_ca.crt"),
        key: PathBuf::from("../secrets/intermediate_ca_key"),
        dns_names: options
            .dns_names
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect(),
        authority: AuthoritySection {
            provisioners: vec![provisioner],
        },
        revocations: Some(PathBuf::from("../db/revocations.jsonl")),
    };
    std::fs::create_dir_all(dir.join("config"))?;
    std::fs::create_dir_all(dir.join("db"))?;
    config.save(&config_path)?;

    let root_fingerprint = root.fingerprint();
    tracing::info!(
        config = %config_path.display(),
        fingerprint = %root_fingerprint,
        provisioner = %options.provisioner,
        "initialized authority"
    );

    Ok(Bootstrap {
        config: AuthorityConfig::load(&config_path)?,
        config_path,
        root_path,
        root_fingerprint,
        provisioner_kid,
    })
}

fn generate_key(what: &str) -> Result<KeyPair> {
    KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::Certificate(format!("{what} key generation failed: {e}")))
}

fn ca_params(common_name: &str, path_len: u8) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(vec![])
        .map_err(|e| Error::Certificate(format!("failed to create params: {e}")))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + TimeDuration::days(CA_VALIDITY_DAYS);

    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(path_len));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    Ok(params)
}

fn write_public(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &Path) -> BootstrapOptions {
        BootstrapOptions {
            dir: dir.to_path_buf(),
            name: "Test".into(),
            dns_names: vec!["ca.example.com".into()],
            provisioner: "admin".into(),
            password: "pass".into(),
        }
    }

    #[test]
    fn creates_loadable_authority() {
        let dir = tempfile::tempdir().unwrap();
        let created = init(&options(dir.path())).unwrap();

        let config = AuthorityConfig::load(&created.config_path).unwrap();
        assert_eq!(config.dns_names, vec!["ca.example.com".to_string()]);
        assert_eq!(config.root_path().unwrap(), dir.path().join("config/../certs/root_ca.crt"));

        let root = certificate::read_chain(&created.root_path).unwrap().remove(0);
        assert_eq!(root.fingerprint(), created.root_fingerprint);

        let intermediate = certificate::read_chain(&config.crt).unwrap().remove(0);
        intermediate.verify_issued_by(&root).unwrap();

        let registry = config.provisioners();
        let provisioner = registry.by_kid(&created.provisioner_kid).unwrap();
        assert_eq!(provisioner.as_slice()[0].name, "admin");
        assert!(!provisioner.as_slice()[0].key.is_private());
    }

    #[test]
    fn provisioner_key_decrypts() {
        let dir = tempfile::tempdir().unwrap();
        let created = init(&options(dir.path())).unwrap();
        let provisioner = created.config.authority.provisioners[0].clone();

        let jwk = keys::decrypt_key(provisioner.encrypted_key.as_deref().unwrap(), b"pass").unwrap();
        assert_eq!(jwk.public(), provisioner.key);
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init(&options(dir.path())).unwrap();
        assert!(matches!(
            init(&options(dir.path())),
            Err(Error::Configuration(msg)) if msg.contains("already exists")
        ));
    }

    #[test]
    fn requires_dns_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.dns_names.clear();
        assert!(matches!(init(&opts), Err(Error::RequiredFlag("dns"))));
    }
}
