//! rcgen-backed authority running from an [`AuthorityConfig`].
//!
//! # Token checks
//!
//! A token is accepted only if:
//! 1. its header `kid` names a configured provisioner and the ES256 signature
//!    verifies against that provisioner's public key
//! 2. `iss` is the provisioner name
//! 3. the audience is `https://<dns name>/<endpoint>` for one of the
//!    configured DNS names
//! 4. `nbf`/`exp` bracket the current time, allowing one minute of skew
//! 5. its `jti` has not been seen before by this instance
//!
//! # Issuance checks
//!
//! The CSR signature must verify, its common name must equal the token subject
//! (case-insensitively) and its DNS/IP SANs must equal the token SANs as a set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
    SerialNumber, string::Ia5String,
};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{Authority, RevokeOptions, SignOptions};
use crate::ca::TlsOptions;
use crate::certificate::{self, Certificate, PrivateKey};
use crate::config::AuthorityConfig;
use crate::csr::CertificateRequest;
use crate::jose::ParsedJws;
use crate::provisioner::{Provisioner, ProvisionerRegistry};
use crate::token::{self, TokenClaims, TokenKind};
use crate::{Error, Result};

/// Leaf lifetime when neither the request nor the token sets `notAfter`.
pub const DEFAULT_CERT_LIFETIME_HOURS: i64 = 24;

const CLOCK_SKEW_SECS: i64 = 60;

/// Provisioner recorded for revocations authenticated by client certificate.
const MTLS_REVOKER: &str = "mtls";

/// One line of the revocation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRecord {
    pub serial: String,
    pub reason_code: u8,
    #[serde(default)]
    pub reason: String,
    /// Provisioner that authorized the revocation, or `"mtls"`.
    pub provisioner: String,
    pub revoked_at: DateTime<Utc>,
}

/// An in-process authority.
pub struct LocalAuthority {
    config: AuthorityConfig,
    provisioners: ProvisionerRegistry,
    root: Certificate,
    intermediate: Certificate,
    issuer: Issuer<'static, KeyPair>,
    cert_lifetime: Duration,
    used_tokens: Mutex<HashSet<String>>,
    revocations: Mutex<HashMap<String, RevocationRecord>>,
}

impl LocalAuthority {
    /// Loads the authority configuration at `path` and starts an authority.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(AuthorityConfig::load(path)?)
    }

    /// Starts an authority from a validated configuration.
    pub fn new(config: AuthorityConfig) -> Result<Self> {
        config.validate()?;

        let root = first_certificate(config.root_path()?)?;
        let intermediate = first_certificate(&config.crt)?;
        intermediate.verify_issued_by(&root).map_err(|_| {
            Error::Configuration(format!(
                "{} is not signed by the configured root",
                config.crt.display()
            ))
        })?;

        let key_pem = std::fs::read_to_string(&config.key).map_err(|e| {
            Error::Configuration(format!("error reading {}: {e}", config.key.display()))
        })?;
        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| Error::Configuration(format!("invalid intermediate key: {e}")))?;
        let key_point = PrivateKey::from_pem(&key_pem)?.public_key_bits()?;
        if key_point != intermediate.public_key_bits()? {
            return Err(Error::Configuration(format!(
                "{} does not match {}",
                config.key.display(),
                config.crt.display()
            )));
        }
        let issuer = Issuer::from_ca_cert_pem(intermediate.to_pem(), key_pair)
            .map_err(|e| Error::Configuration(format!("invalid intermediate certificate: {e}")))?;

        let revocations = match &config.revocations {
            Some(path) => load_revocations(path)?,
            None => HashMap::new(),
        };

        info!(
            dns = ?config.dns_names,
            provisioners = config.authority.provisioners.len(),
            revoked = revocations.len(),
            "started embedded authority"
        );

        Ok(Self {
            provisioners: config.provisioners(),
            config,
            root,
            intermediate,
            issuer,
            cert_lifetime: Duration::hours(DEFAULT_CERT_LIFETIME_HOURS),
            used_tokens: Mutex::new(HashSet::new()),
            revocations: Mutex::new(revocations),
        })
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn root(&self) -> &Certificate {
        &self.root
    }

    pub fn intermediate(&self) -> &Certificate {
        &self.intermediate
    }

    pub fn provisioners(&self) -> &ProvisionerRegistry {
        &self.provisioners
    }

    /// The revocation record for `serial`, if any.
    pub fn revocation(&self, serial: &str) -> Result<Option<RevocationRecord>> {
        Ok(lock(&self.revocations)?.get(serial).cloned())
    }

    /// Verifies an authorization token for `kind`.
    pub fn verify_token(&self, ott: &str, kind: TokenKind) -> Result<(TokenClaims, Provisioner)> {
        let jws = ParsedJws::parse(ott).map_err(|e| Error::rejected(e.to_string()))?;
        let kid = jws
            .header()
            .kid
            .as_deref()
            .ok_or_else(|| Error::rejected("token header has no kid"))?;
        let provisioner = self
            .provisioners
            .find_by_kid(kid)
            .ok_or_else(|| Error::rejected(format!("no provisioner with key id '{kid}'")))?;

        let claims: TokenClaims = jws
            .verified_claims(&provisioner.key)
            .map_err(|e| Error::rejected(e.to_string()))?;

        if claims.iss != provisioner.name {
            return Err(Error::rejected(format!(
                "token issuer '{}' does not match provisioner '{}'",
                claims.iss, provisioner.name
            )));
        }
        if !claims.aud.iter().any(|aud| self.audience_matches(aud, kind)) {
            return Err(Error::rejected(format!(
                "token audience {:?} is not valid for /{}",
                claims.aud,
                kind.endpoint()
            )));
        }

        let now = Utc::now().timestamp();
        if claims.nbf > now + CLOCK_SKEW_SECS {
            return Err(Error::rejected("token is not yet valid"));
        }
        if claims.exp + CLOCK_SKEW_SECS < now {
            return Err(Error::rejected("token is expired"));
        }

        if claims.jti.is_empty() {
            return Err(Error::rejected("token has no jti"));
        }
        if !lock(&self.used_tokens)?.insert(claims.jti.clone()) {
            return Err(Error::rejected("token has already been used"));
        }

        debug!(kid, provisioner = %provisioner.name, sub = %claims.sub, "verified token");
        Ok((claims, provisioner.clone()))
    }

    fn audience_matches(&self, aud: &str, kind: TokenKind) -> bool {
        let Ok(url) = reqwest::Url::parse(aud) else {
            return false;
        };
        let host_ok = url.host_str().is_some_and(|host| {
            self.config
                .dns_names
                .iter()
                .any(|dns| dns.trim().eq_ignore_ascii_case(host))
        });
        let path = url.path().trim_end_matches('/');
        url.scheme() == "https" && host_ok && path.ends_with(&format!("/{}", kind.endpoint()))
    }

    fn is_revoked(&self, serial: &str) -> Result<bool> {
        Ok(lock(&self.revocations)?.contains_key(serial))
    }

    fn validity(
        &self,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let not_before = not_before.unwrap_or_else(Utc::now);
        let not_after = not_after.unwrap_or(not_before + self.cert_lifetime);
        if not_after <= not_before {
            return Err(Error::rejected(format!(
                "notAfter {not_after} must be after notBefore {not_before}"
            )));
        }
        if not_after > self.intermediate.not_after()? {
            return Err(Error::rejected(
                "requested validity extends past the authority certificate",
            ));
        }
        Ok((not_before, not_after))
    }

    fn apply_leaf_profile(
        &self,
        params: &mut CertificateParams,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<()> {
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.serial_number = Some(random_serial()?);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        Ok(())
    }

    fn finish(&self, der: Vec<u8>, action: &str) -> Result<(Certificate, Certificate)> {
        let leaf = Certificate::from_der(der);
        leaf.verify_issued_by(&self.intermediate)?;
        info!(
            serial = %leaf.serial()?,
            cn = ?leaf.common_name()?,
            not_after = %leaf.not_after()?,
            "{action} certificate"
        );
        Ok((leaf, self.intermediate.clone()))
    }

    fn persist(&self, record: &RevocationRecord) -> Result<()> {
        let Some(path) = &self.config.revocations else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("failed to serialize revocation: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl Authority for LocalAuthority {
    fn authorize(&self, ott: &str) -> Result<SignOptions> {
        let (claims, provisioner) = self.verify_token(ott, TokenKind::Sign)?;
        let sans = if claims.sans.is_empty() {
            vec![claims.sub.clone()]
        } else {
            claims.sans.clone()
        };
        let validity = claims.validity.unwrap_or_default();

        Ok(SignOptions {
            provisioner: provisioner.name,
            subject: claims.sub,
            sans,
            not_before: validity.not_before,
            not_after: validity.not_after,
        })
    }

    fn sign(
        &self,
        csr_pem: &str,
        options: &SignOptions,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<(Certificate, Certificate)> {
        let request =
            CertificateRequest::from_pem(csr_pem).map_err(|e| Error::rejected(e.to_string()))?;

        if !token::subject_matches(request.common_name(), &options.subject) {
            return Err(Error::rejected(format!(
                "certificate request common name '{}' does not match token subject '{}'",
                request.common_name(),
                options.subject
            )));
        }

        let requested = normalized_sans(&request.sans());
        let allowed = normalized_sans(&options.sans);
        if requested != allowed {
            return Err(Error::SanMismatch(format!(
                "certificate request SANs {requested:?} do not match token SANs {allowed:?}"
            )));
        }

        let (not_before, not_after) = self.validity(
            not_before.or(options.not_before),
            not_after.or(options.not_after),
        )?;

        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| Error::rejected(format!("failed to parse certificate request: {e}")))?;
        self.apply_leaf_profile(&mut csr.params, not_before, not_after)?;
        let cert = csr
            .signed_by(&self.issuer)
            .map_err(|e| Error::Certificate(format!("certificate signing failed: {e}")))?;

        debug!(provisioner = %options.provisioner, "signed certificate request");
        self.finish(cert.der().to_vec(), "issued")
    }

    fn renew(&self, peer: &Certificate, key: &PrivateKey) -> Result<(Certificate, Certificate)> {
        peer.verify_issued_by(&self.intermediate)
            .map_err(|_| Error::rejected("certificate was not issued by this authority"))?;

        let serial = peer.serial()?;
        if self.is_revoked(&serial)? {
            return Err(Error::rejected(format!("certificate {serial} is revoked")));
        }
        let now = Utc::now();
        if peer.not_after()? < now {
            return Err(Error::rejected(format!("certificate {serial} has expired")));
        }
        if key.public_key_bits()? != peer.public_key_bits()? {
            return Err(Error::rejected("private key does not match certificate"));
        }

        let lifetime = peer.not_after()? - peer.not_before()?;
        let (not_before, not_after) = self.validity(Some(now), Some(now + lifetime))?;

        let mut params = renewal_params(peer)?;
        self.apply_leaf_profile(&mut params, not_before, not_after)?;

        let key_pair = KeyPair::from_pem(key.as_pem())
            .map_err(|e| Error::Certificate(format!("failed to load private key: {e}")))?;
        let cert = params
            .signed_by(&key_pair, &self.issuer)
            .map_err(|e| Error::Certificate(format!("certificate signing failed: {e}")))?;

        debug!(previous = %serial, "renewing certificate");
        self.finish(cert.der().to_vec(), "renewed")
    }

    fn revoke(&self, options: &RevokeOptions) -> Result<()> {
        let serial = options.serial.trim();
        if serial.is_empty() {
            return Err(Error::RequiredFlag("serial"));
        }

        let provisioner = match (&options.ott, &options.peer) {
            (Some(ott), _) => {
                let (claims, provisioner) = self.verify_token(ott, TokenKind::Revoke)?;
                token::ensure_subject(&claims.sub, "serial", serial)?;
                if let Some(bound) = claims.serial.as_deref() {
                    token::ensure_subject(bound, "serial", serial)?;
                }
                provisioner.name
            }
            (None, Some(peer)) => {
                peer.verify_issued_by(&self.intermediate).map_err(|_| {
                    Error::rejected("client certificate was not issued by this authority")
                })?;
                let peer_serial = peer.serial()?;
                if peer_serial != serial {
                    return Err(Error::rejected(format!(
                        "client certificate serial {peer_serial} cannot revoke {serial}"
                    )));
                }
                MTLS_REVOKER.to_string()
            }
            (None, None) => {
                return Err(Error::rejected(
                    "revocation requires a token or a client certificate",
                ))
            }
        };

        let mut revocations = lock(&self.revocations)?;
        if revocations.contains_key(serial) {
            return Err(Error::rejected(format!(
                "certificate {serial} is already revoked"
            )));
        }

        let record = RevocationRecord {
            serial: serial.to_string(),
            reason_code: options.reason_code,
            reason: options.reason.clone(),
            provisioner,
            revoked_at: Utc::now(),
        };
        self.persist(&record)?;
        info!(
            serial,
            reason_code = record.reason_code,
            provisioner = %record.provisioner,
            "revoked certificate"
        );
        revocations.insert(record.serial.clone(), record);
        Ok(())
    }

    fn tls_options(&self) -> Option<TlsOptions> {
        Some(TlsOptions {
            cipher_suites: vec![
                "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256".into(),
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".into(),
            ],
            min_version: Some(1.2),
            max_version: Some(1.3),
        })
    }
}

impl std::fmt::Debug for LocalAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthority")
            .field("dns_names", &self.config.dns_names)
            .field("provisioners", &self.provisioners.len())
            .field("cert_lifetime", &self.cert_lifetime)
            .finish_non_exhaustive()
    }
}

fn first_certificate(path: &Path) -> Result<Certificate> {
    certificate::read_chain(path)
        .map_err(|e| Error::Configuration(e.to_string()))
        .map(|mut chain| chain.remove(0))
}

/// Lowercased DNS names and canonical IP strings.
fn normalized_sans(sans: &[String]) -> BTreeSet<String> {
    sans.iter()
        .map(|san| match san.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => san.to_lowercase(),
        })
        .collect()
}

fn to_offset(time: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(time.timestamp())
        .map_err(|e| Error::Internal(format!("time out of range: {e}")))
}

/// Subject and SANs of `peer`, ready for a fresh leaf profile.
fn renewal_params(peer: &Certificate) -> Result<CertificateParams> {
    let (dns, ips, emails) = peer.subject_alt_names()?;
    let mut params = CertificateParams::new(dns)
        .map_err(|e| Error::Certificate(format!("invalid DNS SAN in certificate: {e}")))?;
    params
        .subject_alt_names
        .extend(ips.into_iter().map(SanType::IpAddress));
    for email in emails {
        let ia5 = Ia5String::try_from(email.clone())
            .map_err(|e| Error::Certificate(format!("invalid email SAN '{email}': {e}")))?;
        params.subject_alt_names.push(SanType::Rfc822Name(ia5));
    }

    let mut dn = DistinguishedName::new();
    if let Some(cn) = peer.common_name()? {
        dn.push(DnType::CommonName, cn);
    }
    params.distinguished_name = dn;
    Ok(params)
}

/// 16 random bytes, positive and without a leading zero byte.
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::Internal("system random failed".into()))?;
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    Ok(SerialNumber::from_slice(&bytes))
}

fn load_revocations(path: &Path) -> Result<HashMap<String, RevocationRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<RevocationRecord>(line)
                .map(|record| (record.serial.clone(), record))
                .map_err(|e| {
                    Error::Configuration(format!("corrupt revocation log {}: {e}", path.display()))
                })
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("authority state lock poisoned".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::bootstrap::{self, Bootstrap, BootstrapOptions};
    use crate::csr::CertificateRequestBuilder;
    use crate::jose::Jwk;
    use crate::keys;
    use crate::token::TokenGenerator;

    struct Fixture {
        _dir: tempfile::TempDir,
        created: Bootstrap,
        authority: LocalAuthority,
        provisioner: Provisioner,
        key: Jwk,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let created = bootstrap::init(&BootstrapOptions {
            dir: dir.path().to_path_buf(),
            name: "Test".into(),
            dns_names: vec!["ca.example.com".into()],
            provisioner: "admin".into(),
            password: "pass".into(),
        })
        .unwrap();
        let authority = LocalAuthority::load(&created.config_path).unwrap();
        let provisioner = created.config.authority.provisioners[0].clone();
        let key =
            keys::decrypt_key(provisioner.encrypted_key.as_deref().unwrap(), b"pass").unwrap();
        Fixture {
            _dir: dir,
            created,
            authority,
            provisioner,
            key,
        }
    }

    impl Fixture {
        fn token(&self, kind: TokenKind, subject: &str) -> TokenGenerator {
            TokenGenerator::new(kind, subject)
                .provisioner(&self.provisioner)
                .audience(format!("https://ca.example.com/{}", kind.endpoint()))
                .root_fingerprint(self.created.root_fingerprint.clone())
        }

        fn issue(&self, subject: &str) -> (Certificate, PrivateKey) {
            let ott = self.token(TokenKind::Sign, subject).generate(&self.key).unwrap();
            let signed = CertificateRequestBuilder::new(ott.clone()).build().unwrap();
            let options = self.authority.authorize(&ott).unwrap();
            let (leaf, _) = self
                .authority
                .sign(signed.request().pem(), &options, None, None)
                .unwrap();
            (leaf, signed.private_key().clone())
        }
    }

    #[test]
    fn issues_leaf_for_token_subject() {
        let f = fixture();
        let (leaf, _) = f.issue("host.example.com");

        assert_eq!(leaf.common_name().unwrap().as_deref(), Some("host.example.com"));
        let (dns, ips, _) = leaf.subject_alt_names().unwrap();
        assert_eq!(dns, vec!["host.example.com".to_string()]);
        assert!(ips.is_empty());
        leaf.verify_issued_by(f.authority.intermediate()).unwrap();

        let lifetime = leaf.not_after().unwrap() - leaf.not_before().unwrap();
        assert_eq!(lifetime.num_hours(), DEFAULT_CERT_LIFETIME_HOURS);
    }

    #[test]
    fn token_is_single_use() {
        let f = fixture();
        let ott = f.token(TokenKind::Sign, "a.example.com").generate(&f.key).unwrap();
        f.authority.authorize(&ott).unwrap();
        assert!(matches!(
            f.authority.authorize(&ott),
            Err(Error::AuthorityRejection { message, .. }) if message.contains("already been used")
        ));
    }

    #[test]
    fn rejects_wrong_audience_and_expired() {
        let f = fixture();
        let revoke = f.token(TokenKind::Revoke, "123").generate(&f.key).unwrap();
        assert!(matches!(
            f.authority.authorize(&revoke),
            Err(Error::AuthorityRejection { .. })
        ));

        let expired = f
            .token(TokenKind::Sign, "a.example.com")
            .lifetime(Duration::seconds(-600))
            .generate(&f.key)
            .unwrap();
        assert!(matches!(
            f.authority.authorize(&expired),
            Err(Error::AuthorityRejection { message, .. }) if message.contains("expired")
        ));
    }

    #[test]
    fn rejects_token_from_unknown_key() {
        let f = fixture();
        let stranger = Jwk::generate_p256().unwrap();
        let ott = f.token(TokenKind::Sign, "a.example.com").generate(&stranger).unwrap();
        assert!(matches!(
            f.authority.authorize(&ott),
            Err(Error::AuthorityRejection { .. })
        ));
    }

    #[test]
    fn rejects_common_name_mismatch() {
        let f = fixture();
        let ott_a = f.token(TokenKind::Sign, "a.example.com").generate(&f.key).unwrap();
        let ott_b = f.token(TokenKind::Sign, "b.example.com").generate(&f.key).unwrap();
        let csr_b = CertificateRequestBuilder::new(ott_b).build().unwrap();

        let options = f.authority.authorize(&ott_a).unwrap();
        assert!(matches!(
            f.authority.sign(csr_b.request().pem(), &options, None, None),
            Err(Error::AuthorityRejection { message, .. }) if message.contains("common name")
        ));
    }

    #[test]
    fn rejects_extra_san() {
        let f = fixture();
        let ott = f
            .token(TokenKind::Sign, "a.example.com")
            .sans(["a.example.com", "10.0.0.1"])
            .generate(&f.key)
            .unwrap();
        let csr = CertificateRequestBuilder::new(ott.clone())
            .with_sans(["extra.example.com"])
            .build()
            .unwrap();

        let options = f.authority.authorize(&ott).unwrap();
        assert!(matches!(
            f.authority.sign(csr.request().pem(), &options, None, None),
            Err(Error::SanMismatch(_))
        ));
    }

    #[test]
    fn explicit_validity_is_honored() {
        let f = fixture();
        let ott = f.token(TokenKind::Sign, "a.example.com").generate(&f.key).unwrap();
        let csr = CertificateRequestBuilder::new(ott.clone()).build().unwrap();
        let options = f.authority.authorize(&ott).unwrap();

        let not_after = Utc::now() + Duration::hours(2);
        let (leaf, issuer) = f
            .authority
            .sign(csr.request().pem(), &options, None, Some(not_after))
            .unwrap();
        assert_eq!(leaf.not_after().unwrap().timestamp(), not_after.timestamp());
        assert_eq!(&issuer, f.authority.intermediate());
    }

    #[test]
    fn renew_keeps_identity_and_changes_serial() {
        let f = fixture();
        let (leaf, key) = f.issue("host.example.com");

        let (renewed, _) = f.authority.renew(&leaf, &key).unwrap();
        assert_ne!(renewed.serial().unwrap(), leaf.serial().unwrap());
        assert_eq!(renewed.common_name().unwrap(), leaf.common_name().unwrap());
        assert_eq!(
            renewed.subject_alt_names().unwrap(),
            leaf.subject_alt_names().unwrap()
        );
        assert_eq!(renewed.public_key_bits().unwrap(), leaf.public_key_bits().unwrap());
    }

    #[test]
    fn renew_carries_ip_sans() {
        let f = fixture();
        let ott = f
            .token(TokenKind::Sign, "host.example.com")
            .sans(["host.example.com", "10.0.0.7"])
            .generate(&f.key)
            .unwrap();
        let signed = CertificateRequestBuilder::new(ott.clone()).build().unwrap();
        let options = f.authority.authorize(&ott).unwrap();
        let (leaf, _) = f
            .authority
            .sign(signed.request().pem(), &options, None, None)
            .unwrap();

        let (renewed, _) = f.authority.renew(&leaf, signed.private_key()).unwrap();
        let (dns, ips, emails) = renewed.subject_alt_names().unwrap();
        assert_eq!(dns, vec!["host.example.com".to_string()]);
        assert_eq!(ips, vec!["10.0.0.7".parse::<IpAddr>().unwrap()]);
        assert!(emails.is_empty());
        renewed.verify_issued_by(f.authority.intermediate()).unwrap();
    }

    #[test]
    fn renew_rejects_mismatched_key() {
        let f = fixture();
        let (leaf, _) = f.issue("host.example.com");
        let (_, other_key) = f.issue("other.example.com");
        assert!(matches!(
            f.authority.renew(&leaf, &other_key),
            Err(Error::AuthorityRejection { .. })
        ));
    }

    #[test]
    fn revoke_with_token_records_provisioner() {
        let f = fixture();
        let (leaf, key) = f.issue("host.example.com");
        let serial = leaf.serial().unwrap();

        let ott = f
            .token(TokenKind::Revoke, &serial)
            .reason(Some("KeyCompromise".into()))
            .generate(&f.key)
            .unwrap();
        f.authority
            .revoke(&RevokeOptions {
                serial: serial.clone(),
                reason_code: 1,
                reason: "KeyCompromise".into(),
                ott: Some(ott),
                peer: None,
            })
            .unwrap();

        let record = f.authority.revocation(&serial).unwrap().unwrap();
        assert_eq!(record.provisioner, "admin");
        assert_eq!(record.reason_code, 1);

        assert!(matches!(
            f.authority.renew(&leaf, &key),
            Err(Error::AuthorityRejection { message, .. }) if message.contains("revoked")
        ));

        // The log survives a restart.
        let reloaded = LocalAuthority::load(&f.created.config_path).unwrap();
        assert_eq!(reloaded.revocation(&serial).unwrap(), Some(record));
    }

    #[test]
    fn revoke_token_bound_to_other_serial() {
        let f = fixture();
        let ott = f.token(TokenKind::Revoke, "123").generate(&f.key).unwrap();
        assert!(matches!(
            f.authority.revoke(&RevokeOptions {
                serial: "456".into(),
                reason_code: 0,
                reason: String::new(),
                ott: Some(ott),
                peer: None,
            }),
            Err(Error::TokenSubjectMismatch { .. })
        ));
    }

    #[test]
    fn revoke_with_client_certificate() {
        let f = fixture();
        let (leaf, _) = f.issue("host.example.com");
        let serial = leaf.serial().unwrap();

        let options = RevokeOptions {
            serial: serial.clone(),
            reason_code: 4,
            reason: "Superseded".into(),
            ott: None,
            peer: Some(leaf),
        };
        f.authority.revoke(&options).unwrap();
        assert_eq!(
            f.authority.revocation(&serial).unwrap().unwrap().provisioner,
            MTLS_REVOKER
        );
        assert!(matches!(
            f.authority.revoke(&options),
            Err(Error::AuthorityRejection { message, .. }) if message.contains("already revoked")
        ));
    }

    #[test]
    fn revoke_needs_credentials() {
        let f = fixture();
        assert!(f
            .authority
            .revoke(&RevokeOptions {
                serial: "1".into(),
                reason_code: 0,
                reason: String::new(),
                ott: None,
                peer: None,
            })
            .is_err());
    }
}
