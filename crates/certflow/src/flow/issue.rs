use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{write_chain, Context, WrittenCertificate};
use crate::ca::{CaClient, Connector, RemoteTarget, SignRequest};
use crate::certificate;
use crate::config::FlowConfig;
use crate::csr::{CertificateRequestBuilder, SignedRequest};
use crate::keys::PasswordPrompt;
use crate::provisioner::ProvisionerChooser;
use crate::token::{self, TokenClaims, TokenGenerator, TokenKind};
use crate::{Error, Result};

/// Result of a successful issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub certificate: WrittenCertificate,
    pub key_path: PathBuf,
}

/// Obtains a new certificate and key for a subject.
pub struct IssueFlow {
    ctx: Context,
}

impl IssueFlow {
    pub fn new(
        config: FlowConfig,
        chooser: impl ProvisionerChooser + 'static,
        prompt: impl PasswordPrompt + 'static,
    ) -> Self {
        Self {
            ctx: Context::new(config, chooser, prompt),
        }
    }

    /// Replaces the HTTPS connector used in online mode.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.ctx.set_connector(connector);
        self
    }

    /// Signs a fresh key for `subject`, writing the chain to `crt_path` and
    /// then the key to `key_path`.
    pub fn run(&self, subject: &str, crt_path: &Path, key_path: &Path) -> Result<Issued> {
        self.ctx.reject_offline_token()?;
        let config = &self.ctx.config;

        let (ott, claims) = match config.token() {
            Some(ott) => {
                let claims = token::peek_claims(ott)?;
                if claims.is_authority_token() && !config.sans.is_empty() {
                    return Err(Error::FlagConflict {
                        flag: "token",
                        other: "san",
                    });
                }
                (ott.to_string(), claims)
            }
            None => {
                let generator = TokenGenerator::new(TokenKind::Sign, subject)
                    .sans(config.sans.iter().cloned())
                    .validity(config.not_before, config.not_after);
                let ott = self.ctx.mint(generator, TokenKind::Sign)?;
                let claims = token::peek_claims(&ott)?;
                (ott, claims)
            }
        };

        let signed = CertificateRequestBuilder::new(ott.clone())
            .with_sans(config.sans.iter().cloned())
            .build()?;
        check_subject(&claims, &signed, subject)?;

        let request = SignRequest {
            csr: signed.request().pem().to_string(),
            ott,
            not_before: config.not_before,
            not_after: config.not_after,
        };
        let response = if config.offline {
            self.ctx.embedded()?.sign(&request)?
        } else {
            let target = RemoteTarget::from_token(
                &claims,
                config.ca_url.as_deref(),
                config.root.as_deref(),
            )?;
            self.ctx.remote(target)?.sign(&request)?
        };

        let chain = response.chain()?;
        write_chain(crt_path, &chain)?;
        let (_, key) = signed.into_parts();
        certificate::write_private_file(key_path, key.as_pem())?;

        let written = WrittenCertificate::describe(&chain[0], crt_path)?;
        info!(
            serial = %written.serial,
            cn = ?written.common_name,
            crt = %crt_path.display(),
            key = %key_path.display(),
            "certificate issued"
        );
        Ok(Issued {
            certificate: written,
            key_path: key_path.to_path_buf(),
        })
    }
}

/// Native tokens name the subject directly; foreign tokens must carry it as
/// their email claim.
fn check_subject(claims: &TokenClaims, signed: &SignedRequest, subject: &str) -> Result<()> {
    if claims.is_authority_token() {
        return token::ensure_subject(signed.request().common_name(), "subject", subject);
    }

    debug!(iss = %claims.iss, "token is not authority-issued, matching subject by email");
    let email = signed
        .request()
        .email_addresses()
        .first()
        .ok_or_else(|| Error::TokenParse("payload does not contain an email claim".into()))?;
    token::ensure_subject(email, "subject", subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::Provisioner;

    fn flow(config: FlowConfig) -> IssueFlow {
        IssueFlow::new(
            config,
            |_: &[Provisioner]| Ok::<usize, Error>(0),
            |_: &str| Ok::<String, Error>("pass".into()),
        )
    }

    #[test]
    fn offline_with_token_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let flow = flow(FlowConfig {
            offline: true,
            token: Some("a.b.c".into()),
            ..Default::default()
        });
        let err = flow
            .run("host", &dir.path().join("c.crt"), &dir.path().join("c.key"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FlagConflict {
                flag: "offline",
                other: "token"
            }
        ));
        assert!(!dir.path().join("c.crt").exists());
    }

    #[test]
    fn native_token_with_sans_conflicts() {
        let key = crate::jose::Jwk::generate_p256().unwrap();
        let ott = TokenGenerator::new(TokenKind::Sign, "host.example.com")
            .provisioner(&Provisioner::jwk("acme", key.clone(), None))
            .audience("https://ca.example.com/sign")
            .root_fingerprint("abc")
            .generate(&key)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let flow = flow(FlowConfig {
            token: Some(ott),
            sans: vec!["extra.example.com".into()],
            ..Default::default()
        });
        assert!(matches!(
            flow.run("host.example.com", &dir.path().join("c.crt"), &dir.path().join("c.key")),
            Err(Error::FlagConflict {
                flag: "token",
                other: "san"
            })
        ));
    }

    #[test]
    fn foreign_token_requires_email() {
        let key = crate::jose::Jwk::generate_p256().unwrap();
        let payload = serde_json::json!({
            "sub": "1234567890",
            "aud": "client-id",
            "iss": "https://accounts.example.com",
        });
        let ott =
            crate::jose::sign_es256(&crate::jose::JwsHeader::es256("x"), &payload, &key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let flow = flow(FlowConfig {
            token: Some(ott),
            ..Default::default()
        });
        assert!(matches!(
            flow.run("jane@example.com", &dir.path().join("c.crt"), &dir.path().join("c.key")),
            Err(Error::TokenParse(msg)) if msg.contains("email")
        ));
    }

    #[test]
    fn native_subject_must_match() {
        let key = crate::jose::Jwk::generate_p256().unwrap();
        let ott = TokenGenerator::new(TokenKind::Sign, "a.example.com")
            .provisioner(&Provisioner::jwk("acme", key.clone(), None))
            .audience("https://ca.example.com/sign")
            .root_fingerprint("abc")
            .generate(&key)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let flow = flow(FlowConfig {
            token: Some(ott),
            ..Default::default()
        });
        assert!(matches!(
            flow.run("b.example.com", &dir.path().join("c.crt"), &dir.path().join("c.key")),
            Err(Error::TokenSubjectMismatch { .. })
        ));
    }
}
