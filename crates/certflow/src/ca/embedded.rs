//! In-process CA client.

use std::path::Path;

use tracing::debug;

use super::{reason_to_code, CaClient, RevokeRequest, RevokeResponse, SignRequest, SignResponse};
use crate::authority::{Authority, LocalAuthority, RevokeOptions};
use crate::certificate::{self, Certificate, PrivateKey};
use crate::config::AuthorityConfig;
use crate::{Error, Result};

/// A certificate chain and its private key.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    chain: Vec<Certificate>,
    key: PrivateKey,
}

impl TlsMaterial {
    pub fn new(chain: Vec<Certificate>, key: PrivateKey) -> Result<Self> {
        if chain.is_empty() {
            return Err(Error::Certificate("certificate chain is empty".into()));
        }
        Ok(Self { chain, key })
    }

    /// Reads a PEM chain and a PEM private key.
    pub fn load(crt: &Path, key: &Path) -> Result<Self> {
        Self::new(certificate::read_chain(crt)?, PrivateKey::read(key)?)
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn key(&self) -> &PrivateKey {
        &self.key
    }
}

/// CA client backed by an in-process [`Authority`].
///
/// Authority errors are returned unchanged.
pub struct EmbeddedCa {
    authority: Box<dyn Authority>,
    config: AuthorityConfig,
    tls: Option<TlsMaterial>,
}

impl EmbeddedCa {
    /// Starts a [`LocalAuthority`] from the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = AuthorityConfig::load(path)?;
        let authority = LocalAuthority::new(config.clone())?;
        Ok(Self::new(Box::new(authority), config))
    }

    /// Wraps an authority engine.
    pub fn new(authority: Box<dyn Authority>, config: AuthorityConfig) -> Self {
        Self {
            authority,
            config,
            tls: None,
        }
    }

    /// Authenticates renew and token-less revoke requests with this
    /// certificate.
    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    fn response(&self, leaf: Certificate, issuer: Certificate) -> SignResponse {
        SignResponse {
            crt: leaf.to_pem().to_string(),
            ca: issuer.to_pem().to_string(),
            tls_options: self.authority.tls_options(),
        }
    }
}

impl CaClient for EmbeddedCa {
    fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        let options = self.authority.authorize(&request.ott)?;
        let (leaf, issuer) = self.authority.sign(
            &request.csr,
            &options,
            request.not_before,
            request.not_after,
        )?;
        Ok(self.response(leaf, issuer))
    }

    fn renew(&self) -> Result<SignResponse> {
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| Error::rejected("renew requires a client certificate"))?;
        let (leaf, issuer) = self.authority.renew(tls.leaf(), tls.key())?;
        Ok(self.response(leaf, issuer))
    }

    fn revoke(&self, request: &RevokeRequest) -> Result<RevokeResponse> {
        let reason_code = reason_to_code(&request.reason)?;
        let ott = Some(request.ott.clone()).filter(|ott| !ott.is_empty());
        let peer = match &ott {
            Some(_) => None,
            None => self.tls.as_ref().map(|tls| tls.leaf().clone()),
        };
        debug!(serial = %request.serial, mtls = peer.is_some(), "embedded revoke");

        self.authority.revoke(&RevokeOptions {
            serial: request.serial.clone(),
            reason_code,
            reason: request.reason.clone(),
            ott,
            peer,
        })?;
        Ok(RevokeResponse {
            status: "ok".into(),
        })
    }
}

impl std::fmt::Debug for EmbeddedCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedCa")
            .field("dns_names", &self.config.dns_names)
            .field("mtls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}
