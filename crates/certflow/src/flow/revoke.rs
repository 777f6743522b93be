use tracing::info;

use super::Context;
use crate::ca::{reason_to_code, CaClient, Connector, RemoteTarget, RevokeRequest, TlsMaterial};
use crate::config::FlowConfig;
use crate::keys::PasswordPrompt;
use crate::provisioner::ProvisionerChooser;
use crate::token::{self, TokenGenerator, TokenKind};
use crate::Result;

/// Result of a successful revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revoked {
    pub serial: String,
    pub reason_code: u8,
    pub status: String,
}

/// Revokes a certificate by serial, authorized by a token or by the
/// certificate itself over mTLS.
pub struct RevokeFlow {
    ctx: Context,
}

impl RevokeFlow {
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

    pub fn run(&self, serial: &str) -> Result<Revoked> {
        self.ctx.reject_offline_token()?;
        let config = &self.ctx.config;
        let credentials = config.credential_pair()?;
        let reason = config.reason.clone().unwrap_or_default();

        let reason_code = reason_to_code(&reason)?;

        let response = match credentials {
            Some((crt, key)) => {
                let ott = config.token().map(str::to_string);
                if let Some(ott) = ott.as_deref() {
                    let claims = token::peek_claims(ott)?;
                    token::ensure_subject(&claims.sub, "serial", serial)?;
                }
                let request = RevokeRequest::new(serial, &reason, ott)?;
                if config.offline {
                    let tls = TlsMaterial::load(crt, key)?;
                    self.ctx.embedded()?.with_tls(tls).revoke(&request)?
                } else {
                    let target = RemoteTarget::mutual_tls(
                        config.require_ca_url()?,
                        config.root.as_deref(),
                        crt,
                        key,
                    )?;
                    self.ctx.remote(target)?.revoke(&request)?
                }
            }
            None => {
                let ott = match config.token() {
                    Some(ott) => ott.to_string(),
                    None => {
                        let generator = TokenGenerator::new(TokenKind::Revoke, serial)
                            .reason(Some(reason.clone()));
                        self.ctx.mint(generator, TokenKind::Revoke)?
                    }
                };
                let claims = token::peek_claims(&ott)?;
                token::ensure_subject(&claims.sub, "serial", serial)?;

                let request = RevokeRequest::new(serial, &reason, Some(ott))?;
                if config.offline {
                    self.ctx.embedded()?.revoke(&request)?
                } else {
                    let target = RemoteTarget::from_token(
                        &claims,
                        config.ca_url.as_deref(),
                        config.root.as_deref(),
                    )?;
                    self.ctx.remote(target)?.revoke(&request)?
                }
            }
        };

        info!(serial, reason_code, status = %response.status, "certificate revoked");
        Ok(Revoked {
            serial: serial.to_string(),
            reason_code,
            status: response.status,
        })
    }
}
