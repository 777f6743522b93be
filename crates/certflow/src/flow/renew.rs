use std::path::Path;

use tracing::info;

use super::{write_chain, Context, WrittenCertificate};
use crate::ca::{CaClient, Connector, RemoteTarget, TlsMaterial};
use crate::config::FlowConfig;
use crate::keys::NoPrompt;
use crate::{Error, Result};

/// Result of a successful renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renewed {
    pub previous_serial: String,
    pub certificate: WrittenCertificate,
}

/// Re-issues a certificate for the same key, authenticated by the
/// certificate itself. No token is involved.
pub struct RenewFlow {
    ctx: Context,
}

impl RenewFlow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            ctx: Context::new(config, |_: &[crate::Provisioner]| Ok::<usize, Error>(0), NoPrompt),
        }
    }

    /// Replaces the HTTPS connector used in online mode.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.ctx.set_connector(connector);
        self
    }

    /// Renews the configured `crt`/`key` pair, writing the new chain to
    /// `out`, or over `crt` when `out` is `None`.
    pub fn run(&self, out: Option<&Path>) -> Result<Renewed> {
        let config = &self.ctx.config;
        let (crt, key) = config
            .credential_pair()?
            .ok_or(Error::RequiredFlag("crt"))?;
        let tls = TlsMaterial::load(crt, key)?;
        let previous_serial = tls.leaf().serial()?;

        let response = if config.offline {
            self.ctx.embedded()?.with_tls(tls).renew()?
        } else {
            let target =
                RemoteTarget::mutual_tls(config.require_ca_url()?, config.root.as_deref(), crt, key)?;
            self.ctx.remote(target)?.renew()?
        };

        let chain = response.chain()?;
        let out = out.unwrap_or(crt);
        write_chain(out, &chain)?;

        let written = WrittenCertificate::describe(&chain[0], out)?;
        info!(
            previous = %previous_serial,
            serial = %written.serial,
            not_after = %written.not_after,
            crt = %out.display(),
            "certificate renewed"
        );
        Ok(Renewed {
            previous_serial,
            certificate: written,
        })
    }
}
