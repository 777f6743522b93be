//! Issue, revoke and renew orchestrators.
//!
//! Each flow is built from one [`FlowConfig`] plus the interactive seams
//! (provisioner chooser, password prompt) and runs linearly: the first failure
//! aborts, and nothing is written to disk unless the authority call
//! succeeded.

mod issue;
mod renew;
mod revoke;

pub use issue::{IssueFlow, Issued};
pub use renew::{RenewFlow, Renewed};
pub use revoke::{RevokeFlow, Revoked};

use std::path::{Path, PathBuf};

use tracing::info;

use crate::ca::{self, Connector, EmbeddedCa, HttpConnector, RemoteCa, RemoteTarget};
use crate::certificate::{self, Certificate};
use crate::config::{AuthorityConfig, FlowConfig};
use crate::keys::{self, PasswordPrompt};
use crate::provisioner::{ProvisionerChooser, ProvisionerRegistry};
use crate::token::{TokenGenerator, TokenKind};
use crate::{Error, Result};

/// Dependencies shared by every flow.
pub(crate) struct Context {
    pub(crate) config: FlowConfig,
    chooser: Box<dyn ProvisionerChooser>,
    prompt: Box<dyn PasswordPrompt>,
    connector: Box<dyn Connector>,
}

impl Context {
    fn new(
        config: FlowConfig,
        chooser: impl ProvisionerChooser + 'static,
        prompt: impl PasswordPrompt + 'static,
    ) -> Self {
        Self {
            config,
            chooser: Box::new(chooser),
            prompt: Box::new(prompt),
            connector: Box::new(HttpConnector),
        }
    }

    fn set_connector(&mut self, connector: impl Connector + 'static) {
        self.connector = Box::new(connector);
    }

    /// Fails when offline mode is combined with a supplied token.
    fn reject_offline_token(&self) -> Result<()> {
        if self.config.offline && self.config.token().is_some() {
            return Err(Error::FlagConflict {
                flag: "offline",
                other: "token",
            });
        }
        Ok(())
    }

    fn authority_config(&self) -> Result<AuthorityConfig> {
        AuthorityConfig::load(self.config.ca_config_path())
    }

    fn embedded(&self) -> Result<EmbeddedCa> {
        let path = self.config.ca_config_path();
        let ca = EmbeddedCa::load(&path)?;
        info!(config = %path.display(), "using embedded authority");
        Ok(ca)
    }

    fn remote(&self, target: RemoteTarget) -> Result<RemoteCa> {
        info!(ca_url = %target.ca_url, "using remote authority");
        RemoteCa::connect(target, self.connector.as_ref())
    }

    /// Generates a token with a provisioner from the active authority.
    ///
    /// Offline, provisioners come from `ca.json`; online, from
    /// `GET /provisioners` over a transport trusting the root file.
    fn mint(&self, generator: TokenGenerator, kind: TokenKind) -> Result<String> {
        let (registry, audience, root) = if self.config.offline {
            let authority = self.authority_config()?;
            (
                authority.provisioners(),
                authority.audience(kind)?,
                authority.root_path()?.to_path_buf(),
            )
        } else {
            let ca_url = self.config.require_ca_url()?.trim_end_matches('/').to_string();
            let root = ca::root_file(self.config.root.as_deref())?;
            let target = RemoteTarget::with_root_file(&ca_url, Some(&root))?;
            let transport = self.connector.connect(&target)?;
            (
                ca::fetch_provisioners(transport.as_ref())?,
                format!("{ca_url}/{}", kind.endpoint()),
                root,
            )
        };
        self.sign_token(generator, &registry, audience, &root)
    }

    fn sign_token(
        &self,
        generator: TokenGenerator,
        registry: &ProvisionerRegistry,
        audience: String,
        root: &Path,
    ) -> Result<String> {
        let provisioner = registry.resolve(
            self.config.kid.as_deref(),
            self.config.issuer.as_deref(),
            self.chooser.as_ref(),
        )?;
        info!(provisioner = %provisioner.name, kid = provisioner.kid(), "selected provisioner");

        let key = keys::decrypt_provisioner_key(
            &provisioner,
            &self.config.password_source(),
            self.prompt.as_ref(),
        )?;
        generator
            .provisioner(&provisioner)
            .audience(audience)
            .root_file(root)?
            .generate(&key)
    }
}

/// Writes a chain, leaf first, with mode 0600.
fn write_chain(path: &Path, chain: &[Certificate]) -> Result<()> {
    certificate::write_private_file(path, &certificate::chain_pem(chain))
}

/// Summary of a certificate written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenCertificate {
    pub serial: String,
    pub common_name: Option<String>,
    pub not_after: chrono::DateTime<chrono::Utc>,
    pub crt_path: PathBuf,
}

impl WrittenCertificate {
    fn describe(leaf: &Certificate, crt_path: &Path) -> Result<Self> {
        Ok(Self {
            serial: leaf.serial()?,
            common_name: leaf.common_name()?,
            not_after: leaf.not_after()?,
            crt_path: crt_path.to_path_buf(),
        })
    }
}
