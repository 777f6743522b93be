//! Authority configuration and per-invocation flow configuration.
//!
//! [`AuthorityConfig`] is the JSON document the embedded authority runs from
//! (`ca.json`). [`FlowConfig`] carries the caller's inputs into the flow
//! orchestrators as one explicit value.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::PasswordSource;
use crate::provisioner::{Provisioner, ProvisionerRegistry};
use crate::token::TokenKind;
use crate::{Error, Result};

/// Environment variable overriding the certflow home directory.
pub const CERTFLOW_PATH_ENV: &str = "CERTFLOW_PATH";

/// Root certificate path, relative to the certflow home.
const DEFAULT_ROOT: &str = "certs/root_ca.crt";

/// Authority configuration path, relative to the certflow home.
const DEFAULT_CA_CONFIG: &str = "config/ca.json";

/// Root certificate path(s): one path or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RootPaths {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl RootPaths {
    fn first(&self) -> Option<&PathBuf> {
        match self {
            RootPaths::One(path) => Some(path),
            RootPaths::Many(paths) => paths.first(),
        }
    }

    fn resolve_against(&mut self, base: &Path) {
        match self {
            RootPaths::One(path) => *path = resolve(base, path),
            RootPaths::Many(paths) => {
                for path in paths.iter_mut() {
                    *path = resolve(base, path);
                }
            }
        }
    }
}

/// The `authority` section of `ca.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthoritySection {
    #[serde(default)]
    pub provisioners: Vec<Provisioner>,
}

/// Authority configuration (`ca.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityConfig {
    /// Root certificate(s) clients should trust.
    pub root: RootPaths,

    /// Intermediate certificate used to sign leaves.
    pub crt: PathBuf,

    /// Intermediate private key (PKCS#8 PEM).
    pub key: PathBuf,

    /// DNS names the authority answers on. The first one derives the
    /// audience and base URL.
    #[serde(default)]
    pub dns_names: Vec<String>,

    /// Provisioners.
    #[serde(default)]
    pub authority: AuthoritySection,

    /// Append-only revocation log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocations: Option<PathBuf>,
}

impl AuthorityConfig {
    /// Loads and validates a configuration file.
    ///
    /// Relative paths inside the document are resolved against the
    /// directory holding the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("error reading {}: {e}", path.display()))
        })?;
        let mut config: AuthorityConfig = serde_json::from_str(&content).map_err(|e| {
            Error::Configuration(format!("error parsing {}: {e}", path.display()))
        })?;
        config.validate()?;

        if let Some(base) = path.parent() {
            config.root.resolve_against(base);
            config.crt = resolve(base, &config.crt);
            config.key = resolve(base, &config.key);
            config.revocations = config.revocations.map(|p| resolve(base, &p));
        }

        tracing::debug!(
            config = %path.display(),
            provisioners = config.authority.provisioners.len(),
            "loaded authority configuration"
        );
        Ok(config)
    }

    /// Checks the fields an embedded authority cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.authority.provisioners.is_empty() {
            return Err(Error::Configuration(
                "authority configuration has no provisioners".into(),
            ));
        }
        if self.dns_names.iter().all(|name| name.trim().is_empty()) {
            return Err(Error::Configuration(
                "authority configuration has no dnsNames".into(),
            ));
        }
        if self.root.first().is_none() {
            return Err(Error::Configuration(
                "authority configuration has no root certificate".into(),
            ));
        }
        Ok(())
    }

    /// The first configured root certificate.
    pub fn root_path(&self) -> Result<&Path> {
        self.root
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::Configuration("authority configuration has no root".into()))
    }

    fn primary_dns_name(&self) -> Result<&str> {
        self.dns_names
            .iter()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .ok_or_else(|| Error::Configuration("authority configuration has no dnsNames".into()))
    }

    /// Base URL, `https://<first dns name>`.
    pub fn ca_url(&self) -> Result<String> {
        Ok(format!("https://{}", self.primary_dns_name()?))
    }

    /// Token audience for an operation, e.g. `https://ca.local/sign`.
    pub fn audience(&self, kind: TokenKind) -> Result<String> {
        Ok(format!("{}/{}", self.ca_url()?, kind.endpoint()))
    }

    /// The provisioner list as a registry.
    pub fn provisioners(&self) -> ProvisionerRegistry {
        ProvisionerRegistry::new(self.authority.provisioners.clone())
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("failed to serialize configuration: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Caller inputs for one flow invocation.
///
/// Built by the CLI from flags and defaults; passed by value into the flow
/// constructors. Nothing in the library reads flags globally.
#[derive(Debug, Clone, Default)]
pub struct FlowConfig {
    /// Use the embedded authority instead of a remote one.
    pub offline: bool,
    /// Authority configuration for offline mode.
    pub ca_config: Option<PathBuf>,
    /// Remote authority URL.
    pub ca_url: Option<String>,
    /// Root certificate file.
    pub root: Option<PathBuf>,
    /// Pre-obtained authorization token.
    pub token: Option<String>,
    /// Provisioner key id filter.
    pub kid: Option<String>,
    /// Provisioner name filter.
    pub issuer: Option<String>,
    /// File holding the provisioner key password.
    pub password_file: Option<PathBuf>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    /// Additional SANs.
    pub sans: Vec<String>,
    /// Certificate for mTLS revoke or renew.
    pub crt: Option<PathBuf>,
    /// Private key for mTLS revoke or renew.
    pub key: Option<PathBuf>,
    /// Revocation reason.
    pub reason: Option<String>,
}

impl FlowConfig {
    /// The supplied token, treating an empty string as absent.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Explicit authority configuration, or the default under the certflow home.
    pub fn ca_config_path(&self) -> PathBuf {
        self.ca_config
            .clone()
            .unwrap_or_else(|| certflow_home().join(DEFAULT_CA_CONFIG))
    }

    /// Password source for provisioner key decryption.
    pub fn password_source(&self) -> PasswordSource {
        match &self.password_file {
            Some(path) => PasswordSource::File(path.clone()),
            None => PasswordSource::Prompt,
        }
    }

    /// The CA URL, failing with the flag name when it was not given.
    pub fn require_ca_url(&self) -> Result<&str> {
        self.ca_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(Error::RequiredFlag("ca-url"))
    }

    /// The cert/key pair, requiring both or neither.
    pub fn credential_pair(&self) -> Result<Option<(&Path, &Path)>> {
        match (&self.crt, &self.key) {
            (Some(crt), Some(key)) => Ok(Some((crt.as_path(), key.as_path()))),
            (Some(_), None) => Err(Error::FlagConflict {
                flag: "crt",
                other: "key",
            }),
            (None, Some(_)) => Err(Error::FlagConflict {
                flag: "key",
                other: "crt",
            }),
            (None, None) => Ok(None),
        }
    }
}

/// The certflow home: `$CERTFLOW_PATH`, else `~/.certflow`.
pub fn certflow_home() -> PathBuf {
    home_from(std::env::var_os(CERTFLOW_PATH_ENV))
}

fn home_from(env: Option<OsString>) -> PathBuf {
    match env.filter(|v| !v.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(shellexpand::tilde("~/.certflow").as_ref()),
    }
}

/// The well-known default root certificate path.
pub fn default_root_path() -> PathBuf {
    certflow_home().join(DEFAULT_ROOT)
}
