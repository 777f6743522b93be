//! Defaults file handling

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the defaults file
pub const DEFAULTS_PATH: &str = "~/.config/certflow/defaults.toml";

/// Values used when the matching flag is not given
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Remote authority URL
    #[serde(default)]
    pub ca_url: Option<String>,

    /// Root certificate file
    #[serde(default)]
    pub root: Option<String>,

    /// Authority configuration for offline mode
    #[serde(default)]
    pub ca_config: Option<String>,

    /// Provisioner key id
    #[serde(default)]
    pub kid: Option<String>,

    /// Provisioner name
    #[serde(default)]
    pub issuer: Option<String>,

    /// File holding the provisioner password
    #[serde(default)]
    pub password_file: Option<String>,
}

impl Defaults {
    /// Load defaults from a TOML file; a missing file yields empty defaults.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let path = Path::new(&expanded);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let defaults: Defaults = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(defaults)
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.root.as_deref().map(expand)
    }

    pub fn ca_config(&self) -> Option<PathBuf> {
        self.ca_config.as_deref().map(expand)
    }

    pub fn password_file(&self) -> Option<PathBuf> {
        self.password_file.as_deref().map(expand)
    }
}

/// Expands a leading `~` in a path.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_empty() {
        let defaults = Defaults::load("/nonexistent/certflow/defaults.toml").unwrap();
        assert_eq!(defaults, Defaults::default());
    }

    #[test]
    fn partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
ca_url = "https://ca.example.com"
password_file = "~/secrets/pass"
"#
        )
        .unwrap();

        let defaults = Defaults::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(defaults.ca_url.as_deref(), Some("https://ca.example.com"));
        assert!(defaults.kid.is_none());
        let password = defaults.password_file().unwrap();
        assert!(password.ends_with("secrets/pass"));
        assert!(!password.starts_with("~"));
    }

    #[test]
    fn unknown_key_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ca-url = \"https://ca.example.com\"").unwrap();
        assert!(Defaults::load(file.path().to_str().unwrap()).is_err());
    }
}
