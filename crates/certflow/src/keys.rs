//! Provisioner key decryption.

use std::path::PathBuf;

use crate::jose::{self, Jwk};
use crate::provisioner::Provisioner;
use crate::{Error, Result};

/// Where the provisioner key password comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSource {
    /// Read once from a file; trailing newlines are trimmed.
    File(PathBuf),
    /// Ask through the injected [`PasswordPrompt`].
    Prompt,
}

/// Interactive password entry.
pub trait PasswordPrompt {
    fn password(&self, message: &str) -> Result<String>;
}

impl<F> PasswordPrompt for F
where
    F: Fn(&str) -> Result<String>,
{
    fn password(&self, message: &str) -> Result<String> {
        self(message)
    }
}

/// A prompt for non-interactive contexts; always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn password(&self, _message: &str) -> Result<String> {
        Err(Error::Prompt(
            "no interactive prompt available; use --password-file".into(),
        ))
    }
}

/// Reads the password the way the source dictates.
pub fn read_password(
    source: &PasswordSource,
    message: &str,
    prompt: &dyn PasswordPrompt,
) -> Result<String> {
    match source {
        PasswordSource::File(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::KeyDecryption(format!("error reading {}: {e}", path.display()))
            })?;
            Ok(raw.trim_end_matches(['\r', '\n']).to_string())
        }
        PasswordSource::Prompt => prompt.password(message),
    }
}

/// Recovers the provisioner's signing key.
///
/// One attempt only; a wrong password surfaces as [`Error::KeyDecryption`].
pub fn decrypt_provisioner_key(
    provisioner: &Provisioner,
    source: &PasswordSource,
    prompt: &dyn PasswordPrompt,
) -> Result<Jwk> {
    let encrypted = provisioner
        .encrypted_key
        .as_deref()
        .filter(|blob| !blob.is_empty())
        .ok_or_else(|| Error::NoSigningKey(provisioner.name.clone()))?;

    let message = format!(
        "Please enter the password to decrypt the provisioner key {}",
        provisioner.kid()
    );
    let password = read_password(source, &message, prompt)?;
    decrypt_key(encrypted, password.as_bytes())
}

/// Decrypts a JWE-wrapped JWK.
pub fn decrypt_key(encrypted: &str, password: &[u8]) -> Result<Jwk> {
    let plaintext = jose::decrypt_with_password(encrypted, password)?;
    let jwk: Jwk = serde_json::from_slice(&plaintext)
        .map_err(|e| Error::KeyDecryption(format!("decrypted key is not a JWK: {e}")))?;
    if !jwk.is_private() {
        return Err(Error::KeyDecryption(
            "decrypted key has no private component".into(),
        ));
    }
    Ok(jwk)
}

/// Encrypts a private JWK under `password`.
pub fn encrypt_key(jwk: &Jwk, password: &[u8]) -> Result<String> {
    let json = serde_json::to_vec(jwk)
        .map_err(|e| Error::Internal(format!("failed to serialize key: {e}")))?;
    jose::encrypt_with_password(&json, password, "jwk+json")
}
