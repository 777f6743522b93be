//! Authorization tokens.
//!
//! A token is an ES256 compact JWS signed with a provisioner key. It scopes one
//! request to a subject, a SAN set, an audience and a short validity window.
//! Revoke tokens are additionally bound to one certificate serial.
//!
//! [`peek_claims`] decodes a token WITHOUT checking its signature. The client
//! uses it only to shape the request; the authority verifies the token and is
//! the trust boundary.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::certificate;
use crate::jose::{self, Jwk, JwsHeader, ParsedJws};
use crate::provisioner::Provisioner;
use crate::{Error, Result};

/// Token lifetime in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 300;

/// Operation a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Sign,
    Revoke,
}

impl TokenKind {
    /// Authority endpoint the token is addressed to.
    pub fn endpoint(&self) -> &'static str {
        match self {
            TokenKind::Sign => "sign",
            TokenKind::Revoke => "revoke",
        }
    }
}

/// Requested certificate validity carried inside a sign token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

/// Token payload.
///
/// Deserialization is lenient so that foreign tokens (e.g. OIDC ID tokens)
/// can be peeked too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,

    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,

    #[serde(default)]
    pub iss: String,

    #[serde(default)]
    pub iat: i64,

    #[serde(default)]
    pub nbf: i64,

    #[serde(default)]
    pub exp: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,

    /// Root certificate fingerprint (hex SHA-256).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Serial a revoke token is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
}

impl TokenClaims {
    /// Whether the token was minted for this authority family.
    ///
    /// Native tokens carry a root fingerprint or a SAN list; foreign tokens
    /// carry neither.
    pub fn is_authority_token(&self) -> bool {
        self.sha.as_deref().is_some_and(|s| !s.is_empty()) || !self.sans.is_empty()
    }

    /// First audience, if any.
    pub fn audience(&self) -> Option<&str> {
        self.aud.first().map(String::as_str)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(aud) => aud,
    })
}

/// Decodes token claims WITHOUT verifying the signature. Do not trust the
/// result for authentication.
pub fn peek_claims(token: &str) -> Result<TokenClaims> {
    ParsedJws::parse(token)?.unverified_claims()
}

/// Case-insensitive subject comparison.
pub fn subject_matches(token_subject: &str, requested: &str) -> bool {
    token_subject.to_lowercase() == requested.to_lowercase()
}

/// Fails with [`Error::TokenSubjectMismatch`] unless the subjects match.
pub fn ensure_subject(token_subject: &str, what: &'static str, requested: &str) -> Result<()> {
    if subject_matches(token_subject, requested) {
        return Ok(());
    }
    Err(Error::TokenSubjectMismatch {
        token: token_subject.to_string(),
        what,
        requested: requested.to_string(),
    })
}

/// Builds and signs authorization tokens.
#[derive(Debug, Clone)]
pub struct TokenGenerator {
    kind: TokenKind,
    subject: String,
    sans: Vec<String>,
    audience: String,
    issuer: String,
    kid: String,
    fingerprint: Option<String>,
    validity: Validity,
    reason: Option<String>,
    lifetime: Duration,
}

impl TokenGenerator {
    /// Starts a token for `subject`. For revoke tokens the subject is the
    /// certificate serial.
    pub fn new(kind: TokenKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            sans: Vec::new(),
            audience: String::new(),
            issuer: String::new(),
            kid: String::new(),
            fingerprint: None,
            validity: Validity::default(),
            reason: None,
            lifetime: Duration::seconds(TOKEN_LIFETIME_SECS),
        }
    }

    /// Issuer and key id from the provisioner.
    pub fn provisioner(mut self, provisioner: &Provisioner) -> Self {
        self.issuer = provisioner.name.clone();
        self.kid = provisioner.kid().to_string();
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn sans<I, S>(mut self, sans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sans = sans.into_iter().map(Into::into).collect();
        self
    }

    pub fn root_fingerprint(mut self, sha: impl Into<String>) -> Self {
        self.fingerprint = Some(sha.into());
        self
    }

    /// Pins the first certificate in `path` by fingerprint.
    pub fn root_file(self, path: &Path) -> Result<Self> {
        let chain = certificate::read_chain(path)?;
        let sha = chain[0].fingerprint();
        Ok(self.root_fingerprint(sha))
    }

    /// Requested certificate validity, passed through unchanged.
    pub fn validity(
        mut self,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        self.validity = Validity {
            not_before,
            not_after,
        };
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.is_empty());
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Builds the claims as of `now`.
    pub fn claims(&self, now: DateTime<Utc>) -> Result<TokenClaims> {
        if self.subject.trim().is_empty() {
            return Err(Error::Internal("token subject cannot be empty".into()));
        }
        if self.audience.is_empty() || self.issuer.is_empty() {
            return Err(Error::Internal(
                "token audience and issuer must be set".into(),
            ));
        }

        let (sans, serial, reason, validity) = match self.kind {
            TokenKind::Sign => {
                let sans = if self.sans.is_empty() {
                    vec![self.subject.clone()]
                } else {
                    self.sans.clone()
                };
                let validity = (self.validity != Validity::default()).then(|| self.validity.clone());
                (sans, None, None, validity)
            }
            TokenKind::Revoke => (
                Vec::new(),
                Some(self.subject.clone()),
                self.reason.clone(),
                None,
            ),
        };

        Ok(TokenClaims {
            sub: self.subject.clone(),
            aud: vec![self.audience.clone()],
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            sans,
            sha: self.fingerprint.clone(),
            email: None,
            serial,
            reason,
            validity,
        })
    }

    /// Signs the token with the decrypted provisioner key.
    pub fn generate(&self, key: &Jwk) -> Result<String> {
        let claims = self.claims(Utc::now())?;
        let kid = if self.kid.is_empty() {
            key.kid.clone().unwrap_or_default()
        } else {
            self.kid.clone()
        };

        let token = jose::sign_es256(&JwsHeader::es256(kid), &claims, key)?;
        tracing::debug!(
            kind = ?self.kind,
            sub = %claims.sub,
            iss = %claims.iss,
            aud = %self.audience,
            "generated authorization token"
        );
        Ok(token)
    }
}
