//! Provisioner registry.
//!
//! A provisioner is a named signing identity configured in the authority. The
//! registry is an immutable, order-preserving list with composable filters;
//! a named filter that matches nothing is an error, never a silent fallback
//! to the whole list.

use serde::{Deserialize, Serialize};

use crate::jose::Jwk;
use crate::{Error, Result};

/// A JWK provisioner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Provisioner {
    /// Provisioner type, `"JWK"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Provisioner name; used as the token issuer.
    pub name: String,

    /// Public verification key.
    pub key: Jwk,

    /// JWE-encrypted private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
}

impl Provisioner {
    /// Creates a JWK provisioner.
    pub fn jwk(name: impl Into<String>, key: Jwk, encrypted_key: Option<String>) -> Self {
        Self {
            kind: "JWK".into(),
            name: name.into(),
            key: key.public(),
            encrypted_key,
        }
    }

    /// Key id of the verification key.
    pub fn kid(&self) -> &str {
        self.key.kid.as_deref().unwrap_or_default()
    }
}

/// Chooses one provisioner out of several candidates.
///
/// Returns the index into `candidates`. Closures implement this trait, so
/// tests can pass `|_: &[Provisioner]| Ok(0)`.
pub trait ProvisionerChooser {
    fn choose(&self, candidates: &[Provisioner]) -> Result<usize>;
}

impl<F> ProvisionerChooser for F
where
    F: Fn(&[Provisioner]) -> Result<usize>,
{
    fn choose(&self, candidates: &[Provisioner]) -> Result<usize> {
        self(candidates)
    }
}

/// Read-only view over a provisioner list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionerRegistry {
    provisioners: Vec<Provisioner>,
}

impl ProvisionerRegistry {
    pub fn new(provisioners: Vec<Provisioner>) -> Self {
        Self { provisioners }
    }

    pub fn len(&self) -> usize {
        self.provisioners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisioners.is_empty()
    }

    pub fn as_slice(&self) -> &[Provisioner] {
        &self.provisioners
    }

    /// Keeps the provisioners matching `predicate`, preserving order.
    pub fn filter<P>(&self, predicate: P) -> Self
    where
        P: Fn(&Provisioner) -> bool,
    {
        Self {
            provisioners: self
                .provisioners
                .iter()
                .filter(|p| predicate(p))
                .cloned()
                .collect(),
        }
    }

    /// Keeps provisioners with key id `kid`; none left is an error.
    pub fn by_kid(&self, kid: &str) -> Result<Self> {
        let filtered = self.filter(|p| p.kid() == kid);
        if filtered.is_empty() {
            return Err(Error::ProvisionerNotFound {
                flag: "kid",
                value: kid.to_string(),
            });
        }
        Ok(filtered)
    }

    /// Keeps provisioners named `issuer`; none left is an error.
    pub fn by_issuer(&self, issuer: &str) -> Result<Self> {
        let filtered = self.filter(|p| p.name == issuer);
        if filtered.is_empty() {
            return Err(Error::ProvisionerNotFound {
                flag: "issuer",
                value: issuer.to_string(),
            });
        }
        Ok(filtered)
    }

    /// Finds the provisioner with key id `kid`, if any.
    pub fn find_by_kid(&self, kid: &str) -> Option<&Provisioner> {
        self.provisioners.iter().find(|p| p.kid() == kid)
    }

    /// Resolves exactly one provisioner.
    ///
    /// Applies the kid filter, then the issuer filter. A single survivor is
    /// returned directly; several go to `chooser`.
    pub fn resolve(
        &self,
        kid: Option<&str>,
        issuer: Option<&str>,
        chooser: &dyn ProvisionerChooser,
    ) -> Result<Provisioner> {
        if self.is_empty() {
            return Err(Error::Configuration("no provisioners configured".into()));
        }

        let mut candidates = self.clone();
        if let Some(kid) = kid.filter(|k| !k.is_empty()) {
            candidates = candidates.by_kid(kid)?;
        }
        if let Some(issuer) = issuer.filter(|i| !i.is_empty()) {
            candidates = candidates.by_issuer(issuer)?;
        }

        let mut provisioners = candidates.provisioners;
        if provisioners.len() == 1 {
            return Ok(provisioners.remove(0));
        }

        tracing::debug!(
            candidates = provisioners.len(),
            "several provisioners match, asking the chooser"
        );
        let index = chooser.choose(&provisioners)?;
        if index >= provisioners.len() {
            return Err(Error::AmbiguousProvisioner(format!(
                "selection {index} is out of range for {} provisioners",
                provisioners.len()
            )));
        }
        Ok(provisioners.swap_remove(index))
    }
}

impl FromIterator<Provisioner> for ProvisionerRegistry {
    fn from_iter<I: IntoIterator<Item = Provisioner>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(name: &str, kid: &str) -> Provisioner {
        Provisioner {
            kind: "JWK".into(),
            name: name.into(),
            key: Jwk {
                kty: "EC".into(),
                crv: "P-256".into(),
                x: "eA".into(),
                y: Some("eQ".into()),
                d: None,
                kid: Some(kid.into()),
                alg: Some("ES256".into()),
                key_use: None,
            },
            encrypted_key: Some("a.b.c.d.e".into()),
        }
    }

    fn never(_: &[Provisioner]) -> Result<usize> {
        panic!("chooser must not be called")
    }

    #[test]
    fn by_kid_single_entry() {
        let registry = ProvisionerRegistry::new(vec![provisioner("acme", "K1")]);

        let found = registry.by_kid("K1").unwrap();
        assert_eq!(found.as_slice(), &[provisioner("acme", "K1")]);

        let err = registry.by_kid("K2").unwrap_err();
        assert!(matches!(
            err,
            Error::ProvisionerNotFound { flag: "kid", ref value } if value == "K2"
        ));
        assert!(err.to_string().contains("K2"));
    }

    #[test]
    fn filters_compose_in_order() {
        let registry: ProvisionerRegistry = vec![
            provisioner("acme", "K1"),
            provisioner("other", "K1"),
            provisioner("acme", "K2"),
        ]
        .into_iter()
        .collect();

        let by_kid = registry.by_kid("K1").unwrap();
        assert_eq!(by_kid.len(), 2);
        let both = by_kid.by_issuer("acme").unwrap();
        assert_eq!(both.as_slice(), &[provisioner("acme", "K1")]);

        assert!(matches!(
            by_kid.by_issuer("nobody"),
            Err(Error::ProvisionerNotFound { flag: "issuer", .. })
        ));
    }

    #[test]
    fn resolve_single_skips_chooser() {
        let registry = ProvisionerRegistry::new(vec![provisioner("acme", "K1")]);
        let p = registry.resolve(None, None, &never).unwrap();
        assert_eq!(p.name, "acme");
    }

    #[test]
    fn resolve_ambiguous_uses_chooser() {
        let registry = ProvisionerRegistry::new(vec![
            provisioner("a", "K1"),
            provisioner("b", "K2"),
            provisioner("c", "K3"),
        ]);
        let chooser = |candidates: &[Provisioner]| {
            assert_eq!(candidates.len(), 3);
            Ok::<usize, Error>(2)
        };
        assert_eq!(registry.resolve(None, None, &chooser).unwrap().name, "c");
    }

    #[test]
    fn resolve_out_of_range_choice() {
        let registry =
            ProvisionerRegistry::new(vec![provisioner("a", "K1"), provisioner("b", "K2")]);
        let chooser = |_: &[Provisioner]| Ok::<usize, Error>(5);
        assert!(matches!(
            registry.resolve(None, None, &chooser),
            Err(Error::AmbiguousProvisioner(_))
        ));
    }

    #[test]
    fn resolve_named_filter_never_falls_back() {
        let registry =
            ProvisionerRegistry::new(vec![provisioner("a", "K1"), provisioner("b", "K2")]);
        assert!(matches!(
            registry.resolve(Some("K9"), None, &never),
            Err(Error::ProvisionerNotFound { flag: "kid", .. })
        ));
        assert_eq!(
            registry.resolve(Some("K2"), None, &never).unwrap().name,
            "b"
        );
    }

    #[test]
    fn resolve_empty_registry() {
        let registry = ProvisionerRegistry::default();
        assert!(matches!(
            registry.resolve(None, None, &never),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn deserializes_camel_case() {
        let json = r#"{
            "type": "JWK",
            "name": "acme",
            "key": {"kty": "EC", "crv": "P-256", "x": "eA", "y": "eQ", "kid": "K1"},
            "encryptedKey": "a.b.c.d.e"
        }"#;
        let p: Provisioner = serde_json::from_str(json).unwrap();
        assert_eq!(p.kid(), "K1");
        assert_eq!(p.encrypted_key.as_deref(), Some("a.b.c.d.e"));
    }
}
