//! Compact JOSE primitives: ES256 JWS and PBES2 JWE.
//!
//! Only the algorithms the authority uses are implemented:
//!
//! - JWS `ES256` (P-256 ECDSA, fixed-length signatures) for authorization tokens
//! - JWE `PBES2-HS256+A128KW` key management with `A256GCM` content encryption
//!   for provisioner keys at rest
//!
//! Signing and verification reuse the ring primitives the rest of the crate is
//! built on. P-256 key generation goes through `p256` because ring cannot
//! export the private scalar a JWK needs.

use std::fmt;
use std::num::NonZeroU32;

use aes_kw::KekAes128;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// JWS algorithm for authorization tokens.
pub const ES256: &str = "ES256";

/// JWE key management algorithm for encrypted provisioner keys.
pub const PBES2_ALG: &str = "PBES2-HS256+A128KW";

/// JWE content encryption algorithm for encrypted provisioner keys.
pub const PBES2_ENC: &str = "A256GCM";

/// PBKDF2 iteration count used when encrypting.
pub const DEFAULT_PBES2_COUNT: u32 = 100_000;

/// Upper bound on the PBKDF2 iteration count accepted when decrypting.
const MAX_PBES2_COUNT: u32 = 10_000_000;

/// A JSON Web Key (RFC 7517) for EC P-256 keys.
///
/// Holds the private scalar `d` when the key came out of decryption or
/// generation. `Debug` never prints `d`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type, `"EC"`.
    pub kty: String,

    /// Curve, `"P-256"`.
    pub crv: String,

    /// X coordinate (base64url).
    pub x: String,

    /// Y coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Private scalar (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    /// Key ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use.
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl Jwk {
    /// Generates a fresh P-256 signing key. The key id is the RFC 7638
    /// thumbprint of the public part.
    pub fn generate_p256() -> Result<Self> {
        use p256::elliptic_curve::rand_core::OsRng;
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        let secret = p256::SecretKey::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| Error::Internal("generated point has no x coordinate".into()))?;
        let y = point
            .y()
            .ok_or_else(|| Error::Internal("generated point has no y coordinate".into()))?;

        let mut jwk = Self {
            kty: "EC".into(),
            crv: "P-256".into(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: Some(URL_SAFE_NO_PAD.encode(y)),
            d: Some(URL_SAFE_NO_PAD.encode(secret.to_bytes())),
            kid: None,
            alg: Some(ES256.into()),
            key_use: Some("sig".into()),
        };
        jwk.kid = Some(jwk.thumbprint()?);
        Ok(jwk)
    }

    /// Returns a copy without the private scalar.
    pub fn public(&self) -> Self {
        Self {
            d: None,
            ..self.clone()
        }
    }

    /// Whether this key carries private material.
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// RFC 7638 thumbprint (SHA-256, base64url).
    pub fn thumbprint(&self) -> Result<String> {
        let y = self
            .y
            .as_deref()
            .ok_or_else(|| Error::Configuration("EC key is missing the y coordinate".into()))?;
        // Members in lexicographic order, no whitespace.
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            self.crv, self.kty, self.x, y
        );
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
    }

    fn ensure_p256(&self) -> Result<()> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(Error::Configuration(format!(
                "unsupported key type {}/{}, expected EC/P-256",
                self.kty, self.crv
            )));
        }
        Ok(())
    }

    /// Uncompressed SEC1 point (`0x04 || x || y`).
    fn uncompressed_point(&self) -> Result<Vec<u8>> {
        self.ensure_p256()?;
        let x = decode_b64("x", &self.x)?;
        let y = decode_b64(
            "y",
            self.y
                .as_deref()
                .ok_or_else(|| Error::Configuration("EC key is missing the y coordinate".into()))?,
        )?;
        if x.len() != 32 || y.len() != 32 {
            return Err(Error::Configuration(
                "P-256 coordinates must be 32 bytes".into(),
            ));
        }

        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend_from_slice(&x);
        point.extend_from_slice(&y);
        Ok(point)
    }

    fn signing_key(&self) -> Result<EcdsaKeyPair> {
        let d = self
            .d
            .as_deref()
            .ok_or_else(|| Error::Configuration("key has no private component".into()))?;
        let scalar = decode_b64("d", d)?;
        let point = self.uncompressed_point()?;

        EcdsaKeyPair::from_private_key_and_public_key(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &scalar,
            &point,
            &SystemRandom::new(),
        )
        .map_err(|e| Error::Configuration(format!("invalid P-256 private key: {e}")))
    }
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("kid", &self.kid)
            .field("d", &self.d.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// JWS protected header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwsHeader {
    /// Signing algorithm.
    pub alg: String,

    /// Media type, `"JWT"` for tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Key ID of the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl JwsHeader {
    /// ES256 JWT header for the given key id.
    pub fn es256(kid: impl Into<String>) -> Self {
        Self {
            alg: ES256.into(),
            typ: Some("JWT".into()),
            kid: Some(kid.into()),
        }
    }
}

/// Signs `claims` as an ES256 compact JWS.
pub fn sign_es256<T: Serialize>(header: &JwsHeader, claims: &T, key: &Jwk) -> Result<String> {
    let key_pair = key.signing_key()?;

    let header_json = serde_json::to_vec(header)
        .map_err(|e| Error::Internal(format!("failed to serialize JWS header: {e}")))?;
    let claims_json = serde_json::to_vec(claims)
        .map_err(|e| Error::Internal(format!("failed to serialize claims: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );
    let sig = key_pair
        .sign(&SystemRandom::new(), signing_input.as_bytes())
        .map_err(|e| Error::Internal(format!("ES256 signing failed: {e}")))?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig.as_ref())))
}

/// A parsed, not yet verified, compact JWS.
#[derive(Debug, Clone)]
pub struct ParsedJws {
    header: JwsHeader,
    payload: Vec<u8>,
    signing_input: String,
    signature: Vec<u8>,
}

impl ParsedJws {
    /// Parses a compact serialization without checking the signature.
    pub fn parse(token: &str) -> Result<Self> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(Error::TokenParse(format!(
                "compact JWS must have 3 dot-separated parts, found {}",
                parts.len()
            )));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|e| Error::TokenParse(format!("invalid header encoding: {e}")))?;
        let header: JwsHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| Error::TokenParse(format!("invalid header: {e}")))?;
        let payload = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|e| Error::TokenParse(format!("invalid payload encoding: {e}")))?;
        let signature = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|e| Error::TokenParse(format!("invalid signature encoding: {e}")))?;

        Ok(Self {
            header,
            payload,
            signing_input: format!("{}.{}", parts[0], parts[1]),
            signature,
        })
    }

    /// Returns the protected header.
    pub fn header(&self) -> &JwsHeader {
        &self.header
    }

    /// Decodes the payload WITHOUT verifying the signature.
    ///
    /// Use only to shape a request before the authority sees it. Nothing
    /// returned here is authenticated.
    pub fn unverified_claims<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::TokenParse(format!("invalid claims: {e}")))
    }

    /// Verifies the ES256 signature against `key`.
    pub fn verify_es256(&self, key: &Jwk) -> Result<()> {
        if self.header.alg != ES256 {
            return Err(Error::TokenParse(format!(
                "unsupported JWS algorithm '{}'",
                self.header.alg
            )));
        }
        let point = key.uncompressed_point()?;
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &point)
            .verify(self.signing_input.as_bytes(), &self.signature)
            .map_err(|_| Error::TokenParse("token signature verification failed".into()))
    }

    /// Verifies the signature and then decodes the claims.
    pub fn verified_claims<T: DeserializeOwned>(&self, key: &Jwk) -> Result<T> {
        self.verify_es256(key)?;
        self.unverified_claims()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    p2s: String,
    p2c: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

/// Encrypts `plaintext` under `password` as a compact JWE.
pub fn encrypt_with_password(plaintext: &[u8], password: &[u8], cty: &str) -> Result<String> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; 16];
    let mut cek = [0u8; 32];
    let mut iv = [0u8; 12];
    for buf in [&mut salt[..], &mut cek[..], &mut iv[..]] {
        rng.fill(buf)
            .map_err(|_| Error::Internal("system random failed".into()))?;
    }

    let header = JweHeader {
        alg: PBES2_ALG.into(),
        enc: PBES2_ENC.into(),
        p2s: URL_SAFE_NO_PAD.encode(salt),
        p2c: DEFAULT_PBES2_COUNT,
        cty: Some(cty.into()),
    };
    let header_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&header)
            .map_err(|e| Error::Internal(format!("failed to serialize JWE header: {e}")))?,
    );

    let kek = derive_kek(password, &salt, DEFAULT_PBES2_COUNT)?;
    let mut wrapped = [0u8; 40];
    KekAes128::from(kek)
        .wrap(&cek, &mut wrapped)
        .map_err(|e| Error::Internal(format!("key wrap failed: {e}")))?;

    let key = content_key(&cek)?;
    let mut in_out = plaintext.to_vec();
    let tag = key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(iv),
            Aad::from(header_b64.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| Error::Internal("content encryption failed".into()))?;

    Ok(format!(
        "{header_b64}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(wrapped),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(&in_out),
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    ))
}

/// Decrypts a compact JWE produced with [`encrypt_with_password`].
///
/// A wrong password surfaces as a key-unwrap failure.
pub fn decrypt_with_password(jwe: &str, password: &[u8]) -> Result<Vec<u8>> {
    let parts: Vec<&str> = jwe.trim().split('.').collect();
    if parts.len() != 5 {
        return Err(Error::KeyDecryption(format!(
            "compact JWE must have 5 dot-separated parts, found {}",
            parts.len()
        )));
    }
    let header_b64 = parts[0];
    let header: JweHeader = serde_json::from_slice(&decode_jwe("header", header_b64)?)
        .map_err(|e| Error::KeyDecryption(format!("invalid JWE header: {e}")))?;

    if header.alg != PBES2_ALG || header.enc != PBES2_ENC {
        return Err(Error::KeyDecryption(format!(
            "unsupported JWE algorithms {}/{}",
            header.alg, header.enc
        )));
    }
    if header.p2c > MAX_PBES2_COUNT {
        return Err(Error::KeyDecryption(format!(
            "PBES2 iteration count {} exceeds {MAX_PBES2_COUNT}",
            header.p2c
        )));
    }

    let salt = decode_jwe("p2s", &header.p2s)?;
    let wrapped = decode_jwe("encrypted key", parts[1])?;
    let iv = decode_jwe("iv", parts[2])?;
    let mut in_out = decode_jwe("ciphertext", parts[3])?;
    let tag = decode_jwe("tag", parts[4])?;

    if wrapped.len() != 40 {
        return Err(Error::KeyDecryption(format!(
            "wrapped key must be 40 bytes, found {}",
            wrapped.len()
        )));
    }

    let kek = derive_kek(password, &salt, header.p2c)?;
    let mut cek = [0u8; 32];
    KekAes128::from(kek)
        .unwrap(&wrapped, &mut cek)
        .map_err(|_| Error::KeyDecryption("wrong password or corrupted key".into()))?;

    let nonce = Nonce::try_assume_unique_for_key(&iv)
        .map_err(|_| Error::KeyDecryption("JWE iv must be 12 bytes".into()))?;
    in_out.extend_from_slice(&tag);
    let plaintext = content_key(&cek)?
        .open_in_place(nonce, Aad::from(header_b64.as_bytes()), &mut in_out)
        .map_err(|_| Error::KeyDecryption("content authentication failed".into()))?;

    Ok(plaintext.to_vec())
}

fn derive_kek(password: &[u8], p2s: &[u8], p2c: u32) -> Result<[u8; 16]> {
    let iterations = NonZeroU32::new(p2c)
        .ok_or_else(|| Error::KeyDecryption("PBES2 iteration count must be positive".into()))?;

    // Salt input is the algorithm name, a zero byte, then p2s (RFC 7518 §4.8.1.1).
    let mut salt = Vec::with_capacity(PBES2_ALG.len() + 1 + p2s.len());
    salt.extend_from_slice(PBES2_ALG.as_bytes());
    salt.push(0);
    salt.extend_from_slice(p2s);

    let mut kek = [0u8; 16];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password,
        &mut kek,
    );
    Ok(kek)
}

fn content_key(cek: &[u8]) -> Result<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, cek)
        .map(LessSafeKey::new)
        .map_err(|_| Error::KeyDecryption("invalid content encryption key".into()))
}

fn decode_b64(what: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| Error::Configuration(format!("invalid base64url in JWK '{what}': {e}")))
}

fn decode_jwe(what: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| Error::KeyDecryption(format!("invalid JWE {what} encoding: {e}")))
}
