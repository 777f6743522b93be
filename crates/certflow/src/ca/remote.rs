//! HTTPS CA client.
//!
//! The wire is JSON over HTTPS. [`HttpConnector`] turns a [`RemoteTarget`]
//! into a [`Transport`]; tests substitute their own [`Connector`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{CaClient, RevokeRequest, RevokeResponse, SignRequest, SignResponse};
use crate::certificate::{self, Certificate};
use crate::config;
use crate::provisioner::{Provisioner, ProvisionerRegistry};
use crate::token::TokenClaims;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client trusts the authority's TLS certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootTrust {
    /// Hex SHA-256 of the root certificate, fetched from the authority.
    Fingerprint(String),
    /// PEM root certificate file.
    File(PathBuf),
}

/// Client certificate presented for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub crt: PathBuf,
    pub key: PathBuf,
}

/// Where the remote authority is and how to trust it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub ca_url: String,
    pub root: RootTrust,
    pub identity: Option<ClientIdentity>,
}

impl RemoteTarget {
    /// Resolves the target for a token-authorized request.
    ///
    /// A token carrying a root fingerprint and an `http(s)` audience is
    /// self-describing: the audience is the CA URL and the root is pinned.
    /// Otherwise the CA URL must be given and the root file must exist.
    pub fn from_token(
        claims: &TokenClaims,
        ca_url: Option<&str>,
        root: Option<&Path>,
    ) -> Result<Self> {
        let sha = claims.sha.as_deref().filter(|sha| !sha.is_empty());
        let audience = claims
            .audience()
            .filter(|aud| aud.starts_with("https://") || aud.starts_with("http://"));

        if let (Some(sha), Some(audience)) = (sha, audience) {
            debug!(ca_url = audience, "using token audience and root fingerprint");
            return Ok(Self {
                ca_url: audience.to_string(),
                root: RootTrust::Fingerprint(sha.to_string()),
                identity: None,
            });
        }

        let ca_url = ca_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(Error::RequiredFlag("ca-url"))?;
        Self::with_root_file(ca_url, root)
    }

    /// A target trusting a root file: `root`, else the default root path.
    pub fn with_root_file(ca_url: &str, root: Option<&Path>) -> Result<Self> {
        Ok(Self {
            ca_url: ca_url.to_string(),
            root: RootTrust::File(root_file(root)?),
            identity: None,
        })
    }

    /// A target authenticating with a client certificate.
    pub fn mutual_tls(ca_url: &str, root: Option<&Path>, crt: &Path, key: &Path) -> Result<Self> {
        certificate::read_chain(crt)?;
        let mut target = Self::with_root_file(ca_url, root)?;
        target.identity = Some(ClientIdentity {
            crt: crt.to_path_buf(),
            key: key.to_path_buf(),
        });
        Ok(target)
    }
}

/// `root` if given, else the default root path, which must exist.
pub fn root_file(root: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = root {
        return Ok(path.to_path_buf());
    }
    let path = config::default_root_path();
    if !path.exists() {
        return Err(Error::Configuration(format!(
            "root certificate not found at {}; use --root",
            path.display()
        )));
    }
    Ok(path)
}

/// A JSON request/response channel to the authority.
pub trait Transport {
    fn get(&self, path: &str) -> Result<Value>;
    fn post(&self, path: &str, body: &Value) -> Result<Value>;
}

/// Builds transports for targets.
pub trait Connector {
    fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn Transport>>;
}

/// Connects with `reqwest`'s blocking client over rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn Transport>> {
        Ok(Box::new(HttpTransport::connect(target)?))
    }
}

/// Blocking HTTPS transport.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Builds a client trusting only the target's root.
    pub fn connect(target: &RemoteTarget) -> Result<Self> {
        let base_url = origin(&target.ca_url)?;

        let root = match &target.root {
            RootTrust::File(path) => {
                let chain = certificate::read_chain(path)?;
                chain.into_iter().next().ok_or_else(|| {
                    Error::Certificate(format!("{} contains no certificates", path.display()))
                })?
            }
            RootTrust::Fingerprint(sha) => fetch_root(&base_url, sha)?,
        };
        let root = reqwest::Certificate::from_pem(root.to_pem().as_bytes())
            .map_err(|e| Error::Certificate(format!("invalid root certificate: {e}")))?;

        let mut builder = reqwest::blocking::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(root)
            .timeout(REQUEST_TIMEOUT);

        if let Some(identity) = &target.identity {
            builder = builder.identity(client_identity(identity)?);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        info!(
            ca_url = %base_url,
            mtls = target.identity.is_some(),
            "connected to remote authority"
        );
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        read_response(response)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        read_response(response)
    }
}

/// `scheme://host[:port]` of a URL.
fn origin(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::Configuration(format!("invalid CA URL '{url}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Configuration(format!("CA URL '{url}' has no host")))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

/// Downloads the root over an unverified channel and checks its fingerprint.
fn fetch_root(base_url: &str, sha: &str) -> Result<Certificate> {
    warn!(
        ca_url = base_url,
        "fetching root certificate without TLS verification; trusting it by fingerprint"
    );
    let client = reqwest::blocking::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

    let response = client
        .get(format!("{base_url}/root/{sha}"))
        .send()
        .map_err(|e| Error::Transport(e.to_string()))?;
    let body = read_response(response)?;
    let pem = body
        .get("ca")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Transport("root response has no 'ca' field".into()))?;

    verify_root(pem, sha)
}

fn verify_root(pem: &str, sha: &str) -> Result<Certificate> {
    let root = Certificate::from_pem(pem)?;
    let actual = root.fingerprint();
    if !actual.eq_ignore_ascii_case(sha) {
        return Err(Error::Transport(format!(
            "root fingerprint mismatch: expected {sha}, got {actual}"
        )));
    }
    Ok(root)
}

fn client_identity(identity: &ClientIdentity) -> Result<reqwest::Identity> {
    let mut combined = std::fs::read(&identity.crt).map_err(|e| {
        Error::Certificate(format!("error reading {}: {e}", identity.crt.display()))
    })?;
    let key = std::fs::read(&identity.key).map_err(|e| {
        Error::Certificate(format!("error reading {}: {e}", identity.key.display()))
    })?;
    combined.push(b'\n');
    combined.extend_from_slice(&key);

    reqwest::Identity::from_pem(&combined)
        .map_err(|e| Error::Certificate(format!("invalid certificate/key: {e}")))
}

fn read_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|e| Error::Transport(format!("failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(Error::AuthorityRejection {
            status: Some(status.as_u16()),
            message: error_message(&text),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(&text)
        .map_err(|e| Error::Transport(format!("invalid JSON response: {e}")))
}

/// The `message` of an `{status, message}` error body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// CA client for a remote authority.
pub struct RemoteCa {
    target: RemoteTarget,
    transport: Box<dyn Transport>,
}

impl RemoteCa {
    pub fn new(target: RemoteTarget, transport: Box<dyn Transport>) -> Self {
        Self { target, transport }
    }

    /// Connects to `target` with `connector`.
    pub fn connect(target: RemoteTarget, connector: &dyn Connector) -> Result<Self> {
        let transport = connector.connect(&target)?;
        Ok(Self::new(target, transport))
    }

    fn call<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let body = serde_json::to_value(body)
            .map_err(|e| Error::Internal(format!("failed to encode request: {e}")))?;
        let response = self.transport.post(path, &body)?;
        serde_json::from_value(response)
            .map_err(|e| Error::Transport(format!("unexpected response from {path}: {e}")))
    }

    /// Lists the authority's provisioners, following pagination.
    pub fn provisioners(&self) -> Result<ProvisionerRegistry> {
        fetch_provisioners(self.transport.as_ref())
    }
}

impl CaClient for RemoteCa {
    fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        self.call("/sign", request)
    }

    fn renew(&self) -> Result<SignResponse> {
        if self.target.identity.is_none() {
            return Err(Error::RequiredFlag("crt"));
        }
        self.call("/renew", &serde_json::json!({}))
    }

    fn revoke(&self, request: &RevokeRequest) -> Result<RevokeResponse> {
        self.call("/revoke", request)
    }
}

impl std::fmt::Debug for RemoteCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCa")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionersPage {
    #[serde(default)]
    provisioners: Vec<Provisioner>,
    #[serde(default)]
    next_cursor: String,
}

/// `GET /provisioners`, following `nextCursor` until it is empty.
pub fn fetch_provisioners(transport: &dyn Transport) -> Result<ProvisionerRegistry> {
    let mut all = Vec::new();
    let mut cursor = String::new();
    loop {
        let path = if cursor.is_empty() {
            "/provisioners".to_string()
        } else {
            format!("/provisioners?cursor={cursor}")
        };
        let page: ProvisionersPage = serde_json::from_value(transport.get(&path)?)
            .map_err(|e| Error::Transport(format!("invalid provisioner list: {e}")))?;
        all.extend(page.provisioners);
        if page.next_cursor.is_empty() || page.next_cursor == cursor {
            break;
        }
        cursor = page.next_cursor;
    }
    debug!(count = all.len(), "fetched provisioners");
    Ok(ProvisionerRegistry::new(all))
}
