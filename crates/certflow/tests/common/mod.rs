//! Shared fixtures: a freshly bootstrapped authority on disk and an in-memory
//! connector that answers remote requests from it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use certflow::authority::bootstrap::{self, Bootstrap, BootstrapOptions};
use certflow::authority::RevokeOptions;
use certflow::ca::{
    Connector, RemoteTarget, RevokeRequest, RevokeResponse, SignRequest, SignResponse,
    TlsMaterial, Transport,
};
use certflow::{Authority, Error, FlowConfig, LocalAuthority, Provisioner, Result};
use serde_json::Value;

pub const PASSWORD: &str = "correct horse";
pub const DNS_NAME: &str = "ca.example.com";

pub struct TestAuthority {
    pub dir: tempfile::TempDir,
    pub created: Bootstrap,
}

impl TestAuthority {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let created = bootstrap::init(&BootstrapOptions {
            dir: dir.path().join("authority"),
            name: "Test".into(),
            dns_names: vec![DNS_NAME.into()],
            provisioner: "admin".into(),
            password: PASSWORD.into(),
        })
        .unwrap();
        Self { dir, created }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn password_file(&self) -> PathBuf {
        let path = self.path("password.txt");
        std::fs::write(&path, format!("{PASSWORD}\n")).unwrap();
        path
    }

    /// Offline flow inputs pointing at this authority.
    pub fn offline(&self) -> FlowConfig {
        FlowConfig {
            offline: true,
            ca_config: Some(self.created.config_path.clone()),
            password_file: Some(self.password_file()),
            ..Default::default()
        }
    }

    /// Online flow inputs for [`FakeConnector`].
    pub fn online(&self) -> FlowConfig {
        FlowConfig {
            ca_url: Some(format!("https://{DNS_NAME}")),
            root: Some(self.created.root_path.clone()),
            password_file: Some(self.password_file()),
            ..Default::default()
        }
    }

    /// A fresh engine over the same files; sees revocations persisted so far.
    pub fn engine(&self) -> LocalAuthority {
        LocalAuthority::load(&self.created.config_path).unwrap()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            authority: Rc::new(self.engine()),
            log: Rc::new(RefCell::new(Log::default())),
        }
    }
}

/// Picks the first candidate.
pub fn first(_: &[Provisioner]) -> Result<usize> {
    Ok(0)
}

/// Always fails; flows under test must read the password file.
pub fn no_prompt(_: &str) -> Result<String> {
    Err(Error::Prompt("unexpected prompt".into()))
}

#[derive(Debug, Default)]
pub struct Log {
    pub targets: Vec<RemoteTarget>,
    pub requests: Vec<(String, Value)>,
}

/// Connects to an in-process [`LocalAuthority`] instead of the network.
#[derive(Clone)]
pub struct FakeConnector {
    pub authority: Rc<LocalAuthority>,
    pub log: Rc<RefCell<Log>>,
}

impl Connector for FakeConnector {
    fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn Transport>> {
        self.log.borrow_mut().targets.push(target.clone());
        Ok(Box::new(FakeTransport {
            authority: Rc::clone(&self.authority),
            target: target.clone(),
            log: Rc::clone(&self.log),
        }))
    }
}

struct FakeTransport {
    authority: Rc<LocalAuthority>,
    target: RemoteTarget,
    log: Rc<RefCell<Log>>,
}

impl FakeTransport {
    fn client_tls(&self) -> Result<Option<TlsMaterial>> {
        self.target
            .identity
            .as_ref()
            .map(|id| TlsMaterial::load(&id.crt, &id.key))
            .transpose()
    }

    fn handle(&self, path: &str, body: &Value) -> Result<Value> {
        match path {
            "/sign" => {
                let request: SignRequest = serde_json::from_value(body.clone()).unwrap();
                let options = self.authority.authorize(&request.ott)?;
                let (leaf, issuer) = self.authority.sign(
                    &request.csr,
                    &options,
                    request.not_before,
                    request.not_after,
                )?;
                Ok(sign_response(leaf.to_pem(), issuer.to_pem()))
            }
            "/renew" => {
                let tls = self
                    .client_tls()?
                    .ok_or_else(|| rejection(401, "client certificate required"))?;
                let (leaf, issuer) = self.authority.renew(tls.leaf(), tls.key())?;
                Ok(sign_response(leaf.to_pem(), issuer.to_pem()))
            }
            "/revoke" => {
                let request: RevokeRequest = serde_json::from_value(body.clone()).unwrap();
                let ott = Some(request.ott.clone()).filter(|ott| !ott.is_empty());
                let peer = match &ott {
                    Some(_) => None,
                    None => self.client_tls()?.map(|tls| tls.leaf().clone()),
                };
                self.authority.revoke(&RevokeOptions {
                    serial: request.serial,
                    reason_code: request.reason_code,
                    reason: request.reason,
                    ott,
                    peer,
                })?;
                Ok(serde_json::to_value(RevokeResponse {
                    status: "ok".into(),
                })
                .unwrap())
            }
            other => Err(rejection(404, &format!("no route for {other}"))),
        }
    }
}

impl Transport for FakeTransport {
    fn get(&self, path: &str) -> Result<Value> {
        self.log
            .borrow_mut()
            .requests
            .push((format!("GET {path}"), Value::Null));

        // One provisioner per page, to exercise the cursor.
        let provisioners = &self.authority.config().authority.provisioners;
        let index: usize = match path.strip_prefix("/provisioners") {
            Some("") => 0,
            Some(query) => query.trim_start_matches("?cursor=").parse().unwrap(),
            None => return Err(rejection(404, &format!("no route for {path}"))),
        };
        let next = if index + 1 < provisioners.len() {
            (index + 1).to_string()
        } else {
            String::new()
        };
        Ok(serde_json::json!({
            "provisioners": provisioners.get(index).into_iter().collect::<Vec<_>>(),
            "nextCursor": next,
        }))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.log
            .borrow_mut()
            .requests
            .push((format!("POST {path}"), body.clone()));
        self.handle(path, body).map_err(|e| match e {
            Error::AuthorityRejection { status: None, message } => rejection(403, &message),
            other => other,
        })
    }
}

fn sign_response(crt: &str, ca: &str) -> Value {
    serde_json::to_value(SignResponse {
        crt: crt.to_string(),
        ca: ca.to_string(),
        tls_options: None,
    })
    .unwrap()
}

fn rejection(status: u16, message: &str) -> Error {
    Error::AuthorityRejection {
        status: Some(status),
        message: message.to_string(),
    }
}

pub fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}
