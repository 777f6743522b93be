mod common;

use certflow::certificate;
use certflow::{Error, FlowConfig, IssueFlow, RenewFlow, RevokeFlow};
use common::{first, mode, no_prompt, TestAuthority};

fn issue(ca: &TestAuthority) -> FlowConfig {
    IssueFlow::new(ca.offline(), first, no_prompt)
        .run("host.example.com", &ca.path("leaf.crt"), &ca.path("leaf.key"))
        .unwrap();
    FlowConfig {
        crt: Some(ca.path("leaf.crt")),
        key: Some(ca.path("leaf.key")),
        password_file: None,
        ..Default::default()
    }
}

#[test]
fn offline_renew_overwrites_input() {
    let ca = TestAuthority::new();
    let creds = issue(&ca);
    let before = certificate::read_chain(&ca.path("leaf.crt")).unwrap().remove(0);

    let renewed = RenewFlow::new(FlowConfig {
        offline: true,
        ca_config: Some(ca.created.config_path.clone()),
        ..creds
    })
    .run(None)
    .unwrap();

    let after = certificate::read_chain(&ca.path("leaf.crt")).unwrap().remove(0);
    assert_eq!(renewed.previous_serial, before.serial().unwrap());
    assert_eq!(renewed.certificate.serial, after.serial().unwrap());
    assert_ne!(after.serial().unwrap(), before.serial().unwrap());
    assert_eq!(after.common_name().unwrap(), before.common_name().unwrap());
    assert_eq!(after.public_key_bits().unwrap(), before.public_key_bits().unwrap());
    assert_eq!(mode(&ca.path("leaf.crt")), 0o600);
}

#[test]
fn online_renew_writes_to_output() {
    let ca = TestAuthority::new();
    let creds = issue(&ca);
    let out = ca.path("renewed.crt");

    let connector = ca.connector();
    let log = connector.log.clone();
    RenewFlow::new(FlowConfig {
        ca_url: Some(format!("https://{}", common::DNS_NAME)),
        root: Some(ca.created.root_path.clone()),
        ..creds
    })
    .with_connector(connector)
    .run(Some(&out))
    .unwrap();

    let chain = certificate::read_chain(&out).unwrap();
    assert_eq!(chain.len(), 2);
    assert!(log.borrow().targets[0].identity.is_some());
    assert_eq!(log.borrow().requests.last().unwrap().0, "POST /renew");
}

#[test]
fn revoked_certificate_cannot_renew() {
    let ca = TestAuthority::new();
    let creds = issue(&ca);
    let offline = FlowConfig {
        offline: true,
        ca_config: Some(ca.created.config_path.clone()),
        ..creds
    };

    RevokeFlow::new(offline.clone(), first, no_prompt)
        .run(&certificate::read_chain(&ca.path("leaf.crt")).unwrap()[0].serial().unwrap())
        .unwrap();

    let err = RenewFlow::new(offline).run(None).unwrap_err();
    assert!(matches!(
        err,
        Error::AuthorityRejection { ref message, .. } if message.contains("revoked")
    ));
}
