//! certflow - certificate issuance against an embedded or remote authority
//!
//! # Examples
//!
//! ```bash
//! # Create a local authority under ~/.certflow
//! certflow init --name Lab --dns ca.lab.internal --provisioner admin
//!
//! # Issue offline, straight from the local ca.json
//! certflow certificate --offline host.lab.internal host.crt host.key
//!
//! # Issue against a remote authority with a pre-obtained token
//! certflow certificate --token "$TOKEN" host.lab.internal host.crt host.key
//!
//! # Revoke with the certificate itself (mTLS)
//! certflow revoke --ca-url https://ca.lab.internal --crt host.crt --key host.key 1234
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use certflow::authority::bootstrap::{self, BootstrapOptions};
use certflow::config::certflow_home;
use certflow::validity::parse_time_or_duration;
use certflow::{FlowConfig, IssueFlow, RenewFlow, RevokeFlow};

mod defaults;
mod prompt;

use defaults::{expand, Defaults, DEFAULTS_PATH};
use prompt::{SelectProvisioner, TerminalPassword};

/// certflow - dual-mode certificate authority client
#[derive(Parser)]
#[command(name = "certflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Defaults file path
    #[arg(long, env = "CERTFLOW_DEFAULTS", global = true)]
    #[arg(default_value = DEFAULTS_PATH)]
    defaults: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a new certificate and private key
    Certificate(CertificateArgs),

    /// Revoke a certificate by serial number
    Revoke(RevokeArgs),

    /// Renew a certificate using the certificate itself
    Renew(RenewArgs),

    /// Create a local authority for offline use
    Init(InitArgs),
}

/// Authority selection and provisioner flags shared by every command.
#[derive(Args, Debug, Default)]
struct AuthorityArgs {
    /// Use the embedded authority from --ca-config instead of a remote one
    #[arg(long)]
    offline: bool,

    /// Authority configuration (ca.json) for offline mode
    #[arg(long, env = "CERTFLOW_CA_CONFIG")]
    ca_config: Option<String>,

    /// Remote authority URL
    #[arg(long, env = "CERTFLOW_CA_URL")]
    ca_url: Option<String>,

    /// Root certificate file
    #[arg(long, env = "CERTFLOW_ROOT")]
    root: Option<String>,

    /// Pre-obtained authorization token
    #[arg(long)]
    token: Option<String>,

    /// Provisioner key id
    #[arg(long)]
    kid: Option<String>,

    /// Provisioner name
    #[arg(long)]
    issuer: Option<String>,

    /// File holding the provisioner key password
    #[arg(long)]
    password_file: Option<String>,
}

#[derive(Args, Debug)]
struct CertificateArgs {
    /// Certificate subject (common name)
    subject: String,

    /// Where to write the certificate chain
    crt_file: PathBuf,

    /// Where to write the private key
    key_file: PathBuf,

    #[command(flatten)]
    authority: AuthorityArgs,

    /// Additional subject alternative name (repeatable)
    #[arg(long = "san")]
    sans: Vec<String>,

    /// Validity start: RFC 3339 time or duration from now
    #[arg(long)]
    not_before: Option<String>,

    /// Validity end: RFC 3339 time or duration from now
    #[arg(long)]
    not_after: Option<String>,
}

#[derive(Args, Debug)]
struct RevokeArgs {
    /// Serial number of the certificate to revoke
    serial: String,

    #[command(flatten)]
    authority: AuthorityArgs,

    /// Certificate to authenticate with instead of a token
    #[arg(long)]
    crt: Option<PathBuf>,

    /// Private key for --crt
    #[arg(long)]
    key: Option<PathBuf>,

    /// Revocation reason, e.g. KeyCompromise
    #[arg(long)]
    reason: Option<String>,
}

/// Renewal authenticates with the certificate, so it takes no token or
/// provisioner flags.
#[derive(Args, Debug)]
struct RenewArgs {
    /// Use the embedded authority from --ca-config instead of a remote one
    #[arg(long)]
    offline: bool,

    /// Authority configuration (ca.json) for offline mode
    #[arg(long, env = "CERTFLOW_CA_CONFIG")]
    ca_config: Option<String>,

    /// Remote authority URL
    #[arg(long, env = "CERTFLOW_CA_URL")]
    ca_url: Option<String>,

    /// Root certificate file
    #[arg(long, env = "CERTFLOW_ROOT")]
    root: Option<String>,

    /// Certificate to renew
    #[arg(long)]
    crt: PathBuf,

    /// Private key for --crt
    #[arg(long)]
    key: PathBuf,

    /// Where to write the renewed chain (default: overwrite --crt)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Directory to create the authority in (default: the certflow home)
    #[arg(long)]
    dir: Option<String>,

    /// Name used in the CA certificate subjects
    #[arg(long)]
    name: String,

    /// DNS name the authority answers on (repeatable)
    #[arg(long = "dns", required = true)]
    dns_names: Vec<String>,

    /// Name of the JWK provisioner to create
    #[arg(long, default_value = "admin")]
    provisioner: String,

    /// File holding the provisioner key password
    #[arg(long)]
    password_file: Option<String>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("certflow=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("certflow=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Merges flags over the defaults file. Flags win.
fn flow_config(args: AuthorityArgs, defaults: &Defaults) -> FlowConfig {
    FlowConfig {
        offline: args.offline,
        ca_config: args.ca_config.as_deref().map(expand).or_else(|| defaults.ca_config()),
        ca_url: args.ca_url.or_else(|| defaults.ca_url.clone()),
        root: args.root.as_deref().map(expand).or_else(|| defaults.root()),
        token: args.token,
        kid: args.kid.or_else(|| defaults.kid.clone()),
        issuer: args.issuer.or_else(|| defaults.issuer.clone()),
        password_file: args
            .password_file
            .as_deref()
            .map(expand)
            .or_else(|| defaults.password_file()),
        ..Default::default()
    }
}

fn certificate(args: CertificateArgs, defaults: &Defaults) -> Result<()> {
    let now = Utc::now();
    let not_before = args
        .not_before
        .as_deref()
        .map(|v| parse_time_or_duration("not-before", v, now))
        .transpose()?
        .flatten();
    let not_after = args
        .not_after
        .as_deref()
        .map(|v| parse_time_or_duration("not-after", v, now))
        .transpose()?
        .flatten();

    let config = FlowConfig {
        sans: args.sans,
        not_before,
        not_after,
        ..flow_config(args.authority, defaults)
    };
    let issued = IssueFlow::new(config, SelectProvisioner, TerminalPassword)
        .run(&args.subject, &args.crt_file, &args.key_file)
        .with_context(|| format!("failed to issue certificate for {}", args.subject))?;

    println!("Your certificate has been saved in {}.", args.crt_file.display());
    println!("Your private key has been saved in {}.", issued.key_path.display());
    println!("Serial: {}", issued.certificate.serial);
    println!("Expires: {}", issued.certificate.not_after.to_rfc3339());
    Ok(())
}

fn revoke(args: RevokeArgs, defaults: &Defaults) -> Result<()> {
    let config = FlowConfig {
        crt: args.crt,
        key: args.key,
        reason: args.reason,
        ..flow_config(args.authority, defaults)
    };
    let revoked = RevokeFlow::new(config, SelectProvisioner, TerminalPassword)
        .run(&args.serial)
        .with_context(|| format!("failed to revoke certificate {}", args.serial))?;

    println!(
        "Certificate with serial number {} has been revoked (reason code {}).",
        revoked.serial, revoked.reason_code
    );
    Ok(())
}

fn renew(args: RenewArgs, defaults: &Defaults) -> Result<()> {
    let authority = AuthorityArgs {
        offline: args.offline,
        ca_config: args.ca_config,
        ca_url: args.ca_url,
        root: args.root,
        ..Default::default()
    };
    let config = FlowConfig {
        crt: Some(args.crt.clone()),
        key: Some(args.key),
        ..flow_config(authority, defaults)
    };
    let renewed = RenewFlow::new(config)
        .run(args.out.as_deref())
        .with_context(|| format!("failed to renew {}", args.crt.display()))?;

    println!(
        "Your certificate has been saved in {}.",
        renewed.certificate.crt_path.display()
    );
    println!("Serial: {}", renewed.certificate.serial);
    println!("Expires: {}", renewed.certificate.not_after.to_rfc3339());
    Ok(())
}

fn init(args: InitArgs) -> Result<()> {
    let dir = args.dir.as_deref().map(expand).unwrap_or_else(certflow_home);
    let password = match args.password_file.as_deref().map(expand) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .trim_end_matches(['\r', '\n'])
            .to_string(),
        None => dialoguer::Password::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Choose a password for the provisioner key")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()
            .context("failed to read password")?,
    };

    let created = bootstrap::init(&BootstrapOptions {
        dir: dir.clone(),
        name: args.name,
        dns_names: args.dns_names,
        provisioner: args.provisioner,
        password,
    })
    .with_context(|| format!("failed to initialize authority in {}", dir.display()))?;

    println!("Root certificate: {}", created.root_path.display());
    println!("Root fingerprint: {}", created.root_fingerprint);
    println!("Authority configuration: {}", created.config_path.display());
    println!("Provisioner key id: {}", created.provisioner_kid);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let defaults_path = shellexpand::tilde(&cli.defaults).to_string();
    let defaults = Defaults::load(&defaults_path)?;
    info!(defaults = %defaults_path, "starting certflow");

    match cli.command {
        Commands::Certificate(args) => certificate(args, &defaults),
        Commands::Revoke(args) => revoke(args, &defaults),
        Commands::Renew(args) => renew(args, &defaults),
        Commands::Init(args) => init(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_defaults() {
        let defaults = Defaults {
            ca_url: Some("https://default.example.com".into()),
            kid: Some("K1".into()),
            ..Default::default()
        };
        let args = AuthorityArgs {
            ca_url: Some("https://flag.example.com".into()),
            ..Default::default()
        };
        let config = flow_config(args, &defaults);
        assert_eq!(config.ca_url.as_deref(), Some("https://flag.example.com"));
        assert_eq!(config.kid.as_deref(), Some("K1"));
        assert!(!config.offline);
    }

    #[test]
    fn parses_certificate_command() {
        let cli = Cli::try_parse_from([
            "certflow",
            "certificate",
            "--offline",
            "--san",
            "10.0.0.1",
            "--san",
            "alt.example.com",
            "--not-after",
            "1h",
            "host.example.com",
            "host.crt",
            "host.key",
        ])
        .unwrap();
        let Commands::Certificate(args) = cli.command else {
            panic!("expected certificate command");
        };
        assert!(args.authority.offline);
        assert_eq!(args.sans, vec!["10.0.0.1", "alt.example.com"]);
        assert_eq!(args.not_after.as_deref(), Some("1h"));
        assert_eq!(args.subject, "host.example.com");
    }

    #[test]
    fn renew_takes_no_token_flags() {
        let cli = Cli::try_parse_from([
            "certflow", "renew", "--offline", "--crt", "a.crt", "--key", "a.key",
        ])
        .unwrap();
        let Commands::Renew(args) = cli.command else {
            panic!("expected renew command");
        };
        assert!(args.offline);

        for flag in ["--token", "--kid", "--issuer", "--password-file"] {
            let parsed = Cli::try_parse_from([
                "certflow", "renew", "--crt", "a.crt", "--key", "a.key", flag, "x",
            ]);
            assert!(parsed.is_err(), "{flag} should be rejected");
        }
    }

    #[test]
    fn init_requires_dns() {
        assert!(Cli::try_parse_from(["certflow", "init", "--name", "Lab"]).is_err());
    }
}
