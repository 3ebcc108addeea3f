//! Global flags and the application config built from them.

use anyhow::{bail, Result};
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use zeroize::Zeroizing;

use vsync_common::SecretPath;
use vsync_storage::http::{default_token_file, DEFAULT_ADDRESS, DEFAULT_TIMEOUT_SECS};
use vsync_storage::VaultClientConfig;
use vsync_sync::SyncConfig;

/// Flags shared by every command. Each one can be set from the environment.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// URL of the source vault server.
    #[arg(short = 'a', long, env = "VAULT_ADDR", default_value = DEFAULT_ADDRESS, global = true)]
    pub vault_addr: String,

    /// Token for the source vault server.
    #[arg(short = 't', long, env = "VAULT_TOKEN", hide_env_values = true, global = true)]
    pub vault_token: Option<String>,

    /// Username for userpass login on the source vault server.
    #[arg(short = 'u', long, env = "VAULT_USERNAME", global = true)]
    pub vault_username: Option<String>,

    /// Password for userpass login on the source vault server.
    #[arg(short = 'p', long, env = "VAULT_PASSWORD", hide_env_values = true, global = true)]
    pub vault_password: Option<String>,

    /// File (json or yaml) with the username and password for userpass login.
    #[arg(short = 'c', long, env = "VAULT_CREDENTIALS", global = true)]
    pub credentials_file: Option<PathBuf>,

    /// Root path for listing, syncing and orphan removal.
    #[arg(short = 'e', long, env = "VAULT_PREFIX", default_value = "/secret", global = true)]
    pub entrypoint: String,

    /// URL of the destination vault server.
    #[arg(long, env = "DESTINATION_VAULT_ADDR", global = true)]
    pub destination_vault_addr: Option<String>,

    #[arg(long, env = "DESTINATION_VAULT_TOKEN", hide_env_values = true, global = true)]
    pub destination_vault_token: Option<String>,

    #[arg(long, env = "DESTINATION_VAULT_USERNAME", global = true)]
    pub destination_vault_username: Option<String>,

    #[arg(long, env = "DESTINATION_VAULT_PASSWORD", hide_env_values = true, global = true)]
    pub destination_vault_password: Option<String>,

    #[arg(long, env = "DESTINATION_VAULT_CREDENTIALS", global = true)]
    pub destination_credentials_file: Option<PathBuf>,

    /// Report what would change without writing or deleting anything.
    #[arg(long, env = "VSYNC_DRY_RUN", global = true)]
    pub dry: bool,

    /// Log level; RUST_LOG takes precedence when set.
    #[arg(
        short = 'l',
        long,
        env = "VSYNC_LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"],
        global = true
    )]
    pub log_level: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "VSYNC_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    pub timeout: u64,

    /// Accept invalid TLS certificates.
    #[arg(long, env = "VSYNC_TLS_SKIP_VERIFY", global = true)]
    pub tls_skip_verify: bool,

    /// Maximum number of concurrent requests per step.
    #[arg(long, env = "VSYNC_CONCURRENCY", default_value_t = 8, value_parser = clap::value_parser!(u16).range(1..), global = true)]
    pub concurrency: u16,

    /// Record failures and keep going instead of stopping at the first one.
    #[arg(long, env = "VSYNC_CONTINUE_ON_ERROR", global = true)]
    pub continue_on_error: bool,
}

/// Everything a command needs, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: VaultClientConfig,
    pub destination: Option<VaultClientConfig>,
    pub entrypoint: SecretPath,
    pub dry_run: bool,
    pub log_level: String,
    pub sync: SyncConfig,
}

impl AppConfig {
    pub fn from_args(args: &GlobalArgs) -> Self {
        let endpoint = |address: &str,
                        token: &Option<String>,
                        username: &Option<String>,
                        password: &Option<String>,
                        credentials_file: &Option<PathBuf>| {
            let mut config = VaultClientConfig::new(address);
            config.token = non_empty(token).map(Zeroizing::new);
            config.username = non_empty(username);
            config.password = non_empty(password).map(Zeroizing::new);
            config.credentials_file = credentials_file.clone();
            config.timeout_secs = args.timeout;
            config.tls_skip_verify = args.tls_skip_verify;
            config.token_file = default_token_file();
            config
        };

        let source = endpoint(
            &args.vault_addr,
            &args.vault_token,
            &args.vault_username,
            &args.vault_password,
            &args.credentials_file,
        );
        let destination = non_empty(&args.destination_vault_addr).map(|address| {
            endpoint(
                &address,
                &args.destination_vault_token,
                &args.destination_vault_username,
                &args.destination_vault_password,
                &args.destination_credentials_file,
            )
        });

        Self {
            source,
            destination,
            entrypoint: SecretPath::new(&args.entrypoint),
            dry_run: args.dry,
            log_level: args.log_level.clone(),
            sync: SyncConfig {
                concurrency: usize::from(args.concurrency),
                tolerate_failures: args.continue_on_error,
            },
        }
    }

    /// The destination settings, or an error telling the user how to set them.
    pub fn require_destination(&self) -> Result<&VaultClientConfig> {
        match &self.destination {
            Some(destination) => Ok(destination),
            None => bail!(
                "no destination vault configured: set --destination-vault-addr or DESTINATION_VAULT_ADDR"
            ),
        }
    }

    /// Config summary with secrets masked.
    pub fn masked(&self) -> serde_json::Value {
        json!({
            "source": masked_endpoint(&self.source),
            "destination": self.destination.as_ref().map(masked_endpoint),
            "entrypoint": self.entrypoint.as_str(),
            "dry_run": self.dry_run,
            "log_level": self.log_level,
            "sync": self.sync,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn mask(set: bool) -> serde_json::Value {
    if set {
        json!("********")
    } else {
        serde_json::Value::Null
    }
}

fn masked_endpoint(config: &VaultClientConfig) -> serde_json::Value {
    json!({
        "address": config.address,
        "token": mask(config.token.is_some()),
        "username": config.username,
        "password": mask(config.password.is_some()),
        "credentials_file": config.credentials_file,
        "token_file": config.token_file,
        "timeout_secs": config.timeout_secs,
        "tls_skip_verify": config.tls_skip_verify,
    })
}
