//! Command implementations.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use vsync_common::{SecretPath, SecretValue};
use vsync_storage::{KvClient, SecretStore, VaultClient, VaultClientConfig};
use vsync_sync::{write_if_changed, SyncSession};

use crate::config::AppConfig;

/// Print a value as pretty JSON on stdout.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(name: &str, config: &VaultClientConfig) -> Result<Arc<VaultClient>> {
    let client = VaultClient::connect(name, config)
        .await
        .with_context(|| format!("Failed to connect to {} vault at {}", name, config.address))?;
    Ok(Arc::new(client))
}

/// Connect to the source, or the destination when `destination` is set.
async fn connect_target(app: &AppConfig, destination: bool) -> Result<Arc<VaultClient>> {
    if destination {
        connect("destination", app.require_destination()?).await
    } else {
        connect("source", &app.source).await
    }
}

async fn kv_target(app: &AppConfig, destination: bool) -> Result<KvClient> {
    Ok(KvClient::new(connect_target(app, destination).await?))
}

async fn session(app: &AppConfig) -> Result<SyncSession> {
    let destination = app.require_destination()?;
    let source = KvClient::new(connect("source", &app.source).await?);
    let destination = KvClient::new(connect("destination", destination).await?);
    Ok(SyncSession::new(
        Arc::new(source),
        Arc::new(destination),
        app.entrypoint.clone(),
        app.dry_run,
        app.sync.clone(),
    ))
}

/// Parse `key=value[,key=value]` into a secret value.
///
/// Values keep any further `=` characters. Later duplicates win.
pub fn parse_pairs(input: &str) -> Result<SecretValue> {
    let mut value = SecretValue::new();
    for pair in input.split(',').filter(|p| !p.trim().is_empty()) {
        let Some((key, val)) = pair.split_once('=') else {
            bail!("'{}' is not a key=value pair", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("'{}' has an empty key", pair);
        }
        value.insert(key, val);
    }
    if value.is_empty() {
        bail!("please provide at least one key=value for the secret");
    }
    Ok(value)
}

pub async fn list(app: &AppConfig, path: Option<&str>, destination: bool) -> Result<()> {
    let path = path.map(SecretPath::new).unwrap_or_else(|| app.entrypoint.clone());
    let client = kv_target(app, destination).await?;
    let names = client
        .list(&path)
        .await
        .with_context(|| format!("Failed to list {}", path))?;
    print_json(&names)
}

#[derive(Serialize)]
struct SecretOutput<'a> {
    path: &'a str,
    data: serde_json::Value,
}

pub async fn read_secret(app: &AppConfig, path: &str, destination: bool) -> Result<()> {
    let path = SecretPath::new(path);
    let client = kv_target(app, destination).await?;
    let Some(value) = client
        .read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path))?
    else {
        bail!("no secret at {}", path);
    };
    print_json(&SecretOutput {
        path: path.as_str(),
        data: value.to_json(),
    })
}

pub async fn write_secret(app: &AppConfig, path: &str, pairs: &str, destination: bool) -> Result<()> {
    let path = SecretPath::new(path);
    let value = parse_pairs(pairs)?;
    let client = kv_target(app, destination).await?;
    let leaf = write_if_changed(&client, &path, &value, app.dry_run)
        .await
        .with_context(|| format!("Failed to write {}", path))?;
    print_json(&leaf)
}

pub async fn sync_secret(app: &AppConfig, path: &str) -> Result<()> {
    let path = SecretPath::new(path);
    let session = session(app).await?;
    let leaf = session
        .sync_one(&path)
        .await
        .with_context(|| format!("Failed to sync {}", path))?;
    print_json(&leaf)
}

pub async fn sync_secrets(app: &AppConfig, remove_orphans: bool) -> Result<()> {
    let session = session(app).await?;
    let report = session
        .sync_all()
        .await
        .with_context(|| format!("Failed to sync secrets under {}", app.entrypoint))?;

    let orphans = if remove_orphans {
        info!("Removing orphans in destination vault");
        Some(
            session
                .remove_orphans()
                .await
                .with_context(|| format!("Failed to remove orphans under {}", app.entrypoint))?,
        )
    } else {
        None
    };

    print_json(&serde_json::json!({ "sync": report, "orphans": orphans }))?;

    let orphan_failures = orphans.as_ref().map(|o| o.has_failures()).unwrap_or(false);
    if report.has_failures() || orphan_failures {
        bail!("sync finished with failures");
    }
    Ok(())
}

pub async fn dump_secrets(app: &AppConfig, destination: bool) -> Result<()> {
    let client = kv_target(app, destination).await?;
    let leaves = app
        .sync
        .walker()
        .walk(&client, &app.entrypoint)
        .await
        .with_context(|| format!("Failed to walk {}", app.entrypoint))?;

    let mut dump = BTreeMap::new();
    for path in leaves {
        match client
            .read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path))?
        {
            Some(value) => {
                dump.insert(path.to_string(), value.to_json());
            }
            None => warn!(path = %path, "Listed secret has no current value"),
        }
    }
    print_json(&dump)
}

pub async fn remove_orphans(app: &AppConfig) -> Result<()> {
    let session = session(app).await?;
    info!("Fetching all secrets in destination vault, please wait...");
    let report = session
        .remove_orphans()
        .await
        .with_context(|| format!("Failed to remove orphans under {}", app.entrypoint))?;
    info!(
        "{} orphans {}",
        report.orphans.len(),
        if report.dry_run { "found" } else { "removed" }
    );
    print_json(&report)?;
    if report.has_failures() {
        bail!("orphan removal finished with failures");
    }
    Ok(())
}

pub async fn list_mounts(app: &AppConfig, destination: bool) -> Result<()> {
    let client = connect_target(app, destination).await?;
    let mut mounts = client.list_mounts().await.context("Failed to list mounts")?;
    mounts.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    print_json(&mounts)
}

pub async fn health(app: &AppConfig, destination: bool) -> Result<()> {
    let client = connect_target(app, destination).await?;
    let status = client.health().await.context("Failed to get health status")?;
    print_json(&status)
}

pub async fn request(
    app: &AppConfig,
    method: &str,
    uri: &str,
    body: Option<&str>,
    destination: bool,
) -> Result<()> {
    let body = body
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("Request body is not valid JSON")?;
    let client = connect_target(app, destination).await?;
    info!("request {} {}", method, uri);
    let response = client
        .raw_request(method, uri, body)
        .await
        .with_context(|| format!("Failed to make {} request to {}", method, uri))?;
    print_json(&response)
}

pub fn show_config(app: &AppConfig) -> Result<()> {
    print_json(&app.masked())
}
