//! Secret store client over the Vault HTTP API.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroizing;

use vsync_common::{EngineVersion, Error, Result, SecretPath, SecretValue, SEPARATOR};

use super::auth::{default_token_file, AuthMethod, AuthSources};
use crate::provider::{Mount, SecretStore};

/// Default server address.
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8200";
/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

const API_PREFIX: &str = "v1";
const TOKEN_HEADER: &str = "X-Vault-Token";

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Connection settings for one server.
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultClientConfig {
    /// Server address, e.g. `https://vault.example.com:8200`.
    pub address: String,
    #[serde(skip)]
    pub token: Option<Zeroizing<String>>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<Zeroizing<String>>,
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub tls_skip_verify: bool,
    pub user_agent: String,
    /// Token file used when nothing else is configured.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl Default for VaultClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            username: None,
            password: None,
            credentials_file: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tls_skip_verify: false,
            user_agent: format!("vsync/{}", env!("CARGO_PKG_VERSION")),
            token_file: default_token_file(),
        }
    }
}

impl VaultClientConfig {
    /// Config for an address with all other settings at their defaults.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Parse and check the address.
    ///
    /// # Errors
    /// - `InvalidInput` if the address is not an http(s) URL
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.address.trim())
            .map_err(|e| Error::InvalidInput(format!("address '{}': {}", self.address, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "address '{}': scheme must be http or https",
                self.address
            )));
        }
        if !url.path().ends_with(SEPARATOR) {
            let path = format!("{}{}", url.path(), SEPARATOR);
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Authentication method these settings select.
    pub fn auth_method(&self) -> Result<AuthMethod> {
        AuthMethod::choose(AuthSources {
            token: self.token.as_deref().map(String::as_str),
            username: self.username.as_deref(),
            password: self.password.as_deref().map(String::as_str),
            credentials_file: self.credentials_file.as_deref(),
            token_file: self.token_file.as_deref(),
        })
    }
}

impl fmt::Debug for VaultClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClientConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("credentials_file", &self.credentials_file)
            .field("timeout_secs", &self.timeout_secs)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Status and body of a passthrough request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Vault HTTP API client.
pub struct VaultClient {
    name: String,
    http: Client,
    base: Url,
    token: Zeroizing<String>,
}

impl VaultClient {
    /// Build a client and authenticate.
    ///
    /// # Errors
    /// - `InvalidInput` for a bad address or missing credentials
    /// - `Transport` if the HTTP client cannot be built or login fails
    pub async fn connect(name: impl Into<String>, config: &VaultClientConfig) -> Result<Self> {
        let name = name.into();
        let base = config.base_url()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {}", e)))?;

        let method = config.auth_method()?;
        debug!(store = %name, address = %base, auth = ?method, "Authenticating");
        let token = method.token(&http, &base).await?;
        info!(store = %name, address = %base, "Connected");

        Ok(Self {
            name,
            http,
            base,
            token,
        })
    }

    /// Server address.
    pub fn address(&self) -> &Url {
        &self.base
    }

    /// Health status. Returns the body for any status code, which the
    /// endpoint uses to report seal and standby state.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = endpoint(&self.base, "sys/health")?;
        let (_, body) = self.send(self.http.get(url), "sys/health").await?;
        Ok(body)
    }

    /// Send an arbitrary request to an API path.
    ///
    /// `uri` may carry a query string, with or without the `v1/` prefix.
    pub async fn raw_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<RawResponse> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("unknown HTTP method '{}'", method)))?;
        let url = raw_url(&self.base, uri)?;
        debug!(store = %self.name, method = %method, url = %url, "Raw request");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let (status, body) = self.send(request, uri).await?;
        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Attach the token, send, and decode the body as JSON when possible.
    async fn send(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<(StatusCode, serde_json::Value)> {
        let response = request
            .header(TOKEN_HEADER, self.token.as_str())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(path, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(path, &e))?;
        Ok((status, decode_body(text)))
    }
}

fn transport_error(path: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("{}: request timed out", path))
    } else {
        Error::Transport(format!("{}: {}", path, err))
    }
}

fn decode_body(text: String) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

/// Build `<base>v1/<path>` with each segment percent-encoded.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let encoded: Vec<String> = path
        .trim_start_matches(SEPARATOR)
        .split(SEPARATOR)
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect();
    base.join(&format!("{}/{}", API_PREFIX, encoded.join("/")))
        .map_err(|e| Error::InvalidInput(format!("path '{}': {}", path, e)))
}

fn raw_url(base: &Url, uri: &str) -> Result<Url> {
    let uri = uri.trim_start_matches(SEPARATOR);
    let uri = uri
        .strip_prefix(API_PREFIX)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
        .unwrap_or(uri);
    base.join(&format!("{}/{}", API_PREFIX, uri))
        .map_err(|e| Error::InvalidInput(format!("uri '{}': {}", uri, e)))
}

/// The `errors` text of an error response, if any.
pub(crate) fn vault_errors(body: &serde_json::Value) -> Option<String> {
    let errors: Vec<&str> = body
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(|e| e.as_str())
        .filter(|e| !e.is_empty())
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// Map a non-success status to an error.
fn status_error(path: &SecretPath, status: StatusCode, body: &serde_json::Value) -> Error {
    if status == StatusCode::NOT_FOUND {
        return Error::NotFound(path.to_string());
    }
    let reason = vault_errors(body).unwrap_or_else(|| "request failed".to_string());
    Error::Transport(format!("{}: {} ({})", path, status, reason))
}

/// Extract the payload of a read response.
///
/// A kv v2 read of a soft-deleted secret answers 404 with an envelope
/// whose `data` is null; that envelope is returned as the payload.
fn read_payload(path: &SecretPath, status: StatusCode, body: serde_json::Value) -> Result<SecretValue> {
    let data = body.get("data").cloned().unwrap_or(serde_json::Value::Null);
    if status.is_success() {
        return SecretValue::from_json(data);
    }
    if status == StatusCode::NOT_FOUND {
        let soft_deleted = data
            .get("data")
            .map(|inner| inner.is_null())
            .unwrap_or(false);
        if soft_deleted {
            return SecretValue::from_json(data);
        }
    }
    Err(status_error(path, status, &body))
}

fn list_keys(path: &SecretPath, body: &serde_json::Value) -> Result<Vec<String>> {
    let keys = body
        .get("data")
        .and_then(|data| data.get("keys"))
        .and_then(|keys| keys.as_array())
        .ok_or_else(|| Error::Serialization(format!("{}: list response has no data.keys", path)))?;
    Ok(keys
        .iter()
        .filter_map(|k| k.as_str())
        .map(str::to_string)
        .collect())
}

/// Parse a `sys/mounts` response.
///
/// Newer servers nest the table under `data`; older ones put it at the
/// top level next to request metadata.
pub fn parse_mounts(body: &serde_json::Value) -> Vec<Mount> {
    let table = body
        .get("data")
        .filter(|data| data.is_object())
        .unwrap_or(body);
    let Some(table) = table.as_object() else {
        return Vec::new();
    };

    table
        .iter()
        .filter_map(|(prefix, info)| {
            let engine_type = info.get("type")?.as_str()?;
            let version = info
                .get("options")
                .and_then(|o| o.get("version"))
                .and_then(|v| v.as_str());
            let mut mount = Mount::new(
                prefix,
                engine_type,
                EngineVersion::from_mount(engine_type, version),
            );
            mount.description = info
                .get("description")
                .and_then(|d| d.as_str())
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            Some(mount)
        })
        .collect()
}

#[async_trait]
impl SecretStore for VaultClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, path: &SecretPath) -> Result<SecretValue> {
        let url = endpoint(&self.base, path.as_str())?;
        let (status, body) = self.send(self.http.get(url), path.as_str()).await?;
        read_payload(path, status, body)
    }

    async fn write(&self, path: &SecretPath, payload: &SecretValue) -> Result<()> {
        let url = endpoint(&self.base, path.as_str())?;
        let request = self.http.post(url).json(&payload.to_json());
        let (status, body) = self.send(request, path.as_str()).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(path, status, &body))
        }
    }

    async fn delete(&self, path: &SecretPath) -> Result<()> {
        let url = endpoint(&self.base, path.as_str())?;
        let (status, body) = self.send(self.http.delete(url), path.as_str()).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(path, status, &body))
        }
    }

    async fn list(&self, path: &SecretPath) -> Result<Vec<String>> {
        let mut url = endpoint(&self.base, path.as_str())?;
        url.query_pairs_mut().append_pair("list", "true");
        let (status, body) = self.send(self.http.get(url), path.as_str()).await?;
        if !status.is_success() {
            return Err(status_error(path, status, &body));
        }
        list_keys(path, &body)
    }

    async fn list_mounts(&self) -> Result<Vec<Mount>> {
        let url = endpoint(&self.base, "sys/mounts")?;
        let (status, body) = self.send(self.http.get(url), "sys/mounts").await?;
        if !status.is_success() {
            return Err(status_error(&SecretPath::new("sys/mounts"), status, &body));
        }
        Ok(parse_mounts(&body))
    }
}
