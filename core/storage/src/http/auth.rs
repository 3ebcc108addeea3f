//! Authentication methods and token acquisition for the HTTP store.

use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;
use zeroize::Zeroizing;

use vsync_common::{Error, Result};

/// Name of the token file the vault CLI leaves in the home directory.
const TOKEN_FILE: &str = ".vault-token";

/// Username and password loaded from a credentials file.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    username: String,
    password: String,
}

impl Credentials {
    /// Load credentials from a YAML or JSON file with `username` and
    /// `password` fields.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `InvalidInput` if a field is missing or the file does not parse
    pub fn load(path: &Path) -> Result<Self> {
        let raw = Zeroizing::new(std::fs::read_to_string(path)?);
        let file: CredentialsFile = serde_yaml::from_str(&raw).map_err(|e| {
            Error::InvalidInput(format!(
                "credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            username: file.username,
            password: Zeroizing::new(file.password),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a client obtains its token.
#[derive(Clone)]
pub enum AuthMethod {
    /// A token given directly or read from the token file.
    Token(Zeroizing<String>),
    /// A userpass login; the token is issued by the server.
    UserPass {
        username: String,
        password: Zeroizing<String>,
    },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Token(_) => f.write_str("Token(<redacted>)"),
            AuthMethod::UserPass { username, .. } => f
                .debug_struct("UserPass")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Inputs for choosing an authentication method.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthSources<'a> {
    pub token: Option<&'a str>,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub credentials_file: Option<&'a Path>,
    pub token_file: Option<&'a Path>,
}

impl AuthMethod {
    /// Pick the method from the first source that is set.
    ///
    /// Order: explicit token, username and password, credentials file,
    /// token file.
    ///
    /// # Errors
    /// - `InvalidInput` if a username comes without a password or no
    ///   source yields credentials
    pub fn choose(sources: AuthSources<'_>) -> Result<Self> {
        if let Some(token) = sources.token.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(AuthMethod::Token(Zeroizing::new(token.to_string())));
        }

        match (sources.username, sources.password) {
            (Some(username), Some(password)) => {
                return Ok(AuthMethod::UserPass {
                    username: username.to_string(),
                    password: Zeroizing::new(password.to_string()),
                })
            }
            (Some(username), None) => {
                return Err(Error::InvalidInput(format!(
                    "username '{}' given without a password",
                    username
                )))
            }
            _ => {}
        }

        if let Some(path) = sources.credentials_file {
            let creds = Credentials::load(path)?;
            return Ok(AuthMethod::UserPass {
                username: creds.username,
                password: creds.password,
            });
        }

        if let Some(path) = sources.token_file {
            if let Some(token) = read_token_file(path)? {
                return Ok(AuthMethod::Token(token));
            }
        }

        Err(Error::InvalidInput(
            "no credentials: set a token, a username and password, or a credentials file"
                .to_string(),
        ))
    }

    /// Produce a token, logging in when needed.
    pub async fn token(&self, http: &Client, base: &Url) -> Result<Zeroizing<String>> {
        match self {
            AuthMethod::Token(token) => Ok(token.clone()),
            AuthMethod::UserPass { username, password } => {
                login_userpass(http, base, username, password).await
            }
        }
    }
}

/// Default location of the token file.
pub fn default_token_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(TOKEN_FILE))
}

/// Read a token file, trimming whitespace.
///
/// A missing or blank file yields `None`.
pub fn read_token_file(path: &Path) -> Result<Option<Zeroizing<String>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => Zeroizing::new(raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let token = raw.trim();
    if token.is_empty() {
        return Ok(None);
    }
    Ok(Some(Zeroizing::new(token.to_string())))
}

/// Exchange a username and password for a client token.
///
/// # Errors
/// - `Transport` on network failure, rejected credentials or a response
///   without `auth.client_token`
pub async fn login_userpass(
    http: &Client,
    base: &Url,
    username: &str,
    password: &str,
) -> Result<Zeroizing<String>> {
    let endpoint = super::client::endpoint(base, &format!("auth/userpass/login/{}", username))?;
    tracing::debug!(username, "Logging in with userpass");

    let body = serde_json::json!({ "password": password });
    let response = http
        .post(endpoint)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Transport(format!("userpass login: {}", e)))?;

    let status = response.status();
    let text = Zeroizing::new(
        response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("userpass login: {}", e)))?,
    );
    let body: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);

    if !status.is_success() {
        let reason = super::client::vault_errors(&body).unwrap_or_else(|| status.to_string());
        return Err(Error::Transport(format!(
            "userpass login for '{}' failed: {}",
            username, reason
        )));
    }
    client_token(&body)
}

fn client_token(body: &serde_json::Value) -> Result<Zeroizing<String>> {
    body.get("auth")
        .and_then(|auth| auth.get("client_token"))
        .and_then(|token| token.as_str())
        .map(|token| Zeroizing::new(token.to_string()))
        .ok_or_else(|| Error::Transport("login response has no auth.client_token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_credentials() {
        let file = write_file("username: alice\npassword: s3cret\n");
        let creds = Credentials::load(file.path()).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password.as_str(), "s3cret");
    }

    #[test]
    fn test_load_json_credentials() {
        let file = write_file(r#"{"username": "bob", "password": "pw"}"#);
        let creds = Credentials::load(file.path()).unwrap();
        assert_eq!(creds.username, "bob");
    }

    #[test]
    fn test_load_credentials_missing_field() {
        let file = write_file("username: alice\n");
        let err = Credentials::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let file = write_file("  hvs.token\n");
        let token = read_token_file(file.path()).unwrap().unwrap();
        assert_eq!(token.as_str(), "hvs.token");

        let blank = write_file("\n");
        assert!(read_token_file(blank.path()).unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        assert!(read_token_file(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_choose_precedence() {
        let creds = write_file("username: file-user\npassword: pw\n");
        let token_file = write_file("file-token");

        let all = AuthSources {
            token: Some("direct"),
            username: Some("flag-user"),
            password: Some("pw"),
            credentials_file: Some(creds.path()),
            token_file: Some(token_file.path()),
        };
        assert!(matches!(AuthMethod::choose(all).unwrap(), AuthMethod::Token(t) if t.as_str() == "direct"));

        let no_token = AuthSources { token: None, ..all };
        assert!(matches!(
            AuthMethod::choose(no_token).unwrap(),
            AuthMethod::UserPass { username, .. } if username == "flag-user"
        ));

        let file_only = AuthSources {
            username: None,
            password: None,
            ..no_token
        };
        assert!(matches!(
            AuthMethod::choose(file_only).unwrap(),
            AuthMethod::UserPass { username, .. } if username == "file-user"
        ));

        let token_file_only = AuthSources {
            credentials_file: None,
            ..file_only
        };
        assert!(matches!(
            AuthMethod::choose(token_file_only).unwrap(),
            AuthMethod::Token(t) if t.as_str() == "file-token"
        ));
    }

    #[test]
    fn test_choose_without_sources() {
        assert!(AuthMethod::choose(AuthSources::default()).is_err());

        let half = AuthSources {
            username: Some("alice"),
            ..Default::default()
        };
        assert!(matches!(AuthMethod::choose(half).unwrap_err(), Error::InvalidInput(_)));
    }

    #[test]
    fn test_debug_is_redacted() {
        let method = AuthMethod::UserPass {
            username: "alice".to_string(),
            password: Zeroizing::new("hunter2".to_string()),
        };
        let shown = format!("{:?}", method);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));

        let token = AuthMethod::Token(Zeroizing::new("hvs.secret".to_string()));
        assert!(!format!("{:?}", token).contains("hvs.secret"));
    }

    #[test]
    fn test_client_token() {
        let body = serde_json::json!({"auth": {"client_token": "hvs.abc"}});
        assert_eq!(client_token(&body).unwrap().as_str(), "hvs.abc");
        assert!(client_token(&serde_json::json!({"auth": null})).is_err());
    }
}
