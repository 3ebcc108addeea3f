//! HTTP secret store for Vault-compatible servers.
//!
//! - Token, userpass, credentials file and token file authentication
//! - Percent-encoded paths under the `v1/` API prefix
//! - Passthrough requests and health checks for the CLI

pub mod auth;
pub mod client;

pub use auth::{default_token_file, read_token_file, AuthMethod, AuthSources, Credentials};
pub use client::{parse_mounts, RawResponse, VaultClient, VaultClientConfig, DEFAULT_ADDRESS, DEFAULT_TIMEOUT_SECS};
