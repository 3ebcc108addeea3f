//! Secret store access for vsync.
//!
//! [`SecretStore`] is the raw capability every backend implements over
//! physical paths. [`KvClient`] layers mount resolution and kv v1/v2
//! translation on top, so callers only deal in logical paths.
//!
//! Backends:
//! - [`VaultClient`]: Vault HTTP API
//! - [`MemoryStore`]: in-memory, layout-checking store for tests

pub mod provider;
pub mod mounts;
pub mod translate;
pub mod kv;
pub mod memory;
pub mod http;

pub use provider::{Mount, SecretStore};
pub use mounts::{MountResolver, MountTable, ResolvedMount};
pub use translate::{translate, unwrap_for_read, wrap_for_write, Operation, DATA_KEY};
pub use kv::KvClient;
pub use memory::MemoryStore;
pub use http::{RawResponse, VaultClient, VaultClientConfig};
