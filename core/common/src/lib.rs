//! Common utilities and types shared across vsync crates.
//!
//! This module provides the foundational vocabulary of the sync tool:
//! secret paths, secret values, engine versions and the error taxonomy.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{normalize, EngineVersion, SecretPath, SecretValue, Value, SEPARATOR};
