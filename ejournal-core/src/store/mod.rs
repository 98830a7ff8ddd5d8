//! Credential persistence.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`MemoryStore`] - In-memory implementation for tests and short-lived sessions
//! - [`FileStore`] - JSON file in the platform data directory
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to build the configured backend
//!
//! # Storage Key Convention
//!
//! A session persists exactly two values, `{namespace}/access` and
//! `{namespace}/refresh`, so that a restarted client can pick up where the
//! previous one left off.
//!
//! # Example
//!
//! ```rust,ignore
//! use ejournal_core::store::{MemoryStore, Secret, SecretStore};
//!
//! let store = MemoryStore::new();
//! store.set("ejournal/access", &Secret::new("eyJhbGciOi...")).await?;
//!
//! let retrieved = store.get("ejournal/access").await?;
//! assert!(retrieved.is_some());
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// I/O error reading or writing a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// No platform data directory could be determined.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// Abstraction over secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Which backend [`create_store`] should build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum StoreBackend {
    /// Nothing survives the process.
    Memory,

    /// JSON file; `None` selects the platform data directory.
    File { path: Option<PathBuf> },

    /// OS keyring, falling back to the default file store when unavailable.
    #[default]
    Keyring,
}

/// Create a secret store for the requested backend.
///
/// A keyring request falls back to [`FileStore`] at its default location
/// when the keyring is unavailable or the `keyring-store` feature is off, so
/// credentials still survive a restart.
pub fn create_store(backend: &StoreBackend) -> Result<Box<dyn SecretStore>, StoreError> {
    match backend {
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Ok(Box::new(MemoryStore::new()))
        }
        StoreBackend::File { path } => {
            let path = match path {
                Some(path) => path.clone(),
                None => FileStore::default_path()?,
            };
            tracing::debug!("Using file credential storage at {:?}", path);
            Ok(Box::new(FileStore::open(path)?))
        }
        StoreBackend::Keyring => {
            #[cfg(feature = "keyring-store")]
            match KeyringStore::try_new("ejournal") {
                Ok(store) => {
                    tracing::info!("Using OS keyring for credential storage");
                    return Ok(Box::new(store));
                }
                Err(e) => {
                    tracing::warn!("Keyring unavailable ({}), falling back to file store", e);
                }
            }

            #[cfg(not(feature = "keyring-store"))]
            tracing::warn!(
                "Keyring storage requested but keyring-store feature not enabled. \
                 Using file store."
            );

            create_store(&StoreBackend::File { path: None })
        }
    }
}
