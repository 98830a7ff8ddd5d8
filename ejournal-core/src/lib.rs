//! # eJournal Core
//!
//! Authenticated access to the eJournal REST API.
//!
//! This crate provides:
//! - [`Session`] - The credential held by the client and its token state
//! - [`RefreshCoordinator`] - One shared token refresh for all concurrent callers
//! - [`ApiClient`] - Request dispatch with refresh-and-replay on expired tokens
//! - [`classify`](classify::classify) - Status-to-disposition mapping for failed calls
//! - Secret storage backends for persisting the credential
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ejournal_core::{ApiClient, ClientConfig, LogNotifier, Session, create_store};
//!
//! let config = ClientConfig::default().with_env_overrides()?;
//! let store = Arc::from(create_store(&config.store)?);
//! let session = Arc::new(Session::new(store, config.store_namespace.clone()));
//! session.init().await?;
//!
//! let client = ApiClient::new(config, session, Arc::new(LogNotifier))?;
//! let journals = client.get("journals/", &[("assignment_id", "7")], Default::default()).await?;
//! ```

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod request;
pub mod session;
pub mod store;

pub use reqwest::Method;

pub use classify::{Disposition, ErrorBody, TOKEN_NOT_VALID};

pub use config::ClientConfig;

pub use coordinator::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher};

pub use credential::{Credential, TokenState};

pub use dispatcher::{ApiClient, ApiResponse};

pub use error::{ApiError, RefreshFailure};

pub use notify::{ChannelNotifier, LogNotifier, Navigation, Notifier, Toast, ToastKind, UiEvent};

pub use request::{RequestBody, RequestDescriptor, RequestOptions};

pub use session::Session;

pub use store::{
    FileStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreBackend,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;
