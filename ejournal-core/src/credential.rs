//! Credentials and the token state machine.
//!
//! This module provides:
//! - [`Credential`] - The access/refresh token pair held by a session
//! - [`TokenState`] - Whether the session can currently authenticate calls
//! - Wire types for the `/token/` endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Secret;

/// The token pair held by a logged-in session.
///
/// Both values are opaque to the client. The access token is short-lived and
/// presented on every call; the refresh token is exchanged for a new access
/// token when the server reports the old one as no longer valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// The current access token.
    pub access: Secret,

    /// The refresh token, if one is held.
    pub refresh: Option<Secret>,

    /// When the access token was obtained (login or last refresh).
    pub obtained_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential with both tokens.
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access),
            refresh: Some(Secret::new(refresh)),
            obtained_at: Utc::now(),
        }
    }

    /// Create a credential that cannot be refreshed.
    pub fn access_only(access: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access),
            refresh: None,
            obtained_at: Utc::now(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access.expose())
    }
}

impl From<TokenPair> for Credential {
    fn from(pair: TokenPair) -> Self {
        Self {
            access: pair.access,
            refresh: Some(pair.refresh),
            obtained_at: Utc::now(),
        }
    }
}

/// Session token state.
///
/// ```text
/// NoSession --login--> Session --token_not_valid--> Refreshing
///     ^                   ^                             |
///     |                   +-------- refresh ok ---------+
///     +------------------------- refresh failed --------+
/// ```
///
/// `NoSession` is also reached from any state through logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// No credential is held.
    NoSession,

    /// An access token is held and assumed valid.
    Session,

    /// A refresh is in flight; calls that need a token wait for it.
    Refreshing,
}

impl TokenState {
    /// Get the state as a string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::NoSession => "no_session",
            TokenState::Session => "session",
            TokenState::Refreshing => "refreshing",
        }
    }
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /token/`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Response of `POST /token/`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access: Secret,
    pub refresh: Secret,
}

/// Body of `POST /token/refresh/`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Response of `POST /token/refresh/`.
///
/// Servers that rotate refresh tokens also return a new `refresh` value.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: Secret,
    #[serde(default)]
    pub refresh: Option<Secret>,
}

/// Body of `POST /token/verify/`.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest<'a> {
    pub token: &'a str,
}
