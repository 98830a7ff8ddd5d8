//! Top-level error types for the eJournal client.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Why a token refresh did not produce a new access token.
///
/// One refresh outcome is shared by every call that waited on it, so this
/// type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    /// The session holds no refresh token.
    #[error("no refresh token is held")]
    MissingRefreshToken,

    /// The refresh endpoint answered with an error status.
    #[error("refresh token rejected ({status}): {description}")]
    Rejected { status: u16, description: String },

    /// The refresh endpoint could not be reached or answered garbage.
    #[error("refresh request failed: {message}")]
    Transport { message: String },

    /// The refresh did not settle within the configured bound.
    #[error("refresh did not complete within {timeout:?}")]
    TimedOut { timeout: Duration },

    /// The task driving the refresh was dropped before it settled.
    #[error("refresh was cancelled before it completed")]
    Cancelled,

    /// The session was torn down while the refresh was in flight.
    #[error("session ended while the refresh was in flight")]
    SessionEnded,
}

impl RefreshFailure {
    /// Whether this failure ended the session.
    ///
    /// A cancelled refresh leaves the credential in place so a later call
    /// can try again.
    pub fn terminates_session(&self) -> bool {
        !matches!(self, RefreshFailure::Cancelled)
    }
}

/// Error type for API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the access token and a replay after a refresh
    /// was rejected as well.
    #[error("access token is no longer valid")]
    TokenExpired,

    /// The access token could not be refreshed; the session is over.
    #[error("session expired: {0}")]
    RefreshFailed(#[from] RefreshFailure),

    /// 401 without an expired-token signal.
    #[error("not authenticated: {description}")]
    Unauthenticated { description: String },

    /// 403, 404 or 500.
    #[error("request denied ({status}): {description}")]
    AuthorizationDenied { status: u16, description: String },

    /// 400.
    #[error("request rejected: {description}")]
    ValidationRejected { description: String },

    /// Any other non-success status.
    #[error("unexpected status {status}: {description}")]
    Http { status: u16, description: String },

    /// No response was received.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Credential persistence failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A request or response body could not be (de)serialized.
    #[error("could not decode body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The client is misconfigured.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ApiError {
    /// HTTP status carried by this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::TokenExpired | ApiError::Unauthenticated { .. } => Some(401),
            ApiError::AuthorizationDenied { status, .. } | ApiError::Http { status, .. } => {
                Some(*status)
            }
            ApiError::ValidationRejected { .. } => Some(400),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the session was terminated as part of this failure.
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, ApiError::RefreshFailed(f) if f.terminates_session())
    }
}
