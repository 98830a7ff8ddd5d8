//! Refresh coordination.
//!
//! [`RefreshCoordinator::ensure_valid_token`] is called by every request that
//! was rejected with `token_not_valid`. The first such caller becomes the
//! leader and performs the refresh; callers arriving while it is in flight
//! queue a waiter on the session and receive the leader's outcome. Exactly
//! one refresh call is made per expiry, and all callers sharing it observe
//! the same result.
//!
//! Every refresh is bounded by the configured timeout. A refresh that fails
//! for any reason ends the session: the credential is cleared, one error
//! toast and one navigation to the login page are emitted, and every waiter
//! is rejected with the same [`RefreshFailure`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::classify::ErrorBody;
use crate::credential::{RefreshRequest, RefreshResponse};
use crate::error::RefreshFailure;
use crate::notify::{Navigation, Notifier, Toast};
use crate::session::{RefreshTicket, Session, Waiter};
use crate::store::Secret;

/// Message shown when a failed refresh logs the user out.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Exchange of a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &Secret) -> Result<RefreshResponse, RefreshFailure>;
}

/// [`TokenRefresher`] that posts to the `token/refresh/` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    url: Url,
}

impl HttpTokenRefresher {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &Secret) -> Result<RefreshResponse, RefreshFailure> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&RefreshRequest {
                refresh: refresh_token.expose(),
            })
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| RefreshFailure::Transport {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let error = ErrorBody::parse(&body);
            return Err(RefreshFailure::Rejected {
                status: status.as_u16(),
                description: error
                    .message()
                    .unwrap_or("refresh token rejected")
                    .to_string(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| RefreshFailure::Transport {
            message: format!("invalid refresh response: {}", e),
        })
    }
}

/// Ensures a single in-flight refresh shared by all concurrent callers.
pub struct RefreshCoordinator {
    session: Arc<Session>,
    refresher: Arc<dyn TokenRefresher>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<Session>,
        refresher: Arc<dyn TokenRefresher>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            refresher,
            notifier,
            timeout,
        }
    }

    /// Make sure the session holds an access token other than `rejected`.
    ///
    /// `rejected` is the token the failed call was sent with (`None` if it
    /// was sent without one). Returns once a usable token is in place, or
    /// with the refresh failure that ended the session.
    pub async fn ensure_valid_token(&self, rejected: Option<&Secret>) -> Result<(), RefreshFailure> {
        let refresh_token = match self.session.begin_refresh(rejected) {
            RefreshTicket::AlreadyRefreshed => {
                tracing::debug!("Access token already replaced, skipping refresh");
                return Ok(());
            }
            RefreshTicket::Wait(rx) => {
                tracing::debug!("Refresh in flight, waiting for its outcome");
                return rx.await.unwrap_or(Err(RefreshFailure::Cancelled));
            }
            RefreshTicket::Ended => {
                tracing::debug!("Session already ended, not refreshing");
                return Err(RefreshFailure::SessionEnded);
            }
            RefreshTicket::Lead(refresh_token) => refresh_token,
        };

        let mut guard = LeaderGuard {
            session: &self.session,
            armed: true,
        };

        tracing::info!("Access token rejected, refreshing");
        let outcome = match refresh_token {
            None => Err(RefreshFailure::MissingRefreshToken),
            Some(token) => {
                match tokio::time::timeout(self.timeout, self.refresher.refresh(&token)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RefreshFailure::TimedOut {
                        timeout: self.timeout,
                    }),
                }
            }
        };
        guard.armed = false;

        match outcome {
            Ok(response) => self.settle_success(response).await,
            Err(failure) => {
                self.settle_failure(self.session.fail_refresh(), failure.clone())
                    .await;
                Err(failure)
            }
        }
    }

    async fn settle_success(&self, response: RefreshResponse) -> Result<(), RefreshFailure> {
        match self.session.complete_refresh(response.access, response.refresh) {
            Ok((credential, waiters)) => {
                tracing::info!(waiters = waiters.len(), "Access token refreshed");
                settle(waiters, Ok(()));

                if let Err(e) = self.session.persist(&credential).await {
                    tracing::warn!("Failed to persist refreshed token: {}", e);
                }
                Ok(())
            }
            Err(waiters) => {
                tracing::info!("Session ended during refresh, discarding new token");
                settle(waiters, Err(RefreshFailure::SessionEnded));
                Err(RefreshFailure::SessionEnded)
            }
        }
    }

    async fn settle_failure(&self, waiters: Vec<Waiter>, failure: RefreshFailure) {
        tracing::warn!(waiters = waiters.len(), "Token refresh failed: {}", failure);
        settle(waiters, Err(failure));

        if let Err(e) = self.session.clear_persisted().await {
            tracing::warn!("Failed to clear persisted credential: {}", e);
        }

        self.notifier.toast(Toast::error(SESSION_EXPIRED_MESSAGE));
        self.notifier.navigate(Navigation::Login);
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Settles waiters if the leading call is dropped mid-refresh.
struct LeaderGuard<'a> {
    session: &'a Session,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let waiters = self.session.cancel_refresh();
            tracing::warn!(waiters = waiters.len(), "Refresh leader cancelled");
            settle(waiters, Err(RefreshFailure::Cancelled));
        }
    }
}

fn settle(waiters: Vec<Waiter>, outcome: Result<(), RefreshFailure>) {
    for waiter in waiters {
        // A dropped receiver means that caller was cancelled.
        let _ = waiter.send(outcome.clone());
    }
}
