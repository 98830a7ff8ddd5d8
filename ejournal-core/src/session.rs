//! Session state.
//!
//! A [`Session`] owns the [`Credential`] and the pending-refresh queue. It
//! is created once per application, shared by `Arc` with the dispatcher and
//! the refresh coordinator, and mutated only by login, logout and refresh
//! outcomes.
//!
//! In-memory state sits behind a `parking_lot::Mutex` that is never held
//! across an `.await`. Persistence happens after the in-memory transition,
//! so concurrent calls observe a new token before it has reached disk.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::credential::{Credential, TokenState};
use crate::error::RefreshFailure;
use crate::store::{Secret, SecretStore, StoreError};

/// Continuation of a call waiting on a refresh.
pub(crate) type Waiter = oneshot::Sender<Result<(), RefreshFailure>>;

/// The refresh currently in flight.
#[derive(Debug)]
struct PendingRefresh {
    waiters: Vec<Waiter>,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct SessionInner {
    credential: Option<Credential>,
    pending: Option<PendingRefresh>,
}

/// Outcome of asking to refresh after a rejected access token.
#[derive(Debug)]
pub(crate) enum RefreshTicket {
    /// The caller must perform the refresh with this refresh token.
    Lead(Option<Secret>),

    /// Another caller is refreshing; await the shared outcome.
    Wait(oneshot::Receiver<Result<(), RefreshFailure>>),

    /// The rejected token has already been replaced.
    AlreadyRefreshed,

    /// No session is held any more: a failed refresh or a logout already
    /// ended it.
    Ended,
}

/// Process-wide authentication state.
pub struct Session {
    store: Arc<dyn SecretStore>,
    namespace: String,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Create an empty session backed by `store`.
    ///
    /// Tokens are persisted as `{namespace}/access` and `{namespace}/refresh`.
    pub fn new(store: Arc<dyn SecretStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    /// Restore persisted tokens.
    ///
    /// Returns the resulting state: `Session` when an access token was
    /// found, `NoSession` otherwise.
    pub async fn init(&self) -> Result<TokenState, StoreError> {
        let access = self.store.get(&self.key("access")).await?;
        let refresh = self.store.get(&self.key("refresh")).await?;

        let mut inner = self.inner.lock();
        inner.credential = access.map(|access| Credential {
            access,
            refresh,
            obtained_at: chrono::Utc::now(),
        });

        let state = Self::state_of(&inner);
        tracing::debug!("Session initialised from store: {}", state);
        Ok(state)
    }

    /// Install a freshly obtained credential (after login).
    pub async fn establish(&self, credential: Credential) -> Result<(), StoreError> {
        self.inner.lock().credential = Some(credential.clone());
        self.persist(&credential).await
    }

    /// Store a refreshed access token, keeping the refresh token.
    ///
    /// Returns `false` without effect when no session is held.
    pub async fn replace_access(&self, access: Secret) -> Result<bool, StoreError> {
        let credential = {
            let mut inner = self.inner.lock();
            let Some(credential) = inner.credential.as_mut() else {
                return Ok(false);
            };
            credential.access = access;
            credential.obtained_at = chrono::Utc::now();
            credential.clone()
        };

        self.persist(&credential).await?;
        Ok(true)
    }

    /// Forget the credential in memory and in the store.
    ///
    /// Safe to call when no session is held.
    pub async fn teardown(&self) -> Result<(), StoreError> {
        self.inner.lock().credential = None;
        self.clear_persisted().await
    }

    /// Current token state.
    pub fn state(&self) -> TokenState {
        Self::state_of(&self.inner.lock())
    }

    /// The current credential, if any.
    pub fn credential(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    /// The current access token, if any.
    pub fn access_token(&self) -> Option<Secret> {
        self.inner
            .lock()
            .credential
            .as_ref()
            .map(|c| c.access.clone())
    }

    /// The current refresh token, if any.
    pub fn refresh_token(&self) -> Option<Secret> {
        self.inner
            .lock()
            .credential
            .as_ref()
            .and_then(|c| c.refresh.clone())
    }

    /// Number of calls waiting on the pending refresh.
    pub fn queued_waiters(&self) -> usize {
        self.inner
            .lock()
            .pending
            .as_ref()
            .map_or(0, |p| p.waiters.len())
    }

    /// Decide, atomically, who refreshes after `rejected` was refused.
    pub(crate) fn begin_refresh(&self, rejected: Option<&Secret>) -> RefreshTicket {
        let mut inner = self.inner.lock();

        if let Some(pending) = inner.pending.as_mut() {
            let (tx, rx) = oneshot::channel();
            pending.waiters.push(tx);
            return RefreshTicket::Wait(rx);
        }

        let Some(current) = inner.credential.as_ref() else {
            return RefreshTicket::Ended;
        };
        let superseded = match rejected {
            Some(rejected) => current.access != *rejected,
            None => true,
        };
        if superseded {
            return RefreshTicket::AlreadyRefreshed;
        }

        let refresh = current.refresh.clone();
        inner.pending = Some(PendingRefresh {
            waiters: Vec::new(),
            started_at: Instant::now(),
        });
        RefreshTicket::Lead(refresh)
    }

    /// Install a refreshed access token and hand back the queued waiters.
    ///
    /// Fails with the waiters when the session was torn down mid-refresh;
    /// the new token is then discarded.
    pub(crate) fn complete_refresh(
        &self,
        access: Secret,
        refresh: Option<Secret>,
    ) -> Result<(Credential, Vec<Waiter>), Vec<Waiter>> {
        let mut inner = self.inner.lock();
        let waiters = Self::take_waiters(&mut inner);

        match inner.credential.as_mut() {
            Some(credential) => {
                credential.access = access;
                if refresh.is_some() {
                    credential.refresh = refresh;
                }
                credential.obtained_at = chrono::Utc::now();
                Ok((credential.clone(), waiters))
            }
            None => Err(waiters),
        }
    }

    /// End the session after a failed refresh and hand back the waiters.
    pub(crate) fn fail_refresh(&self) -> Vec<Waiter> {
        let mut inner = self.inner.lock();
        inner.credential = None;
        Self::take_waiters(&mut inner)
    }

    /// Drop the pending refresh without touching the credential.
    pub(crate) fn cancel_refresh(&self) -> Vec<Waiter> {
        Self::take_waiters(&mut self.inner.lock())
    }

    pub(crate) async fn persist(&self, credential: &Credential) -> Result<(), StoreError> {
        self.store.set(&self.key("access"), &credential.access).await?;
        match &credential.refresh {
            Some(refresh) => self.store.set(&self.key("refresh"), refresh).await,
            None => self.store.delete(&self.key("refresh")).await,
        }
    }

    pub(crate) async fn clear_persisted(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key("access")).await?;
        self.store.delete(&self.key("refresh")).await
    }

    fn take_waiters(inner: &mut SessionInner) -> Vec<Waiter> {
        match inner.pending.take() {
            Some(pending) => {
                tracing::debug!(
                    waiters = pending.waiters.len(),
                    elapsed_ms = pending.started_at.elapsed().as_millis() as u64,
                    "Refresh settled"
                );
                pending.waiters
            }
            None => Vec::new(),
        }
    }

    fn state_of(inner: &SessionInner) -> TokenState {
        match (&inner.credential, &inner.pending) {
            (None, _) => TokenState::NoSession,
            (Some(_), Some(_)) => TokenState::Refreshing,
            (Some(_), None) => TokenState::Session,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("namespace", &self.namespace)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn session_with(store: Arc<MemoryStore>) -> Session {
        Session::new(store, "test")
    }

    #[tokio::test]
    async fn test_new_session_has_no_credential() {
        let session = session_with(Arc::new(MemoryStore::new()));
        assert_eq!(session.state(), TokenState::NoSession);
        assert!(session.access_token().is_none());
    }

    #[tokio::test]
    async fn test_establish_persists_both_tokens() {
        let store = Arc::new(MemoryStore::new());
        let session = session_with(store.clone());

        session.establish(Credential::new("a1", "r1")).await.unwrap();

        assert_eq!(session.state(), TokenState::Session);
        assert_eq!(
            store.get("test/access").await.unwrap(),
            Some(Secret::new("a1"))
        );
        assert_eq!(
            store.get("test/refresh").await.unwrap(),
            Some(Secret::new("r1"))
        );
    }

    #[tokio::test]
    async fn test_init_restores_persisted_tokens() {
        let store = Arc::new(MemoryStore::new());
        session_with(store.clone())
            .establish(Credential::new("a1", "r1"))
            .await
            .unwrap();

        let restored = session_with(store);
        assert_eq!(restored.init().await.unwrap(), TokenState::Session);
        assert_eq!(restored.access_token(), Some(Secret::new("a1")));
        assert_eq!(restored.refresh_token(), Some(Secret::new("r1")));
    }

    #[tokio::test]
    async fn test_init_without_tokens() {
        let session = session_with(Arc::new(MemoryStore::new()));
        assert_eq!(session.init().await.unwrap(), TokenState::NoSession);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let session = session_with(store.clone());
        session.establish(Credential::new("a1", "r1")).await.unwrap();

        session.teardown().await.unwrap();
        session.teardown().await.unwrap();

        assert_eq!(session.state(), TokenState::NoSession);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_replace_access_keeps_refresh_token() {
        let store = Arc::new(MemoryStore::new());
        let session = session_with(store.clone());
        assert!(!session.replace_access(Secret::new("a0")).await.unwrap());

        session.establish(Credential::new("a1", "r1")).await.unwrap();
        assert!(session.replace_access(Secret::new("a2")).await.unwrap());

        assert_eq!(session.access_token(), Some(Secret::new("a2")));
        assert_eq!(session.refresh_token(), Some(Secret::new("r1")));
        assert_eq!(
            store.get("test/access").await.unwrap(),
            Some(Secret::new("a2"))
        );
    }

    #[tokio::test]
    async fn test_single_leader_then_waiters() {
        let session = session_with(Arc::new(MemoryStore::new()));
        session.establish(Credential::new("old", "r1")).await.unwrap();
        let rejected = Secret::new("old");

        let first = session.begin_refresh(Some(&rejected));
        assert!(matches!(first, RefreshTicket::Lead(Some(_))));
        assert_eq!(session.state(), TokenState::Refreshing);

        let second = session.begin_refresh(Some(&rejected));
        let third = session.begin_refresh(Some(&rejected));
        assert!(matches!(second, RefreshTicket::Wait(_)));
        assert!(matches!(third, RefreshTicket::Wait(_)));
        assert_eq!(session.queued_waiters(), 2);

        let (credential, waiters) = session
            .complete_refresh(Secret::new("new"), None)
            .unwrap();
        assert_eq!(waiters.len(), 2);
        assert_eq!(credential.access.expose(), "new");
        assert_eq!(credential.refresh, Some(Secret::new("r1")));
        assert_eq!(session.state(), TokenState::Session);
        assert_eq!(session.queued_waiters(), 0);
    }

    #[tokio::test]
    async fn test_superseded_token_skips_refresh() {
        let session = session_with(Arc::new(MemoryStore::new()));
        session.establish(Credential::new("new", "r1")).await.unwrap();

        let ticket = session.begin_refresh(Some(&Secret::new("old")));
        assert!(matches!(ticket, RefreshTicket::AlreadyRefreshed));
        assert_eq!(session.state(), TokenState::Session);
    }

    #[tokio::test]
    async fn test_rejection_after_session_ended_does_not_lead() {
        let session = session_with(Arc::new(MemoryStore::new()));
        session.establish(Credential::new("old", "r1")).await.unwrap();

        let _lead = session.begin_refresh(Some(&Secret::new("old")));
        session.fail_refresh();

        let late = session.begin_refresh(Some(&Secret::new("old")));
        assert!(matches!(late, RefreshTicket::Ended));
        assert_eq!(session.state(), TokenState::NoSession);

        let unauthenticated = session_with(Arc::new(MemoryStore::new()));
        assert!(matches!(
            unauthenticated.begin_refresh(None),
            RefreshTicket::Ended
        ));
    }

    #[tokio::test]
    async fn test_fail_refresh_clears_credential() {
        let session = session_with(Arc::new(MemoryStore::new()));
        session.establish(Credential::new("old", "r1")).await.unwrap();

        let _lead = session.begin_refresh(Some(&Secret::new("old")));
        let _wait = session.begin_refresh(Some(&Secret::new("old")));

        let waiters = session.fail_refresh();
        assert_eq!(waiters.len(), 1);
        assert_eq!(session.state(), TokenState::NoSession);
    }

    #[tokio::test]
    async fn test_complete_after_teardown_discards_token() {
        let session = session_with(Arc::new(MemoryStore::new()));
        session.establish(Credential::new("old", "r1")).await.unwrap();

        let _lead = session.begin_refresh(Some(&Secret::new("old")));
        session.teardown().await.unwrap();
        assert_eq!(session.state(), TokenState::NoSession);

        assert!(session.complete_refresh(Secret::new("new"), None).is_err());
        assert_eq!(session.state(), TokenState::NoSession);
    }
}
