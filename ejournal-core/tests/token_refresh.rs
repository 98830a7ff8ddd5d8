//! Integration tests for the refresh-and-replay protocol.
//!
//! These tests verify that the ApiClient:
//! - Makes exactly one refresh call for any number of concurrent expired calls
//! - Replays every deferred call with the new token when the refresh succeeds
//! - Rejects every deferred call and ends the session when it fails
//! - Never sends a logical call more than twice

use std::sync::Arc;
use std::time::Duration;

use ejournal_core::{
    ApiClient, ApiError, ClientConfig, ChannelNotifier, Credential, MemoryStore, Navigation,
    RefreshFailure, RequestOptions, Secret, SecretStore, Session, Toast, TokenState, UiEvent,
    coordinator::SESSION_EXPIRED_MESSAGE,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

struct Harness {
    client: Arc<ApiClient>,
    session: Arc<Session>,
    store: Arc<MemoryStore>,
    events: UnboundedReceiver<UiEvent>,
}

impl Harness {
    fn drain_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Client against `server` with a session holding `old-access`/`refresh-token`.
async fn setup(server: &MockServer) -> Harness {
    let config = ClientConfig::new(&format!("{}/", server.uri()))
        .unwrap()
        .with_refresh_timeout(Duration::from_secs(5));

    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(Session::new(store.clone(), "ejournal"));
    session
        .establish(Credential::new("old-access", "refresh-token"))
        .await
        .unwrap();

    let (notifier, events) = ChannelNotifier::new();
    let client = ApiClient::new(config, session.clone(), Arc::new(notifier)).unwrap();

    Harness {
        client: Arc::new(client),
        session,
        store,
        events,
    }
}

fn token_not_valid() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({
        "detail": "Given token not valid for any token type",
        "code": "token_not_valid",
        "messages": [{"token_class": "AccessToken", "token_type": "access", "message": "Token is invalid or expired"}]
    }))
}

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .and(body_json(json!({"refresh": "refresh-token"})))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_token_refreshes_once_and_replays() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(token_not_valid())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/courses/"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "description": "",
            "courses": [{"id": 1, "name": "Portfolio Academische Vaardigheden"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access": "new-access"})),
        1,
    )
    .await;

    let mut harness = setup(&server).await;

    let response = harness
        .client
        .get("courses/", &[], RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.value().unwrap()["courses"][0]["id"], 1);
    assert_eq!(harness.session.state(), TokenState::Session);
    assert_eq!(
        harness.store.get("ejournal/access").await.unwrap(),
        Some(Secret::new("new-access"))
    );
    assert_eq!(
        harness.store.get("ejournal/refresh").await.unwrap(),
        Some(Secret::new("refresh-token"))
    );
    assert!(harness.drain_events().is_empty());
    assert_eq!(harness.client.open_calls(), 0);
}

#[tokio::test]
async fn test_five_concurrent_calls_share_one_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/journals/"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(token_not_valid())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/journals/"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"journals": []})))
        .expect(5)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"access": "new-access"}))
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let mut harness = setup(&server).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let client = harness.client.clone();
        tasks.spawn(async move {
            client
                .get("journals/", &[], RequestOptions::default())
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        let response = result.unwrap().unwrap();
        assert_eq!(response.value().unwrap()["journals"], json!([]));
    }

    assert_eq!(harness.session.access_token(), Some(Secret::new("new-access")));
    assert_eq!(harness.session.queued_waiters(), 0);
    assert!(harness.drain_events().is_empty());
    assert_eq!(harness.client.open_calls(), 0);
}

#[tokio::test]
async fn test_refresh_rejected_fails_all_pending_calls() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assignments/"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(token_not_valid())
        .expect(3)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401)
            .set_body_json(json!({
                "detail": "Token is invalid or expired",
                "code": "token_not_valid"
            }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;

    let mut harness = setup(&server).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..3 {
        let client = harness.client.clone();
        tasks.spawn(async move {
            client
                .get("assignments/", &[], RequestOptions::default())
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Err(ApiError::RefreshFailed(RefreshFailure::Rejected { status, description })) => {
                assert_eq!(status, 401);
                assert_eq!(description, "Token is invalid or expired");
            }
            other => panic!("Expected RefreshFailed, got {:?}", other),
        }
    }

    assert_eq!(harness.session.state(), TokenState::NoSession);
    assert!(harness.store.is_empty());
    assert_eq!(
        harness.drain_events(),
        vec![
            UiEvent::Toast(Toast::error(SESSION_EXPIRED_MESSAGE)),
            UiEvent::Navigate(Navigation::Login),
        ]
    );
}

#[tokio::test]
async fn test_late_rejection_after_failed_refresh_does_not_log_out_again() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/"))
        .respond_with(token_not_valid())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/grades/"))
        .respond_with(token_not_valid().set_delay(Duration::from_millis(400)))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Token is invalid or expired",
            "code": "token_not_valid"
        })),
        1,
    )
    .await;

    let mut harness = setup(&server).await;

    let slow = {
        let client = harness.client.clone();
        tokio::spawn(async move {
            client
                .get("grades/", &[], RequestOptions::default())
                .await
        })
    };
    let fast = harness
        .client
        .get("courses/", &[], RequestOptions::default())
        .await;

    assert!(matches!(
        fast,
        Err(ApiError::RefreshFailed(RefreshFailure::Rejected { status: 401, .. }))
    ));
    assert!(matches!(
        slow.await.unwrap(),
        Err(ApiError::RefreshFailed(RefreshFailure::SessionEnded))
    ));

    assert_eq!(harness.session.state(), TokenState::NoSession);
    assert_eq!(
        harness.drain_events(),
        vec![
            UiEvent::Toast(Toast::error(SESSION_EXPIRED_MESSAGE)),
            UiEvent::Navigate(Navigation::Login),
        ]
    );
}

#[tokio::test]
async fn test_replay_is_not_retried_a_second_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/nodes/"))
        .respond_with(token_not_valid())
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access": "new-access"})),
        1,
    )
    .await;

    let mut harness = setup(&server).await;

    let result = harness
        .client
        .get("nodes/", &[("journal_id", "3")], RequestOptions::default())
        .await;

    assert!(matches!(result, Err(ApiError::TokenExpired)));
    assert_eq!(
        harness.drain_events(),
        vec![UiEvent::Navigate(Navigation::Login)]
    );
}

#[tokio::test]
async fn test_refresh_rotation_is_persisted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/0/"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(token_not_valid())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/0/"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"id": 1}})))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"access": "new-access", "refresh": "rotated-refresh"})),
        1,
    )
    .await;

    let harness = setup(&server).await;

    harness
        .client
        .get("users/0/", &[], RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(
        harness.session.refresh_token(),
        Some(Secret::new("rotated-refresh"))
    );
    assert_eq!(
        harness.store.get("ejournal/refresh").await.unwrap(),
        Some(Secret::new("rotated-refresh"))
    );
}

#[tokio::test]
async fn test_hung_refresh_forces_logout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses/"))
        .respond_with(token_not_valid())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "too-late"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = ClientConfig::new(&format!("{}/", server.uri()))
        .unwrap()
        .with_refresh_timeout(Duration::from_secs(1));
    let session = Arc::new(Session::new(Arc::new(MemoryStore::new()), "ejournal"));
    session
        .establish(Credential::new("old-access", "refresh-token"))
        .await
        .unwrap();
    let (notifier, mut events) = ChannelNotifier::new();
    let client = ApiClient::new(config, session.clone(), Arc::new(notifier)).unwrap();

    let result = client
        .get("courses/", &[], RequestOptions::default())
        .await;

    assert!(matches!(
        result,
        Err(ApiError::RefreshFailed(RefreshFailure::TimedOut { .. }))
    ));
    assert_eq!(session.state(), TokenState::NoSession);
    assert_eq!(
        events.try_recv().unwrap(),
        UiEvent::Toast(Toast::error(SESSION_EXPIRED_MESSAGE))
    );
    assert_eq!(events.try_recv().unwrap(), UiEvent::Navigate(Navigation::Login));
}

#[tokio::test]
async fn test_verify_session_refreshes_expired_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/verify/"))
        .and(body_json(json!({"token": "old-access"})))
        .respond_with(token_not_valid())
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access": "new-access"})),
        1,
    )
    .await;

    let harness = setup(&server).await;

    assert!(harness.client.verify_session().await.unwrap());
    assert_eq!(harness.session.access_token(), Some(Secret::new("new-access")));
}
