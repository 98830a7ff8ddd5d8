//! Request dispatch.
//!
//! [`ApiClient`] sends [`RequestDescriptor`]s with the session's bearer
//! token, classifies failures, and recovers from an expired access token by
//! refreshing once through the [`RefreshCoordinator`] and replaying the call.
//! A logical call reaches the network at most twice.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ejournal_core::{ApiClient, ClientConfig, LogNotifier, MemoryStore, RequestOptions, Session};
//!
//! # async fn example() -> Result<(), ejournal_core::ApiError> {
//! let config = ClientConfig::new("https://ejournal.app/api/")?;
//! let session = Arc::new(Session::new(Arc::new(MemoryStore::new()), "ejournal"));
//! let client = ApiClient::new(config, session, Arc::new(LogNotifier))?;
//!
//! client.login("student", "hunter2").await?;
//! let courses = client.get("courses/", &[], RequestOptions::default()).await?;
//! println!("{}", courses.value()?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::classify::{Disposition, ErrorBody, apply_options, classify, error_for_status};
use crate::config::ClientConfig;
use crate::coordinator::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher};
use crate::credential::{Credential, LoginRequest, TokenPair, TokenState, VerifyRequest};
use crate::error::ApiError;
use crate::notify::{Navigation, Notifier, Toast};
use crate::request::{RequestBody, RequestDescriptor, RequestOptions};
use crate::session::Session;
use crate::store::Secret;

/// A successful API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,

    /// Identifier of the logical call, as recorded in logs.
    pub request_id: Uuid,
}

impl ApiResponse {
    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as a JSON value (`null` for an empty body).
    pub fn value(&self) -> Result<serde_json::Value, ApiError> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        self.json()
    }

    /// The `description` field of a JSON body, if present and non-empty.
    pub fn description(&self) -> Option<String> {
        ErrorBody::parse(&self.body).description.filter(|d| !d.is_empty())
    }
}

/// Why one attempt did not succeed.
#[derive(Debug)]
enum AttemptError {
    Status { status: u16, body: ErrorBody },
    Transport(reqwest::Error),
}

/// Client for the eJournal REST API.
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    session: Arc<Session>,
    coordinator: RefreshCoordinator,
    notifier: Arc<dyn Notifier>,
    open_calls: AtomicUsize,
}

impl ApiClient {
    /// Create a client that refreshes through the server's refresh endpoint.
    pub fn new(
        config: ClientConfig,
        session: Arc<Session>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let http = build_http_client(&config)?;
        let refresher = Arc::new(HttpTokenRefresher::new(
            http.clone(),
            config.endpoint("token/refresh/")?,
        ));
        Ok(Self::with_refresher(config, session, notifier, http, refresher))
    }

    /// Create a client with a custom refresh exchange.
    pub fn with_refresher(
        config: ClientConfig,
        session: Arc<Session>,
        notifier: Arc<dyn Notifier>,
        http: reqwest::Client,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            session.clone(),
            refresher,
            notifier.clone(),
            config.refresh_timeout(),
        );

        Self {
            http,
            config,
            session,
            coordinator,
            notifier,
            open_calls: AtomicUsize::new(0),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of calls currently in flight.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Obtain a token pair with username and password.
    ///
    /// Failures show an error toast but never redirect.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenState, ApiError> {
        let _call = OpenCall::enter(&self.open_calls);
        let response = self
            .http
            .post(self.config.endpoint("token/")?)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let body = ErrorBody::parse(&body);
            let error = error_for_status(status.as_u16(), &body);
            tracing::info!("Login for {} failed: {}", username, error);
            let message = body.message().unwrap_or("Could not log in.");
            self.notifier.toast(Toast::error(message));
            return Err(error);
        }

        let pair: TokenPair = serde_json::from_slice(&body)?;
        self.session.establish(Credential::from(pair)).await?;
        tracing::info!("Logged in as {}", username);

        Ok(self.session.state())
    }

    /// End the session. Safe to call when already logged out.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let was = self.session.state();
        self.session.teardown().await?;
        if was != TokenState::NoSession {
            tracing::info!("Logged out");
        }
        Ok(())
    }

    /// Check with the server whether the session can still authenticate.
    ///
    /// An expired access token is refreshed; `false` means there is no
    /// session or it could not be refreshed.
    pub async fn verify_session(&self) -> Result<bool, ApiError> {
        let Some(access) = self.session.access_token() else {
            return Ok(false);
        };

        let _call = OpenCall::enter(&self.open_calls);
        let response = self
            .http
            .post(self.config.endpoint("token/verify/")?)
            .json(&VerifyRequest {
                token: access.expose(),
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = ErrorBody::parse(&response.bytes().await?);
        if status.as_u16() == 401 && body.is_token_not_valid() {
            return match self.coordinator.ensure_valid_token(Some(&access)).await {
                Ok(()) => Ok(true),
                Err(failure) => {
                    tracing::debug!("Session could not be refreshed: {}", failure);
                    Ok(false)
                }
            };
        }

        Err(error_for_status(status.as_u16(), &body))
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let mut descriptor = RequestDescriptor::get(path).options(options);
        for (key, value) in query {
            descriptor = descriptor.query(*key, value);
        }
        self.send(&descriptor).await
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.send(&RequestDescriptor::post(path).json(body)?.options(options))
            .await
    }

    /// Same as [`post`](Self::post).
    pub async fn create<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.post(path, body, options).await
    }

    /// Same as [`patch`](Self::patch).
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.patch(path, body, options).await
    }

    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.send(&RequestDescriptor::patch(path).json(body)?.options(options))
            .await
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.send(&RequestDescriptor::put(path).json(body)?.options(options))
            .await
    }

    pub async fn delete(
        &self,
        path: &str,
        query: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let mut descriptor = RequestDescriptor::delete(path).options(options);
        for (key, value) in query {
            descriptor = descriptor.query(*key, value);
        }
        self.send(&descriptor).await
    }

    /// Upload a file as multipart form data (part name `file`).
    pub async fn upload_file(
        &self,
        path: &str,
        file_name: &str,
        content: Vec<u8>,
        fields: Vec<(String, String)>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.send(
            &RequestDescriptor::post(path)
                .file(file_name, content, fields)
                .options(options),
        )
        .await
    }

    /// Download raw bytes.
    pub async fn download_file(
        &self,
        path: &str,
        query: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<Vec<u8>, ApiError> {
        Ok(self.get(path, query, options).await?.body)
    }

    /// Send one logical call, refreshing and replaying once if the access
    /// token has expired.
    pub async fn send(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, ApiError> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "api_call",
            %request_id,
            method = %descriptor.method,
            path = %descriptor.path,
        );

        self.dispatch(descriptor, request_id).instrument(span).await
    }

    async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        request_id: Uuid,
    ) -> Result<ApiResponse, ApiError> {
        let _call = OpenCall::enter(&self.open_calls);
        let url = self.config.endpoint(&descriptor.path)?;
        let options = &descriptor.options;

        let sent_with = self.session.access_token();
        let failure = match self.attempt(descriptor, &url, sent_with.as_ref()).await {
            Ok(response) => return Ok(self.succeed(response, options, request_id)),
            Err(failure) => failure,
        };

        let disposition = classify_attempt(&failure);
        if disposition != Disposition::RetryAfterRefresh {
            return Err(self.fail(failure, disposition, options));
        }

        self.coordinator
            .ensure_valid_token(sent_with.as_ref())
            .await?;

        tracing::debug!("Replaying call after refresh");
        let retried_with = self.session.access_token();
        match self.attempt(descriptor, &url, retried_with.as_ref()).await {
            Ok(response) => Ok(self.succeed(response, options, request_id)),
            Err(failure) => match classify_attempt(&failure) {
                Disposition::RetryAfterRefresh => {
                    tracing::warn!("Refreshed access token rejected, not retrying again");
                    self.handle(apply_options(Disposition::RedirectToLogin, options));
                    Err(ApiError::TokenExpired)
                }
                disposition => Err(self.fail(failure, disposition, options)),
            },
        }
    }

    async fn attempt(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        token: Option<&Secret>,
    ) -> Result<ApiResponse, AttemptError> {
        let mut request = self.http.request(descriptor.method.clone(), url.clone());

        if !descriptor.query.is_empty() {
            request = request.query(&descriptor.query);
        }

        request = match &descriptor.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::File {
                file_name,
                content,
                fields,
            } => {
                let part =
                    reqwest::multipart::Part::bytes(content.clone()).file_name(file_name.clone());
                let form = fields
                    .iter()
                    .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                        form.text(key.clone(), value.clone())
                    })
                    .part("file", part);
                request.multipart(form)
            }
        };

        if let Some(token) = token {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await.map_err(AttemptError::Transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(AttemptError::Transport)?;
        tracing::debug!(status = status.as_u16(), "Response received");

        if status.is_success() {
            Ok(ApiResponse {
                status: status.as_u16(),
                body: body.to_vec(),
                request_id: Uuid::nil(),
            })
        } else {
            Err(AttemptError::Status {
                status: status.as_u16(),
                body: ErrorBody::parse(&body),
            })
        }
    }

    fn succeed(
        &self,
        mut response: ApiResponse,
        options: &RequestOptions,
        request_id: Uuid,
    ) -> ApiResponse {
        response.request_id = request_id;

        let from_response = if options.response_success_toast {
            response.description()
        } else {
            None
        };
        if let Some(message) = from_response.or_else(|| options.custom_success_toast.clone()) {
            self.notifier.toast(Toast::success(message));
        }

        response
    }

    fn fail(
        &self,
        failure: AttemptError,
        disposition: Disposition,
        options: &RequestOptions,
    ) -> ApiError {
        self.handle(apply_options(disposition, options));

        match failure {
            AttemptError::Status { status, body } => {
                tracing::debug!(status, "Call failed");
                error_for_status(status, &body)
            }
            AttemptError::Transport(e) => {
                tracing::debug!("Call failed without response: {}", e);
                ApiError::Transport(e)
            }
        }
    }

    fn handle(&self, disposition: Disposition) {
        match disposition {
            Disposition::RedirectToLogin => self.notifier.navigate(Navigation::Login),
            Disposition::RedirectToErrorPage {
                status,
                description,
            } => self.notifier.navigate(Navigation::ErrorPage {
                status,
                description,
            }),
            Disposition::ToastAndContinue { message } => {
                self.notifier.toast(Toast::error(message))
            }
            Disposition::RetryAfterRefresh | Disposition::Propagate => {}
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("session", &self.session)
            .field("open_calls", &self.open_calls())
            .finish()
    }
}

fn classify_attempt(failure: &AttemptError) -> Disposition {
    match failure {
        AttemptError::Status { status, body } => classify(Some(*status), body),
        AttemptError::Transport(_) => classify(None, &ErrorBody::default()),
    }
}

fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ApiError::Config {
            message: format!("failed to build HTTP client: {}", e),
        })
}

/// Keeps [`ApiClient::open_calls`] accurate on every exit path.
struct OpenCall<'a>(&'a AtomicUsize);

impl<'a> OpenCall<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_call_guard() {
        let counter = AtomicUsize::new(0);
        {
            let _a = OpenCall::enter(&counter);
            let _b = OpenCall::enter(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_response_helpers() {
        let response = ApiResponse {
            status: 200,
            body: br#"{"description": "Saved", "entry": {"id": 3}}"#.to_vec(),
            request_id: Uuid::nil(),
        };

        assert_eq!(response.description(), Some("Saved".to_string()));
        assert_eq!(response.value().unwrap()["entry"]["id"], 3);

        let empty = ApiResponse {
            status: 204,
            body: Vec::new(),
            request_id: Uuid::nil(),
        };
        assert_eq!(empty.value().unwrap(), serde_json::Value::Null);
        assert_eq!(empty.description(), None);
    }
}
