//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::ApiError;
use crate::store::StoreBackend;

/// Environment variable that overrides [`ClientConfig::base_url`].
pub const API_URL_ENV: &str = "EJOURNAL_API_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8000/";

/// Configuration for an [`ApiClient`](crate::ApiClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the API; every request path is resolved against it.
    pub base_url: Url,

    /// Upper bound for a single API call, in milliseconds. Must be non-zero.
    #[serde(deserialize_with = "non_zero_millis")]
    pub request_timeout_ms: u64,

    /// Upper bound for a token refresh, in milliseconds. A refresh that takes
    /// longer fails and ends the session. Must be non-zero.
    #[serde(deserialize_with = "non_zero_millis")]
    pub refresh_timeout_ms: u64,

    /// Prefix of the persisted `access` / `refresh` keys.
    pub store_namespace: String,

    /// Where credentials are persisted.
    pub store: StoreBackend,

    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            request_timeout_ms: 60_000,
            refresh_timeout_ms: 30_000,
            store_namespace: "ejournal".to_string(),
            store: StoreBackend::default(),
            user_agent: format!("ejournal-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointing at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            ..Self::default()
        })
    }

    /// Apply overrides from the environment.
    pub fn with_env_overrides(mut self) -> Result<Self, ApiError> {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            tracing::debug!("Using API URL from {}", API_URL_ENV);
            self.base_url = parse_base_url(&url)?;
        }
        Ok(self)
    }

    /// Bound API calls by `timeout`, rounded up to whole milliseconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = to_millis(timeout);
        self
    }

    /// Bound refreshes by `timeout`, rounded up to whole milliseconds.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout_ms = to_millis(timeout);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms.max(1))
    }

    /// Resolve an API path against the base URL.
    ///
    /// Leading slashes are ignored, so `/upload/` and `upload/` address the
    /// same endpoint below the base path.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Config {
                message: format!("invalid request path {:?}: {}", path, e),
            })
    }
}

/// Whole milliseconds, at least one.
fn to_millis(timeout: Duration) -> u64 {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

fn non_zero_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    if millis == 0 {
        return Err(serde::de::Error::custom("timeout must be greater than zero"));
    }
    Ok(millis)
}

fn parse_base_url(url: &str) -> Result<Url, ApiError> {
    let parsed = Url::parse(url).map_err(|e| ApiError::Config {
        message: format!("invalid base URL {:?}: {}", url, e),
    })?;

    if parsed.cannot_be_a_base() {
        return Err(ApiError::Config {
            message: format!("base URL {:?} cannot have paths joined to it", url),
        });
    }

    Ok(parsed)
}
