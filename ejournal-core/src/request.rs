//! Request descriptors and per-call options.
//!
//! A [`RequestDescriptor`] is an immutable description of one logical call.
//! The dispatcher may build the wire request from it twice (original and
//! replay after a refresh), so bodies are kept as owned data rather than as
//! one-shot `reqwest` bodies.

use reqwest::Method;
use serde::Serialize;

use crate::error::ApiError;

/// Per-call behaviour when a call succeeds or fails.
///
/// The default matches what most screens want: redirect on auth/permission
/// errors, show the default error toast, no success toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Navigate to the login or error page on 401/403/404/500.
    pub redirect: bool,

    /// Show an error toast for failures that call for one.
    pub error_toast: bool,

    /// Message to show instead of the server's description on error.
    pub custom_error_toast: Option<String>,

    /// Message to show on success.
    pub custom_success_toast: Option<String>,

    /// Show the response body's `description` as a success toast.
    pub response_success_toast: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            redirect: true,
            error_toast: true,
            custom_error_toast: None,
            custom_success_toast: None,
            response_success_toast: false,
        }
    }
}

impl RequestOptions {
    /// No redirects and no toasts; the caller handles every outcome.
    pub fn quiet() -> Self {
        Self {
            redirect: false,
            error_toast: false,
            ..Self::default()
        }
    }

    pub fn with_redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_error_toast(mut self, error_toast: bool) -> Self {
        self.error_toast = error_toast;
        self
    }

    pub fn with_custom_error_toast(mut self, message: impl Into<String>) -> Self {
        self.custom_error_toast = Some(message.into());
        self
    }

    pub fn with_custom_success_toast(mut self, message: impl Into<String>) -> Self {
        self.custom_success_toast = Some(message.into());
        self
    }

    pub fn with_response_success_toast(mut self, enabled: bool) -> Self {
        self.response_success_toast = enabled;
        self
    }
}

/// Body of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,

    /// JSON document.
    Json(serde_json::Value),

    /// Multipart form with a single file part named `file`.
    File {
        file_name: String,
        content: Vec<u8>,
        fields: Vec<(String, String)>,
    },
}

/// One logical API call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,

    /// Path relative to the API base URL, e.g. `courses/3/`.
    pub path: String,

    pub query: Vec<(String, String)>,

    pub body: RequestBody,

    pub options: RequestOptions,
}

impl RequestDescriptor {
    /// Create a descriptor with no query, no body and default options.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Set a JSON body from any serializable value.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Set a multipart file body.
    pub fn file(
        mut self,
        file_name: impl Into<String>,
        content: Vec<u8>,
        fields: Vec<(String, String)>,
    ) -> Self {
        self.body = RequestBody::File {
            file_name: file_name.into(),
            content,
            fields,
        };
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}
