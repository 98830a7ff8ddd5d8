//! Response classification.
//!
//! [`classify`] maps a failed call to a [`Disposition`] using the status
//! table below. [`apply_options`] then adjusts that decision for the
//! caller's [`RequestOptions`].
//!
//! | Status                         | Disposition              |
//! |--------------------------------|--------------------------|
//! | 401 with `token_not_valid`     | retry after refresh      |
//! | 401 otherwise                  | redirect to login        |
//! | 403, 404, 500                  | redirect to error page   |
//! | 400                            | toast and continue       |
//! | anything else, no response     | propagate                |

use serde::Deserialize;

use crate::error::ApiError;
use crate::request::RequestOptions;

/// Error code the JWT layer uses for an expired or otherwise invalid token.
pub const TOKEN_NOT_VALID: &str = "token_not_valid";

const DEFAULT_BAD_REQUEST: &str = "Your browser performed a bad request.";
const DEFAULT_UNAUTHORIZED: &str = "You are not authenticated.";
const DEFAULT_FORBIDDEN: &str = "You have no access to this page.";
const DEFAULT_NOT_FOUND: &str = "The page or file you requested was not found.";
const DEFAULT_SERVER_ERROR: &str = "Oops! The server experienced internal hiccups.";

/// Error body returned by the API.
///
/// eJournal views answer with `description`; the JWT layer answers with
/// `detail` and `code`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorBody {
    /// Parse a body leniently; anything that is not the expected JSON shape
    /// yields an empty body.
    pub fn parse(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_default()
    }

    /// Human-readable message, preferring `description` over `detail`.
    pub fn message(&self) -> Option<&str> {
        self.description
            .as_deref()
            .or(self.detail.as_deref())
            .filter(|m| !m.is_empty())
    }

    /// Whether the server reported the presented token as expired/invalid.
    pub fn is_token_not_valid(&self) -> bool {
        self.code.as_deref() == Some(TOKEN_NOT_VALID)
    }
}

/// What the dispatcher should do with a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Refresh the access token, then replay the call once.
    RetryAfterRefresh,

    /// Send the user to the login page.
    RedirectToLogin,

    /// Send the user to the error page.
    RedirectToErrorPage { status: u16, description: String },

    /// Show an error toast; the call is still rejected.
    ToastAndContinue { message: String },

    /// Return the error without any UI side effect.
    Propagate,
}

/// Classify a failed call by status and body.
///
/// `status` is `None` when no response was received.
pub fn classify(status: Option<u16>, body: &ErrorBody) -> Disposition {
    let Some(status) = status else {
        return Disposition::Propagate;
    };

    match status {
        401 if body.is_token_not_valid() => Disposition::RetryAfterRefresh,
        401 => Disposition::RedirectToLogin,
        403 | 404 | 500 => Disposition::RedirectToErrorPage {
            status,
            description: describe(status, body),
        },
        400 => Disposition::ToastAndContinue {
            message: describe(status, body),
        },
        _ => Disposition::Propagate,
    }
}

/// Adjust a disposition for the caller's options.
///
/// With `redirect` off, redirects become an error toast (or nothing when
/// error toasts are off too). Toasts honour `custom_error_toast` and are
/// dropped when `error_toast` is off. `RetryAfterRefresh` is never changed.
pub fn apply_options(disposition: Disposition, options: &RequestOptions) -> Disposition {
    let toast = |message: String| {
        if options.error_toast {
            Disposition::ToastAndContinue {
                message: options.custom_error_toast.clone().unwrap_or(message),
            }
        } else {
            Disposition::Propagate
        }
    };

    match disposition {
        Disposition::RedirectToLogin if !options.redirect => {
            toast(DEFAULT_UNAUTHORIZED.to_string())
        }
        Disposition::RedirectToErrorPage { description, .. } if !options.redirect => {
            toast(description)
        }
        Disposition::ToastAndContinue { message } => toast(message),
        other => other,
    }
}

/// Error value for a failed status.
pub fn error_for_status(status: u16, body: &ErrorBody) -> ApiError {
    let description = describe(status, body);
    match status {
        401 => ApiError::Unauthenticated { description },
        403 | 404 | 500 => ApiError::AuthorizationDenied {
            status,
            description,
        },
        400 => ApiError::ValidationRejected { description },
        _ => ApiError::Http {
            status,
            description,
        },
    }
}

fn describe(status: u16, body: &ErrorBody) -> String {
    if let Some(message) = body.message() {
        return message.to_string();
    }

    match status {
        400 => DEFAULT_BAD_REQUEST,
        401 => DEFAULT_UNAUTHORIZED,
        403 => DEFAULT_FORBIDDEN,
        404 => DEFAULT_NOT_FOUND,
        500 => DEFAULT_SERVER_ERROR,
        _ => "Unexpected response from the server.",
    }
    .to_string()
}
