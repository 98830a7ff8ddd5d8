//! User-facing side effects of API calls.
//!
//! The dispatcher never talks to a UI directly. It reports toasts and
//! navigation requests to a [`Notifier`], which the embedding application
//! implements (or takes from here: [`LogNotifier`] writes to `tracing`,
//! [`ChannelNotifier`] forwards events over a channel).

use serde::Serialize;
use tokio::sync::mpsc;

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
}

/// A short message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
        }
    }
}

/// A full-page navigation the UI should perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Navigation {
    /// The login page.
    Login,

    /// The generic error page, showing the server's status and description.
    ErrorPage { status: u16, description: String },
}

/// One UI event, as delivered by [`ChannelNotifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    Toast(Toast),
    Navigate(Navigation),
}

/// Receiver of user-facing side effects.
///
/// Methods are synchronous and must not block: they are called from inside
/// the request pipeline.
pub trait Notifier: Send + Sync {
    fn toast(&self, toast: Toast);

    fn navigate(&self, navigation: Navigation);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn toast(&self, toast: Toast) {
        match toast.kind {
            ToastKind::Success => tracing::info!(message = %toast.message, "toast"),
            ToastKind::Error => tracing::warn!(message = %toast.message, "error toast"),
        }
    }

    fn navigate(&self, navigation: Navigation) {
        tracing::info!(?navigation, "navigation requested");
    }
}

/// Notifier that forwards every event to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("UI event receiver dropped");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn toast(&self, toast: Toast) {
        self.send(UiEvent::Toast(toast));
    }

    fn navigate(&self, navigation: Navigation) {
        self.send(UiEvent::Navigate(navigation));
    }
}
