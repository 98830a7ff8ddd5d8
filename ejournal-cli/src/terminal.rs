//! Terminal rendering of toasts and navigations.

use ejournal_core::{Navigation, Notifier, Toast, ToastKind};

/// Prints UI events to stderr so stdout stays machine-readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn toast(&self, toast: Toast) {
        eprintln!("{}", render_toast(&toast));
    }

    fn navigate(&self, navigation: Navigation) {
        eprintln!("{}", render_navigation(&navigation));
    }
}

fn render_toast(toast: &Toast) -> String {
    match toast.kind {
        ToastKind::Success => format!("ok: {}", toast.message),
        ToastKind::Error => format!("error: {}", toast.message),
    }
}

fn render_navigation(navigation: &Navigation) -> String {
    match navigation {
        Navigation::Login => "Not logged in. Run `ejournal login` to sign in.".to_string(),
        Navigation::ErrorPage {
            status,
            description,
        } => format!("error {}: {}", status, description),
    }
}
