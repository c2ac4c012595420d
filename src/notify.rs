//! User-facing notices raised by the upload core.

use tracing::{error, warn};

/// Channel through which failures reach the user.
pub trait Notifier {
    /// Non-blocking warning, e.g. a failed upload.
    fn show_warning(&self, message: &str, title: &str);

    /// Blocking alert, e.g. a refused deletion.
    fn show_alert(&self, message: &str);
}

/// Writes notices to the log. Used by the command line binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_warning(&self, message: &str, title: &str) {
        warn!("{}: {}", title, message);
    }

    fn show_alert(&self, message: &str) {
        error!("{}", message);
    }
}
