//! Notification dispatch

use rewards_core::{Notification, Result};
use tracing::info;

/// Outbound notification channel (push, email, in-app inbox).
///
/// Called after the change it reports has committed. Errors are logged by
/// the engine and never undo that change.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: i64, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, user_id: i64, notification: &Notification) -> Result<()> {
        info!(
            "Notify user {} [{:?}] {}: {}",
            user_id, notification.kind, notification.title, notification.message
        );
        Ok(())
    }
}
