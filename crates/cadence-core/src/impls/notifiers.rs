//! Built-in notifiers.

use async_trait::async_trait;

use crate::ports::{Notification, Notifier, NotifyError};

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.detail() {
            None => tracing::info!(
                task_id = %notification.task_id,
                subject = %notification.subject(),
                "task notification"
            ),
            Some(detail) => tracing::warn!(
                task_id = %notification.task_id,
                subject = %notification.subject(),
                error = detail,
                "task notification"
            ),
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "noop"
    }
}
