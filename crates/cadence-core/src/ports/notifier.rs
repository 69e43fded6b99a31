//! Notifier port - completion/failure notifications.
//!
//! Called by the coordinator after a `Completed`/`Failed` transition is
//! committed to the store. Delivery errors are logged and dropped; they never
//! change a task's status.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Outcome, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notifier configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub task_id: TaskId,
    pub name: String,
    pub outcome: Outcome,
}

impl Notification {
    pub fn new(task_id: TaskId, name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            task_id,
            name: name.into(),
            outcome,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        self.outcome.detail()
    }

    pub fn subject(&self) -> String {
        format!("Task {} {}", self.name, self.outcome.label())
    }

    pub fn body(&self) -> String {
        match self.outcome.detail() {
            None => "Success!".to_string(),
            Some(detail) => format!("Error: {detail}"),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g. "log", "email").
    fn channel_name(&self) -> &str;
}
