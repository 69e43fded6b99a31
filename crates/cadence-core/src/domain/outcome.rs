//! Outcome model: what an executor reports after running a task body.
//!
//! A failed body is not a system error. It is recorded on the task and handed
//! to the notifier, and the worker pool carries on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed { detail: String },
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Completed
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Outcome::Failed {
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// Captured error detail, for failures.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::Completed => None,
            Outcome::Failed { detail } => Some(detail),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed { .. } => "failed",
        }
    }
}

impl From<Result<(), String>> for Outcome {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Outcome::success(),
            Err(detail) => Outcome::failure(detail),
        }
    }
}
