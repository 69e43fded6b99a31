//! Errors returned by coordinator operations.
//!
//! Validation and transition errors never leave partial state behind. A
//! cycle only ends early on `Store` (a backend I/O failure) or `ShutDown`.

use thiserror::Error;

use super::ids::TaskId;
use super::state::{TaskStatus, TransitionError};
use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("priority must be between 1 and 10, got {0}")]
    InvalidPriority(i64),

    #[error("task name cannot be empty")]
    InvalidName,

    #[error("invalid due date {0:?}, expected YYYY-MM-DD HH:MM")]
    InvalidDueDate(String),

    #[error("unknown category {0:?}, expected general, work or personal")]
    UnknownCategory(String),

    #[error("task {id}: {source}")]
    InvalidTransition {
        id: TaskId,
        #[source]
        source: TransitionError,
    },

    #[error("task {id} is already {status}")]
    Conflict { id: TaskId, status: TaskStatus },

    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("scheduler is shut down")]
    ShutDown,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            StoreError::InvalidTransition { id, source } => {
                SchedulerError::InvalidTransition { id, source }
            }
            StoreError::Conflict { id, status } => SchedulerError::Conflict { id, status },
            backend @ StoreError::Backend(_) => SchedulerError::Store(backend),
        }
    }
}

impl SchedulerError {
    /// Errors that end a cycle early: a store backend failure, or the
    /// scheduler shutting down underneath it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::Store(_) | SchedulerError::ShutDown)
    }
}
