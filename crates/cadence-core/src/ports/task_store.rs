//! TaskStore port - the source of truth for tasks.
//!
//! # Contract
//! - `create` assigns a fresh, never reused `TaskId`; the task starts `Pending`
//! - every write is atomic per task: a reader sees the record before or after
//!   an update, never in between
//! - `update` goes through [`Task::apply`], so the state machine is checked
//!   and the write happens under the same lock/transaction
//! - every mutation refreshes `updated_at`
//! - `delete` of a `Running` task fails with `Conflict`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Category, NewTask, Task, TaskId, TaskStatus, TaskUpdate, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id}: {source}")]
    InvalidTransition {
        id: TaskId,
        #[source]
        source: TransitionError,
    },

    #[error("task {id} is {status} and cannot be removed")]
    Conflict { id: TaskId, status: TaskStatus },

    /// I/O or engine failure. Fatal to a running cycle.
    #[error("task store backend failure: {0}")]
    Backend(String),
}

/// Ordering for `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSort {
    #[default]
    Id,
    /// `(priority, due_date, id)`, i.e. dispatch order.
    Priority,
    /// `(due_date, priority, id)`.
    DueDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub category: Option<Category>,
    /// Only tasks due at or before this instant.
    pub due_by: Option<DateTime<Utc>>,
    pub sort: TaskSort,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn due_by(mut self, cutoff: DateTime<Utc>) -> Self {
        self.due_by = Some(cutoff);
        self
    }

    pub fn sorted_by(mut self, sort: TaskSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.category.is_none_or(|c| task.category == c)
            && self.due_by.is_none_or(|cutoff| task.due_date <= cutoff)
    }

    pub fn sort_tasks(&self, tasks: &mut [Task]) {
        match self.sort {
            TaskSort::Id => tasks.sort_by_key(|t| t.id),
            TaskSort::Priority => tasks.sort_by_key(|t| (t.priority, t.due_date, t.id)),
            TaskSort::DueDate => tasks.sort_by_key(|t| (t.due_date, t.priority, t.id)),
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new `Pending` task and return its id.
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Apply `update` atomically and return the task as stored afterwards.
    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, StoreError>;

    async fn delete(&self, id: TaskId) -> Result<(), StoreError>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;
}
