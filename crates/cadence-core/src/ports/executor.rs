//! TaskExecutor port - runs the body of a task.

use async_trait::async_trait;

use crate::domain::Task;

/// Runs one task body.
///
/// `Err(detail)` marks the task `Failed` with `detail` recorded; the core does
/// not interpret the body or retry it. A panic inside `execute` is caught by
/// the worker and treated the same way.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), String>;
}
