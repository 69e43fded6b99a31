//! Task lifecycle state machine.
//!
//! Every status change in the system goes through [`TaskStatus::next`], so an
//! illegal transition is rejected in exactly one place whichever backend
//! stores the task.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::Outcome;
use super::task::Priority;

/// Task status.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed
/// - Pending -> Pending (reschedule)
/// - Pending -> Cancelled
/// - Running -> Running (cancel request, honoured when the body finishes)
/// - Running -> Cancelled (body finished with a cancel request recorded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, not yet dispatched.
    Pending,

    /// Currently executing in a worker.
    Running,

    /// Body finished successfully.
    Completed,

    /// Body reported a failure (no automatic retry).
    Failed,

    /// Cancelled before dispatch, or after a cancel request while running.
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Is this task eligible for dispatch?
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// The transition table.
    ///
    /// Returns the status reached by applying `transition`, or `None` when the
    /// transition is not legal from `self`. `cancel_requested` only matters for
    /// a running task reaching its completion check.
    pub fn next(self, transition: Transition, cancel_requested: bool) -> Option<TaskStatus> {
        use TaskStatus::*;
        use Transition as T;

        match (self, transition) {
            (Pending, T::Reschedule) => Some(Pending),
            (Pending, T::Dispatch) => Some(Running),
            (Pending, T::Cancel) => Some(Cancelled),
            (Running, T::Cancel) => Some(Running),
            (Running, T::Complete | T::Fail) if cancel_requested => Some(Cancelled),
            (Running, T::Complete) => Some(Completed),
            (Running, T::Fail) => Some(Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Lifecycle events that move a task through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Reschedule,
    Dispatch,
    Complete,
    Fail,
    Cancel,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Reschedule => "reschedule",
            Transition::Dispatch => "dispatch",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
            Transition::Cancel => "cancel",
        })
    }
}

/// A transition that is not legal for the task's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {transition} a task that is {from}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub transition: Transition,
}

/// A mutation requested against a stored task.
///
/// Stores apply these with [`Task::apply`](super::Task::apply), never by
/// writing fields directly.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// New due date (and optionally priority). Pending only.
    Reschedule {
        due_date: DateTime<Utc>,
        priority: Option<Priority>,
    },

    /// Pending -> Running check-and-set. The single dispatch authorization point.
    Dispatch,

    /// Completion report from an executor.
    Finish(Outcome),

    /// Cancel a pending task, or record a cancel request on a running one.
    Cancel,
}

impl TaskUpdate {
    pub fn transition(&self) -> Transition {
        match self {
            TaskUpdate::Reschedule { .. } => Transition::Reschedule,
            TaskUpdate::Dispatch => Transition::Dispatch,
            TaskUpdate::Finish(outcome) if outcome.is_success() => Transition::Complete,
            TaskUpdate::Finish(_) => Transition::Fail,
            TaskUpdate::Cancel => Transition::Cancel,
        }
    }
}
