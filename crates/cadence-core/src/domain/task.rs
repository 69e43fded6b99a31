//! Task record and the value types it is built from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SchedulerError;
use super::ids::TaskId;
use super::state::{TaskStatus, TaskUpdate, TransitionError};

/// Human input format for due dates.
pub const DUE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a due date as `YYYY-MM-DD HH:MM` (UTC) or RFC 3339.
pub fn parse_due_date(input: &str) -> Result<DateTime<Utc>, SchedulerError> {
    let trimmed = input.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, DUE_DATE_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SchedulerError::InvalidDueDate(input.to_string()))
}

pub fn format_due_date(due: &DateTime<Utc>) -> String {
    due.format(DUE_DATE_FORMAT).to_string()
}

/// Priority 1..=10, 1 being the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(10);

    pub fn new(value: i64) -> Result<Self, SchedulerError> {
        if (1..=10).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(SchedulerError::InvalidPriority(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(5)
    }
}

impl TryFrom<u8> for Priority {
    type Error = SchedulerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(i64::from(value))
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Work,
    Personal,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::General, Category::Work, Category::Personal];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Work => "work",
            Category::Personal => "personal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| SchedulerError::UnknownCategory(s.to_string()))
    }
}

/// A validated submission, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub priority: Priority,
    pub due_date: DateTime<Utc>,
    pub category: Category,
}

impl NewTask {
    pub fn new(
        name: impl Into<String>,
        priority: i64,
        due_date: DateTime<Utc>,
        category: Category,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchedulerError::InvalidName);
        }
        Ok(Self {
            name,
            priority: Priority::new(priority)?,
            due_date,
            category,
        })
    }
}

/// The stored task. The store is its sole owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub due_date: DateTime<Utc>,
    pub category: Category,
    pub status: TaskStatus,

    /// Cancel was requested while running; honoured at completion.
    #[serde(default)]
    pub cancel_requested: bool,

    /// Error detail captured from the last failed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            priority: new.priority,
            due_date: new.due_date,
            category: new.category,
            status: TaskStatus::Pending,
            cancel_requested: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `update` if the transition table allows it.
    ///
    /// On error the task is left untouched.
    pub fn apply(
        &mut self,
        update: &TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let transition = update.transition();
        let next = self
            .status
            .next(transition, self.cancel_requested)
            .ok_or(TransitionError {
                from: self.status,
                transition,
            })?;

        match update {
            TaskUpdate::Reschedule { due_date, priority } => {
                self.due_date = *due_date;
                if let Some(priority) = priority {
                    self.priority = *priority;
                }
            }
            TaskUpdate::Dispatch => {}
            TaskUpdate::Finish(outcome) => {
                if let Some(detail) = outcome.detail() {
                    self.last_error = Some(detail.to_string());
                }
            }
            TaskUpdate::Cancel => {
                if next == TaskStatus::Running {
                    self.cancel_requested = true;
                }
            }
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
