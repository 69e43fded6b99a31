//! Scheduler configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::SchedulerError;

pub const DEFAULT_WORKERS: usize = 3;

/// Which pending tasks a cycle dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Only tasks with `due_date <= now` at cycle start.
    #[default]
    Due,
    /// Every pending task regardless of due date.
    All,
}

impl DispatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchMode::Due => "due",
            DispatchMode::All => "all",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dispatch mode {0:?}, expected due or all")]
pub struct UnknownDispatchMode(pub String);

impl FromStr for DispatchMode {
    type Err = UnknownDispatchMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "due" => Ok(DispatchMode::Due),
            "all" => Ok(DispatchMode::All),
            _ => Err(UnknownDispatchMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    pub dispatch_mode: DispatchMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            dispatch_mode: DispatchMode::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidWorkerCount);
        }
        Ok(())
    }
}
