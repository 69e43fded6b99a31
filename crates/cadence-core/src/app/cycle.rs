//! Per-cycle bookkeeping.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::domain::{CycleId, TaskId, TaskStatus};
use crate::ports::StoreError;

/// Result of one `run_cycle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: CycleId,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Queue entries that lost the dispatch check-and-set (stale entries).
    pub conflicts: usize,
    /// Task ids in the order the store authorized them to run.
    pub dispatch_order: Vec<TaskId>,
}

impl CycleSummary {
    pub fn is_empty(&self) -> bool {
        self.dispatched == 0
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    dispatch_order: Vec<TaskId>,
    completed: usize,
    failed: usize,
    cancelled: usize,
    conflicts: usize,
    fatal: Option<String>,
}

/// Shared between the coordinator and the reporter task. The lock is only
/// held for counter updates.
#[derive(Debug, Default)]
pub(crate) struct CycleLedger {
    state: Mutex<LedgerState>,
}

impl CycleLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reset(&self) {
        *self.lock() = LedgerState::default();
    }

    pub(crate) fn record_dispatch(&self, id: TaskId) {
        self.lock().dispatch_order.push(id);
    }

    pub(crate) fn record_finished(&self, status: TaskStatus) {
        let mut state = self.lock();
        match status {
            TaskStatus::Completed => state.completed += 1,
            TaskStatus::Failed => state.failed += 1,
            TaskStatus::Cancelled => state.cancelled += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }

    pub(crate) fn record_conflict(&self) {
        self.lock().conflicts += 1;
    }

    /// Keeps the first failure only.
    pub(crate) fn record_fatal(&self, error: &StoreError) {
        let mut state = self.lock();
        if state.fatal.is_none() {
            state.fatal = Some(error.to_string());
        }
    }

    pub(crate) fn finish(&self, cycle_id: CycleId) -> Result<CycleSummary, StoreError> {
        let state = std::mem::take(&mut *self.lock());
        if let Some(message) = state.fatal {
            return Err(StoreError::Backend(message));
        }
        Ok(CycleSummary {
            cycle_id,
            dispatched: state.dispatch_order.len(),
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
            conflicts: state.conflicts,
            dispatch_order: state.dispatch_order,
        })
    }
}
