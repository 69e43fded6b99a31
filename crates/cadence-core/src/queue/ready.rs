//! In-memory ready queue.
//!
//! Design:
//! - Entries are references only (`TaskId` + ordering key). Task data is
//!   always re-read from the store at dispatch time.
//! - Order is `(priority asc, due_date asc, insertion seq asc)`. A changed
//!   key is applied by removing and re-pushing, which also assigns a new seq.
//! - A gate controls whether workers may take entries. Between cycles it is
//!   closed and submissions just accumulate; a cycle opens it with a due-date
//!   cutoff.
//! - Every successful pop hands out a `DispatchLease` and counts as in flight
//!   until the lease is dropped. `wait_drained` resolves once nothing eligible
//!   is left and nothing is in flight, which is the cycle barrier.
//! - The lock is a `std::sync::Mutex` held only for bookkeeping, never across
//!   an await, so `DispatchLease::drop` can release synchronously.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::domain::{Priority, Task, TaskId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task {0} is not queued")]
    NotFound(TaskId),
}

/// Lightweight queue entry: id plus the ordering key at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef {
    pub id: TaskId,
    pub priority: Priority,
    pub due_date: DateTime<Utc>,
}

impl From<&Task> for TaskRef {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            priority: task.priority,
            due_date: task.due_date,
        }
    }
}

/// Whether workers may take entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Closed,
    /// Dispatch entries due at or before `cutoff` (`None`: everything).
    Open { cutoff: Option<DateTime<Utc>> },
}

/// Field order is the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Priority,
    due_date: DateTime<Utc>,
    seq: u64,
}

struct ReadyQueueState {
    entries: BTreeMap<QueueKey, TaskId>,
    index: HashMap<TaskId, QueueKey>,
    next_seq: u64,
    gate: Gate,
    in_flight: usize,
    closed: bool,
}

impl ReadyQueueState {
    fn next_eligible(&self) -> Option<QueueKey> {
        let Gate::Open { cutoff } = self.gate else {
            return None;
        };
        self.entries
            .keys()
            .find(|key| cutoff.is_none_or(|c| key.due_date <= c))
            .copied()
    }

    fn take(&mut self, key: QueueKey) -> Option<TaskRef> {
        let id = self.entries.remove(&key)?;
        self.index.remove(&id);
        Some(TaskRef {
            id,
            priority: key.priority,
            due_date: key.due_date,
        })
    }

    fn is_drained(&self) -> bool {
        self.in_flight == 0 && (self.closed || self.next_eligible().is_none())
    }
}

pub struct ReadyQueue {
    state: Mutex<ReadyQueueState>,
    /// Woken on push / gate open / close.
    available: Notify,
    /// Woken whenever the queue may have become drained.
    drained: Notify,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReadyQueueState {
                entries: BTreeMap::new(),
                index: HashMap::new(),
                next_seq: 0,
                gate: Gate::Closed,
                in_flight: 0,
                closed: false,
            }),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReadyQueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `task`. An existing entry for the same id is replaced and
    /// goes to the back of its key's FIFO.
    pub fn push(&self, task: TaskRef) {
        {
            let mut state = self.lock();
            if let Some(old) = state.index.remove(&task.id) {
                state.entries.remove(&old);
            }
            let key = QueueKey {
                priority: task.priority,
                due_date: task.due_date,
                seq: state.next_seq,
            };
            state.next_seq += 1;
            state.entries.insert(key, task.id);
            state.index.insert(task.id, key);
        }
        self.available.notify_waiters();
    }

    /// Pull `id` out before it is dispatched.
    pub fn remove(&self, id: TaskId) -> Result<TaskRef, QueueError> {
        let removed = {
            let mut state = self.lock();
            let key = state.index.get(&id).copied().ok_or(QueueError::NotFound(id))?;
            state.take(key)
        };
        self.drained.notify_waiters();
        removed.ok_or(QueueError::NotFound(id))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Queued entries in dispatch order, ignoring the gate.
    pub fn snapshot(&self) -> Vec<TaskRef> {
        self.lock()
            .entries
            .iter()
            .map(|(key, id)| TaskRef {
                id: *id,
                priority: key.priority,
                due_date: key.due_date,
            })
            .collect()
    }

    pub fn gate(&self) -> Gate {
        self.lock().gate
    }

    pub fn open_gate(&self, cutoff: Option<DateTime<Utc>>) {
        self.lock().gate = Gate::Open { cutoff };
        self.available.notify_waiters();
        self.drained.notify_waiters();
    }

    /// Stop handing out entries. In-flight leases are unaffected.
    pub fn close_gate(&self) {
        self.lock().gate = Gate::Closed;
        self.drained.notify_waiters();
    }

    /// Shut the queue down: waiting and future `pop`s return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
        self.drained.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Take the next eligible entry without waiting.
    pub fn try_pop(self: &Arc<Self>) -> Option<DispatchLease> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let key = state.next_eligible()?;
        let task = state.take(key)?;
        state.in_flight += 1;
        Some(DispatchLease {
            task,
            queue: Arc::clone(self),
        })
    }

    /// Take the next eligible entry, suspending while there is none.
    /// Returns `None` once the queue is closed.
    pub async fn pop(self: &Arc<Self>) -> Option<DispatchLease> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(lease) = self.try_pop() {
                return Some(lease);
            }
            notified.await;
        }
    }

    /// Resolve once nothing eligible is queued and no lease is outstanding.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().is_drained() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.drained.notify_waiters();
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to dispatch one popped entry. Counted as in flight until
/// dropped.
pub struct DispatchLease {
    task: TaskRef,
    queue: Arc<ReadyQueue>,
}

impl DispatchLease {
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }
}

impl std::fmt::Debug for DispatchLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLease").field("task", &self.task).finish()
    }
}

impl Drop for DispatchLease {
    fn drop(&mut self) {
        self.queue.release();
    }
}
