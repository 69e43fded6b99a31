//! Scheduler - the coordinator.
//!
//! Owns the ready queue, the worker pool and the reporter task, and exposes
//! the user-facing operations. Every status change is delegated to the task
//! store; the queue only ever holds references.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::cycle::{CycleLedger, CycleSummary};
use super::reporter::Reporter;
use super::status::StatusCounts;
use crate::config::{DispatchMode, SchedulerConfig};
use crate::domain::{
    Category, CycleId, NewTask, Priority, SchedulerError, Task, TaskId, TaskStatus, TaskUpdate,
};
use crate::ports::{Clock, Notifier, StoreError, TaskExecutor, TaskFilter, TaskStore};
use crate::queue::{ReadyQueue, TaskRef};
use crate::worker::WorkerPool;

struct Background {
    pool: WorkerPool,
    reporter: JoinHandle<()>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<ReadyQueue>,
    clock: Arc<dyn Clock>,
    ledger: Arc<CycleLedger>,
    /// One cycle at a time.
    cycle_lock: Mutex<()>,
    background: Mutex<Option<Background>>,
}

impl Scheduler {
    pub(crate) fn spawn(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = Arc::new(ReadyQueue::new());
        let ledger = Arc::new(CycleLedger::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pool = WorkerPool::spawn(
            config.workers,
            Arc::clone(&queue),
            Arc::clone(&store),
            executor,
            events_tx,
        );
        let reporter = Reporter {
            store: Arc::clone(&store),
            notifier,
            queue: Arc::clone(&queue),
            ledger: Arc::clone(&ledger),
        };
        let reporter = tokio::spawn(reporter.run(events_rx));

        tracing::info!(
            workers = config.workers,
            dispatch_mode = %config.dispatch_mode,
            "scheduler started"
        );

        Self {
            config,
            store,
            queue,
            clock,
            ledger,
            cycle_lock: Mutex::new(()),
            background: Mutex::new(Some(Background { pool, reporter })),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Ids currently waiting in the ready queue, in dispatch order.
    pub fn queued(&self) -> Vec<TaskId> {
        self.queue.snapshot().into_iter().map(|r| r.id).collect()
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.queue.is_closed() {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }

    /// Validate, persist as `Pending`, enqueue. Returns the new id.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        priority: i64,
        due_date: DateTime<Utc>,
        category: Category,
    ) -> Result<TaskId, SchedulerError> {
        let task = NewTask::new(name, priority, due_date, category)?;
        self.submit_task(task).await
    }

    pub async fn submit_task(&self, task: NewTask) -> Result<TaskId, SchedulerError> {
        self.ensure_running()?;
        let priority = task.priority;
        let due_date = task.due_date;

        let id = self.store.create(task).await?;
        self.queue.push(TaskRef {
            id,
            priority,
            due_date,
        });
        tracing::info!(task_id = %id, priority = %priority, due = %due_date, "task submitted");
        Ok(id)
    }

    /// Change the due date (and optionally the priority) of a pending task.
    /// The queue position follows the new key.
    pub async fn reschedule(
        &self,
        id: TaskId,
        due_date: DateTime<Utc>,
        priority: Option<i64>,
    ) -> Result<Task, SchedulerError> {
        self.ensure_running()?;
        let priority = priority.map(Priority::new).transpose()?;

        let previous = self.queue.remove(id).ok();
        match self
            .store
            .update(id, TaskUpdate::Reschedule { due_date, priority })
            .await
        {
            Ok(task) => {
                self.queue.push(TaskRef::from(&task));
                tracing::info!(
                    task_id = %id,
                    due = %task.due_date,
                    priority = %task.priority,
                    "task rescheduled"
                );
                Ok(task)
            }
            Err(e) => {
                if let Some(entry) = previous {
                    self.queue.push(entry);
                }
                Err(e.into())
            }
        }
    }

    /// Cancel a task.
    ///
    /// A pending task becomes `Cancelled` and is never dispatched. A running
    /// task keeps running; the request is recorded and it ends `Cancelled`
    /// when the body returns. Terminal tasks fail with `Conflict`.
    pub async fn cancel(&self, id: TaskId) -> Result<Task, SchedulerError> {
        let previous = self.queue.remove(id).ok();
        match self.store.update(id, TaskUpdate::Cancel).await {
            Ok(task) => {
                match task.status {
                    TaskStatus::Running => {
                        tracing::info!(task_id = %id, "cancel requested for running task")
                    }
                    _ => tracing::info!(task_id = %id, "task cancelled"),
                }
                Ok(task)
            }
            Err(StoreError::InvalidTransition { id, source }) => {
                Err(SchedulerError::Conflict { id, status: source.from })
            }
            Err(e) => {
                if let Some(entry) = previous {
                    self.queue.push(entry);
                }
                Err(e.into())
            }
        }
    }

    /// Remove a task that is not running from the queue and the store.
    pub async fn delete(&self, id: TaskId) -> Result<(), SchedulerError> {
        let previous = self.queue.remove(id).ok();
        if let Err(e) = self.store.delete(id).await {
            if let Some(entry) = previous {
                self.queue.push(entry);
            }
            return Err(e.into());
        }
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    pub async fn status_of(&self, id: TaskId) -> Result<Task, SchedulerError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, SchedulerError> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn counts(&self) -> Result<StatusCounts, SchedulerError> {
        let tasks = self.store.list(&TaskFilter::all()).await?;
        Ok(StatusCounts::from_tasks(&tasks))
    }

    /// Dispatch every eligible pending task and wait until all of them have
    /// reached a final state (and been notified).
    ///
    /// Eligible means `Pending` and, in `due` mode, due at or before the clock
    /// reading taken when the cycle starts. The store is re-read first, so
    /// tasks created by another process or left over from an earlier run are
    /// picked up as well.
    pub async fn run_cycle(&self) -> Result<CycleSummary, SchedulerError> {
        let _cycle = self.cycle_lock.lock().await;
        self.ensure_running()?;

        let cycle_id = CycleId::generate();
        let cutoff = match self.config.dispatch_mode {
            DispatchMode::Due => Some(self.clock.now()),
            DispatchMode::All => None,
        };

        let mut filter = TaskFilter::all().status(TaskStatus::Pending);
        if let Some(cutoff) = cutoff {
            filter = filter.due_by(cutoff);
        }
        for task in self.store.list(&filter).await? {
            if !self.queue.contains(task.id) {
                self.queue.push(TaskRef::from(&task));
            }
        }

        self.ledger.reset();
        tracing::info!(
            cycle = %cycle_id,
            queued = self.queue.len(),
            cutoff = ?cutoff,
            "cycle started"
        );

        self.queue.open_gate(cutoff);
        self.queue.wait_drained().await;
        self.queue.close_gate();

        let summary = self.ledger.finish(cycle_id).map_err(SchedulerError::Store)?;
        tracing::info!(
            cycle = %cycle_id,
            dispatched = summary.dispatched,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            conflicts = summary.conflicts,
            "cycle finished"
        );
        Ok(summary)
    }

    /// Stop handing out tasks. A running cycle returns once the tasks it
    /// already dispatched have finished; the rest stay `Pending`.
    pub fn stop_dispatch(&self) {
        tracing::info!("dispatch stopped");
        self.queue.close_gate();
    }

    /// Close the queue, let in-flight bodies finish, and join the workers and
    /// the reporter. Idempotent.
    pub async fn shutdown(&self) {
        let Some(background) = self.background.lock().await.take() else {
            return;
        };
        self.queue.close();
        background.pool.shutdown_and_join().await;
        // Workers held the only senders; the reporter drains and exits.
        if let Err(e) = background.reporter.await {
            tracing::error!(error = %e, "reporter exited abnormally");
        }
        tracing::info!("scheduler shut down");
    }
}
