use std::any::Any;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::domain::{Outcome, Task, TaskId, TaskUpdate};
use crate::ports::{StoreError, TaskExecutor, TaskStore};
use crate::queue::{DispatchLease, ReadyQueue};

/// What a worker tells the coordinator.
///
/// Events that carry a lease keep the task counted as in flight until the
/// coordinator has finished handling them.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The store accepted the Pending -> Running check-and-set.
    Dispatched { task_id: TaskId, worker: usize },

    /// The body returned (or panicked).
    Finished(Report),

    /// The check-and-set was refused. Either someone else changed the task
    /// first, or the store itself failed.
    Rejected {
        lease: DispatchLease,
        error: StoreError,
    },
}

#[derive(Debug)]
pub struct Report {
    pub lease: DispatchLease,
    pub task: Task,
    pub outcome: Outcome,
    pub worker: usize,
}

struct WorkerContext {
    queue: Arc<ReadyQueue>,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

/// Fixed set of long-lived workers draining the ready queue.
///
/// Dropping the handle also stops the workers (their shutdown receivers see
/// the sender go away). The pool does not keep an event sender of its own, so the receiving side
/// sees the channel close once every worker has exited.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers. Must be called inside a tokio runtime.
    pub fn spawn(
        n: usize,
        queue: Arc<ReadyQueue>,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            queue,
            store,
            executor,
            events,
        });

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let ctx = Arc::clone(&ctx);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, ctx, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new entries. A body that is already running is not
    /// interrupted.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker exited abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::debug!(worker = worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = ctx.queue.pop() => lease,
        };

        // None: the queue was closed.
        let Some(lease) = lease else {
            break;
        };

        ctx.dispatch(worker_id, lease).await;
    }
    tracing::debug!(worker = worker_id, "worker stopped");
}

impl WorkerContext {
    async fn dispatch(&self, worker: usize, lease: DispatchLease) {
        let task_id = lease.id();

        // Queue entries can be stale; the store decides who runs the task.
        let task = match self.store.update(task_id, TaskUpdate::Dispatch).await {
            Ok(task) => task,
            Err(error) => {
                self.send(WorkerEvent::Rejected { lease, error });
                return;
            }
        };
        self.send(WorkerEvent::Dispatched { task_id, worker });
        tracing::info!(
            task_id = %task_id,
            worker,
            name = %task.name,
            priority = %task.priority,
            "task dispatched"
        );

        let executor = Arc::clone(&self.executor);
        let body = task.clone();
        let joined = tokio::spawn(async move { executor.execute(&body).await }).await;
        let outcome = match joined {
            Ok(result) => Outcome::from(result),
            Err(e) => Outcome::failure(panic_detail(e)),
        };

        self.send(WorkerEvent::Finished(Report {
            lease,
            task,
            outcome,
            worker,
        }));
    }

    fn send(&self, event: WorkerEvent) {
        if let Err(e) = self.events.send(event) {
            tracing::warn!(event = ?e.0, "coordinator is gone, dropping worker event");
        }
    }
}

fn panic_detail(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("task body aborted: {err}");
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("task body panicked: {message}")
}
