//! Reporter - applies worker events to the store.
//!
//! A single task consumes every `WorkerEvent`, so completion writes and
//! notifications happen one at a time and in the order workers sent them.
//! Leases carried by events are dropped only after the event is fully
//! handled, which is what lets `run_cycle` treat "queue drained" as
//! "everything committed and notified".

use std::sync::Arc;

use tokio::sync::mpsc;

use super::cycle::CycleLedger;
use crate::domain::{TaskStatus, TaskUpdate};
use crate::ports::{Notification, Notifier, StoreError, TaskStore};
use crate::queue::ReadyQueue;
use crate::worker::{Report, WorkerEvent};

pub(crate) struct Reporter {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) queue: Arc<ReadyQueue>,
    pub(crate) ledger: Arc<CycleLedger>,
}

impl Reporter {
    /// Runs until every sender is dropped.
    pub(crate) async fn run(self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("reporter stopped");
    }

    async fn handle(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Dispatched { task_id, .. } => self.ledger.record_dispatch(task_id),
            WorkerEvent::Rejected { lease, error } => {
                match &error {
                    StoreError::Backend(_) => self.fatal(&error),
                    _ => {
                        tracing::debug!(
                            task_id = %lease.id(),
                            error = %error,
                            "stale queue entry skipped"
                        );
                        self.ledger.record_conflict();
                    }
                }
                drop(lease);
            }
            WorkerEvent::Finished(report) => self.finish(report).await,
        }
    }

    async fn finish(&self, report: Report) {
        let Report {
            lease,
            task,
            outcome,
            worker,
        } = report;

        let committed = match self
            .store
            .update(task.id, TaskUpdate::Finish(outcome.clone()))
            .await
        {
            Ok(committed) => committed,
            Err(error @ StoreError::Backend(_)) => {
                self.fatal(&error);
                return;
            }
            Err(error) => {
                tracing::warn!(task_id = %task.id, error = %error, "completion report rejected");
                return;
            }
        };
        self.ledger.record_finished(committed.status);

        match committed.status {
            TaskStatus::Completed => {
                tracing::info!(task_id = %task.id, worker, name = %task.name, "task completed");
            }
            TaskStatus::Failed => {
                tracing::warn!(
                    task_id = %task.id,
                    worker,
                    name = %task.name,
                    error = outcome.detail().unwrap_or_default(),
                    "task failed"
                );
            }
            TaskStatus::Cancelled => {
                tracing::info!(
                    task_id = %task.id,
                    worker,
                    name = %task.name,
                    "task cancelled while running"
                );
                return;
            }
            TaskStatus::Pending | TaskStatus::Running => return,
        }

        let notification = Notification::new(committed.id, committed.name, outcome);
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(
                task_id = %notification.task_id,
                channel = self.notifier.channel_name(),
                error = %e,
                "notification delivery failed"
            );
        }

        // Released only now: the cycle barrier covers the notification.
        drop(lease);
    }

    /// A store failure ends the cycle: nothing more is handed out.
    fn fatal(&self, error: &StoreError) {
        tracing::error!(error = %error, "task store failure, stopping dispatch");
        self.ledger.record_fatal(error);
        self.queue.close_gate();
    }
}
