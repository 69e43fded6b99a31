//! End-to-end scheduling scenarios against the public API.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::domain::{NewTask, TaskUpdate};
use cadence_core::impls::{InMemoryTaskStore, SqliteTaskStore};
use cadence_core::ports::{
    FixedClock, Notification, Notifier, NotifyError, StoreError, TaskExecutor, TaskFilter,
    TaskStore,
};
use cadence_core::{
    Category, DispatchMode, Outcome, Scheduler, SchedulerBuilder, SchedulerError, Task, TaskId,
    TaskStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Semaphore, mpsc};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 25, h, m, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    at(12, 0)
}

/// Executor that records what it ran and can fail or hold bodies on demand.
#[derive(Default)]
struct Scripted {
    started: Mutex<Vec<TaskId>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    failing: HashSet<String>,
    hold: Option<Arc<Semaphore>>,
    started_tx: Option<mpsc::UnboundedSender<TaskId>>,
    pause: Option<Duration>,
}

impl Scripted {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Bodies block until a permit is added to the returned semaphore.
    fn held() -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<TaskId>) {
        let hold = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let script = Self {
            hold: Some(Arc::clone(&hold)),
            started_tx: Some(tx),
            ..Self::default()
        };
        (script, hold, rx)
    }

    fn started(&self) -> Vec<TaskId> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for Scripted {
    async fn execute(&self, task: &Task) -> Result<(), String> {
        self.started.lock().unwrap().push(task.id);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(tx) = &self.started_tx {
            let _ = tx.send(task.id);
        }

        if let Some(pause) = self.pause {
            tokio::time::sleep(pause).await;
        }
        if let Some(hold) = &self.hold {
            hold.acquire().await.unwrap().forget();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&task.name) {
            return Err(format!("{} exploded", task.name));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Notification>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recorder"
    }
}

#[derive(Default)]
struct Unreachable {
    attempts: AtomicUsize,
}

#[async_trait]
impl Notifier for Unreachable {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Delivery("smtp connection refused".to_string()))
    }

    fn channel_name(&self) -> &str {
        "unreachable"
    }
}

/// In-memory store whose updates can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryTaskStore,
    broken: AtomicBool,
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError> {
        self.inner.create(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database is locked".to_string()));
        }
        self.inner.update(id, update).await
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.inner.list(filter).await
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    script: Arc<Scripted>,
    recorder: Arc<Recorder>,
}

fn harness(workers: usize, script: Scripted) -> Harness {
    harness_with_store(workers, script, Arc::new(InMemoryTaskStore::new()))
}

fn harness_with_store(workers: usize, script: Scripted, store: Arc<dyn TaskStore>) -> Harness {
    let script = Arc::new(script);
    let recorder = Arc::new(Recorder::default());
    let scheduler = SchedulerBuilder::new(store, script.clone())
        .workers(workers)
        .notifier(recorder.clone())
        .clock(Arc::new(FixedClock::new(now())))
        .start()
        .unwrap();
    Harness {
        scheduler: Arc::new(scheduler),
        script,
        recorder,
    }
}

async fn next_started(rx: &mut mpsc::UnboundedReceiver<TaskId>) -> TaskId {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("a task should have started")
        .unwrap()
}

#[tokio::test]
async fn single_worker_runs_in_priority_order() {
    let h = harness(1, Scripted::default());
    let s = &h.scheduler;
    let a = s.submit("A", 5, at(9, 0), Category::General).await.unwrap();
    let b = s.submit("B", 1, at(9, 0), Category::General).await.unwrap();
    let c = s.submit("C", 3, at(9, 0), Category::General).await.unwrap();

    let summary = s.run_cycle().await.unwrap();

    assert_eq!(summary.dispatch_order, vec![b, c, a]);
    assert_eq!(h.script.started(), vec![b, c, a]);
    assert_eq!(summary.completed, 3);
    for id in [a, b, c] {
        assert_eq!(s.status_of(id).await.unwrap().status, TaskStatus::Completed);
    }
    s.shutdown().await;
}

#[tokio::test]
async fn priority_beats_earlier_due_date() {
    let h = harness(1, Scripted::default());
    let s = &h.scheduler;
    let backup = s.submit("Backup DB", 1, at(10, 0), Category::Work).await.unwrap();
    let cleanup = s.submit("Cleanup", 5, at(9, 0), Category::General).await.unwrap();

    let summary = s.run_cycle().await.unwrap();

    assert_eq!(summary.dispatch_order, vec![backup, cleanup]);
    let subjects: Vec<String> = h.recorder.seen().iter().map(|n| n.subject()).collect();
    assert_eq!(subjects, vec!["Task Backup DB completed", "Task Cleanup completed"]);
    s.shutdown().await;
}

#[tokio::test]
async fn equal_priority_falls_back_to_due_date() {
    let h = harness(1, Scripted::default());
    let s = &h.scheduler;
    let late = s.submit("late", 4, at(11, 0), Category::General).await.unwrap();
    let early = s.submit("early", 4, at(8, 0), Category::General).await.unwrap();

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![early, late]);
    s.shutdown().await;
}

#[tokio::test]
async fn submitted_task_round_trips_through_status_of() {
    let h = harness(1, Scripted::default());
    let s = &h.scheduler;
    let id = s.submit("Backup DB", 7, at(10, 30), Category::Personal).await.unwrap();

    let task = s.status_of(id).await.unwrap();
    assert_eq!(task.name, "Backup DB");
    assert_eq!(task.priority.get(), 7);
    assert_eq!(task.due_date, at(10, 30));
    assert_eq!(task.category, Category::Personal);
    assert_eq!(task.status, TaskStatus::Pending);
    s.shutdown().await;
}

#[tokio::test]
async fn invalid_submissions_leave_no_trace() {
    let h = harness(1, Scripted::default());
    let s = &h.scheduler;

    assert!(matches!(
        s.submit("x", 0, at(9, 0), Category::General).await,
        Err(SchedulerError::InvalidPriority(0))
    ));
    assert!(matches!(
        s.submit("  ", 3, at(9, 0), Category::General).await,
        Err(SchedulerError::InvalidName)
    ));
    assert_eq!(s.counts().await.unwrap().total(), 0);
    s.shutdown().await;
}

#[tokio::test]
async fn rescheduling_pending_task_changes_dispatch_order() {
    let h = harness(1, Scripted::default());
    let s = &h.scheduler;
    let first = s.submit("first", 3, at(8, 0), Category::General).await.unwrap();
    let second = s.submit("second", 3, at(9, 0), Category::General).await.unwrap();

    let moved = s.reschedule(first, at(10, 0), None).await.unwrap();
    assert_eq!(moved.due_date, at(10, 0));
    assert_eq!(moved.status, TaskStatus::Pending);

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![second, first]);
    s.shutdown().await;
}

#[tokio::test]
async fn reschedule_into_the_future_skips_cycle() {
    let h = harness(2, Scripted::default());
    let s = &h.scheduler;
    let id = s.submit("later", 1, at(9, 0), Category::General).await.unwrap();
    s.reschedule(id, at(18, 0), None).await.unwrap();

    let summary = s.run_cycle().await.unwrap();
    assert!(summary.is_empty());
    assert_eq!(s.status_of(id).await.unwrap().status, TaskStatus::Pending);
    s.shutdown().await;
}

#[tokio::test]
async fn reschedule_of_running_task_is_rejected() {
    let (script, hold, mut started) = Scripted::held();
    let h = harness(1, script);
    let s = Arc::clone(&h.scheduler);
    let id = s.submit("long", 1, at(9, 0), Category::General).await.unwrap();

    let cycle = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.run_cycle().await }
    });
    assert_eq!(next_started(&mut started).await, id);

    let err = s.reschedule(id, at(15, 0), None).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTransition { id: got, .. } if got == id));
    assert_eq!(s.status_of(id).await.unwrap().due_date, at(9, 0));

    hold.add_permits(1);
    let summary = cycle.await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);
    s.shutdown().await;
}

#[tokio::test]
async fn reschedule_unknown_task_is_not_found() {
    let h = harness(1, Scripted::default());
    let err = h
        .scheduler
        .reschedule(TaskId::new(42), at(9, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(id) if id == TaskId::new(42)));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn cancel_of_finished_task_is_conflict() {
    let h = harness(1, Scripted::failing(&["bad"]));
    let s = &h.scheduler;
    let good = s.submit("good", 1, at(9, 0), Category::General).await.unwrap();
    let bad = s.submit("bad", 2, at(9, 0), Category::General).await.unwrap();
    s.run_cycle().await.unwrap();

    assert!(matches!(
        s.cancel(good).await,
        Err(SchedulerError::Conflict { status: TaskStatus::Completed, .. })
    ));
    assert!(matches!(
        s.cancel(bad).await,
        Err(SchedulerError::Conflict { status: TaskStatus::Failed, .. })
    ));
    assert_eq!(s.status_of(good).await.unwrap().status, TaskStatus::Completed);
    s.shutdown().await;
}

#[tokio::test]
async fn cancelled_pending_task_is_never_dispatched() {
    let h = harness(2, Scripted::default());
    let s = &h.scheduler;
    let keep = s.submit("keep", 2, at(9, 0), Category::General).await.unwrap();
    let drop_me = s.submit("drop", 1, at(9, 0), Category::General).await.unwrap();

    let cancelled = s.cancel(drop_me).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![keep]);
    assert!(!h.script.started().contains(&drop_me));
    assert_eq!(s.status_of(drop_me).await.unwrap().status, TaskStatus::Cancelled);
    s.shutdown().await;
}

#[tokio::test]
async fn failing_body_is_recorded_and_notified_once() {
    let h = harness(2, Scripted::failing(&["Cleanup"]));
    let s = &h.scheduler;
    let id = s.submit("Cleanup", 2, at(9, 0), Category::Work).await.unwrap();

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.failed, 1);

    let task = s.status_of(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_error.as_deref(), Some("Cleanup exploded"));

    let seen = h.recorder.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].task_id, id);
    assert_eq!(seen[0].outcome, Outcome::failure("Cleanup exploded"));
    assert_eq!(seen[0].subject(), "Task Cleanup failed");
    assert_eq!(seen[0].body(), "Error: Cleanup exploded");

    // Terminal tasks are not picked up again.
    let again = s.run_cycle().await.unwrap();
    assert!(again.is_empty());
    assert_eq!(h.recorder.seen().len(), 1);
    s.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_task_dispatched_exactly_once_across_workers() {
    let script = Scripted {
        pause: Some(Duration::from_millis(2)),
        ..Scripted::default()
    };
    let h = harness(8, script);
    let s = &h.scheduler;

    let mut ids = Vec::new();
    for i in 0..60 {
        let priority = (i % 10 + 1) as i64;
        ids.push(
            s.submit(format!("job-{i}"), priority, at(9, 0), Category::General)
                .await
                .unwrap(),
        );
    }

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatched, 60);
    assert_eq!(summary.completed, 60);
    assert_eq!(summary.conflicts, 0);

    let mut runs: HashMap<TaskId, usize> = HashMap::new();
    for id in h.script.started() {
        *runs.entry(id).or_default() += 1;
    }
    assert_eq!(runs.len(), 60);
    assert!(runs.values().all(|n| *n == 1));
    assert!(h.script.peak.load(Ordering::SeqCst) <= 8);
    assert_eq!(h.recorder.seen().len(), 60);
    s.shutdown().await;
}

#[tokio::test]
async fn concurrency_never_exceeds_worker_count() {
    let (script, hold, mut started) = Scripted::held();
    let h = harness(2, script);
    let s = Arc::clone(&h.scheduler);
    for i in 0..5 {
        s.submit(format!("t{i}"), 3, at(9, 0), Category::General)
            .await
            .unwrap();
    }

    let cycle = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.run_cycle().await }
    });
    next_started(&mut started).await;
    next_started(&mut started).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.script.active.load(Ordering::SeqCst), 2);
    assert_eq!(s.counts().await.unwrap().running, 2);

    hold.add_permits(5);
    let summary = cycle.await.unwrap().unwrap();
    assert_eq!(summary.completed, 5);
    assert_eq!(h.script.peak.load(Ordering::SeqCst), 2);
    s.shutdown().await;
}

#[tokio::test]
async fn notifier_failure_does_not_change_status() {
    let script = Arc::new(Scripted::failing(&["bad"]));
    let notifier = Arc::new(Unreachable::default());
    let scheduler = SchedulerBuilder::new(Arc::new(InMemoryTaskStore::new()), script)
        .workers(2)
        .notifier(notifier.clone())
        .clock(Arc::new(FixedClock::new(now())))
        .start()
        .unwrap();

    let ok = scheduler.submit("ok", 1, at(9, 0), Category::General).await.unwrap();
    let bad = scheduler.submit("bad", 1, at(9, 0), Category::General).await.unwrap();
    let summary = scheduler.run_cycle().await.unwrap();

    assert_eq!((summary.completed, summary.failed), (1, 1));
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.status_of(ok).await.unwrap().status, TaskStatus::Completed);
    assert_eq!(scheduler.status_of(bad).await.unwrap().status, TaskStatus::Failed);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn cancel_while_running_ends_cancelled_without_notification() {
    let (script, hold, mut started) = Scripted::held();
    let h = harness(1, script);
    let s = Arc::clone(&h.scheduler);
    let id = s.submit("long", 1, at(9, 0), Category::General).await.unwrap();

    let cycle = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.run_cycle().await }
    });
    next_started(&mut started).await;

    let requested = s.cancel(id).await.unwrap();
    assert_eq!(requested.status, TaskStatus::Running);
    assert!(requested.cancel_requested);

    hold.add_permits(1);
    let summary = cycle.await.unwrap().unwrap();
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.completed, 0);
    assert_eq!(s.status_of(id).await.unwrap().status, TaskStatus::Cancelled);
    assert!(h.recorder.seen().is_empty());
    s.shutdown().await;
}

#[tokio::test]
async fn delete_of_running_task_is_conflict() {
    let (script, hold, mut started) = Scripted::held();
    let h = harness(1, script);
    let s = Arc::clone(&h.scheduler);
    let id = s.submit("long", 1, at(9, 0), Category::General).await.unwrap();

    let cycle = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.run_cycle().await }
    });
    next_started(&mut started).await;

    assert!(matches!(
        s.delete(id).await,
        Err(SchedulerError::Conflict { status: TaskStatus::Running, .. })
    ));

    hold.add_permits(1);
    cycle.await.unwrap().unwrap();
    s.delete(id).await.unwrap();
    s.shutdown().await;
}

#[tokio::test]
async fn stop_dispatch_leaves_remaining_tasks_pending() {
    let (script, hold, mut started) = Scripted::held();
    let h = harness(1, script);
    let s = Arc::clone(&h.scheduler);
    let first = s.submit("first", 1, at(9, 0), Category::General).await.unwrap();
    let second = s.submit("second", 2, at(9, 0), Category::General).await.unwrap();
    let third = s.submit("third", 3, at(9, 0), Category::General).await.unwrap();

    let cycle = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.run_cycle().await }
    });
    assert_eq!(next_started(&mut started).await, first);

    s.stop_dispatch();
    hold.add_permits(1);
    let summary = cycle.await.unwrap().unwrap();
    assert_eq!(summary.dispatch_order, vec![first]);
    assert_eq!(s.status_of(second).await.unwrap().status, TaskStatus::Pending);
    assert_eq!(s.status_of(third).await.unwrap().status, TaskStatus::Pending);

    hold.add_permits(2);
    let rest = s.run_cycle().await.unwrap();
    assert_eq!(rest.dispatch_order, vec![second, third]);
    s.shutdown().await;
}

#[tokio::test]
async fn due_mode_skips_future_tasks_and_all_mode_takes_them() {
    let h = harness(2, Scripted::default());
    let s = &h.scheduler;
    let due = s.submit("due", 5, at(11, 59), Category::General).await.unwrap();
    let future = s.submit("future", 1, at(13, 0), Category::General).await.unwrap();

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![due]);
    assert_eq!(s.status_of(future).await.unwrap().status, TaskStatus::Pending);
    assert_eq!(s.queued(), vec![future]);
    s.shutdown().await;

    let store = Arc::new(InMemoryTaskStore::new());
    let all = SchedulerBuilder::new(store, Arc::new(Scripted::default()))
        .dispatch_mode(DispatchMode::All)
        .clock(Arc::new(FixedClock::new(now())))
        .start()
        .unwrap();
    let future = all.submit("future", 1, at(13, 0), Category::General).await.unwrap();
    let summary = all.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![future]);
    all.shutdown().await;
}

#[tokio::test]
async fn store_failure_is_surfaced_by_run_cycle() {
    let store = Arc::new(FlakyStore::default());
    let h = harness_with_store(2, Scripted::default(), store.clone());
    let s = &h.scheduler;
    let id = s.submit("x", 1, at(9, 0), Category::General).await.unwrap();

    store.broken.store(true, Ordering::SeqCst);
    let err = s.run_cycle().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Store(StoreError::Backend(_))));
    assert!(err.is_fatal());
    assert!(h.script.started().is_empty());

    // Nothing was lost: the task is still pending and runs once the store recovers.
    store.broken.store(false, Ordering::SeqCst);
    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![id]);
    s.shutdown().await;
}

#[tokio::test]
async fn tasks_written_by_another_handle_are_picked_up() {
    let store = Arc::new(InMemoryTaskStore::new());
    let h = harness_with_store(1, Scripted::default(), store.clone());
    let outside = store
        .create(NewTask::new("outside", 1, at(9, 0), Category::General).unwrap())
        .await
        .unwrap();

    let summary = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(summary.dispatch_order, vec![outside]);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn sqlite_backed_scheduler_persists_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    let id = {
        let store = Arc::new(SqliteTaskStore::open(&path).unwrap());
        let h = harness_with_store(2, Scripted::failing(&["Cleanup"]), store);
        let id = h
            .scheduler
            .submit("Cleanup", 2, at(9, 0), Category::Work)
            .await
            .unwrap();
        h.scheduler.run_cycle().await.unwrap();
        h.scheduler.shutdown().await;
        id
    };

    let reopened = SqliteTaskStore::open(&path).unwrap();
    let task = reopened.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_error.as_deref(), Some("Cleanup exploded"));
}

/// Reads each task back from the store while its notification is delivered.
struct StatusWitness {
    store: Arc<dyn TaskStore>,
    seen: Mutex<Vec<(TaskId, TaskStatus, Option<String>)>>,
}

#[async_trait]
impl Notifier for StatusWitness {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let task = self
            .store
            .get(notification.task_id)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        self.seen
            .lock()
            .unwrap()
            .push((task.id, task.status, task.last_error));
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "witness"
    }
}

#[tokio::test]
async fn notifier_sees_the_committed_status() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TaskStore> =
        Arc::new(SqliteTaskStore::open(dir.path().join("tasks.db")).unwrap());
    let witness = Arc::new(StatusWitness {
        store: Arc::clone(&store),
        seen: Mutex::default(),
    });
    let scheduler = SchedulerBuilder::new(store, Arc::new(Scripted::failing(&["Cleanup"])))
        .workers(2)
        .notifier(witness.clone())
        .clock(Arc::new(FixedClock::new(now())))
        .start()
        .unwrap();

    let backup = scheduler
        .submit("Backup DB", 1, at(9, 0), Category::Work)
        .await
        .unwrap();
    let cleanup = scheduler
        .submit("Cleanup", 2, at(9, 0), Category::General)
        .await
        .unwrap();
    scheduler.run_cycle().await.unwrap();
    scheduler.shutdown().await;

    let mut seen = witness.seen.lock().unwrap().clone();
    seen.sort_by_key(|(id, ..)| *id);
    assert_eq!(
        seen,
        vec![
            (backup, TaskStatus::Completed, None),
            (cleanup, TaskStatus::Failed, Some("Cleanup exploded".to_string())),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_dispatch_is_exclusive_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteTaskStore::open(dir.path().join("tasks.db")).unwrap());
    let script = Scripted {
        pause: Some(Duration::from_millis(1)),
        ..Scripted::default()
    };
    let h = harness_with_store(6, script, store.clone());
    let s = &h.scheduler;

    let mut ids = Vec::new();
    for i in 0..30 {
        let priority = (i % 4 + 1) as i64;
        ids.push(
            s.submit(format!("job-{i}"), priority, at(9, 0), Category::General)
                .await
                .unwrap(),
        );
    }

    let summary = s.run_cycle().await.unwrap();
    assert_eq!(summary.dispatched, 30);
    assert_eq!(summary.completed, 30);
    assert_eq!(summary.conflicts, 0);

    let mut runs: HashMap<TaskId, usize> = HashMap::new();
    for id in h.script.started() {
        *runs.entry(id).or_default() += 1;
    }
    assert_eq!(runs.len(), 30);
    assert!(runs.values().all(|n| *n == 1));
    assert!(h.script.peak.load(Ordering::SeqCst) <= 6);

    for id in ids {
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Completed);
    }
    s.shutdown().await;
}
