//! SQLite task store (durable).
//!
//! One connection behind a `std::sync::Mutex`, driven from
//! `spawn_blocking` so the async runtime never blocks on disk I/O.
//! `update` runs read, state-machine check and write inside one transaction
//! while holding the connection lock, which makes it the atomic
//! check-and-set the dispatcher relies on.
//!
//! Several processes may open the same file. Only the one holding the
//! [`RunnerLock`] dispatches, and only it may close out `running` rows left
//! behind by a process that died.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::domain::{Category, NewTask, Priority, Task, TaskId, TaskStatus, TaskUpdate};
use crate::ports::{Clock, StoreError, SystemClock, TaskFilter, TaskSort, TaskStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT    NOT NULL,
    priority         INTEGER NOT NULL CHECK (priority BETWEEN 1 AND 10),
    due_date         TEXT    NOT NULL,
    category         TEXT    NOT NULL DEFAULT 'general'
                     CHECK (category IN ('general', 'work', 'personal')),
    status           TEXT    NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    last_error       TEXT,
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS tasks_status_idx ON tasks (status, priority, due_date);
";

const COLUMNS: &str = "id, name, priority, due_date, category, status, cancel_requested, \
                       last_error, created_at, updated_at";

/// Detail recorded on tasks found `running` when the store is opened.
pub const INTERRUPTED_DETAIL: &str = "interrupted: scheduler stopped while the task was running";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteTaskStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn, clock)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn, Arc::new(SystemClock))
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("connection lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task aborted: {e}")))?
    }
}

/// Exclusive right to dispatch from one database file.
///
/// An advisory lock on `<db>.lock`, held until dropped. Every `running` row
/// belongs to the holder, so when the lock is free nobody is running
/// anything.
#[derive(Debug)]
pub struct RunnerLock {
    _file: File,
    path: PathBuf,
}

impl RunnerLock {
    /// Returns `Ok(None)` when another process (or handle) holds the lock.
    pub fn try_acquire(db_path: impl AsRef<Path>) -> Result<Option<Self>, StoreError> {
        let path = lock_path(db_path.as_ref());
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(backend)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

impl SqliteTaskStore {
    /// Close out tasks a dead runner left `running`: they become `failed`
    /// (or `cancelled`, if that was requested) instead of being run again.
    ///
    /// Requires the runner lock so a live process's tasks are never touched.
    pub async fn recover_interrupted(&self, _lock: &RunnerLock) -> Result<usize, StoreError> {
        let now = timestamp(self.clock.now());
        let (cancelled, failed) = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(backend)?;
                let cancelled = tx
                    .execute(
                        "UPDATE tasks SET status = 'cancelled', updated_at = ?1
                         WHERE status = 'running' AND cancel_requested = 1",
                        params![now],
                    )
                    .map_err(backend)?;
                let failed = tx
                    .execute(
                        "UPDATE tasks SET status = 'failed', last_error = ?1, updated_at = ?2
                         WHERE status = 'running'",
                        params![INTERRUPTED_DETAIL, now],
                    )
                    .map_err(backend)?;
                tx.commit().map_err(backend)?;
                Ok((cancelled, failed))
            })
            .await?;
        if cancelled + failed > 0 {
            tracing::warn!(failed, cancelled, "closed out tasks interrupted by a previous run");
        }
        Ok(cancelled + failed)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let now = timestamp(self.clock.now());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (name, priority, due_date, category, status,
                                    cancel_requested, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
                params![
                    task.name,
                    i64::from(task.priority.get()),
                    timestamp(task.due_date),
                    task.category.as_str(),
                    now,
                ],
            )
            .map_err(backend)?;
            Ok(TaskId::new(conn.last_insert_rowid() as u64))
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.with_conn(move |conn| select_task(conn, id)).await
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, StoreError> {
        let now = self.clock.now();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let mut task = select_task(&tx, id)?;
            task.apply(&update, now)
                .map_err(|source| StoreError::InvalidTransition { id, source })?;
            tx.execute(
                "UPDATE tasks
                 SET priority = ?1, due_date = ?2, status = ?3, cancel_requested = ?4,
                     last_error = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    i64::from(task.priority.get()),
                    timestamp(task.due_date),
                    task.status.as_str(),
                    task.cancel_requested,
                    task.last_error,
                    timestamp(task.updated_at),
                    id.get() as i64,
                ],
            )
            .map_err(backend)?;
            tx.commit().map_err(backend)?;
            Ok(task)
        })
        .await
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let task = select_task(&tx, id)?;
            if task.status == TaskStatus::Running {
                return Err(StoreError::Conflict {
                    id,
                    status: task.status,
                });
            }
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![id.get() as i64])
                .map_err(backend)?;
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(category) = filter.category {
            clauses.push("category = ?");
            args.push(category.as_str().to_string());
        }
        if let Some(cutoff) = filter.due_by {
            clauses.push("due_date <= ?");
            args.push(timestamp(cutoff));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM tasks");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(match filter.sort {
            TaskSort::Id => " ORDER BY id",
            TaskSort::Priority => " ORDER BY priority, due_date, id",
            TaskSort::DueDate => " ORDER BY due_date, priority, id",
        });

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), row_to_task)
                .map_err(backend)?;
            let tasks = rows.collect::<Result<Vec<_>, _>>().map_err(backend)?;
            Ok(tasks)
        })
        .await
    }
}

fn select_task(conn: &Connection, id: TaskId) -> Result<Task, StoreError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
        params![id.get() as i64],
        row_to_task,
    )
    .optional()
    .map_err(backend)?
    .ok_or(StoreError::NotFound(id))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let priority: i64 = row.get(2)?;
    let category: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(Task {
        id: TaskId::new(row.get::<_, i64>(0)? as u64),
        name: row.get(1)?,
        priority: Priority::new(priority).map_err(|e| conversion(2, Type::Integer, e))?,
        due_date: parse_timestamp(row, 3)?,
        category: category
            .parse::<Category>()
            .map_err(|e| conversion(4, Type::Text, e))?,
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| conversion(5, Type::Text, e))?,
        cancel_requested: row.get(6)?,
        last_error: row.get(7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

/// Fixed-width UTC timestamps so TEXT comparison orders chronologically.
/// Nanosecond precision, the same as `DateTime<Utc>` itself.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, Type::Text, e))
}

fn conversion<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}
