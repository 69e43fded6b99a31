//! Ports - the narrow interfaces the scheduling core consumes.
//!
//! - **TaskStore**: source of truth for tasks, survives restarts
//! - **TaskExecutor**: runs a task body, content opaque to the core
//! - **Notifier**: told about completions, best-effort
//! - **Clock**: current time, swappable in tests

pub mod clock;
pub mod executor;
pub mod notifier;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::TaskExecutor;
pub use self::notifier::{Notification, Notifier, NotifyError};
pub use self::task_store::{StoreError, TaskFilter, TaskSort, TaskStore};
