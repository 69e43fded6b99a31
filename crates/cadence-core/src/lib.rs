//! cadence-core
//!
//! Single-node task scheduler: persistent task records, a priority-ordered
//! ready queue, and a bounded pool of workers that run task bodies
//! concurrently.
//!
//! # Modules
//! - **domain**: ids, task record, status machine, outcome, errors
//! - **ports**: TaskStore, TaskExecutor, Notifier, Clock
//! - **impls**: in-memory and SQLite stores, simulated executor, notifiers
//! - **queue**: the ready queue
//! - **worker**: the worker pool
//! - **app**: the coordinator (`Scheduler`) and its builder
//! - **config**: scheduler settings

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod worker;

pub use app::{CycleSummary, Scheduler, SchedulerBuilder, StatusCounts};
pub use config::{DispatchMode, SchedulerConfig};
pub use domain::{Category, Outcome, Priority, SchedulerError, Task, TaskId, TaskStatus};
