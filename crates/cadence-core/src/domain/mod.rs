//! Domain model (ids, task, status machine, outcome, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use errors::SchedulerError;
pub use ids::{CycleId, TaskId};
pub use outcome::Outcome;
pub use state::{TaskStatus, TaskUpdate, Transition, TransitionError, UnknownStatus};
pub use task::{
    Category, NewTask, Priority, Task, DUE_DATE_FORMAT, format_due_date, parse_due_date,
};
