//! Ready queue: priority-ordered references to pending tasks.

mod ready;

pub use ready::{DispatchLease, Gate, QueueError, ReadyQueue, TaskRef};
