//! App - composes the ports into the running scheduler.
//!
//! # Components
//! - **SchedulerBuilder**: wiring and start-up validation
//! - **Scheduler**: submit / reschedule / cancel / run_cycle / status_of
//! - **Reporter**: applies worker reports to the store, notifies
//! - **CycleSummary** / **StatusCounts**: what the operations report back

pub mod builder;
pub mod cycle;
mod reporter;
pub mod scheduler;
pub mod status;

pub use self::builder::SchedulerBuilder;
pub use self::cycle::CycleSummary;
pub use self::scheduler::Scheduler;
pub use self::status::StatusCounts;
