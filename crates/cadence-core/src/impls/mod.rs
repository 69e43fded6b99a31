//! Impls - port implementations shipped with the core.
//!
//! - **InMemoryTaskStore** / **SqliteTaskStore**: task store backends
//! - **LogNotifier** / **NoopNotifier**: notifiers
//! - **SimulatedExecutor**: placeholder task body with random duration

pub mod memory_store;
pub mod notifiers;
pub mod simulated;
pub mod sqlite_store;

pub use self::memory_store::InMemoryTaskStore;
pub use self::notifiers::{LogNotifier, NoopNotifier};
pub use self::simulated::SimulatedExecutor;
pub use self::sqlite_store::{RunnerLock, SqliteTaskStore};
