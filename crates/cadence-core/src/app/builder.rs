//! SchedulerBuilder - wiring of ports into a running `Scheduler`.
//!
//! Validation happens in `start()`, before any worker is spawned.

use std::sync::Arc;

use super::scheduler::Scheduler;
use crate::config::{DispatchMode, SchedulerConfig};
use crate::domain::SchedulerError;
use crate::impls::LogNotifier;
use crate::ports::{Clock, Notifier, SystemClock, TaskExecutor, TaskStore};

/// # Example
/// ```ignore
/// let scheduler = SchedulerBuilder::new(store, executor)
///     .workers(4)
///     .notifier(Arc::new(LogNotifier))
///     .start()?;
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    /// Defaults: three workers, due-only dispatch, log notifier, system clock.
    pub fn new(store: Arc<dyn TaskStore>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            store,
            executor,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate and spawn the workers. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        Ok(Scheduler::spawn(
            self.config,
            self.store,
            self.executor,
            self.notifier,
            self.clock,
        ))
    }
}
