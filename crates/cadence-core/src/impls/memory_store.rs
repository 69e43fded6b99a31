//! In-memory task store.
//!
//! Nothing survives the process; useful for tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewTask, Task, TaskId, TaskStatus, TaskUpdate};
use crate::ports::{Clock, StoreError, SystemClock, TaskFilter, TaskStore};

struct InMemoryStoreState {
    tasks: HashMap<TaskId, Task>,

    /// Next task ID to assign.
    next_id: u64,
}

impl InMemoryStoreState {
    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

pub struct InMemoryTaskStore {
    state: Mutex<InMemoryStoreState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryStoreState {
                tasks: HashMap::new(),
                next_id: 1,
            }),
            clock,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let record = Task::new(id, task, self.clock.now());
        state.tasks.insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let state = self.state.lock().await;
        state.tasks.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.apply(&update, self.clock.now())
            .map_err(|source| StoreError::InvalidTransition { id, source })?;
        Ok(task.clone())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let status = state
            .tasks
            .get(&id)
            .map(|t| t.status)
            .ok_or(StoreError::NotFound(id))?;
        if status == TaskStatus::Running {
            return Err(StoreError::Conflict { id, status });
        }
        state.tasks.remove(&id);
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        filter.sort_tasks(&mut tasks);
        Ok(tasks)
    }
}
