use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::message::Task;

/// Authoritative store of task state.
///
/// Every method is atomic per task id: a read observes either the state
/// before or after a concurrent write, never a mix. The scheduler relies on
/// this for its generation and running checks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Reads a task by id.
    async fn read(&self, id: i64) -> Result<Option<Task>>;

    /// Reads every stored task, ordered by id.
    async fn read_all(&self) -> Result<Vec<Task>>;

    /// Inserts a task or replaces the stored task with the same id.
    async fn save(&self, task: Task) -> Result<()>;

    /// Removes a task. Removing an unknown id is a no-op.
    async fn delete(&self, id: i64) -> Result<()>;

    async fn set_running(&self, id: i64, running: bool) -> Result<()>;

    async fn set_last_scheduled(&self, id: i64, at: Option<DateTime<Utc>>) -> Result<()>;

    /// Adds `delta` to the in-flight instance counter, saturating at zero.
    async fn add_instances(&self, id: i64, delta: i32) -> Result<()>;

    async fn reset_instances(&self, id: i64) -> Result<()>;

    /// Returns true if the stored task with this id is running and still
    /// carries `generation_id`.
    async fn is_live(&self, id: i64, generation_id: i32) -> Result<bool> {
        Ok(self
            .read(id)
            .await?
            .is_some_and(|task| task.running && task.generation_id == generation_id))
    }
}

/// Task repository kept in process memory.
#[derive(Default)]
pub struct InMemoryRepository {
    tasks: Mutex<BTreeMap<i64, Task>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into_iter().map(|task| (task.id, task)).collect()),
        }
    }

    fn update<F>(&self, id: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut Task),
    {
        match self.lock()?.get_mut(&id) {
            Some(task) => f(task),
            None => tracing::debug!("task {} not found, update skipped", id),
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, Task>>> {
        self.tasks
            .lock()
            .map_err(|_| anyhow::anyhow!("task repository lock poisoned"))
    }
}

#[async_trait]
impl TaskRepository for InMemoryRepository {
    async fn read(&self, id: i64) -> Result<Option<Task>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn read_all(&self) -> Result<Vec<Task>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn save(&self, task: Task) -> Result<()> {
        self.lock()?.insert(task.id, task);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.lock()?.remove(&id);
        Ok(())
    }

    async fn set_running(&self, id: i64, running: bool) -> Result<()> {
        self.update(id, |task| task.running = running)
    }

    async fn set_last_scheduled(&self, id: i64, at: Option<DateTime<Utc>>) -> Result<()> {
        self.update(id, |task| task.last_scheduled = at)
    }

    async fn add_instances(&self, id: i64, delta: i32) -> Result<()> {
        self.update(id, |task| {
            task.instances = task.instances.saturating_add_signed(delta);
        })
    }

    async fn reset_instances(&self, id: i64) -> Result<()> {
        self.update(id, |task| task.instances = 0)
    }
}
