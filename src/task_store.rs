// src/task_store.rs

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::Task;

/// Trait for task persistence to allow for different storage backends
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Get a task by ID
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Create or overwrite a task
    async fn save(&self, task: &Task) -> Result<()>;

    /// Delete a task; deleting a missing task is not an error
    async fn delete(&self, task_id: Uuid) -> Result<()>;
}

/// Task store keeping everything in process memory
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    /// Create a new InMemoryTaskStore
    pub fn new() -> Self {
        debug!("Initializing InMemoryTaskStore");
        Self::default()
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(&task_id).cloned();
        if task.is_none() {
            debug!("Task {} not found in store", task_id);
        }
        Ok(task)
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());

        info!("Saved task {} in state {:?}", task.id, task.status.state);
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.remove(&task_id).is_some() {
            info!("Deleted task {}", task_id);
        } else {
            warn!("Attempted to delete nonexistent task {}", task_id);
        }
        Ok(())
    }
}
