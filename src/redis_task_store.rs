// src/redis_task_store.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use crate::task_store::TaskStore;
use crate::types::Task;

/// Task store persisting JSON-encoded tasks in Redis
#[derive(Clone)]
pub struct RedisTaskStore {
    client: Client,
    key_prefix: String,
}

impl RedisTaskStore {
    /// Create a new RedisTaskStore using the default `task:` key prefix
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_prefix(redis_url, "task")
    }

    pub fn with_prefix(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL {}", redis_url))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    async fn get_conn(&self) -> Result<redis::aio::Connection> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        Ok(conn)
    }

    fn task_key(&self, task_id: &Uuid) -> String {
        format!("{}:{}", self.key_prefix, task_id)
    }

    /// Delete terminal tasks whose last status change is older than `max_age_days`
    pub async fn cleanup_old_tasks(&self, max_age_days: i64) -> Result<usize> {
        let mut conn = self.get_conn().await?;

        let task_keys: Vec<String> = conn.keys(format!("{}:*", self.key_prefix)).await?;
        let mut deleted_count = 0;

        let cutoff_time = Utc::now() - chrono::Duration::days(max_age_days);

        for key in task_keys {
            let task_json: Option<String> = conn.get(&key).await?;
            let Some(task_json) = task_json else {
                continue;
            };
            let task: Task = match serde_json::from_str(&task_json) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to deserialize task {}: {}", key, e);
                    continue;
                }
            };

            if task.status.state.is_terminal() && task.status.timestamp < cutoff_time {
                let _: () = conn.del(&key).await?;
                deleted_count += 1;
                debug!("Deleted old task {}", task.id);
            }
        }

        info!("Cleaned up {} old tasks", deleted_count);
        Ok(deleted_count)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        let mut conn = self.get_conn().await?;

        let task_json: Option<String> = conn.get(self.task_key(&task_id)).await?;
        let Some(task_json) = task_json else {
            debug!("Task {} not found in Redis", task_id);
            return Ok(None);
        };

        let task: Task = serde_json::from_str(&task_json)
            .context("Failed to deserialize task")?;

        Ok(Some(task))
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let task_json = serde_json::to_string(task)?;
        let mut conn = self.get_conn().await?;
        let _: () = conn.set(self.task_key(&task.id), task_json).await?;

        info!("Saved task {} in state {:?}", task.id, task.status.state);
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let removed: usize = conn.del(self.task_key(&task_id)).await?;
        if removed == 0 {
            warn!("Attempted to delete nonexistent task {}", task_id);
        } else {
            info!("Deleted task {}", task_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_uses_prefix() {
        let store = RedisTaskStore::with_prefix("redis://localhost:6379", "a2a-task").unwrap();
        let id = Uuid::new_v4();
        assert_eq!(store.task_key(&id), format!("a2a-task:{}", id));
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(RedisTaskStore::new("not a url").is_err());
    }
}
