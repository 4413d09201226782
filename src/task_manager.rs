use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{A2AError, A2AResult};
use crate::task_store::TaskStore;
use crate::types::{
    Artifact, Event, Message, SendMessageResult, Task, TaskArtifactUpdateEvent,
    TaskStatusUpdateEvent,
};

/// Applies agent events to one task and persists the result.
///
/// A manager is created per request and never caches the task: every call
/// reads the current task from the store, mutates it and writes it back
/// before returning.
#[derive(Clone)]
pub struct TaskManager {
    task_id: Uuid,
    context_id: Uuid,
    store: Arc<dyn TaskStore>,
}

impl TaskManager {
    /// Create a new TaskManager bound to a task and its context
    pub fn new(task_id: Uuid, context_id: Uuid, store: Arc<dyn TaskStore>) -> Self {
        debug!("TaskManager initialized for task {} (context {})", task_id, context_id);
        Self {
            task_id,
            context_id,
            store,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Get the persisted task, or `None` for a task id never seen before
    pub async fn get_task(&self) -> A2AResult<Option<Task>> {
        self.store.get(self.task_id).await.map_err(A2AError::Store)
    }

    /// Apply one event to the task and persist it.
    ///
    /// Returns the resulting task, or the message itself for direct replies.
    pub async fn save_task_event(&self, event: &Event) -> A2AResult<SendMessageResult> {
        if let Some(event_task_id) = event.task_id() {
            if event_task_id != self.task_id {
                return Err(A2AError::Internal(format!(
                    "{} event for task {} delivered to task {}",
                    event.kind(),
                    event_task_id,
                    self.task_id
                )));
            }
        }

        debug!("Processing {} event for task {}", event.kind(), self.task_id);
        match event {
            Event::Task(snapshot) => self.save_snapshot(snapshot).await.map(SendMessageResult::Task),
            Event::StatusUpdate(update) => self.apply_status(update).await.map(SendMessageResult::Task),
            Event::ArtifactUpdate(update) => {
                self.apply_artifact(update).await.map(SendMessageResult::Task)
            }
            Event::Message(message) => {
                self.record_message(message).await?;
                Ok(SendMessageResult::Message(message.clone()))
            }
        }
    }

    /// Load the task, creating a submitted one if the store has none
    pub async fn ensure_task(&self) -> A2AResult<Task> {
        if let Some(task) = self.get_task().await? {
            return Ok(task);
        }

        info!(
            "Task {} not found, creating it in context {}",
            self.task_id, self.context_id
        );
        let task = Task::submitted(self.task_id, self.context_id);
        self.save(&task).await?;
        Ok(task)
    }

    /// Add an inbound message to the task's history, creating the task if needed
    pub async fn append_message(&self, message: &Message) -> A2AResult<Task> {
        let mut task = match self.get_task().await? {
            Some(task) => task,
            None => {
                info!("Creating task {} in context {}", self.task_id, self.context_id);
                Task::submitted(self.task_id, self.context_id)
            }
        };
        push_history(&mut task, message.clone());

        self.save(&task).await?;
        Ok(task)
    }

    async fn save_snapshot(&self, snapshot: &Task) -> A2AResult<Task> {
        let task = match self.get_task().await? {
            Some(mut existing) => {
                if existing.status.state.is_terminal() && existing.status.state != snapshot.status.state {
                    warn!(
                        "Ignoring snapshot state {:?} for task {} already in terminal state {:?}",
                        snapshot.status.state, existing.id, existing.status.state
                    );
                } else {
                    existing.status = snapshot.status.clone();
                }
                for message in &snapshot.history {
                    push_history(&mut existing, message.clone());
                }
                for artifact in &snapshot.artifacts {
                    upsert_artifact(&mut existing, artifact.clone(), false);
                }
                if snapshot.metadata.is_some() {
                    existing.metadata = snapshot.metadata.clone();
                }
                existing
            }
            None => snapshot.clone(),
        };

        self.save(&task).await?;
        Ok(task)
    }

    async fn apply_status(&self, update: &TaskStatusUpdateEvent) -> A2AResult<Task> {
        let mut task = self.ensure_task().await?;

        if task.status.state.is_terminal() {
            warn!(
                "Ignoring status {:?} for task {} already in terminal state {:?}",
                update.status.state, task.id, task.status.state
            );
            return Ok(task);
        }

        debug!("Updating task {} status to {:?}", task.id, update.status.state);
        if let Some(message) = &update.status.message {
            push_history(&mut task, message.clone());
        }
        task.status = update.status.clone();

        self.save(&task).await?;
        Ok(task)
    }

    async fn apply_artifact(&self, update: &TaskArtifactUpdateEvent) -> A2AResult<Task> {
        let mut task = self.ensure_task().await?;

        if task.status.state.is_terminal() {
            warn!(
                "Ignoring artifact {} for task {} already in terminal state {:?}",
                update.artifact.artifact_id, task.id, task.status.state
            );
            return Ok(task);
        }

        debug!("Appending artifact {} to task {}", update.artifact.artifact_id, task.id);
        upsert_artifact(&mut task, update.artifact.clone(), update.append);

        self.save(&task).await?;
        Ok(task)
    }

    async fn record_message(&self, message: &Message) -> A2AResult<()> {
        if let Some(mut task) = self.get_task().await? {
            push_history(&mut task, message.clone());
            self.save(&task).await?;
        }
        Ok(())
    }

    async fn save(&self, task: &Task) -> A2AResult<()> {
        self.store.save(task).await.map_err(A2AError::Store)
    }
}

/// Append a message to history unless a message with the same id is already there
fn push_history(task: &mut Task, mut message: Message) {
    if task.history.iter().any(|m| m.message_id == message.message_id) {
        return;
    }
    message.task_id.get_or_insert(task.id);
    message.context_id.get_or_insert(task.context_id);
    task.history.push(message);
}

// An artifact keeps its position once inserted, and persisted parts are never dropped.
fn upsert_artifact(task: &mut Task, artifact: Artifact, append: bool) {
    let existing = task
        .artifacts
        .iter_mut()
        .find(|a| a.artifact_id == artifact.artifact_id);

    match existing {
        Some(current) if append => current.parts.extend(artifact.parts),
        Some(current) => {
            if artifact.parts.starts_with(&current.parts) {
                current.parts = artifact.parts;
            } else if !current.parts.starts_with(&artifact.parts) {
                warn!(
                    "Artifact {} re-sent with different parts, appending them",
                    artifact.artifact_id
                );
                current.parts.extend(artifact.parts);
            }
            if artifact.name.is_some() {
                current.name = artifact.name;
            }
            if artifact.description.is_some() {
                current.description = artifact.description;
            }
            if artifact.metadata.is_some() {
                current.metadata = artifact.metadata;
            }
        }
        None => {
            if append {
                debug!(
                    "Append chunk for unknown artifact {}, inserting it",
                    artifact.artifact_id
                );
            }
            task.artifacts.push(artifact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_store::InMemoryTaskStore;
    use crate::types::{Part, Role, TaskState, TaskStatus};

    fn manager() -> (TaskManager, Arc<InMemoryTaskStore>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let manager = TaskManager::new(Uuid::new_v4(), Uuid::new_v4(), store.clone());
        (manager, store)
    }

    fn status(manager: &TaskManager, state: TaskState, is_final: bool) -> Event {
        Event::StatusUpdate(TaskStatusUpdateEvent::new(
            manager.task_id(),
            manager.context_id(),
            TaskStatus::new(state),
            is_final,
        ))
    }

    fn artifact(manager: &TaskManager, artifact: Artifact, append: bool) -> Event {
        Event::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: manager.task_id(),
            context_id: manager.context_id(),
            artifact,
            append,
            last_chunk: !append,
        })
    }

    #[tokio::test]
    async fn test_get_task_for_fresh_id_is_none() {
        let (manager, _) = manager();
        assert!(manager.get_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_update_creates_and_persists_task() {
        let (manager, store) = manager();

        let result = manager
            .save_task_event(&status(&manager, TaskState::Working, false))
            .await
            .unwrap();
        let task = result.into_task().unwrap();
        assert_eq!(task.status.state, TaskState::Working);
        assert_eq!(task.context_id, manager.context_id());

        let stored = store.get(manager.task_id()).await.unwrap().unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn test_status_message_is_appended_to_history() {
        let (manager, _) = manager();
        let message = Message::text(Role::Agent, "which city?");
        let event = Event::StatusUpdate(TaskStatusUpdateEvent::new(
            manager.task_id(),
            manager.context_id(),
            TaskStatus::with_message(TaskState::InputRequired, message.clone()),
            true,
        ));

        let task = manager.save_task_event(&event).await.unwrap().into_task().unwrap();
        assert_eq!(task.status.state, TaskState::InputRequired);
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].message_id, message.message_id);
        assert_eq!(task.history[0].task_id, Some(manager.task_id()));
    }

    #[tokio::test]
    async fn test_terminal_task_never_transitions() {
        let (manager, _) = manager();
        manager
            .save_task_event(&status(&manager, TaskState::Completed, true))
            .await
            .unwrap();

        let task = manager
            .save_task_event(&status(&manager, TaskState::Working, false))
            .await
            .unwrap()
            .into_task()
            .unwrap();
        assert_eq!(task.status.state, TaskState::Completed);

        let task = manager
            .save_task_event(&status(&manager, TaskState::Canceled, true))
            .await
            .unwrap()
            .into_task()
            .unwrap();
        assert_eq!(task.status.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_artifact_chunks_are_merged_in_place() {
        let (manager, _) = manager();
        let first = Artifact::text("listings", "3 listings");
        let other = Artifact::text("summary", "LA");
        let mut chunk = first.clone();
        chunk.parts = vec![Part::Text { text: " found".to_string() }];

        manager.save_task_event(&artifact(&manager, first.clone(), false)).await.unwrap();
        manager.save_task_event(&artifact(&manager, other.clone(), false)).await.unwrap();
        let task = manager
            .save_task_event(&artifact(&manager, chunk, true))
            .await
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task.artifacts.len(), 2);
        assert_eq!(task.artifacts[0].artifact_id, first.artifact_id);
        assert_eq!(task.artifacts[0].parts.len(), 2);
        assert_eq!(task.artifacts[1].artifact_id, other.artifact_id);
    }

    #[tokio::test]
    async fn test_resent_artifact_keeps_persisted_parts() {
        let (manager, _) = manager();
        let listing = Artifact::text("listings", "3 listings found");
        let mut chunk = listing.clone();
        chunk.parts = vec![Part::Text { text: " in LA".to_string() }];
        let mut revised = listing.clone();
        revised.parts = vec![Part::Text { text: "revised".to_string() }];

        manager.save_task_event(&artifact(&manager, listing.clone(), false)).await.unwrap();
        manager.save_task_event(&artifact(&manager, chunk, true)).await.unwrap();
        let task = manager
            .save_task_event(&artifact(&manager, revised, false))
            .await
            .unwrap()
            .into_task()
            .unwrap();

        let texts: Vec<&str> = task.artifacts[0]
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(texts, vec!["3 listings found", " in LA", "revised"]);

        let mut stale = Task::submitted(manager.task_id(), manager.context_id());
        stale.artifacts.push(listing);
        let merged = manager
            .save_task_event(&Event::Task(stale))
            .await
            .unwrap()
            .into_task()
            .unwrap();
        assert_eq!(merged.artifacts[0].parts.len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_never_drops_history() {
        let (manager, _) = manager();
        let mut task = Task::submitted(manager.task_id(), manager.context_id());
        task.history.push(Message::text(Role::User, "first"));
        manager.save_task_event(&Event::Task(task.clone())).await.unwrap();

        let mut snapshot = Task::submitted(manager.task_id(), manager.context_id());
        snapshot.status = TaskStatus::new(TaskState::Working);
        snapshot.history.push(Message::text(Role::Agent, "second"));

        let merged = manager
            .save_task_event(&Event::Task(snapshot))
            .await
            .unwrap()
            .into_task()
            .unwrap();
        let texts: Vec<String> = merged.history.iter().map(|m| m.text_content()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(merged.status.state, TaskState::Working);
    }

    #[tokio::test]
    async fn test_message_is_returned_and_recorded() {
        let (manager, _) = manager();
        manager.ensure_task().await.unwrap();

        let reply = Message::text(Role::Agent, "hello");
        let result = manager.save_task_event(&Event::Message(reply.clone())).await.unwrap();
        assert_eq!(result, SendMessageResult::Message(reply));

        let task = manager.get_task().await.unwrap().unwrap();
        assert_eq!(task.history.len(), 1);
    }

    #[tokio::test]
    async fn test_event_for_other_task_is_rejected() {
        let (manager, _) = manager();
        let foreign = Event::StatusUpdate(TaskStatusUpdateEvent::new(
            Uuid::new_v4(),
            manager.context_id(),
            TaskStatus::new(TaskState::Working),
            false,
        ));

        let err = manager.save_task_event(&foreign).await.unwrap_err();
        assert!(matches!(err, A2AError::Internal(_)));
    }
}
