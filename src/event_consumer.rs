use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use log::{debug, error, warn};

use crate::error::{A2AError, A2AResult};
use crate::event_queue::EventQueue;
use crate::task_manager::TaskManager;
use crate::types::{Event, SendMessageResult};

/// Drains an [`EventQueue`], persisting every event through a [`TaskManager`]
pub struct EventConsumer {
    queue: Arc<EventQueue>,
    task_manager: TaskManager,
}

impl EventConsumer {
    pub fn new(queue: Arc<EventQueue>, task_manager: TaskManager) -> Self {
        Self { queue, task_manager }
    }

    /// Wait for exactly one event and return the task or message it produced
    pub async fn consume_one(&self) -> A2AResult<SendMessageResult> {
        debug!("Consuming one event for task {}", self.task_manager.task_id());
        match self.queue.dequeue().await {
            Some(event) => self.apply(&event).await,
            None => {
                warn!("Event queue closed before the agent returned a response");
                Err(A2AError::NoAgentResponse)
            }
        }
    }

    /// Apply events until a final one arrives or the queue closes.
    ///
    /// Returns the task or message produced by the last applied event.
    pub async fn consume_final(&self) -> A2AResult<SendMessageResult> {
        let mut last = None;
        while let Some(event) = self.queue.dequeue().await {
            let result = self.apply(&event).await?;
            last = Some(result);
            if event.is_final() {
                debug!("Final {} event received, closing queue", event.kind());
                self.queue.close();
                break;
            }
        }
        last.ok_or_else(|| {
            warn!("Event queue closed before the agent returned a response");
            A2AError::NoAgentResponse
        })
    }

    /// Stream every event in enqueue order after it has been persisted.
    ///
    /// The stream ends when the queue closes or right after a final event.
    /// A persistence failure is yielded as the last item.
    pub fn consume_all(&self) -> impl Stream<Item = A2AResult<Event>> + Send + '_ {
        stream! {
            while let Some(event) = self.queue.dequeue().await {
                if let Err(e) = self.apply(&event).await {
                    yield Err(e);
                    break;
                }

                let is_final = event.is_final();
                yield Ok(event);
                if is_final {
                    debug!("Stopping event consumption after final event");
                    self.queue.close();
                    break;
                }
            }
        }
    }

    async fn apply(&self, event: &Event) -> A2AResult<SendMessageResult> {
        match self.task_manager.save_task_event(event).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(
                    "Failed to apply {} event to task {}: {}",
                    event.kind(),
                    self.task_manager.task_id(),
                    e
                );
                self.queue.close();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio_test::assert_err;
    use uuid::Uuid;

    use crate::task_store::{InMemoryTaskStore, TaskStore};
    use crate::types::{Message, Role, Task, TaskState, TaskStatus, TaskStatusUpdateEvent};

    struct FailingStore;

    #[async_trait]
    impl TaskStore for FailingStore {
        async fn get(&self, _task_id: Uuid) -> Result<Option<Task>> {
            Ok(None)
        }

        async fn save(&self, _task: &Task) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }

        async fn delete(&self, _task_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    fn setup(store: Arc<dyn TaskStore>) -> (EventConsumer, Arc<EventQueue>, TaskManager) {
        let queue = Arc::new(EventQueue::new());
        let manager = TaskManager::new(Uuid::new_v4(), Uuid::new_v4(), store);
        (EventConsumer::new(queue.clone(), manager.clone()), queue, manager)
    }

    fn status(manager: &TaskManager, state: TaskState, is_final: bool) -> Event {
        Event::StatusUpdate(TaskStatusUpdateEvent::new(
            manager.task_id(),
            manager.context_id(),
            TaskStatus::new(state),
            is_final,
        ))
    }

    #[tokio::test]
    async fn test_consume_one_returns_resulting_task() {
        let (consumer, queue, manager) = setup(Arc::new(InMemoryTaskStore::new()));
        queue.enqueue(status(&manager, TaskState::Working, false)).unwrap();
        queue.enqueue(status(&manager, TaskState::Completed, true)).unwrap();

        let task = consumer.consume_one().await.unwrap().into_task().unwrap();
        assert_eq!(task.status.state, TaskState::Working);
    }

    #[tokio::test]
    async fn test_consume_one_on_closed_empty_queue() {
        let (consumer, queue, _) = setup(Arc::new(InMemoryTaskStore::new()));
        queue.close();
        assert!(matches!(consumer.consume_one().await, Err(A2AError::NoAgentResponse)));
    }

    #[tokio::test]
    async fn test_consume_final_skips_to_terminal_event() {
        let (consumer, queue, manager) = setup(Arc::new(InMemoryTaskStore::new()));
        queue.enqueue(status(&manager, TaskState::Working, false)).unwrap();
        queue.enqueue(status(&manager, TaskState::Completed, true)).unwrap();

        let task = consumer.consume_final().await.unwrap().into_task().unwrap();
        assert_eq!(task.status.state, TaskState::Completed);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_consume_all_yields_raw_events_in_order() {
        let (consumer, queue, manager) = setup(Arc::new(InMemoryTaskStore::new()));
        let events = vec![
            status(&manager, TaskState::Working, false),
            Event::Message(Message::text(Role::Agent, "done")),
        ];
        for event in &events {
            queue.enqueue(event.clone()).unwrap();
        }

        let seen: Vec<Event> = consumer
            .consume_all()
            .map(|event| event.unwrap())
            .collect()
            .await;
        assert_eq!(seen, events);
        assert!(queue.is_closed());

        let stored = manager.get_task().await.unwrap().unwrap();
        assert_eq!(stored.status.state, TaskState::Working);
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_consume_all_ends_on_close() {
        let (consumer, queue, manager) = setup(Arc::new(InMemoryTaskStore::new()));
        queue.enqueue(status(&manager, TaskState::Working, false)).unwrap();
        queue.close();

        let seen: Vec<_> = consumer.consume_all().collect().await;
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_propagates_and_closes_queue() {
        let (consumer, queue, manager) = setup(Arc::new(FailingStore));
        queue.enqueue(status(&manager, TaskState::Working, false)).unwrap();

        let seen: Vec<_> = consumer.consume_all().collect().await;
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Err(A2AError::Store(_))));
        assert!(queue.is_closed());
        assert_err!(queue.enqueue(status(&manager, TaskState::Working, false)));
    }
}
