use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::debug;
use uuid::Uuid;

use crate::agent_executor::{AgentExecutor, RequestContext};
use crate::event_queue::EventQueue;
use crate::types::{
    Artifact, Event, Message, Part, Role, TaskArtifactUpdateEvent, TaskState, TaskStatus,
};

/// Simulated agent that answers every message with an echo artifact.
///
/// Used by the bundled server binary and for exercising the protocol
/// without a real agent behind it.
#[derive(Debug, Clone)]
pub struct EchoAgentExecutor {
    step_delay: Duration,
}

impl EchoAgentExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    fn input_text(context: &RequestContext) -> Result<String> {
        let text = context
            .message
            .as_ref()
            .map(Message::text_content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            bail!("Message has no text content to echo");
        }
        Ok(text)
    }

    fn working(context: &RequestContext) -> Event {
        let message = Message::text(Role::Agent, "Processing your request...")
            .for_task(context.task_id, context.context_id);
        context.status_update(TaskStatus::with_message(TaskState::Working, message), false)
    }

    fn artifact_chunk(
        context: &RequestContext,
        artifact_id: Uuid,
        text: String,
        append: bool,
        last_chunk: bool,
    ) -> Event {
        Event::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: context.task_id,
            context_id: context.context_id,
            artifact: Artifact {
                artifact_id,
                name: Some("echo".to_string()),
                description: None,
                parts: vec![Part::Text { text }],
                metadata: None,
            },
            append,
            last_chunk,
        })
    }

    async fn pause(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }
}

impl Default for EchoAgentExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl AgentExecutor for EchoAgentExecutor {
    async fn on_message_send(&self, context: RequestContext, queue: Arc<EventQueue>) -> Result<()> {
        let text = Self::input_text(&context)?;
        queue.enqueue(Self::working(&context))?;
        self.pause().await;

        let artifact = Self::artifact_chunk(&context, Uuid::new_v4(), format!("Echo: {}", text), false, true);
        queue.enqueue(artifact)?;
        queue.enqueue(context.status_update(TaskStatus::new(TaskState::Completed), true))?;
        Ok(())
    }

    async fn on_message_stream(&self, context: RequestContext, queue: Arc<EventQueue>) -> Result<()> {
        let text = Self::input_text(&context)?;
        queue.enqueue(Self::working(&context))?;

        let artifact_id = Uuid::new_v4();
        let words: Vec<&str> = text.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            self.pause().await;
            let chunk = if i == 0 {
                format!("Echo: {}", word)
            } else {
                format!(" {}", word)
            };
            debug!("Streaming chunk {} of {} for task {}", i + 1, words.len(), context.task_id);
            queue.enqueue(Self::artifact_chunk(
                &context,
                artifact_id,
                chunk,
                i > 0,
                i + 1 == words.len(),
            ))?;
        }

        queue.enqueue(context.status_update(TaskStatus::new(TaskState::Completed), true))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn context(text: &str) -> RequestContext {
        RequestContext {
            request_id: "1".to_string(),
            task_id: Uuid::new_v4(),
            context_id: Uuid::new_v4(),
            message: Some(Message::text(Role::User, text)),
            task: None,
            cancellation: CancellationToken::new(),
        }
    }

    async fn drain(queue: &EventQueue) -> Vec<Event> {
        queue.close();
        let mut events = Vec::new();
        while let Some(event) = queue.dequeue().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_send_emits_working_artifact_completed() {
        let agent = EchoAgentExecutor::new(Duration::ZERO);
        let queue = Arc::new(EventQueue::new());
        agent.on_message_send(context("hello"), queue.clone()).await.unwrap();

        let kinds: Vec<&str> = drain(&queue).await.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["status-update", "artifact-update", "status-update"]);
    }

    #[tokio::test]
    async fn test_stream_chunks_one_artifact() {
        let agent = EchoAgentExecutor::new(Duration::ZERO);
        let queue = Arc::new(EventQueue::new());
        agent
            .on_message_stream(context("find a room"), queue.clone())
            .await
            .unwrap();

        let chunks: Vec<TaskArtifactUpdateEvent> = drain(&queue)
            .await
            .into_iter()
            .filter_map(|event| match event {
                Event::ArtifactUpdate(update) => Some(update),
                _ => None,
            })
            .collect();
        assert_eq!(chunks.len(), 3);
        assert!(!chunks[0].append);
        assert!(chunks[1].append && chunks[2].append);
        assert!(chunks[2].last_chunk);
        assert!(chunks.iter().all(|c| c.artifact.artifact_id == chunks[0].artifact.artifact_id));
    }

    #[tokio::test]
    async fn test_empty_message_is_an_error() {
        let agent = EchoAgentExecutor::new(Duration::ZERO);
        let queue = Arc::new(EventQueue::new());
        let err = agent.on_message_send(context("  "), queue).await.unwrap_err();
        assert_eq!(err.to_string(), "Message has no text content to echo");
    }
}
