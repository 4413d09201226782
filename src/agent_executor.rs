use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event_queue::EventQueue;
use crate::types::{Event, Message, Task, TaskState, TaskStatus, TaskStatusUpdateEvent};

/// Everything an executor hook knows about the request it serves
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// JSON-RPC id of the inbound request
    pub request_id: String,
    pub task_id: Uuid,
    pub context_id: Uuid,
    /// The user message, absent for cancel and resubscribe
    pub message: Option<Message>,
    /// The task as it was before this request; `None` for a fresh send
    pub task: Option<Task>,
    /// Signalled when the handler no longer wants output from this hook
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Build a status update event for this request's task
    pub fn status_update(&self, status: TaskStatus, is_final: bool) -> Event {
        Event::StatusUpdate(TaskStatusUpdateEvent::new(
            self.task_id,
            self.context_id,
            status,
            is_final,
        ))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Domain logic that performs the work and reports progress as events.
///
/// Each hook runs as its own spawned task. Returning `Err` moves the task
/// to the `failed` state with the error text as its status message; the
/// queue is closed for the hook once it returns.
#[async_trait]
pub trait AgentExecutor: Send + Sync + 'static {
    /// Handle `message/send`
    async fn on_message_send(&self, context: RequestContext, queue: Arc<EventQueue>) -> Result<()>;

    /// Handle `message/stream`; defaults to the non-streaming behavior
    async fn on_message_stream(
        &self,
        context: RequestContext,
        queue: Arc<EventQueue>,
    ) -> Result<()> {
        self.on_message_send(context, queue).await
    }

    /// Handle `tasks/cancel` by reporting the task as canceled
    async fn on_cancel(&self, context: RequestContext, queue: Arc<EventQueue>) -> Result<()> {
        let status = TaskStatus::new(TaskState::Canceled);
        queue.enqueue(context.status_update(status, true))?;
        Ok(())
    }

    /// Handle `tasks/resubscribe` by replaying the current task snapshot
    async fn on_resubscribe(&self, context: RequestContext, queue: Arc<EventQueue>) -> Result<()> {
        if let Some(task) = context.task {
            queue.enqueue(Event::Task(task))?;
        }
        Ok(())
    }
}
