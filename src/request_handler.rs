// src/request_handler.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{pin_mut, Stream, StreamExt};
use log::{debug, info};
use uuid::Uuid;

use crate::agent_executor::{AgentExecutor, RequestContext};
use crate::error::{A2AError, A2AResult};
use crate::event_consumer::EventConsumer;
use crate::event_queue::EventQueue;
use crate::producer::{spawn_producer, ProducerHandle, ProducerRegistry, Registration};
use crate::task_manager::TaskManager;
use crate::task_store::{InMemoryTaskStore, TaskStore};
use crate::types::{
    Event, MessageSendParams, SendMessageResult, Task, TaskIdParams, TaskPushNotificationConfig,
    TaskQueryParams,
};

/// Events produced by a streaming request, in the order the agent emitted them
pub type EventStream = Pin<Box<dyn Stream<Item = A2AResult<Event>> + Send>>;

/// The A2A operations a server exposes
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Get a task by ID
    async fn on_get_task(&self, params: TaskQueryParams) -> A2AResult<Task>;

    /// Send a message and wait for the agent's answer
    async fn on_message_send(
        &self,
        request_id: &str,
        params: MessageSendParams,
    ) -> A2AResult<SendMessageResult>;

    /// Send a message and stream the agent's events as they happen
    async fn on_message_stream(
        &self,
        request_id: &str,
        params: MessageSendParams,
    ) -> A2AResult<EventStream>;

    /// Cancel a task
    async fn on_cancel_task(&self, request_id: &str, params: TaskIdParams) -> A2AResult<Task>;

    /// Reattach to the event stream of an existing task
    async fn on_resubscribe_to_task(
        &self,
        request_id: &str,
        params: TaskIdParams,
    ) -> A2AResult<EventStream>;

    async fn on_set_task_push_notification_config(
        &self,
        _params: TaskPushNotificationConfig,
    ) -> A2AResult<TaskPushNotificationConfig> {
        Err(A2AError::UnsupportedOperation(
            "tasks/pushNotificationConfig/set".to_string(),
        ))
    }

    async fn on_get_task_push_notification_config(
        &self,
        _params: TaskIdParams,
    ) -> A2AResult<TaskPushNotificationConfig> {
        Err(A2AError::UnsupportedOperation(
            "tasks/pushNotificationConfig/get".to_string(),
        ))
    }
}

/// Request handler running an [`AgentExecutor`] against a [`TaskStore`].
///
/// Concurrent requests for the same task id are not serialized; the store
/// sees last-write-wins.
pub struct DefaultRequestHandler {
    executor: Arc<dyn AgentExecutor>,
    store: Arc<dyn TaskStore>,
    producers: Arc<ProducerRegistry>,
}

impl DefaultRequestHandler {
    pub fn new(executor: Arc<dyn AgentExecutor>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            executor,
            store,
            producers: Arc::new(ProducerRegistry::new()),
        }
    }

    /// Handler backed by an [`InMemoryTaskStore`]
    pub fn in_memory(executor: Arc<dyn AgentExecutor>) -> Self {
        Self::new(executor, Arc::new(InMemoryTaskStore::new()))
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Number of producers currently running for a task
    pub fn running_producers(&self, task_id: Uuid) -> usize {
        self.producers.running(task_id)
    }

    async fn load_task(&self, task_id: Uuid) -> A2AResult<Task> {
        self.store
            .get(task_id)
            .await
            .map_err(A2AError::Store)?
            .ok_or(A2AError::TaskNotFound(task_id))
    }

    /// Resolve the task a message belongs to and record the message in its history
    async fn prepare_message(
        &self,
        request_id: &str,
        params: &MessageSendParams,
    ) -> A2AResult<(TaskManager, RequestContext, Registration)> {
        let task_id = params.message.task_id.unwrap_or_else(Uuid::new_v4);
        let existing = self.store.get(task_id).await.map_err(A2AError::Store)?;

        let context_id = match &existing {
            Some(task) => {
                if task.status.state.is_terminal() {
                    return Err(A2AError::TaskTerminal {
                        id: task.id,
                        state: task.status.state,
                    });
                }
                if let Some(context_id) = params.message.context_id {
                    if context_id != task.context_id {
                        return Err(A2AError::InvalidParams(format!(
                            "contextId {} does not match task {} context {}",
                            context_id, task.id, task.context_id
                        )));
                    }
                }
                task.context_id
            }
            None => params.message.context_id.unwrap_or_else(Uuid::new_v4),
        };

        let message = params.message.clone().for_task(task_id, context_id);
        let task_manager = TaskManager::new(task_id, context_id, self.store.clone());
        task_manager.append_message(&message).await?;
        info!(
            "Request {}: message {} recorded on task {}",
            request_id, message.message_id, task_id
        );

        let registration = self.producers.register(task_id);
        let context = RequestContext {
            request_id: request_id.to_string(),
            task_id,
            context_id,
            message: Some(message),
            task: existing,
            cancellation: registration.token(),
        };
        Ok((task_manager, context, registration))
    }

    fn existing_task_context(
        &self,
        request_id: &str,
        task: Task,
    ) -> (TaskManager, RequestContext, Registration) {
        let registration = self.producers.register(task.id);
        let task_manager = TaskManager::new(task.id, task.context_id, self.store.clone());
        let context = RequestContext {
            request_id: request_id.to_string(),
            task_id: task.id,
            context_id: task.context_id,
            message: None,
            task: Some(task),
            cancellation: registration.token(),
        };
        (task_manager, context, registration)
    }

    /// Run an executor hook as an independent producer feeding `queue`
    fn start<F, Fut>(
        &self,
        label: &str,
        context: RequestContext,
        registration: Registration,
        queue: Arc<EventQueue>,
        hook: F,
    ) -> ProducerHandle
    where
        F: FnOnce(Arc<dyn AgentExecutor>, RequestContext, Arc<EventQueue>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("{}-{}-{}", label, context.request_id, context.task_id);
        let (task_id, context_id) = (context.task_id, context.context_id);
        let token = context.cancellation.clone();
        let run = hook(self.executor.clone(), context, queue.clone());

        debug!("Starting producer {}", name);
        spawn_producer(name, task_id, context_id, queue, token, async move {
            let _registration = registration;
            run.await
        })
    }
}

/// Yield every consumed event, then stop the producer.
///
/// Dropping the stream early cancels the producer through its handle.
fn drive(consumer: EventConsumer, producer: ProducerHandle) -> EventStream {
    Box::pin(stream! {
        {
            let events = consumer.consume_all();
            pin_mut!(events);
            while let Some(event) = events.next().await {
                yield event;
            }
        }
        debug!("Event stream ended, stopping producer {}", producer.name());
        producer.finish().await;
    })
}

#[async_trait]
impl RequestHandler for DefaultRequestHandler {
    async fn on_get_task(&self, params: TaskQueryParams) -> A2AResult<Task> {
        let task = self.load_task(params.id).await?;
        Ok(task.with_history_length(params.history_length))
    }

    async fn on_message_send(
        &self,
        request_id: &str,
        params: MessageSendParams,
    ) -> A2AResult<SendMessageResult> {
        let (task_manager, context, registration) =
            self.prepare_message(request_id, &params).await?;

        let queue = Arc::new(EventQueue::new());
        let producer = self.start(
            "agent-message-send",
            context,
            registration,
            queue.clone(),
            |executor, context, queue| async move {
                executor.on_message_send(context, queue).await
            },
        );

        let consumer = EventConsumer::new(queue, task_manager);
        let result = consumer.consume_final().await;
        producer.finish().await;

        let history_length = params.configuration.and_then(|c| c.history_length);
        Ok(match result? {
            SendMessageResult::Task(task) => {
                SendMessageResult::Task(task.with_history_length(history_length))
            }
            message => message,
        })
    }

    async fn on_message_stream(
        &self,
        request_id: &str,
        params: MessageSendParams,
    ) -> A2AResult<EventStream> {
        let (task_manager, context, registration) =
            self.prepare_message(request_id, &params).await?;

        let queue = Arc::new(EventQueue::new());
        let producer = self.start(
            "agent-message-stream",
            context,
            registration,
            queue.clone(),
            |executor, context, queue| async move {
                executor.on_message_stream(context, queue).await
            },
        );

        Ok(drive(EventConsumer::new(queue, task_manager), producer))
    }

    async fn on_cancel_task(&self, request_id: &str, params: TaskIdParams) -> A2AResult<Task> {
        let task = self.load_task(params.id).await?;
        self.producers.cancel(task.id);

        let (task_manager, context, registration) = self.existing_task_context(request_id, task);
        let queue = Arc::new(EventQueue::new());
        let producer = self.start(
            "agent-cancel",
            context,
            registration,
            queue.clone(),
            |executor, context, queue| async move { executor.on_cancel(context, queue).await },
        );

        let consumer = EventConsumer::new(queue, task_manager.clone());
        let result = consumer.consume_one().await;
        producer.finish().await;

        match result? {
            SendMessageResult::Task(task) => {
                info!("Task {} is {:?} after cancel", task.id, task.status.state);
                Ok(task)
            }
            SendMessageResult::Message(_) => task_manager
                .get_task()
                .await?
                .ok_or(A2AError::TaskNotFound(params.id)),
        }
    }

    async fn on_resubscribe_to_task(
        &self,
        request_id: &str,
        params: TaskIdParams,
    ) -> A2AResult<EventStream> {
        let task = self.load_task(params.id).await?;
        info!("Request {}: resubscribing to task {}", request_id, task.id);

        let (task_manager, context, registration) = self.existing_task_context(request_id, task);
        let queue = Arc::new(EventQueue::new());
        let producer = self.start(
            "agent-resubscribe",
            context,
            registration,
            queue.clone(),
            |executor, context, queue| async move {
                executor.on_resubscribe(context, queue).await
            },
        );

        Ok(drive(EventConsumer::new(queue, task_manager), producer))
    }
}
