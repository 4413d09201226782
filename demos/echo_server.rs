// demos/echo_server.rs

use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Result};
use async_trait::async_trait;
use log::info;
use tokio::runtime::Runtime;
use uuid::Uuid;

use a2a_orchestrator::{
    AgentExecutor, Artifact, EventQueue, Event, Message, NatsTransportFactory, RequestContext,
    Role, ServerBuilder, TaskArtifactUpdateEvent, TaskState, TaskStatus,
};

/// Books rooms by answering with a single artifact per request
struct RoomFinder;

#[async_trait]
impl AgentExecutor for RoomFinder {
    async fn on_message_send(&self, context: RequestContext, queue: Arc<EventQueue>) -> Result<()> {
        let request = context
            .message
            .as_ref()
            .map(Message::text_content)
            .unwrap_or_default();
        if request.is_empty() {
            bail!("Tell me where you need a room");
        }

        let searching = Message::text(Role::Agent, format!("Searching rooms for: {}", request))
            .for_task(context.task_id, context.context_id);
        queue.enqueue(context.status_update(
            TaskStatus::with_message(TaskState::Working, searching),
            false,
        ))?;

        tokio::time::sleep(Duration::from_millis(250)).await;
        if context.is_cancelled() {
            return Ok(());
        }

        queue.enqueue(Event::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: context.task_id,
            context_id: context.context_id,
            artifact: Artifact::text("booking", "Room 42 at The Standard, Downtown LA"),
            append: false,
            last_chunk: true,
        }))?;
        queue.enqueue(context.status_update(TaskStatus::new(TaskState::Completed), true))?;
        Ok(())
    }
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    info!("Starting room finder A2A server");

    // Create tokio runtime
    let runtime = Runtime::new()?;

    // Create server with NATS transport and the default in-memory task store
    let server = ServerBuilder::new()
        .with_agent_id(Uuid::new_v4())
        .with_agent_name("Room Finder")
        .with_agent_description("Finds and books hotel rooms")
        .with_executor(RoomFinder)
        .with_transport_factory(NatsTransportFactory::new(
            "nats://localhost:4222",
            "a2a.agent",
            Duration::from_secs(5),
        ))
        .with_runtime(runtime)
        .build()?;

    // Run server until shutdown signal
    server.run_until_shutdown()?;

    Ok(())
}
