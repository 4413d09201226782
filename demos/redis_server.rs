// demos/redis_server.rs

use std::time::Duration;
use anyhow::Result;
use log::{info, warn};
use uuid::Uuid;

use a2a_orchestrator::{EchoAgentExecutor, NatsTransportFactory, RedisTaskStore, ServerBuilder};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    info!("Starting A2A server example with Redis persistence");

    // Make sure Redis is running at localhost:6379 first!
    let task_store = RedisTaskStore::with_prefix("redis://localhost:6379", "a2a:demo:task")?;

    // Create tokio runtime
    let runtime = tokio::runtime::Runtime::new()?;

    // Drop finished tasks older than a week before serving
    match runtime.block_on(task_store.cleanup_old_tasks(7)) {
        Ok(removed) => info!("Removed {} finished tasks", removed),
        Err(e) => warn!("Task cleanup failed: {}", e),
    }

    // Create server with NATS transport and Redis task store
    let server = ServerBuilder::new()
        .with_agent_id(Uuid::new_v4())
        .with_agent_name("Redis-backed A2A Agent")
        .with_agent_description("An example A2A agent with Redis persistence")
        .with_executor(EchoAgentExecutor::default())
        .with_task_store(task_store)
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
