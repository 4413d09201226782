use anyhow::Result;
use log::info;
use tokio::runtime::Runtime;
use uuid::Uuid;

use a2a_orchestrator::{
    EchoAgentExecutor, NatsTransportFactory, RedisTaskStore, ServerBuilder, ServerConfig,
};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let config = ServerConfig::from_env()?;
    info!("Starting A2A server on {} ({})", config.subject, config.nats_url);

    let runtime = Runtime::new()?;

    let mut builder = ServerBuilder::new()
        .with_agent_id(Uuid::new_v4())
        .with_agent_name(config.agent_name.clone())
        .with_agent_description(config.agent_description.clone())
        .with_executor(EchoAgentExecutor::new(config.agent_step_delay))
        .with_transport_factory(NatsTransportFactory::new(
            &config.nats_url,
            &config.subject,
            config.connect_timeout,
        ))
        .with_runtime(runtime);

    if let Some(redis_url) = &config.redis_url {
        info!("Persisting tasks in Redis at {}", redis_url);
        builder = builder.with_task_store(RedisTaskStore::new(redis_url)?);
    }

    let server = builder.build()?;

    // Run server until shutdown signal
    server.run_until_shutdown()?;

    Ok(())
}
