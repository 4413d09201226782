// src/server_builder.rs

use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::agent_executor::AgentExecutor;
use crate::request_handler::DefaultRequestHandler;
use crate::server::Server;
use crate::task_store::{InMemoryTaskStore, TaskStore};
use crate::transport::TransportFactory;
use crate::types::{AgentCapabilities, AgentCard};

/// Builder for Server
pub struct ServerBuilder {
    executor: Option<Arc<dyn AgentExecutor>>,
    task_store: Option<Arc<dyn TaskStore>>,
    agent_id: Option<Uuid>,
    agent_name: Option<String>,
    agent_description: Option<String>,
    transport_factory: Option<Box<dyn TransportFactory>>,
    runtime: Option<Runtime>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            executor: None,
            task_store: None,
            agent_id: None,
            agent_name: None,
            agent_description: None,
            transport_factory: None,
            runtime: None,
        }
    }

    /// Set the agent executor doing the actual work
    pub fn with_executor<E>(mut self, executor: E) -> Self
    where
        E: AgentExecutor,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Set a custom task store (like RedisTaskStore)
    pub fn with_task_store<T>(mut self, task_store: T) -> Self
    where
        T: TaskStore,
    {
        self.task_store = Some(Arc::new(task_store));
        self
    }

    /// Set the agent ID
    pub fn with_agent_id(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Set the agent name
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Set the agent description
    pub fn with_agent_description(mut self, description: impl Into<String>) -> Self {
        self.agent_description = Some(description.into());
        self
    }

    /// Set the transport factory
    pub fn with_transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.transport_factory = Some(Box::new(factory));
        self
    }

    /// Set the runtime
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn agent_card(&self) -> AgentCard {
        AgentCard {
            id: self.agent_id.unwrap_or_else(Uuid::new_v4),
            name: self
                .agent_name
                .clone()
                .unwrap_or_else(|| "A2A Agent".to_string()),
            description: self
                .agent_description
                .clone()
                .unwrap_or_else(|| "A generic A2A agent implementation".to_string()),
            metadata: None,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            capabilities: AgentCapabilities {
                streaming: true,
                push_notifications: false,
            },
        }
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        let agent = self.agent_card();

        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("Agent executor is required"))?;

        let transport_factory = self
            .transport_factory
            .ok_or_else(|| anyhow::anyhow!("Transport factory is required"))?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Runtime::new().context("Failed to create Tokio runtime")?,
        };

        let task_store = self
            .task_store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));

        let handler = Arc::new(DefaultRequestHandler::new(executor, task_store));
        let transport = transport_factory.create()?;

        Ok(Server::new(handler, agent, transport, runtime))
    }
}
