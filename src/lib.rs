//! Task orchestration and event streaming for A2A (Agent-to-Agent) services.
//!
//! A request handler sits between inbound protocol requests and an agent
//! executor running as an independent task. The executor reports progress
//! as events on a per-request queue; a consumer applies each event to the
//! task, persists it and streams it back to the caller.
//!
//! The crate is modular, with components for:
//! - Task persistence (in-memory and Redis stores)
//! - Event queues, consumers and producer supervision
//! - Request handling (send, stream, cancel, resubscribe)
//! - Transport (NATS implementation provided) and server wiring

pub mod agent_executor;
pub mod config;
pub mod echo_agent;
pub mod error;
pub mod event_consumer;
pub mod event_queue;
pub mod producer;
pub mod redis_task_store;
pub mod request_handler;
pub mod server;
pub mod server_builder;
pub mod task_manager;
pub mod task_store;
pub mod transport;
pub mod types;

// Re-export commonly used items
pub use agent_executor::{AgentExecutor, RequestContext};
pub use config::ServerConfig;
pub use echo_agent::EchoAgentExecutor;
pub use error::{A2AError, A2AResult};
pub use event_consumer::EventConsumer;
pub use event_queue::EventQueue;
pub use redis_task_store::RedisTaskStore;
pub use request_handler::{DefaultRequestHandler, EventStream, RequestHandler};
pub use server::Server;
pub use server_builder::ServerBuilder;
pub use task_manager::TaskManager;
pub use task_store::{InMemoryTaskStore, TaskStore};
pub use transport::{Transport, TransportFactory};
pub use transport::nats::{NatsTransport, NatsTransportFactory};

// Re-export key types
pub use types::{
    AgentCard, Artifact, Event, JsonRpcRequest, JsonRpcResponse, Message, MessageSendParams, Part,
    Role, SendMessageResult, Task, TaskArtifactUpdateEvent, TaskIdParams, TaskQueryParams,
    TaskState, TaskStatus, TaskStatusUpdateEvent,
};
