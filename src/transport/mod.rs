use std::sync::Arc;
use async_trait::async_trait;
use anyhow::Result;
use futures::stream::BoxStream;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

pub mod nats;

/// What a handler produces for one request
pub enum RpcReply {
    /// A single response
    Single(JsonRpcResponse),
    /// One response per event, to be delivered as soon as each is ready
    Stream(BoxStream<'static, JsonRpcResponse>),
}

// Object-safe handler so transports can hold it behind an Arc
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: JsonRpcRequest) -> RpcReply;
}

// Implement RpcHandler for closures
struct FunctionHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> RpcHandler for FunctionHandler<F>
where
    F: Fn(JsonRpcRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = RpcReply> + Send + 'static,
{
    async fn handle(&self, request: JsonRpcRequest) -> RpcReply {
        (self.f)(request).await
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the transport, listening for incoming requests
    async fn start(&self) -> Result<()>;

    /// Stop the transport, terminating all connections
    async fn stop(&self) -> Result<()>;

    /// Run the transport with the provided request handler
    async fn run(&self, handler: Arc<dyn RpcHandler>) -> Result<()>;
}

/// Factory trait for creating transport instances
pub trait TransportFactory: Send + Sync {
    /// Create a new transport instance
    fn create(&self) -> Result<Arc<dyn Transport>>;
}

// Helper function to create an RpcHandler from a closure
pub fn create_handler<F, Fut>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(JsonRpcRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = RpcReply> + Send + 'static,
{
    Arc::new(FunctionHandler { f })
}
