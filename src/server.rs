// src/server.rs

use std::sync::Arc;
use anyhow::Result;
use futures::StreamExt;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::error::{A2AError, A2AResult};
use crate::request_handler::RequestHandler;
use crate::transport::{create_handler, RpcReply, Transport};
use crate::types::{
    create_error_response, create_response, AgentCard, JsonRpcRequest, JsonRpcResponse,
};

/// Server for handling A2A requests
pub struct Server {
    handler: Arc<dyn RequestHandler>,
    agent: AgentCard,
    transport: Arc<dyn Transport>,
    runtime: Runtime,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a new Server instance
    pub(crate) fn new(
        handler: Arc<dyn RequestHandler>,
        agent: AgentCard,
        transport: Arc<dyn Transport>,
        runtime: Runtime,
    ) -> Self {
        Self {
            handler,
            agent,
            transport,
            runtime,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn agent(&self) -> &AgentCard {
        &self.agent
    }

    /// Token that stops [`Server::run_until_shutdown`] when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the server until Ctrl+C or until the shutdown handle is cancelled
    pub fn run_until_shutdown(self) -> Result<()> {
        self.runtime.block_on(async {
            self.transport.start().await?;

            let handler = self.handler.clone();
            let agent = self.agent.clone();
            let rpc_handler = create_handler(move |request: JsonRpcRequest| {
                let handler = handler.clone();
                let agent = agent.clone();
                async move { dispatch(handler, &agent, request).await }
            });

            let transport = self.transport.clone();
            let transport_handle = tokio::spawn(async move {
                if let Err(e) = transport.run(rpc_handler).await {
                    error!("Transport error: {}", e);
                }
            });

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = self.shutdown.cancelled() => {
                    info!("Received shutdown signal, shutting down...");
                }
            }

            transport_handle.abort();

            if let Err(e) = self.transport.stop().await {
                error!("Error stopping transport: {}", e);
            }

            info!("Server shutdown complete");
            Ok::<_, anyhow::Error>(())
        })
    }
}

fn parse_params<T: DeserializeOwned>(request: &JsonRpcRequest) -> A2AResult<T> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| A2AError::InvalidParams(format!("{} params: {}", request.method, e)))
}

fn respond<T: Serialize>(id: String, result: A2AResult<T>) -> JsonRpcResponse {
    match result.and_then(|value| serde_json::to_value(value).map_err(|e| A2AError::Internal(e.to_string()))) {
        Ok(value) => create_response(id, value),
        Err(e) => {
            if e.code() == -32603 {
                error!("Request {} failed: {}", id, e);
            } else {
                warn!("Request {} rejected: {}", id, e);
            }
            create_error_response(id, e.to_json_rpc_error())
        }
    }
}

fn stream_reply(id: String, events: A2AResult<crate::request_handler::EventStream>) -> RpcReply {
    match events {
        Ok(events) => RpcReply::Stream(
            events
                .map(move |event| respond(id.clone(), event))
                .boxed(),
        ),
        Err(e) => RpcReply::Single(respond::<()>(id, Err(e))),
    }
}

/// Route one JSON-RPC request to the request handler
pub async fn dispatch(
    handler: Arc<dyn RequestHandler>,
    agent: &AgentCard,
    request: JsonRpcRequest,
) -> RpcReply {
    let id = request.id.clone();
    match request.method.as_str() {
        "agent/getCard" => RpcReply::Single(create_response(id, json!({ "agent": agent }))),
        "message/send" => {
            let result = match parse_params(&request) {
                Ok(params) => handler.on_message_send(&id, params).await,
                Err(e) => Err(e),
            };
            RpcReply::Single(respond(id, result))
        }
        "message/stream" => {
            let events = match parse_params(&request) {
                Ok(params) => handler.on_message_stream(&id, params).await,
                Err(e) => Err(e),
            };
            stream_reply(id, events)
        }
        "tasks/get" => {
            let result = match parse_params(&request) {
                Ok(params) => handler.on_get_task(params).await,
                Err(e) => Err(e),
            };
            RpcReply::Single(respond(id, result))
        }
        "tasks/cancel" => {
            let result = match parse_params(&request) {
                Ok(params) => handler.on_cancel_task(&id, params).await,
                Err(e) => Err(e),
            };
            RpcReply::Single(respond(id, result))
        }
        "tasks/resubscribe" => {
            let events = match parse_params(&request) {
                Ok(params) => handler.on_resubscribe_to_task(&id, params).await,
                Err(e) => Err(e),
            };
            stream_reply(id, events)
        }
        "tasks/pushNotificationConfig/set" => {
            let result = match parse_params(&request) {
                Ok(params) => handler.on_set_task_push_notification_config(params).await,
                Err(e) => Err(e),
            };
            RpcReply::Single(respond(id, result))
        }
        "tasks/pushNotificationConfig/get" => {
            let result = match parse_params(&request) {
                Ok(params) => handler.on_get_task_push_notification_config(params).await,
                Err(e) => Err(e),
            };
            RpcReply::Single(respond(id, result))
        }
        _ => RpcReply::Single(respond::<()>(
            id,
            Err(A2AError::MethodNotFound(request.method.clone())),
        )),
    }
}
