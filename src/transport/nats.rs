use std::{sync::Arc, time::Duration};
use anyhow::{Context, Result};
use async_nats::{Client, ConnectOptions, Subject};
use futures::StreamExt;
use log::{debug, error, info};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::types::{create_error_response, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{RpcHandler, RpcReply, Transport};

/// Transport implementation using NATS request/reply subjects
pub struct NatsTransport {
    client: Mutex<Option<Client>>,
    url: String,
    subject: String,
    connect_timeout: Duration,
}

impl NatsTransport {
    /// Create a new NatsTransport
    pub fn new(url: &str, subject: &str, connect_timeout: Duration) -> Self {
        Self {
            client: Mutex::new(None),
            url: url.to_string(),
            subject: subject.to_string(),
            connect_timeout,
        }
    }

    /// Connect to NATS server
    async fn connect(&self) -> Result<Client> {
        let mut client_guard = self.client.lock().await;

        if let Some(client) = &*client_guard {
            return Ok(client.clone());
        }

        debug!("Connecting to NATS at {}", self.url);
        let options = ConnectOptions::default();

        let connect_fut = async_nats::connect_with_options(&self.url, options);
        let client = timeout(self.connect_timeout, connect_fut)
            .await
            .context("NATS connection timeout")?
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS at {}", self.url);
        *client_guard = Some(client.clone());

        Ok(client)
    }
}

async fn publish(client: &Client, reply_subject: &str, response: &JsonRpcResponse) -> Result<()> {
    client
        .publish(
            Subject::from(reply_subject.to_string()),
            serde_json::to_vec(response)?.into(),
        )
        .await
        .context("Failed to publish response")?;
    Ok(())
}

/// Deliver a handler reply, publishing streamed responses one at a time
async fn deliver(client: Client, reply_subject: String, reply: RpcReply) {
    match reply {
        RpcReply::Single(response) => {
            if let Err(e) = publish(&client, &reply_subject, &response).await {
                error!("Failed to send response: {}", e);
            }
        }
        RpcReply::Stream(mut responses) => {
            let mut published = 0usize;
            while let Some(response) = responses.next().await {
                if let Err(e) = publish(&client, &reply_subject, &response).await {
                    // Dropping the stream stops the agent producing for it
                    error!("Failed to publish streaming response, abandoning stream: {}", e);
                    return;
                }
                published += 1;
            }
            debug!("Streamed {} responses to {}", published, reply_subject);
        }
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn start(&self) -> Result<()> {
        self.connect().await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut client_guard = self.client.lock().await;
        if let Some(client) = client_guard.take() {
            if let Err(e) = client.flush().await {
                error!("Failed to flush NATS connection: {}", e);
            }
            info!("Closed NATS connection");
        }
        Ok(())
    }

    async fn run(&self, handler: Arc<dyn RpcHandler>) -> Result<()> {
        let client = self.connect().await?;
        let subject = Subject::from(self.subject.clone());

        info!("Subscribing to {}", self.subject);
        let mut subscription = client.subscribe(subject).await?;

        while let Some(msg) = subscription.next().await {
            let reply_subject = match msg.reply {
                Some(subject) => subject.to_string(),
                None => {
                    debug!("Received message without reply subject, skipping");
                    continue;
                }
            };

            let request: JsonRpcRequest = match serde_json::from_slice(&msg.payload) {
                Ok(req) => req,
                Err(e) => {
                    error!("Failed to parse JSON-RPC request: {}", e);

                    let error_response = create_error_response(
                        "null".to_string(),
                        JsonRpcError {
                            code: -32700,
                            message: "Parse error".to_string(),
                            data: Some(json!({ "error": e.to_string() })),
                        },
                    );
                    if let Err(e) = publish(&client, &reply_subject, &error_response).await {
                        error!("Failed to send error response: {}", e);
                    }

                    continue;
                }
            };

            debug!("Received {} request {}", request.method, request.id);
            let handler = handler.clone();
            let client = client.clone();

            // Each request gets its own task so a long stream never blocks the subscription
            tokio::spawn(async move {
                let reply = handler.handle(request).await;
                deliver(client, reply_subject, reply).await;
            });
        }

        Ok(())
    }
}

/// Factory for creating NatsTransport instances
pub struct NatsTransportFactory {
    url: String,
    subject: String,
    connect_timeout: Duration,
}

impl NatsTransportFactory {
    /// Create a new NatsTransportFactory
    pub fn new(url: &str, subject: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            subject: subject.to_string(),
            connect_timeout,
        }
    }
}

impl crate::transport::TransportFactory for NatsTransportFactory {
    fn create(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(NatsTransport::new(
            &self.url,
            &self.subject,
            self.connect_timeout,
        )))
    }
}
