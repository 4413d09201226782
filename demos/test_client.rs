use std::time::Duration;
use anyhow::{Context, Result};
use async_nats::{Client, ConnectOptions, Subject};
use futures::StreamExt;
use log::{error, info};
use serde_json::{json, Value};
use tokio::time::timeout;
use uuid::Uuid;

const SUBJECT: &str = "a2a.agent";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    info!("Starting A2A test client");

    info!("Connecting to NATS at nats://localhost:4222");
    let nats = async_nats::connect_with_options("nats://localhost:4222", ConnectOptions::default())
        .await?;

    test_get_agent_card(&nats).await?;
    let task_id = test_send_message(&nats).await?;
    test_get_task(&nats, &task_id).await?;
    test_stream_message(&nats).await?;
    test_cancel_finished_task(&nats, &task_id).await?;

    info!("All tests completed successfully!");
    Ok(())
}

fn rpc(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": method,
        "params": params
    })
}

fn user_message(text: &str) -> Value {
    json!({
        "message": {
            "messageId": Uuid::new_v4(),
            "role": "user",
            "parts": [{ "type": "text", "text": text }]
        }
    })
}

async fn test_get_agent_card(nats: &Client) -> Result<()> {
    info!("Testing agent/getCard...");
    let response = send_request(nats, &rpc("agent/getCard", json!({}))).await?;
    let agent = response
        .pointer("/result/agent")
        .context("Failed to get agent card")?;
    info!("Agent card: {}", agent);
    Ok(())
}

async fn test_send_message(nats: &Client) -> Result<String> {
    info!("Testing message/send...");
    let response = send_request(
        nats,
        &rpc("message/send", user_message("Find me a room in LA")),
    )
    .await?;

    let task = response.get("result").context("Missing result")?;
    let task_id = task
        .get("id")
        .and_then(Value::as_str)
        .context("Failed to extract task ID")?;
    info!(
        "Task {} is {}",
        task_id,
        task.pointer("/status/state").and_then(Value::as_str).unwrap_or("unknown")
    );
    Ok(task_id.to_string())
}

async fn test_get_task(nats: &Client, task_id: &str) -> Result<()> {
    info!("Testing tasks/get...");
    let response = send_request(
        nats,
        &rpc("tasks/get", json!({ "id": task_id, "historyLength": 1 })),
    )
    .await?;
    let artifacts = response
        .pointer("/result/artifacts")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    info!("Task {} has {} artifacts", task_id, artifacts);
    Ok(())
}

async fn test_stream_message(nats: &Client) -> Result<()> {
    info!("Testing message/stream...");
    let request = rpc("message/stream", user_message("stream these words back"));

    // Create a unique inbox for the streamed responses
    let inbox = nats.new_inbox();
    let mut subscription = nats.subscribe(Subject::from(inbox.clone())).await?;

    let payload = serde_json::to_vec(&request)?;
    nats.publish_with_reply(Subject::from(SUBJECT), Subject::from(inbox), payload.into())
        .await?;

    let mut event_count = 0;
    while let Some(msg) = timeout(Duration::from_secs(10), subscription.next()).await? {
        let response: Value = serde_json::from_slice(&msg.payload)?;
        if let Some(error) = response.get("error") {
            error!("Stream failed: {}", error);
            return Err(anyhow::anyhow!("Stream failed: {}", error));
        }

        let event = response.get("result").context("Missing result")?;
        event_count += 1;
        let kind = event.get("kind").and_then(Value::as_str).unwrap_or("unknown");
        info!("Received event #{}: {}", event_count, kind);

        let is_final = event.get("final").and_then(Value::as_bool).unwrap_or(false);
        if is_final || kind == "message" {
            break;
        }
    }

    info!("Received {} streaming events", event_count);
    Ok(())
}

async fn test_cancel_finished_task(nats: &Client, task_id: &str) -> Result<()> {
    info!("Testing tasks/cancel on a finished task...");
    let response = send_request(nats, &rpc("tasks/cancel", json!({ "id": task_id }))).await?;
    info!(
        "Task {} is {} after cancel",
        task_id,
        response
            .pointer("/result/status/state")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    );
    Ok(())
}

async fn send_request(nats: &Client, request: &Value) -> Result<Value> {
    // Create a unique inbox for the response
    let inbox = nats.new_inbox();
    let mut subscription = nats.subscribe(Subject::from(inbox.clone())).await?;

    let payload = serde_json::to_vec(request)?;
    nats.publish_with_reply(Subject::from(SUBJECT), Subject::from(inbox), payload.into())
        .await?;

    let msg = timeout(Duration::from_secs(10), subscription.next())
        .await?
        .context("No response received")?;
    let response: Value = serde_json::from_slice(&msg.payload)?;

    if let Some(error) = response.get("error") {
        error!("Error in response: {}", error);
        return Err(anyhow::anyhow!("Error in response: {}", error));
    }

    Ok(response)
}
