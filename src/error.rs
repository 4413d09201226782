use thiserror::Error;
use uuid::Uuid;

use crate::types::{JsonRpcError, TaskState};

/// Errors surfaced to callers of the request handler
#[derive(Debug, Error)]
pub enum A2AError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task {id} is in terminal state {state:?}")]
    TaskTerminal { id: Uuid, state: TaskState },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Agent did not return any response")]
    NoAgentResponse,

    #[error("Event queue is closed")]
    QueueClosed,

    #[error("Task store error: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type A2AResult<T> = Result<T, A2AError>;

impl A2AError {
    /// JSON-RPC error code for this error
    pub fn code(&self) -> i32 {
        match self {
            A2AError::TaskNotFound(_) => -32001,
            A2AError::TaskTerminal { .. } => -32002,
            A2AError::UnsupportedOperation(_) => -32004,
            A2AError::InvalidParams(_) => -32602,
            A2AError::MethodNotFound(_) => -32601,
            A2AError::NoAgentResponse
            | A2AError::QueueClosed
            | A2AError::Store(_)
            | A2AError::Internal(_) => -32603,
        }
    }

    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<serde_json::Error> for A2AError {
    fn from(err: serde_json::Error) -> Self {
        A2AError::InvalidParams(err.to_string())
    }
}
