//! Streaming events emitted while an execution runs.

use std::sync::Arc;

use serde::Serialize;

use super::ExecutionStatus;

/// One chunk of a streamed execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Model reasoning ahead of an action.
    Thinking {
        execution_id: String,
        step: usize,
        text: String,
    },
    ToolCallStarted {
        execution_id: String,
        step: usize,
        tool: String,
        params: serde_json::Value,
    },
    ToolCallCompleted {
        execution_id: String,
        step: usize,
        tool: String,
        is_error: bool,
    },
    /// The terminal answer text.
    Response {
        execution_id: String,
        text: String,
    },
    /// Always the last chunk of a stream.
    Final {
        execution_id: String,
        status: ExecutionStatus,
        result: Option<String>,
        error: Option<String>,
    },
}

/// Callback receiving execution events.
pub type EventSink = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;
