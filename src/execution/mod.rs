//! Execution records: the durable trace of one agent run.

pub mod events;
pub mod parser;
pub mod runner;

pub use events::{EventSink, ExecutionEvent};
pub use parser::{parse_completion, Directive};
pub use runner::{run_loop, LoopOutcome, LoopRequest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::eval::EvaluationResult;

/// Lifecycle status of an execution.
///
/// Progresses monotonically from `Running` to exactly one terminal state
/// (`AwaitingConfirmation` may still complete or cancel).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    AwaitingConfirmation,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Whether moving to `next` respects the monotonic lifecycle.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match self {
            Self::Running => next != Self::Running,
            Self::AwaitingConfirmation => {
                matches!(next, Self::Completed | Self::Cancelled | Self::Error)
            }
            _ => false,
        }
    }
}

/// A tool invocation recorded on a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub params: serde_json::Value,
}

/// The observation a tool produced: a value or an error string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(error.into()),
        }
    }
}

/// One iteration of the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub reasoning: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

/// One agent run from request to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub agent_id: String,
    pub request: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Names of tools used in at least one step, deduplicated, insertion-ordered.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Attempts made (1 for plain runs, up to `max_iterations` when evaluated).
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub evaluation_results: Vec<EvaluationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_quality_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionRecord {
    /// A fresh running record with a generated id.
    pub fn new(agent_id: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            request: request.into(),
            status: ExecutionStatus::Running,
            result: None,
            error: None,
            steps: Vec::new(),
            tools_used: Vec::new(),
            iterations: 0,
            evaluation_results: Vec::new(),
            final_quality_score: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Move to a terminal (or confirmation) state, refusing reverse
    /// transitions. Returns whether the transition was applied.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            let now = Utc::now();
            self.completed_at = Some(now);
            self.duration_ms = Some(
                (now - self.started_at)
                    .num_milliseconds()
                    .max(0) as u64,
            );
        }
        true
    }
}
