//! The reason/act/observe loop, as a pure function.
//!
//! Everything the loop needs arrives in the request: model, system prompt,
//! tool snapshot, budgets, cancellation. No process-wide agent state is
//! mutated, so concurrent executions need no coordination here.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LeibnizError;
use crate::model::{CompletionRequest, ModelCaller};
use crate::tools::ToolSnapshot;

use super::events::{EventSink, ExecutionEvent};
use super::parser::{parse_completion, Directive};
use super::{ExecutionStatus, Step, ToolCall, ToolResult};

/// Everything one loop run needs.
pub struct LoopRequest {
    pub execution_id: String,
    pub caller: Arc<dyn ModelCaller>,
    pub model: Option<String>,
    pub system_prompt: String,
    pub tools: ToolSnapshot,
    /// The task text; evaluated retries arrive with prior-attempt feedback
    /// already appended.
    pub task: String,
    pub max_steps: u32,
    pub cancel: CancellationToken,
    pub deadline: Instant,
    pub sink: Option<EventSink>,
}

/// What the loop produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub status: ExecutionStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<Step>,
    pub tools_used: Vec<String>,
}

/// Drive the loop until a terminal condition.
///
/// Stop conditions in priority order: cancellation, deadline, step budget,
/// terminal answer. A tool error is an observation for the model, never
/// fatal to the run.
pub async fn run_loop(request: LoopRequest) -> LoopOutcome {
    let mut steps: Vec<Step> = Vec::new();
    let mut tools_used: Vec<String> = Vec::new();

    let emit = |event: ExecutionEvent| {
        if let Some(sink) = &request.sink {
            sink(event);
        }
    };

    loop {
        if request.cancel.is_cancelled() {
            return finished(ExecutionStatus::Cancelled, None, None, steps, tools_used);
        }
        if Instant::now() >= request.deadline {
            return finished(
                ExecutionStatus::Error,
                None,
                Some("execution timed out".into()),
                steps,
                tools_used,
            );
        }
        if steps.len() as u32 >= request.max_steps {
            return finished(
                ExecutionStatus::Error,
                None,
                Some(format!("step limit reached after {} steps", steps.len())),
                steps,
                tools_used,
            );
        }

        let completion_request = CompletionRequest {
            model: request.model.clone(),
            system: Some(request.system_prompt.clone()),
            prompt: build_prompt(&request.task, &request.tools, &steps),
        };

        let completion = tokio::select! {
            _ = request.cancel.cancelled() => {
                return finished(ExecutionStatus::Cancelled, None, None, steps, tools_used);
            }
            _ = tokio::time::sleep_until(request.deadline) => {
                return finished(
                    ExecutionStatus::Error,
                    None,
                    Some("execution timed out".into()),
                    steps,
                    tools_used,
                );
            }
            result = request.caller.complete(&completion_request) => match result {
                Ok(completion) => completion,
                Err(e) => {
                    return finished(
                        ExecutionStatus::Error,
                        None,
                        Some(format!("model call failed: {e}")),
                        steps,
                        tools_used,
                    );
                }
            }
        };

        let index = steps.len();
        match parse_completion(&completion) {
            Directive::Final(text) => {
                emit(ExecutionEvent::Thinking {
                    execution_id: request.execution_id.clone(),
                    step: index,
                    text: completion.clone(),
                });
                steps.push(Step {
                    index,
                    reasoning: completion.clone(),
                    action: "final_answer".into(),
                    tool_call: None,
                    tool_result: None,
                    timestamp: Utc::now(),
                });
                emit(ExecutionEvent::Response {
                    execution_id: request.execution_id.clone(),
                    text: text.clone(),
                });
                return finished(ExecutionStatus::Completed, Some(text), None, steps, tools_used);
            }
            Directive::ToolCall { name, params } => {
                emit(ExecutionEvent::Thinking {
                    execution_id: request.execution_id.clone(),
                    step: index,
                    text: completion.clone(),
                });
                emit(ExecutionEvent::ToolCallStarted {
                    execution_id: request.execution_id.clone(),
                    step: index,
                    tool: name.clone(),
                    params: params.clone(),
                });

                let invocation = request
                    .tools
                    .invoke(&name, params.clone(), &request.cancel, Some(request.deadline))
                    .await;

                if !tools_used.contains(&name) {
                    tools_used.push(name.clone());
                }

                let (tool_result, terminal) = match invocation {
                    Ok(value) => (ToolResult::ok(value), None),
                    Err(LeibnizError::Cancelled) => (
                        ToolResult::err("cancelled"),
                        Some((ExecutionStatus::Cancelled, None)),
                    ),
                    Err(LeibnizError::Timeout(_)) => (
                        ToolResult::err("timed out"),
                        Some((ExecutionStatus::Error, Some("execution timed out".to_string()))),
                    ),
                    Err(err) => (ToolResult::err(err.to_string()), None),
                };

                emit(ExecutionEvent::ToolCallCompleted {
                    execution_id: request.execution_id.clone(),
                    step: index,
                    tool: name.clone(),
                    is_error: tool_result.error.is_some(),
                });

                steps.push(Step {
                    index,
                    reasoning: completion,
                    action: format!("call {name}"),
                    tool_call: Some(ToolCall { name, params }),
                    tool_result: Some(tool_result),
                    timestamp: Utc::now(),
                });

                if let Some((status, error)) = terminal {
                    return finished(status, None, error, steps, tools_used);
                }
            }
        }
    }
}

fn finished(
    status: ExecutionStatus,
    result: Option<String>,
    error: Option<String>,
    steps: Vec<Step>,
    tools_used: Vec<String>,
) -> LoopOutcome {
    LoopOutcome {
        status,
        result,
        error,
        steps,
        tools_used,
    }
}

fn build_prompt(task: &str, tools: &ToolSnapshot, steps: &[Step]) -> String {
    let mut prompt = String::new();

    if tools.is_empty() {
        prompt.push_str("No tools are available. Reply with your final answer.\n\n");
    } else {
        prompt.push_str("You can use the following tools:\n");
        prompt.push_str(&tools.catalog());
        prompt.push_str(
            "\nTo use a tool, reply with a single JSON object: \
             {\"tool\": \"<name>\", \"params\": { ... }}.\n\
             When you are done, reply with the final answer as plain text.\n\n",
        );
    }

    let _ = writeln!(prompt, "Task: {task}");

    if !steps.is_empty() {
        prompt.push_str("\nProgress so far:\n");
        for step in steps {
            match (&step.tool_call, &step.tool_result) {
                (Some(call), Some(result)) => {
                    let observation = match (&result.value, &result.error) {
                        (Some(value), _) => value.to_string(),
                        (None, Some(error)) => format!("error: {error}"),
                        (None, None) => "pending".to_string(),
                    };
                    let _ = writeln!(
                        prompt,
                        "Step {}: called {} with {} -> {}",
                        step.index, call.name, call.params, observation
                    );
                }
                _ => {
                    let first_line = step.reasoning.lines().next().unwrap_or("");
                    let _ = writeln!(prompt, "Step {}: {}", step.index, first_line);
                }
            }
        }
        prompt.push_str("\nContinue: call another tool or give the final answer.\n");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCaller;
    use crate::tools::{builtin, ToolRegistry};
    use std::time::Duration;

    fn calculator_snapshot() -> ToolSnapshot {
        let registry = ToolRegistry::new();
        registry.register(builtin::calculator()).unwrap();
        registry.snapshot()
    }

    fn loop_request(caller: ScriptedCaller, tools: ToolSnapshot, max_steps: u32) -> LoopRequest {
        LoopRequest {
            execution_id: "exec-1".into(),
            caller: Arc::new(caller),
            model: None,
            system_prompt: "Answer with a number.".into(),
            tools,
            task: "what is 2+2?".into(),
            max_steps,
            cancel: CancellationToken::new(),
            deadline: Instant::now() + Duration::from_secs(30),
            sink: None,
        }
    }

    #[tokio::test]
    async fn a_tool_call_then_final_answer_completes() {
        let caller = ScriptedCaller::new([
            r#"{"tool": "calculator", "params": {"expression": "2+2"}}"#,
            "4",
        ]);

        let outcome = run_loop(loop_request(caller, calculator_snapshot(), 8)).await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.result.as_deref(), Some("4"));
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.tools_used, vec!["calculator".to_string()]);

        let first = &outcome.steps[0];
        let result = first.tool_result.as_ref().expect("tool result should be set");
        assert_eq!(result.value, Some(serde_json::json!(4)));
    }

    #[tokio::test]
    async fn the_step_budget_stops_a_loop_that_never_finishes() {
        let caller = ScriptedCaller::repeating(
            r#"{"tool": "calculator", "params": {"expression": "1+1"}}"#,
        );

        let outcome = run_loop(loop_request(caller, calculator_snapshot(), 2)).await;

        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome.error.as_deref().unwrap_or("").contains("step"));
        assert_eq!(outcome.steps.len(), 2);
    }

    #[tokio::test]
    async fn a_tool_error_is_an_observation_not_a_failure() {
        let caller = ScriptedCaller::new([
            r#"{"tool": "calculator", "params": {"expression": "not math"}}"#,
            "I could not compute that.",
        ]);

        let outcome = run_loop(loop_request(caller, calculator_snapshot(), 8)).await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        let first = &outcome.steps[0];
        assert!(first
            .tool_result
            .as_ref()
            .and_then(|r| r.error.as_deref())
            .is_some());
        assert_eq!(outcome.tools_used, vec!["calculator".to_string()]);
    }

    #[tokio::test]
    async fn an_unknown_tool_is_also_an_observation() {
        let caller = ScriptedCaller::new([
            r#"{"tool": "nonexistent", "params": {}}"#,
            "Giving up on that tool.",
        ]);

        let outcome = run_loop(loop_request(caller, calculator_snapshot(), 8)).await;

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        let error = outcome.steps[0]
            .tool_result
            .as_ref()
            .and_then(|r| r.error.clone())
            .expect("error should be recorded");
        assert!(error.contains("nonexistent"));
    }

    #[tokio::test]
    async fn cancellation_beats_everything_else() {
        let caller = ScriptedCaller::repeating("irrelevant");
        let mut request = loop_request(caller, calculator_snapshot(), 8);
        request.cancel.cancel();

        let outcome = run_loop(request).await;

        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert!(outcome.steps.is_empty());
    }

    #[tokio::test]
    async fn an_expired_deadline_is_a_timeout_error() {
        let caller = ScriptedCaller::repeating("irrelevant");
        let mut request = loop_request(caller, calculator_snapshot(), 8);
        request.deadline = Instant::now() - Duration::from_millis(1);

        let outcome = run_loop(request).await;

        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome.error.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn a_model_failure_ends_the_run_with_an_error() {
        let caller = ScriptedCaller::new(Vec::<String>::new());

        let outcome = run_loop(loop_request(caller, calculator_snapshot(), 8)).await;

        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or("")
            .contains("model call failed"));
    }

    #[tokio::test]
    async fn events_are_emitted_in_step_order() {
        use crate::execution::ExecutionEvent;
        use crate::testing::collecting_sink;

        let caller = ScriptedCaller::new([
            r#"{"tool": "calculator", "params": {"expression": "2+2"}}"#,
            "4",
        ]);
        let (sink, collected) = collecting_sink();
        let mut request = loop_request(caller, calculator_snapshot(), 8);
        request.sink = Some(sink);

        let outcome = run_loop(request).await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);

        let events = collected.lock().expect("event sink lock poisoned").clone();
        let kinds: Vec<&str> = events
            .iter()
            .map(|event| match event {
                ExecutionEvent::Thinking { .. } => "thinking",
                ExecutionEvent::ToolCallStarted { .. } => "tool_start",
                ExecutionEvent::ToolCallCompleted { .. } => "tool_end",
                ExecutionEvent::Response { .. } => "response",
                ExecutionEvent::Final { .. } => "final",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["thinking", "tool_start", "tool_end", "thinking", "response"]
        );
    }

    #[tokio::test]
    async fn dense_step_indices_start_at_zero() {
        let caller = ScriptedCaller::new([
            r#"{"tool": "calculator", "params": {"expression": "1+1"}}"#,
            r#"{"tool": "calculator", "params": {"expression": "2+2"}}"#,
            "done",
        ]);

        let outcome = run_loop(loop_request(caller, calculator_snapshot(), 8)).await;

        let indices: Vec<usize> = outcome.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
