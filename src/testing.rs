//! Test doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{LeibnizError, Result};
use crate::execution::{EventSink, ExecutionEvent};
use crate::loader::Embedder;
use crate::model::{CompletionRequest, ModelCaller};

/// Model caller that replays a fixed script of completions.
///
/// When the script is exhausted it fails like an unreachable backend, unless
/// built with [`ScriptedCaller::repeating`].
pub struct ScriptedCaller {
    script: Mutex<VecDeque<String>>,
    repeat: Option<String>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCaller {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(script.into_iter().map(Into::into).collect()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same completion.
    pub fn repeating(completion: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(completion.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }
}

#[async_trait]
impl ModelCaller for ScriptedCaller {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(request.clone());

        if let Some(next) = self.script.lock().expect("script lock poisoned").pop_front() {
            return Ok(next);
        }
        match &self.repeat {
            Some(completion) => Ok(completion.clone()),
            None => Err(LeibnizError::upstream("model", "script exhausted")),
        }
    }
}

/// Embedder returning canned vectors keyed by substring match.
pub struct FixedEmbedder {
    entries: Vec<(String, Vec<f32>)>,
    fallback: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(entries: Vec<(String, Vec<f32>)>, fallback: Vec<f32>) -> Self {
        Self { entries, fallback }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        for (key, vector) in &self.entries {
            if text.contains(key.as_str()) {
                return Ok(vector.clone());
            }
        }
        Ok(self.fallback.clone())
    }
}

/// An event sink that records everything it receives.
pub fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<ExecutionEvent>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink_target = Arc::clone(&collected);
    let sink: EventSink = Arc::new(move |event| {
        sink_target
            .lock()
            .expect("event sink lock poisoned")
            .push(event);
    });
    (sink, collected)
}
