//! Model caller — the single point of language-model coupling.

pub mod http;

pub use http::HttpCaller;

use async_trait::async_trait;

use crate::error::Result;

/// One completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Model name; `None` uses the backend's configured default.
    pub model: Option<String>,
    /// Optional system prompt.
    pub system: Option<String>,
    /// The prompt text.
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Abstract completion operation: given a prompt, produce a completion.
///
/// Everything that talks to a language model goes through this trait; the
/// agent loop, the evaluator, and selection embeddings never couple to a
/// concrete backend.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
