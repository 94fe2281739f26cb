//! HTTP model caller for OpenAI-compatible chat-completion backends.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ModelConfig;
use crate::error::{LeibnizError, Result};
use crate::util::retry::RetryPolicy;

use super::{CompletionRequest, ModelCaller};

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Calls a `/chat/completions` endpoint over HTTP.
pub struct HttpCaller {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    retry: RetryPolicy,
}

impl HttpCaller {
    /// Create a caller from model configuration.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy (tests use [`RetryPolicy::none`]).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn call_once(&self, request: &CompletionRequest) -> Result<String> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "messages": messages }));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LeibnizError::Timeout(0)
            } else {
                LeibnizError::upstream("model", e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LeibnizError::upstream(
                "model",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: ChatResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LeibnizError::upstream("model", "response carried no choices"))?;

        Ok(choice.message.content)
    }
}

#[async_trait]
impl ModelCaller for HttpCaller {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.retry.execute(|| self.call_once(request)).await
    }
}
