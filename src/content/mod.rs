//! Content-processor client: optional pre/post hooks around the model.
//!
//! The processor is a nice-to-have collaborator. Every call degrades open:
//! disabled or unreachable means pass-through. Only an explicit
//! `blocked = true` stops an execution (the coordinator maps it to a
//! permission error).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ContentProcessorConfig;

/// Caller-supplied processing options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessOptions {
    pub skip_pre: bool,
    pub skip_post: bool,
    pub dry_run: bool,
    pub debug: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    request_id: &'a str,
    pipeline_id: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
    metadata: &'a HashMap<String, String>,
    options: &'a ProcessOptions,
}

/// One handler's trace in the audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Result of a pre or post processing call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub processed_prompt: Option<String>,
    #[serde(default)]
    pub processed_response: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

impl ProcessResponse {
    fn pass_through(prompt: &str, response: Option<&str>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            processed_prompt: Some(prompt.to_string()),
            processed_response: response.map(str::to_string),
            ..Self::default()
        }
    }

    /// The prompt to continue with after a pre call.
    pub fn effective_prompt<'a>(&'a self, original: &'a str) -> &'a str {
        self.processed_prompt.as_deref().unwrap_or(original)
    }

    /// The response to continue with after a post call.
    pub fn effective_response<'a>(&'a self, original: &'a str) -> &'a str {
        self.processed_response.as_deref().unwrap_or(original)
    }
}

/// Client for the content-processing side service.
pub struct ContentProcessorClient {
    enabled: bool,
    base_url: String,
    default_pipeline: String,
    client: reqwest::Client,
}

impl ContentProcessorClient {
    pub fn new(config: &ContentProcessorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            enabled: config.enabled && !config.base_url.is_empty(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_pipeline: config.default_pipeline.clone(),
            client,
        }
    }

    /// A permanently pass-through client.
    pub fn disabled() -> Self {
        Self::new(&ContentProcessorConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Process a prompt before the model sees it.
    pub async fn process_pre(
        &self,
        prompt: &str,
        pipeline: Option<&str>,
        metadata: &HashMap<String, String>,
        options: &ProcessOptions,
    ) -> ProcessResponse {
        if !self.enabled || options.skip_pre {
            return ProcessResponse::pass_through(prompt, None);
        }
        self.call("pre", prompt, None, pipeline, metadata, options)
            .await
    }

    /// Process a model response before it reaches the caller.
    pub async fn process_post(
        &self,
        prompt: &str,
        response: &str,
        pipeline: Option<&str>,
        metadata: &HashMap<String, String>,
        options: &ProcessOptions,
    ) -> ProcessResponse {
        if !self.enabled || options.skip_post {
            return ProcessResponse::pass_through(prompt, Some(response));
        }
        self.call("post", prompt, Some(response), pipeline, metadata, options)
            .await
    }

    async fn call(
        &self,
        phase: &str,
        prompt: &str,
        response: Option<&str>,
        pipeline: Option<&str>,
        metadata: &HashMap<String, String>,
        options: &ProcessOptions,
    ) -> ProcessResponse {
        let request_id = Uuid::new_v4().to_string();
        let payload = ProcessRequest {
            request_id: &request_id,
            pipeline_id: pipeline.unwrap_or(&self.default_pipeline),
            prompt,
            response,
            metadata,
            options,
        };

        let url = format!("{}/process/{phase}", self.base_url);
        let sent = self.client.post(&url).json(&payload).send().await;

        match sent {
            Ok(http) if http.status().is_success() => match http.json::<ProcessResponse>().await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::warn!(phase, error = %e, "content processor reply undecodable, passing through");
                    ProcessResponse::pass_through(prompt, response)
                }
            },
            Ok(http) => {
                tracing::warn!(phase, status = %http.status(), "content processor rejected the call, passing through");
                ProcessResponse::pass_through(prompt, response)
            }
            Err(e) => {
                tracing::warn!(phase, error = %e, "content processor unreachable, passing through");
                ProcessResponse::pass_through(prompt, response)
            }
        }
    }
}
