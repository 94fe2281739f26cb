//! Agent definitions: named, tool-equipped personas.

pub mod file;

pub use file::{parse_agent_file, write_agent_file};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LeibnizError, Result};

/// Reserved id of the always-present default agent.
pub const DEFAULT_AGENT_ID: &str = "default";

/// Id of the built-in web-research agent.
pub const WEB_RESEARCHER_ID: &str = "web-researcher";

/// How many characters of the system prompt feed the selection descriptor.
const DESCRIPTOR_PROMPT_CHARS: usize = 512;

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// One evaluation criterion the judge grades against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriterion {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Evaluation settings embedded in an agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "EvaluationSpec::default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub criteria: Vec<EvaluationCriterion>,
}

impl EvaluationSpec {
    fn default_max_iterations() -> u32 {
        3
    }
}

/// A named, tool-equipped persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Ordered tool names; empty means "every registered tool".
    #[serde(default)]
    pub tools: Vec<String>,
    /// Target model; `None` uses the backend default.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-execution step budget.
    pub max_steps: u32,
    /// Per-execution wall-clock budget.
    #[serde(with = "duration_millis", rename = "timeout_ms")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentDefinition {
    /// Create a definition with defaults for everything but id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            tools: Vec::new(),
            model: None,
            max_steps: 8,
            timeout: Duration::from_secs(120),
            evaluation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enforce the definition invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LeibnizError::InvalidArgument("agent id must not be empty".into()));
        }
        if self.max_steps == 0 {
            return Err(LeibnizError::InvalidArgument(format!(
                "agent '{}': max_steps must be at least 1",
                self.id
            )));
        }
        if self.timeout.is_zero() {
            return Err(LeibnizError::InvalidArgument(format!(
                "agent '{}': timeout must be positive",
                self.id
            )));
        }
        Ok(())
    }

    /// Descriptor string embedded for similarity selection.
    pub fn descriptor(&self) -> String {
        let prompt_head: String = self
            .system_prompt
            .chars()
            .take(DESCRIPTOR_PROMPT_CHARS)
            .collect();
        format!("{}\n{}\n{}", self.name, self.description, prompt_head)
    }

    /// Whether evaluation is configured and switched on.
    pub fn evaluation_enabled(&self) -> bool {
        self.evaluation
            .as_ref()
            .map(|spec| spec.enabled && !spec.criteria.is_empty())
            .unwrap_or(false)
    }

    /// The built-in catch-all agent.
    pub fn default_agent() -> Self {
        let mut def = Self::new(DEFAULT_AGENT_ID, "Default Agent");
        def.description = "General-purpose assistant with access to every registered tool".into();
        def.system_prompt =
            "You are a capable assistant. Use the available tools when they help, \
             and give a direct final answer when you are done."
                .into();
        def
    }

    /// The built-in web-research agent.
    pub fn web_researcher() -> Self {
        let mut def = Self::new(WEB_RESEARCHER_ID, "Web Researcher");
        def.description = "Researches questions by fetching and reading web pages".into();
        def.system_prompt =
            "You are a web research assistant. Fetch relevant pages, extract what \
             matters, and cite the URLs you used in your final answer."
                .into();
        def.tools = vec!["http_fetch".into(), "current_time".into()];
        def.max_steps = 12;
        def.timeout = Duration::from_secs(300);
        def
    }
}

/// Partial update applied by `update_agent`; only set fields replace values.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<String>>,
    pub model: Option<String>,
    pub max_steps: Option<u32>,
    pub timeout: Option<Duration>,
    pub evaluation: Option<EvaluationSpec>,
}

impl AgentPatch {
    /// Apply the set fields and bump `updated_at`.
    pub fn apply(self, def: &mut AgentDefinition) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(description) = self.description {
            def.description = description;
        }
        if let Some(system_prompt) = self.system_prompt {
            def.system_prompt = system_prompt;
        }
        if let Some(tools) = self.tools {
            def.tools = tools;
        }
        if let Some(model) = self.model {
            def.model = Some(model);
        }
        if let Some(max_steps) = self.max_steps {
            def.max_steps = max_steps;
        }
        if let Some(timeout) = self.timeout {
            def.timeout = timeout;
        }
        if let Some(evaluation) = self.evaluation {
            def.evaluation = Some(evaluation);
        }
        def.updated_at = Utc::now();
    }
}
