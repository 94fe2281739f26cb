//! Declarative agent definition files (TOML, one agent per file).

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{LeibnizError, Result};
use crate::util::{format_duration, parse_duration};

use super::{AgentDefinition, EvaluationSpec};

#[derive(Debug, Serialize, Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Timeout accepts either seconds (`timeout = 90`) or a suffixed string
/// (`timeout = "2m"`).
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum TimeoutField {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AgentFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<TimeoutField>,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    tools: Vec<ToolEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    evaluation: Option<EvaluationSpec>,
}

/// Derive an id slug from a file stem.
fn slug_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("agent")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Parse one definition file.
///
/// The id is the file-declared one or a slug derived from the file name;
/// disabled tool entries are dropped; the result is validated before being
/// returned.
pub fn parse_agent_file(path: &Path) -> Result<AgentDefinition> {
    let raw = std::fs::read_to_string(path)?;
    let file: AgentFile = toml::from_str(&raw).map_err(|e| {
        LeibnizError::InvalidArgument(format!("{}: {e}", path.display()))
    })?;

    let id = file.id.unwrap_or_else(|| slug_from_path(path));
    let now = Utc::now();

    let timeout = match file.timeout {
        Some(TimeoutField::Seconds(secs)) => Duration::from_secs(secs),
        Some(TimeoutField::Text(text)) => parse_duration(&text)?,
        None => Duration::from_secs(120),
    };

    let def = AgentDefinition {
        name: file.name.unwrap_or_else(|| id.clone()),
        id,
        description: file.description,
        system_prompt: file.system_prompt,
        tools: file
            .tools
            .into_iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.name)
            .collect(),
        model: file.model,
        max_steps: file.max_steps.unwrap_or(8),
        timeout,
        evaluation: file.evaluation,
        created_at: now,
        updated_at: now,
    };

    def.validate()?;
    Ok(def)
}

/// Write a definition back out as a file.
pub fn write_agent_file(def: &AgentDefinition, path: &Path) -> Result<()> {
    let file = AgentFile {
        id: Some(def.id.clone()),
        name: Some(def.name.clone()),
        description: def.description.clone(),
        model: def.model.clone(),
        max_steps: Some(def.max_steps),
        timeout: Some(TimeoutField::Text(format_duration(def.timeout))),
        system_prompt: def.system_prompt.clone(),
        tools: def
            .tools
            .iter()
            .map(|name| ToolEntry {
                name: name.clone(),
                enabled: true,
            })
            .collect(),
        evaluation: def.evaluation.clone(),
    };

    let rendered = toml::to_string_pretty(&file)
        .map_err(|e| LeibnizError::Internal(format!("serialize agent file: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("file should be written");
        path
    }

    #[test]
    fn a_full_definition_file_parses() {
        let dir = tempdir().expect("temp dir should be created");
        let path = write_file(
            dir.path(),
            "calc-bot.toml",
            r#"
            id = "calc-bot"
            name = "Calc Bot"
            description = "Does arithmetic"
            model = "small-model"
            max_steps = 4
            timeout = "90s"
            system_prompt = "Answer with a number."

            [[tools]]
            name = "calculator"

            [[tools]]
            name = "http_fetch"
            enabled = false

            [evaluation]
            enabled = true
            max_iterations = 2

            [[evaluation.criteria]]
            name = "numeric"
            required = true
            description = "answer is a number"
            "#,
        );

        let def = parse_agent_file(&path).expect("file should parse");

        assert_eq!(def.id, "calc-bot");
        assert_eq!(def.name, "Calc Bot");
        assert_eq!(def.tools, vec!["calculator".to_string()]);
        assert_eq!(def.max_steps, 4);
        assert_eq!(def.timeout, Duration::from_secs(90));
        let eval = def.evaluation.expect("evaluation should be present");
        assert_eq!(eval.max_iterations, 2);
        assert_eq!(eval.criteria.len(), 1);
        assert!(eval.criteria[0].required);
    }

    #[test]
    fn id_falls_back_to_a_file_stem_slug() {
        let dir = tempdir().expect("temp dir should be created");
        let path = write_file(dir.path(), "My Helper.toml", "system_prompt = \"hi\"\n");

        let def = parse_agent_file(&path).expect("file should parse");

        assert_eq!(def.id, "my-helper");
        assert_eq!(def.name, "my-helper");
    }

    #[test]
    fn integer_timeouts_are_seconds() {
        let dir = tempdir().expect("temp dir should be created");
        let path = write_file(dir.path(), "t.toml", "timeout = 45\n");

        let def = parse_agent_file(&path).expect("file should parse");

        assert_eq!(def.timeout, Duration::from_secs(45));
    }

    #[test]
    fn invalid_budgets_are_rejected_at_parse_time() {
        let dir = tempdir().expect("temp dir should be created");
        let path = write_file(dir.path(), "bad.toml", "max_steps = 0\n");

        assert!(parse_agent_file(&path).is_err());
    }

    #[test]
    fn definitions_round_trip_through_files() {
        let dir = tempdir().expect("temp dir should be created");
        let mut def = AgentDefinition::new("writer", "Writer");
        def.description = "Writes prose".into();
        def.system_prompt = "Write well.".into();
        def.tools = vec!["current_time".into()];
        def.max_steps = 6;
        def.timeout = Duration::from_secs(180);

        let path = dir.path().join("writer.toml");
        write_agent_file(&def, &path).expect("write should succeed");
        let back = parse_agent_file(&path).expect("file should parse");

        assert_eq!(back.id, def.id);
        assert_eq!(back.name, def.name);
        assert_eq!(back.tools, def.tools);
        assert_eq!(back.max_steps, def.max_steps);
        assert_eq!(back.timeout, def.timeout);
    }
}
