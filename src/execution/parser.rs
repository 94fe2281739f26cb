//! Tolerant completion parsing: tool call or final answer.

use std::sync::OnceLock;

use regex::Regex;

/// What the model asked for in one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Invoke a named tool with a parameter map.
    ToolCall {
        name: String,
        params: serde_json::Value,
    },
    /// Terminal answer; the run is done.
    Final(String),
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex should compile")
    })
}

/// Parse a completion into a directive.
///
/// Detection order: fenced JSON blocks, the whole completion as JSON, then
/// any balanced top-level object embedded in the text. A candidate object
/// with a `"tool"` string is a tool call (parameters under `"params"` or
/// `"arguments"`); one with a `"final_answer"` string is a terminal answer.
/// Anything else — including malformed JSON — is taken as the final answer.
pub fn parse_completion(completion: &str) -> Directive {
    let trimmed = completion.trim();

    for capture in fence_regex().captures_iter(trimmed) {
        if let Some(directive) = directive_from_json(capture[1].trim()) {
            return directive;
        }
    }

    if let Some(directive) = directive_from_json(trimmed) {
        return directive;
    }

    for candidate in balanced_objects(trimmed) {
        if let Some(directive) = directive_from_json(candidate) {
            return directive;
        }
    }

    Directive::Final(trimmed.to_string())
}

fn directive_from_json(text: &str) -> Option<Directive> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;

    if let Some(name) = object.get("tool").and_then(|v| v.as_str()) {
        let params = object
            .get("params")
            .or_else(|| object.get("arguments"))
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        return Some(Directive::ToolCall {
            name: name.to_string(),
            params,
        });
    }

    if let Some(answer) = object.get("final_answer").and_then(|v| v.as_str()) {
        return Some(Directive::Final(answer.to_string()));
    }

    None
}

/// Extract balanced top-level `{…}` spans, skipping braces inside strings.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn a_bare_json_tool_call_parses() {
        let directive = parse_completion(r#"{"tool": "calculator", "params": {"expression": "2+2"}}"#);

        assert_eq!(
            directive,
            Directive::ToolCall {
                name: "calculator".into(),
                params: json!({ "expression": "2+2" }),
            }
        );
    }

    #[test]
    fn a_fenced_tool_call_parses() {
        let completion = "I should compute this.\n```json\n{\"tool\": \"calculator\", \"params\": {\"expression\": \"6*7\"}}\n```";

        match parse_completion(completion) {
            Directive::ToolCall { name, .. } => assert_eq!(name, "calculator"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn an_embedded_object_in_prose_parses() {
        let completion =
            "Let me look that up: {\"tool\": \"http_fetch\", \"params\": {\"url\": \"https://example.com\"}} and then I'll summarize.";

        match parse_completion(completion) {
            Directive::ToolCall { name, params } => {
                assert_eq!(name, "http_fetch");
                assert_eq!(params["url"], "https://example.com");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn arguments_is_accepted_as_the_parameter_key() {
        match parse_completion(r#"{"tool": "echo", "arguments": {"text": "hi"}}"#) {
            Directive::ToolCall { params, .. } => assert_eq!(params["text"], "hi"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn a_missing_parameter_map_defaults_to_empty() {
        match parse_completion(r#"{"tool": "current_time"}"#) {
            Directive::ToolCall { params, .. } => assert_eq!(params, json!({})),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn explicit_final_answer_objects_parse() {
        let directive = parse_completion(r#"{"final_answer": "4"}"#);
        assert_eq!(directive, Directive::Final("4".into()));
    }

    #[test]
    fn plain_text_is_the_final_answer() {
        let directive = parse_completion("The answer is 4.");
        assert_eq!(directive, Directive::Final("The answer is 4.".into()));
    }

    #[test]
    fn malformed_json_falls_back_to_final_answer() {
        let completion = r#"{"tool": "calculator", "params": {"#;
        assert_eq!(
            parse_completion(completion),
            Directive::Final(completion.to_string())
        );
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let completion =
            "note {\"tool\": \"echo\", \"params\": {\"text\": \"a } inside\"}} trailing";

        match parse_completion(completion) {
            Directive::ToolCall { params, .. } => assert_eq!(params["text"], "a } inside"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }
}
