//! Tools shipped with the service.

use std::time::Duration;

use serde_json::json;

use crate::error::{LeibnizError, Result};

use super::{Tool, ToolParameters, ToolRegistry, ToolSource};

const FETCH_BODY_LIMIT: usize = 16_000;

/// Register every built-in tool.
pub fn register_builtins(registry: &ToolRegistry) -> Result<()> {
    registry.register(calculator())?;
    registry.register(current_time())?;
    registry.register(http_fetch())?;
    Ok(())
}

/// Evaluate a mathematical expression.
pub fn calculator() -> Tool {
    Tool::new(
        "calculator",
        "Evaluate a mathematical expression and return the numeric result",
        ToolParameters::empty().string("expression", "Expression to evaluate, e.g. '2 + 2'", true),
        |args| async move {
            let expression = args["expression"].as_str().unwrap_or_default().to_string();
            let value = evalexpr::eval(&expression)
                .map_err(|e| LeibnizError::tool("calculator", e.to_string()))?;

            if let Ok(i) = value.as_int() {
                Ok(json!(i))
            } else if let Ok(f) = value.as_number() {
                Ok(json!(f))
            } else if let Ok(b) = value.as_boolean() {
                Ok(json!(b))
            } else {
                Ok(json!(value.to_string()))
            }
        },
    )
    .with_source(ToolSource::Builtin)
}

/// Current UTC time as RFC 3339.
pub fn current_time() -> Tool {
    Tool::new(
        "current_time",
        "Return the current UTC date and time in RFC 3339 format",
        ToolParameters::empty(),
        |_args| async move { Ok(json!(chrono::Utc::now().to_rfc3339())) },
    )
    .with_source(ToolSource::Builtin)
}

/// Plain HTTP GET, used by the web-researcher agent.
pub fn http_fetch() -> Tool {
    let client = reqwest::Client::new();
    Tool::new(
        "http_fetch",
        "Fetch a URL over HTTP GET and return status and (truncated) body text",
        ToolParameters::empty().string("url", "Absolute URL to fetch", true),
        move |args| {
            let client = client.clone();
            async move {
                let url = args["url"].as_str().unwrap_or_default().to_string();
                let response = client
                    .get(&url)
                    .timeout(Duration::from_secs(15))
                    .send()
                    .await
                    .map_err(|e| LeibnizError::tool("http_fetch", e.to_string()))?;

                let status = response.status().as_u16();
                let mut body = response
                    .text()
                    .await
                    .map_err(|e| LeibnizError::tool("http_fetch", e.to_string()))?;
                if body.len() > FETCH_BODY_LIMIT {
                    let mut cut = FETCH_BODY_LIMIT;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                    body.push_str("… [truncated]");
                }

                Ok(json!({ "status": status, "body": body }))
            }
        },
    )
    .with_source(ToolSource::Builtin)
}
