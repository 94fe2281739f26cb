//! Bridge advertised tool-server tools into the registry.

use std::sync::Arc;

use serde_json::json;

use crate::error::Result;
use crate::tools::{Tool, ToolParameters, ToolRegistry, ToolSource};

use super::client::ToolServerClient;

/// Register every tool advertised by the server under `<server>_<tool>`.
///
/// The namespacing prevents collisions between servers (and with built-ins);
/// while connected there is exactly one registry entry per advertised tool.
/// Returns the number of entries registered.
pub fn register_server_tools(
    registry: &ToolRegistry,
    client: &Arc<ToolServerClient>,
) -> Result<usize> {
    let server = client.name().to_string();
    let mut registered = 0;

    for info in client.tools() {
        let namespaced = format!("{}_{}", server, info.name);
        let remote = info.name.clone();
        let handler_client = Arc::clone(client);

        let tool = Tool::new(
            namespaced,
            info.description.clone(),
            ToolParameters::from_json_schema(&info.input_schema),
            move |args| {
                let client = Arc::clone(&handler_client);
                let remote = remote.clone();
                async move {
                    let text = client.call_tool(&remote, args, None).await?;
                    Ok(json!(text))
                }
            },
        )
        .with_source(ToolSource::External(server.clone()));

        registry.register(tool)?;
        registered += 1;
    }

    tracing::debug!(server = %server, tools = registered, "bridged tool server");
    Ok(registered)
}

/// Remove every entry sourced from the named server. Returns the count.
pub fn unregister_server_tools(registry: &ToolRegistry, server: &str) -> usize {
    registry.unregister_server(server)
}
