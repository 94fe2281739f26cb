//! Wire types for the tool-server JSON-RPC dialect.
//!
//! Framing is one JSON object per newline-terminated line on the child
//! process's standard streams. Requests carry a numeric `id`; notifications
//! omit it.

use serde::Deserialize;
use serde_json::{json, Value};

/// Protocol revision sent during the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version tag on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Build a request object.
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a notification object (no `id`, no reply expected).
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// Error object inside a response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Any inbound message: a response (has `id`) or a server notification.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    pub method: Option<String>,
}

/// `initialize` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: String,
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One tool advertised by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ServerToolInfo>,
}

/// One resource advertised by `resources/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerResourceInfo {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<ServerResourceInfo>,
}

/// One content item in a `tools/call` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct CallContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// `tools/call` result payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<CallContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenate the textual content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One content item in a `resources/read` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContent {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// `resources/read` result payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContent>,
}

impl ReadResourceResult {
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
