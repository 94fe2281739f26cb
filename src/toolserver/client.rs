//! Tool-server session: correlation, handshake, discovery, invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{LeibnizError, Result};

use super::protocol::{
    self, CallToolResult, InboundMessage, InitializeResult, ReadResourceResult,
    ResourcesListResult, ServerResourceInfo, ServerToolInfo, ToolsListResult, PROTOCOL_VERSION,
};
use super::transport::ServerIo;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<InboundMessage>>>;

/// Removes a pending-reply registration on every exit path.
struct PendingSlot {
    pending: Arc<PendingMap>,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&self.id);
    }
}

/// One session with an external tool server.
///
/// A background reader task decodes newline-framed messages from the server
/// and delivers each reply to the channel registered under its id. Requests
/// may overlap freely: the send lock is held only across the write.
pub struct ToolServerClient {
    name: String,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    tools: Mutex<Vec<ServerToolInfo>>,
    resources: Mutex<Vec<ServerResourceInfo>>,
    child: tokio::sync::Mutex<Option<Child>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl ToolServerClient {
    /// Connect over the given transport: handshake, then discovery.
    pub async fn connect(name: impl Into<String>, io: ServerIo) -> Result<Arc<Self>> {
        Self::connect_with_timeout(name, io, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect with a non-default per-request fallback timeout.
    pub async fn connect_with_timeout(
        name: impl Into<String>,
        io: ServerIo,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));

        let reader_pending = Arc::clone(&pending);
        let reader_connected = Arc::clone(&connected);
        let reader_name = name.clone();
        let reader = io.reader;
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundMessage>(&line) {
                    Ok(message) => match message.id {
                        Some(id) => {
                            let sender = reader_pending
                                .lock()
                                .expect("pending map lock poisoned")
                                .remove(&id);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(message);
                                }
                                None => {
                                    tracing::warn!(
                                        server = %reader_name,
                                        id,
                                        "dropping reply with unknown id"
                                    );
                                }
                            }
                        }
                        None => {
                            tracing::debug!(
                                server = %reader_name,
                                method = message.method.as_deref().unwrap_or(""),
                                "server notification"
                            );
                        }
                    },
                    Err(e) => {
                        tracing::warn!(server = %reader_name, error = %e, "undecodable line from tool server");
                    }
                }
            }
            // Stream ended: release every waiting caller.
            reader_connected.store(false, Ordering::SeqCst);
            reader_pending
                .lock()
                .expect("pending map lock poisoned")
                .clear();
        });

        let client = Arc::new(Self {
            name,
            writer: tokio::sync::Mutex::new(io.writer),
            pending,
            next_id: AtomicU64::new(1),
            connected,
            tools: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            child: tokio::sync::Mutex::new(io.child),
            reader_task: Mutex::new(Some(reader_task)),
            request_timeout,
        });

        client.initialize().await?;
        client.connected.store(true, Ordering::SeqCst);
        client.refresh_tools().await;
        client.refresh_resources().await;

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Cached tool list from the last discovery.
    pub fn tools(&self) -> Vec<ServerToolInfo> {
        self.tools.lock().expect("tool cache lock poisoned").clone()
    }

    /// Cached resource list from the last discovery.
    pub fn resources(&self) -> Vec<ServerResourceInfo> {
        self.resources
            .lock()
            .expect("resource cache lock poisoned")
            .clone()
    }

    async fn initialize(&self) -> Result<()> {
        let result = self
            .send_request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "leibniz",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
                None,
            )
            .await?;

        if let Ok(init) = serde_json::from_value::<InitializeResult>(result) {
            tracing::debug!(
                server = %self.name,
                protocol = %init.protocol_version,
                remote = init.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or(""),
                "tool server initialized"
            );
        }

        self.notify("notifications/initialized", json!({})).await
    }

    /// Re-run `tools/list`; failures downgrade to an empty list.
    pub async fn refresh_tools(&self) -> Vec<ServerToolInfo> {
        let listed = match self.send_request("tools/list", json!({}), None).await {
            Ok(result) => serde_json::from_value::<ToolsListResult>(result)
                .unwrap_or_default()
                .tools,
            Err(e) => {
                tracing::warn!(server = %self.name, error = %e, "tool listing failed, using empty list");
                Vec::new()
            }
        };
        *self.tools.lock().expect("tool cache lock poisoned") = listed.clone();
        listed
    }

    /// Re-run `resources/list`; failures downgrade to an empty list.
    pub async fn refresh_resources(&self) -> Vec<ServerResourceInfo> {
        let listed = match self.send_request("resources/list", json!({}), None).await {
            Ok(result) => serde_json::from_value::<ResourcesListResult>(result)
                .unwrap_or_default()
                .resources,
            Err(e) => {
                tracing::warn!(server = %self.name, error = %e, "resource listing failed, using empty list");
                Vec::new()
            }
        };
        *self.resources.lock().expect("resource cache lock poisoned") = listed.clone();
        listed
    }

    /// Invoke a remote tool and return its concatenated text content.
    ///
    /// A reply with `isError = true` becomes a `ToolFailed` error carrying
    /// the same text.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let result = self
            .send_request(
                "tools/call",
                json!({ "name": tool, "arguments": arguments }),
                deadline,
            )
            .await?;

        let call: CallToolResult = serde_json::from_value(result).unwrap_or_default();
        let text = call.text();
        if call.is_error {
            Err(LeibnizError::tool(tool, text))
        } else {
            Ok(text)
        }
    }

    /// Read a resource by URI and return its concatenated text content.
    pub async fn read_resource(&self, uri: &str, deadline: Option<Instant>) -> Result<String> {
        let result = self
            .send_request("resources/read", json!({ "uri": uri }), deadline)
            .await?;
        let read: ReadResourceResult = serde_json::from_value(result).unwrap_or_default();
        Ok(read.text())
    }

    /// Close the session: release pending callers, close stdin, signal the
    /// process, stop the reader.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .clear();

        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        if let Some(task) = self
            .reader_task
            .lock()
            .expect("reader task lock poisoned")
            .take()
        {
            task.abort();
        }

        tracing::debug!(server = %self.name, "tool server session closed");
    }

    /// Send a request and await its correlated reply.
    ///
    /// The fallback timeout bounds every request; a caller deadline can only
    /// shorten it.
    async fn send_request(
        &self,
        method: &str,
        params: Value,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(id, tx);
        let _slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            id,
        };

        self.write_line(&protocol::request(id, method, params))
            .await?;

        let fallback = Instant::now() + self.request_timeout;
        let cap = match deadline {
            Some(deadline) if deadline < fallback => deadline,
            _ => fallback,
        };

        match tokio::time::timeout_at(cap, rx).await {
            Ok(Ok(message)) => {
                if let Some(error) = message.error {
                    Err(LeibnizError::upstream(&self.name, error.message))
                } else {
                    Ok(message.result.unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(LeibnizError::upstream(&self.name, "connection closed")),
            Err(_) => Err(LeibnizError::Timeout(
                self.request_timeout.as_millis() as u64
            )),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write_line(&protocol::notification(method, params))
            .await
    }

    async fn write_line(&self, payload: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| LeibnizError::upstream(&self.name, format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| LeibnizError::upstream(&self.name, format!("flush failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    enum CallBehavior {
        /// Reply with the `text` argument echoed back.
        Echo,
        /// Buffer calls and answer them in reverse order once `n` arrived.
        ReverseAfter(usize),
        /// Never answer `tools/call`.
        Withhold,
        /// Reply with `isError = true` and the given text.
        Fail(String),
    }

    fn spawn_fake_server(stream: DuplexStream, tools: Value, behavior: CallBehavior) {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut lines = BufReader::new(read_half).lines();
            let mut buffered: Vec<(u64, Value)> = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let method = message["method"].as_str().unwrap_or("").to_string();
                let id = message["id"].as_u64();

                let reply = |id: u64, result: Value| {
                    json!({ "jsonrpc": "2.0", "id": id, "result": result })
                };

                let outgoing: Vec<Value> = match (method.as_str(), id) {
                    ("initialize", Some(id)) => vec![reply(
                        id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "serverInfo": { "name": "fake", "version": "0.0.1" },
                        }),
                    )],
                    ("tools/list", Some(id)) => vec![reply(id, json!({ "tools": tools }))],
                    ("resources/list", Some(id)) => vec![reply(
                        id,
                        json!({ "resources": [{ "uri": "mem://greeting", "name": "greeting" }] }),
                    )],
                    ("resources/read", Some(id)) => vec![reply(
                        id,
                        json!({ "contents": [{ "uri": "mem://greeting", "text": "hi there" }] }),
                    )],
                    ("tools/call", Some(id)) => match &behavior {
                        CallBehavior::Echo => {
                            let text = message["params"]["arguments"]["text"]
                                .as_str()
                                .unwrap_or("")
                                .to_string();
                            vec![reply(
                                id,
                                json!({ "content": [{ "type": "text", "text": text }], "isError": false }),
                            )]
                        }
                        CallBehavior::ReverseAfter(n) => {
                            buffered.push((id, message["params"]["arguments"]["tag"].clone()));
                            if buffered.len() == *n {
                                buffered
                                    .drain(..)
                                    .rev()
                                    .map(|(id, tag)| {
                                        reply(
                                            id,
                                            json!({
                                                "content": [{ "type": "text", "text": tag }],
                                                "isError": false,
                                            }),
                                        )
                                    })
                                    .collect()
                            } else {
                                Vec::new()
                            }
                        }
                        CallBehavior::Withhold => Vec::new(),
                        CallBehavior::Fail(text) => vec![reply(
                            id,
                            json!({ "content": [{ "type": "text", "text": text }], "isError": true }),
                        )],
                    },
                    _ => Vec::new(),
                };

                for out in outgoing {
                    let mut bytes = serde_json::to_vec(&out).unwrap();
                    bytes.push(b'\n');
                    if write_half.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    async fn connected_client(
        tools: Value,
        behavior: CallBehavior,
        timeout: Duration,
    ) -> Arc<ToolServerClient> {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        spawn_fake_server(server_side, tools, behavior);
        let (read_half, write_half) = tokio::io::split(client_side);
        ToolServerClient::connect_with_timeout(
            "fake",
            ServerIo::from_parts(write_half, read_half),
            timeout,
        )
        .await
        .expect("connect should succeed")
    }

    fn read_file_tool() -> Value {
        json!([{
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            },
        }])
    }

    #[tokio::test]
    async fn handshake_discovers_advertised_tools_and_resources() {
        let client =
            connected_client(read_file_tool(), CallBehavior::Echo, Duration::from_secs(5)).await;

        assert!(client.is_connected());
        let tools = client.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(client.resources().len(), 1);
    }

    #[tokio::test]
    async fn call_tool_returns_concatenated_text() {
        let client =
            connected_client(read_file_tool(), CallBehavior::Echo, Duration::from_secs(5)).await;

        let text = client
            .call_tool("read_file", json!({ "text": "hello" }), None)
            .await
            .expect("call should succeed");

        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn an_is_error_reply_becomes_tool_failed() {
        let client = connected_client(
            read_file_tool(),
            CallBehavior::Fail("denied".into()),
            Duration::from_secs(5),
        )
        .await;

        let err = client
            .call_tool("read_file", json!({}), None)
            .await
            .expect_err("isError should fail");

        assert!(matches!(err, LeibnizError::ToolFailed { .. }));
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn concurrent_requests_each_receive_their_own_reply() {
        let n = 8;
        let client = connected_client(
            read_file_tool(),
            CallBehavior::ReverseAfter(n),
            Duration::from_secs(5),
        )
        .await;

        let mut handles = Vec::new();
        for i in 0..n {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let tag = format!("caller-{i}");
                let reply = client
                    .call_tool("read_file", json!({ "tag": tag }), None)
                    .await
                    .expect("call should succeed");
                (tag, reply)
            }));
        }

        for handle in handles {
            let (tag, reply) = handle.await.expect("task should finish");
            assert_eq!(reply, tag, "caller must get exactly its own reply");
        }
    }

    #[tokio::test]
    async fn requests_time_out_on_a_silent_server() {
        let client = connected_client(
            read_file_tool(),
            CallBehavior::Withhold,
            Duration::from_millis(100),
        )
        .await;

        let err = client
            .call_tool("read_file", json!({}), None)
            .await
            .expect_err("withheld reply should time out");

        assert!(matches!(err, LeibnizError::Timeout(_)));
    }

    #[tokio::test]
    async fn close_releases_pending_callers() {
        let client = connected_client(
            read_file_tool(),
            CallBehavior::Withhold,
            Duration::from_secs(30),
        )
        .await;

        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call_tool("read_file", json!({}), None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.close().await;

        let result = caller.await.expect("task should finish");
        let err = result.expect_err("pending caller should be released with an error");
        assert!(err.to_string().contains("connection closed"));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn read_resource_returns_text_contents() {
        let client =
            connected_client(read_file_tool(), CallBehavior::Echo, Duration::from_secs(5)).await;

        let text = client
            .read_resource("mem://greeting", None)
            .await
            .expect("read should succeed");

        assert_eq!(text, "hi there");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn a_real_child_process_can_be_spawned_and_closed() {
        use crate::config::ToolServerConfig;

        // `cat` echoes our own requests back; they decode as replies with no
        // result, so the handshake completes and discovery yields empty lists.
        let config = ToolServerConfig {
            name: "echo".into(),
            command: "cat".into(),
            args: vec![],
            env: vec![],
        };
        let io = ServerIo::spawn(&config).expect("cat should spawn");

        let client =
            ToolServerClient::connect_with_timeout("echo", io, Duration::from_secs(5))
                .await
                .expect("connect should succeed");

        assert!(client.is_connected());
        assert!(client.tools().is_empty());
        client.close().await;
        assert!(!client.is_connected());
    }
}
