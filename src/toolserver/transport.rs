//! Child-process transport for tool servers.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::config::ToolServerConfig;
use crate::error::{LeibnizError, Result};

/// Raw byte streams of a running tool server plus its process handle.
///
/// Tests substitute in-memory pipes via [`ServerIo::from_parts`]; production
/// uses [`ServerIo::spawn`].
pub struct ServerIo {
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) child: Option<Child>,
}

impl std::fmt::Debug for ServerIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIo").finish_non_exhaustive()
    }
}

impl ServerIo {
    /// Spawn the configured command with piped standard streams.
    ///
    /// Stderr is drained continuously into the logger at debug level so a
    /// chatty server can never block on a full pipe.
    pub fn spawn(config: &ToolServerConfig) -> Result<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            LeibnizError::upstream(
                &config.name,
                format!("failed to spawn '{}': {e}", config.command),
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LeibnizError::upstream(&config.name, "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LeibnizError::upstream(&config.name, "child stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {line}");
                }
            });
        }

        Ok(Self {
            writer: Box::new(stdin),
            reader: Box::new(stdout),
            child: Some(child),
        })
    }

    /// Build a transport from arbitrary streams (no child process attached).
    pub fn from_parts(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            reader: Box::new(reader),
            child: None,
        }
    }
}
