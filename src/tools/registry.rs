//! Tool registry: name table, snapshots, and dispatch.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LeibnizError, Result};

use super::{Tool, ToolSource};

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    tools: HashMap<String, Arc<Tool>>,
}

/// Process-lifetime tool table.
///
/// Registration and lookup go through a reader-preferring lock; handler
/// execution never runs under it.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails with `AlreadyExists` if the name is taken.
    pub fn register(&self, tool: Tool) -> Result<()> {
        let mut inner = self.inner.write().expect("tool registry lock poisoned");
        if inner.tools.contains_key(&tool.name) {
            return Err(LeibnizError::AlreadyExists(format!("tool '{}'", tool.name)));
        }
        let name = tool.name.clone();
        inner.order.push(name.clone());
        inner.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Remove a tool. Fails with `NotFound` if absent.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("tool registry lock poisoned");
        if inner.tools.remove(name).is_none() {
            return Err(LeibnizError::NotFound(format!("tool '{name}'")));
        }
        inner.order.retain(|n| n != name);
        Ok(())
    }

    /// Remove every tool sourced from the named external server.
    pub fn unregister_server(&self, server: &str) -> usize {
        let mut inner = self.inner.write().expect("tool registry lock poisoned");
        let doomed: Vec<String> = inner
            .tools
            .iter()
            .filter(|(_, tool)| tool.source == ToolSource::External(server.to_string()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &doomed {
            inner.tools.remove(name);
        }
        inner.order.retain(|n| !doomed.contains(n));
        doomed.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("tool registry lock poisoned")
            .tools
            .contains_key(name)
    }

    /// Stable snapshot of all entries in insertion order.
    pub fn list(&self) -> Vec<Arc<Tool>> {
        let inner = self.inner.read().expect("tool registry lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|name| inner.tools.get(name).cloned())
            .collect()
    }

    /// Immutable point-in-time snapshot used by a running execution.
    ///
    /// Registrations after this call cannot reshape a loop already running
    /// against the snapshot.
    pub fn snapshot(&self) -> ToolSnapshot {
        ToolSnapshot::from_tools(self.list())
    }

    /// Resolve and run a tool by name.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<serde_json::Value> {
        let tool = {
            let inner = self.inner.read().expect("tool registry lock poisoned");
            inner.tools.get(name).cloned()
        };
        let tool = tool.ok_or_else(|| LeibnizError::NotFound(format!("tool '{name}'")))?;
        dispatch(&tool, params, cancel, deadline).await
    }
}

/// Immutable view of the registry taken at loop entry.
#[derive(Clone, Default)]
pub struct ToolSnapshot {
    tools: Vec<Arc<Tool>>,
    index: HashMap<String, usize>,
}

impl ToolSnapshot {
    pub fn from_tools(tools: Vec<Arc<Tool>>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name.clone(), i))
            .collect();
        Self { tools, index }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn list(&self) -> &[Arc<Tool>] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Restrict the snapshot to the named tools, keeping the given order.
    ///
    /// Unknown names are skipped; an empty selection keeps everything.
    pub fn restricted(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        let tools: Vec<Arc<Tool>> = names
            .iter()
            .filter_map(|name| self.get(name).cloned())
            .collect();
        Self::from_tools(tools)
    }

    /// Human-readable tool catalog for prompt construction.
    pub fn catalog(&self) -> String {
        let mut out = String::new();
        for tool in &self.tools {
            let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
            for (name, spec) in tool.parameters.iter() {
                let requirement = if spec.required { "required" } else { "optional" };
                let _ = writeln!(
                    out,
                    "    {} ({}, {}): {}",
                    name, spec.param_type, requirement, spec.description
                );
            }
        }
        out
    }

    /// Run a tool from the snapshot.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<serde_json::Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| LeibnizError::NotFound(format!("tool '{name}'")))?;
        dispatch(tool, params, cancel, deadline).await
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Validate, then run the handler isolated on its own task.
///
/// A panicking handler surfaces as `ToolFailed`; it never tears down the
/// caller.
async fn dispatch(
    tool: &Arc<Tool>,
    params: serde_json::Value,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<serde_json::Value> {
    if let Err(message) = tool.parameters.validate(&params) {
        return Err(LeibnizError::InvalidArgument(format!(
            "{}: {message}",
            tool.name
        )));
    }

    let started = Instant::now();
    let mut handle = tokio::spawn((tool.handler())(params));

    let joined = tokio::select! {
        _ = cancel.cancelled() => {
            handle.abort();
            return Err(LeibnizError::Cancelled);
        }
        _ = wait_deadline(deadline) => {
            handle.abort();
            return Err(LeibnizError::Timeout(started.elapsed().as_millis() as u64));
        }
        joined = &mut handle => joined,
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => match err {
            LeibnizError::ToolFailed { .. }
            | LeibnizError::Cancelled
            | LeibnizError::Timeout(_) => Err(err),
            other => Err(LeibnizError::tool(&tool.name, other.to_string())),
        },
        Err(join_err) if join_err.is_panic() => {
            tracing::error!(tool = %tool.name, "tool handler panicked");
            Err(LeibnizError::tool(&tool.name, "tool handler panicked"))
        }
        Err(_) => Err(LeibnizError::Cancelled),
    }
}
