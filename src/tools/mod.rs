//! Tool system: declarations, registry, and built-in tools.

pub mod builtin;
pub mod registry;
pub mod schema;

pub use registry::{ToolRegistry, ToolSnapshot};
pub use schema::{ParamSpec, ParamType, ToolParameters};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;

/// Where a tool entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolSource {
    /// Shipped with the service.
    Builtin,
    /// Registered by a caller at runtime.
    Custom,
    /// Advertised by an external tool server (carries the server name).
    External(String),
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Custom => write!(f, "custom"),
            Self::External(server) => write!(f, "external:{server}"),
        }
    }
}

/// Boxed async tool handler: raw JSON arguments in, JSON value out.
pub type ToolHandler = Arc<
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync,
>;

/// A named capability with a declared parameter schema and a handler.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
    pub requires_confirmation: bool,
    pub source: ToolSource,
    handler: ToolHandler,
}

impl Tool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_confirmation: false,
            source: ToolSource::Custom,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn with_source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_confirmation(mut self, requires_confirmation: bool) -> Self {
        self.requires_confirmation = requires_confirmation;
        self
    }

    pub(crate) fn handler(&self) -> ToolHandler {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("source", &self.source)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish()
    }
}
