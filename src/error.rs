//! Error types for Leibniz.

use thiserror::Error;

/// Primary error type for all Leibniz operations.
#[derive(Error, Debug)]
pub enum LeibnizError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Tool execution error: {tool_name} — {message}")]
    ToolFailed { tool_name: String, message: String },

    #[error("Upstream error: {service} — {message}")]
    Upstream { service: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Timeout,
    Cancelled,
    ToolFailed,
    Upstream,
    Internal,
}

impl LeibnizError {
    /// Create a tool failure for a named tool.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create an upstream failure for a named collaborator.
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ToolFailed { .. } => ErrorKind::ToolFailed,
            Self::Upstream { .. } | Self::Network(_) => ErrorKind::Upstream,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Upstream)
            && !matches!(self, Self::PermissionDenied(_))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LeibnizError>;
