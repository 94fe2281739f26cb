//! Leibniz — agentic execution service.
//!
//! Hosts named agents, drives an iterative reason/act loop against a
//! pluggable model backend, dispatches tool invocations (built-in, custom,
//! and external tool-server tools under one namespace), optionally routes
//! prompts through a content-processing side service, and persists agent
//! definitions and execution histories to an embedded relational store.
//!
//! The entry point is [`service::ExecutionService`]; everything else is a
//! collaborator it wires together:
//!
//! - [`model`] — the single point of language-model coupling
//! - [`tools`] — registry, schemas, and built-in tools
//! - [`toolserver`] — child-process tool servers over newline-delimited JSON-RPC
//! - [`execution`] — records, the loop, and streaming events
//! - [`loader`] — watched directory of declarative agent files + selection
//! - [`eval`] — judge pass for evaluated, iterative executions
//! - [`content`] — optional pre/post content processing (degrades open)
//! - [`store`] — SQLite persistence with an in-memory fallback

pub mod agent;
pub mod config;
pub mod content;
pub mod error;
pub mod eval;
pub mod execution;
pub mod loader;
pub mod model;
pub mod service;
pub mod store;
pub mod testing;
pub mod tools;
pub mod toolserver;
pub mod util;

pub use agent::{AgentDefinition, AgentPatch, DEFAULT_AGENT_ID};
pub use config::ServiceConfig;
pub use error::{LeibnizError, Result};
pub use execution::{ExecutionRecord, ExecutionStatus};
pub use service::{ExecuteOptions, ExecutionService, HealthReport};
