//! Durable catalog of agent definitions and execution history.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::agent::AgentDefinition;
use crate::error::Result;
use crate::execution::ExecutionRecord;

/// Persistence behind the coordinator.
///
/// The in-memory maps stay the source of truth during a process lifetime;
/// store failures are logged and swallowed at the call sites. Implementations
/// serialize their own writes, so callers never hold coordinator locks across
/// these calls.
pub trait Store: Send + Sync {
    fn save_agent(&self, def: &AgentDefinition) -> Result<()>;
    fn delete_agent(&self, id: &str) -> Result<()>;
    fn load_agents(&self) -> Result<Vec<AgentDefinition>>;

    fn save_execution(&self, record: &ExecutionRecord) -> Result<()>;
    fn load_execution(&self, id: &str) -> Result<Option<ExecutionRecord>>;
    /// Most recent first, optionally filtered by agent.
    fn list_executions(
        &self,
        agent_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ExecutionRecord>>;

    fn close(&self) -> Result<()>;
}
