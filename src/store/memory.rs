//! In-memory fallback store.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::agent::AgentDefinition;
use crate::error::Result;
use crate::execution::ExecutionRecord;

use super::Store;

/// HashMap-backed store with the same contract as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    agents: Mutex<HashMap<String, AgentDefinition>>,
    executions: Mutex<HashMap<String, ExecutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save_agent(&self, def: &AgentDefinition) -> Result<()> {
        self.agents
            .lock()
            .expect("agents lock poisoned")
            .insert(def.id.clone(), def.clone());
        Ok(())
    }

    fn delete_agent(&self, id: &str) -> Result<()> {
        self.agents.lock().expect("agents lock poisoned").remove(id);
        self.executions
            .lock()
            .expect("executions lock poisoned")
            .retain(|_, record| record.agent_id != id);
        Ok(())
    }

    fn load_agents(&self) -> Result<Vec<AgentDefinition>> {
        let mut agents: Vec<AgentDefinition> = self
            .agents
            .lock()
            .expect("agents lock poisoned")
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.executions
            .lock()
            .expect("executions lock poisoned")
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self
            .executions
            .lock()
            .expect("executions lock poisoned")
            .get(id)
            .cloned())
    }

    fn list_executions(
        &self,
        agent_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> = self
            .executions
            .lock()
            .expect("executions lock poisoned")
            .values()
            .filter(|record| agent_id.map(|id| record.agent_id == id).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;

    #[test]
    fn deleting_an_agent_drops_its_executions() {
        let store = MemoryStore::new();
        store.save_agent(&AgentDefinition::new("a", "A")).unwrap();
        let mut record = ExecutionRecord::new("a", "hi");
        record.transition(ExecutionStatus::Completed);
        store.save_execution(&record).unwrap();

        store.delete_agent("a").unwrap();

        assert!(store.load_execution(&record.id).unwrap().is_none());
    }

    #[test]
    fn listing_pages_newest_first() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let record = ExecutionRecord::new("a", "hi");
            ids.push(record.id.clone());
            store.save_execution(&record).unwrap();
        }

        let page = store.list_executions(Some("a"), 2, 1).unwrap();
        assert_eq!(page.len(), 2);
    }
}
