//! SQLite-backed store.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::agent::AgentDefinition;
use crate::error::{LeibnizError, Result};
use crate::execution::{ExecutionRecord, ExecutionStatus};

use super::Store;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    system_prompt TEXT NOT NULL DEFAULT '',
    tools         TEXT NOT NULL DEFAULT '[]',
    model         TEXT,
    max_steps     INTEGER NOT NULL,
    timeout_ms    INTEGER NOT NULL,
    metadata      TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS executions (
    id           TEXT PRIMARY KEY,
    agent_id     TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    message      TEXT NOT NULL,
    status       TEXT NOT NULL,
    result       TEXT,
    error        TEXT,
    steps        TEXT NOT NULL DEFAULT '[]',
    tools_used   TEXT NOT NULL DEFAULT '[]',
    started_at   TEXT NOT NULL,
    completed_at TEXT,
    duration_ms  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_executions_agent_id ON executions(agent_id);
CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at DESC);
";

/// Embedded relational store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| LeibnizError::Storage(format!("open {}: {e}", path.display())))?;
        Self::prepare(conn)
    }

    /// Fully in-memory database (tests and ephemeral deployments).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LeibnizError::Storage(e.to_string()))?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| LeibnizError::Storage(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LeibnizError::Storage(format!("schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentDefinition> {
        let tools_json: String = row.get("tools")?;
        let metadata_json: String = row.get("metadata")?;
        let metadata: serde_json::Value =
            serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(AgentDefinition {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            system_prompt: row.get("system_prompt")?,
            tools: serde_json::from_str(&tools_json).unwrap_or_default(),
            model: row.get("model")?,
            max_steps: row.get::<_, i64>("max_steps")? as u32,
            timeout: Duration::from_millis(row.get::<_, i64>("timeout_ms")? as u64),
            evaluation: serde_json::from_value(metadata["evaluation"].clone()).ok(),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
        let steps_json: String = row.get("steps")?;
        let tools_json: String = row.get("tools_used")?;
        let status_text: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;

        Ok(ExecutionRecord {
            id: row.get("id")?,
            agent_id: row.get("agent_id")?,
            request: row.get("message")?,
            status: ExecutionStatus::from_str(&status_text).unwrap_or(ExecutionStatus::Error),
            result: row.get("result")?,
            error: row.get("error")?,
            steps: serde_json::from_str(&steps_json).unwrap_or_default(),
            tools_used: serde_json::from_str(&tools_json).unwrap_or_default(),
            iterations: 0,
            evaluation_results: Vec::new(),
            final_quality_score: None,
            started_at: parse_timestamp(&started_at),
            completed_at: completed_at.as_deref().map(parse_timestamp),
            duration_ms: row.get::<_, Option<i64>>("duration_ms")?.map(|v| v as u64),
        })
    }
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Store for SqliteStore {
    fn save_agent(&self, def: &AgentDefinition) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let metadata = serde_json::json!({ "evaluation": def.evaluation });
        conn.execute(
            "INSERT OR REPLACE INTO agents
             (id, name, description, system_prompt, tools, model, max_steps, timeout_ms, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                def.id,
                def.name,
                def.description,
                def.system_prompt,
                serde_json::to_string(&def.tools)?,
                def.model,
                def.max_steps as i64,
                def.timeout.as_millis() as i64,
                metadata.to_string(),
                def.created_at.to_rfc3339(),
                def.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LeibnizError::Storage(format!("save agent '{}': {e}", def.id)))?;
        Ok(())
    }

    fn delete_agent(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute("DELETE FROM agents WHERE id = ?1", params![id])
            .map_err(|e| LeibnizError::Storage(format!("delete agent '{id}': {e}")))?;
        Ok(())
    }

    fn load_agents(&self) -> Result<Vec<AgentDefinition>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM agents ORDER BY id")
            .map_err(|e| LeibnizError::Storage(e.to_string()))?;
        let agents = stmt
            .query_map([], Self::agent_from_row)
            .map_err(|e| LeibnizError::Storage(e.to_string()))?
            .filter_map(|row| row.ok())
            .collect();
        Ok(agents)
    }

    fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO executions
             (id, agent_id, message, status, result, error, steps, tools_used, started_at, completed_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.agent_id,
                record.request,
                record.status.to_string(),
                record.result,
                record.error,
                serde_json::to_string(&record.steps)?,
                serde_json::to_string(&record.tools_used)?,
                record.started_at.to_rfc3339(),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.duration_ms.map(|v| v as i64),
            ],
        )
        .map_err(|e| LeibnizError::Storage(format!("save execution '{}': {e}", record.id)))?;
        Ok(())
    }

    fn load_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.query_row(
            "SELECT * FROM executions WHERE id = ?1",
            params![id],
            Self::execution_from_row,
        )
        .optional()
        .map_err(|e| LeibnizError::Storage(e.to_string()))
    }

    fn list_executions(
        &self,
        agent_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let records = match agent_id {
            Some(agent_id) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM executions WHERE agent_id = ?1
                         ORDER BY started_at DESC LIMIT ?2 OFFSET ?3",
                    )
                    .map_err(|e| LeibnizError::Storage(e.to_string()))?;
                let rows: Vec<ExecutionRecord> = stmt
                    .query_map(
                        params![agent_id, limit as i64, offset as i64],
                        Self::execution_from_row,
                    )
                    .map_err(|e| LeibnizError::Storage(e.to_string()))?
                    .filter_map(|row| row.ok())
                    .collect();
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM executions
                         ORDER BY started_at DESC LIMIT ?1 OFFSET ?2",
                    )
                    .map_err(|e| LeibnizError::Storage(e.to_string()))?;
                let rows: Vec<ExecutionRecord> = stmt
                    .query_map(params![limit as i64, offset as i64], Self::execution_from_row)
                    .map_err(|e| LeibnizError::Storage(e.to_string()))?
                    .filter_map(|row| row.ok())
                    .collect();
                rows
            }
        };
        Ok(records)
    }

    fn close(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let _ = conn.execute_batch("PRAGMA optimize;");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{EvaluationCriterion, EvaluationSpec};
    use pretty_assertions::assert_eq;
    use crate::execution::{Step, ToolCall, ToolResult};
    use chrono::Duration as ChronoDuration;

    fn sample_agent(id: &str) -> AgentDefinition {
        let mut def = AgentDefinition::new(id, "Sample");
        def.description = "sample agent".into();
        def.system_prompt = "be helpful".into();
        def.tools = vec!["calculator".into()];
        def.model = Some("small".into());
        def.evaluation = Some(EvaluationSpec {
            enabled: true,
            max_iterations: 2,
            criteria: vec![EvaluationCriterion {
                name: "numeric".into(),
                required: true,
                description: "answer is numeric".into(),
            }],
        });
        def
    }

    fn sample_execution(agent_id: &str) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(agent_id, "what is 2+2?");
        record.steps.push(Step {
            index: 0,
            reasoning: "compute".into(),
            action: "call calculator".into(),
            tool_call: Some(ToolCall {
                name: "calculator".into(),
                params: serde_json::json!({ "expression": "2+2" }),
            }),
            tool_result: Some(ToolResult::ok(serde_json::json!(4))),
            timestamp: Utc::now(),
        });
        record.tools_used = vec!["calculator".into()];
        record.result = Some("4".into());
        record.transition(ExecutionStatus::Completed);
        record
    }

    #[test]
    fn agents_round_trip_including_evaluation_spec() {
        let store = SqliteStore::in_memory().unwrap();
        let def = sample_agent("calc-bot");
        store.save_agent(&def).expect("save should succeed");

        let loaded = store.load_agents().expect("load should succeed");

        assert_eq!(loaded.len(), 1);
        let back = &loaded[0];
        assert_eq!(back.id, "calc-bot");
        assert_eq!(back.tools, def.tools);
        assert_eq!(back.timeout, def.timeout);
        let eval = back.evaluation.as_ref().expect("evaluation should survive");
        assert_eq!(eval.max_iterations, 2);
        assert_eq!(eval.criteria[0].name, "numeric");
    }

    #[test]
    fn executions_round_trip_with_steps() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_agent(&sample_agent("calc-bot")).unwrap();
        let record = sample_execution("calc-bot");
        store.save_execution(&record).expect("save should succeed");

        let loaded = store
            .load_execution(&record.id)
            .expect("load should succeed")
            .expect("record should exist");

        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.result.as_deref(), Some("4"));
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.tools_used, vec!["calculator".to_string()]);
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn deleting_an_agent_cascades_to_its_executions() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_agent(&sample_agent("calc-bot")).unwrap();
        let record = sample_execution("calc-bot");
        store.save_execution(&record).unwrap();

        store.delete_agent("calc-bot").expect("delete should succeed");

        assert!(store.load_execution(&record.id).unwrap().is_none());
        assert!(store.load_agents().unwrap().is_empty());
    }

    #[test]
    fn listing_orders_newest_first_and_honours_limit_offset() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_agent(&sample_agent("calc-bot")).unwrap();

        let mut records = Vec::new();
        for i in 0..3 {
            let mut record = sample_execution("calc-bot");
            record.started_at = Utc::now() - ChronoDuration::minutes(10 - i);
            store.save_execution(&record).unwrap();
            records.push(record);
        }

        let page = store
            .list_executions(Some("calc-bot"), 2, 0)
            .expect("list should succeed");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, records[2].id, "newest first");

        let rest = store.list_executions(Some("calc-bot"), 2, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, records[0].id);
    }

    #[test]
    fn listing_for_an_unknown_agent_is_empty() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.list_executions(Some("ghost"), 10, 0).unwrap().is_empty());
    }
}
