//! Execution coordinator: agents, executions, tools, and collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentDefinition, AgentPatch, DEFAULT_AGENT_ID};
use crate::config::{ServiceConfig, ToolServerConfig};
use crate::content::{ContentProcessorClient, ProcessOptions};
use crate::error::{LeibnizError, Result};
use crate::eval::Evaluator;
use crate::execution::{
    run_loop, EventSink, ExecutionEvent, ExecutionRecord, ExecutionStatus, LoopOutcome,
    LoopRequest,
};
use crate::loader::{AgentLibrary, Embedder, LibraryEvent, SelectionMatch};
use crate::model::ModelCaller;
use crate::store::{MemoryStore, SqliteStore, Store};
use crate::toolserver::{register_server_tools, ServerIo, ToolServerClient};
use crate::tools::{builtin, Tool, ToolRegistry};

/// Caller overrides for an evaluated execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Fall back to a plain run even if the agent declares evaluation.
    pub skip_evaluation: bool,
    /// Override the iteration budget for this call only.
    pub max_iterations: Option<u32>,
}

/// Health snapshot for the service surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub details: HashMap<String, String>,
}

/// Ties the whole platform together: resolves agents, drives the loop,
/// tracks lifecycle, and persists what happened.
pub struct ExecutionService {
    caller: Arc<dyn ModelCaller>,
    registry: Arc<ToolRegistry>,
    library: Arc<AgentLibrary>,
    store: Arc<dyn Store>,
    evaluator: Option<Evaluator>,
    content: ContentProcessorClient,
    agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
    executions: Arc<RwLock<HashMap<String, ExecutionRecord>>>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    sessions: tokio::sync::Mutex<Vec<Arc<ToolServerClient>>>,
    started_at: std::time::Instant,
    closed: AtomicBool,
}

impl ExecutionService {
    /// Start the service with storage resolved from configuration.
    pub async fn start(
        config: ServiceConfig,
        caller: Arc<dyn ModelCaller>,
    ) -> Result<Arc<Self>> {
        let store: Arc<dyn Store> = match &config.database_path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::start_with(config, caller, store, None).await
    }

    /// Start with explicit collaborators (tests wire doubles through here).
    pub async fn start_with(
        config: ServiceConfig,
        caller: Arc<dyn ModelCaller>,
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(ToolRegistry::new());
        builtin::register_builtins(&registry)?;

        // Load errors leave the catalog empty; the service still starts.
        let mut agents: HashMap<String, AgentDefinition> = HashMap::new();
        match store.load_agents() {
            Ok(persisted) => {
                for def in persisted {
                    agents.insert(def.id.clone(), def);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "loading persisted agents failed; starting empty");
            }
        }

        let library = Arc::new(AgentLibrary::new(config.agents_dir.clone(), embedder));
        let content = ContentProcessorClient::new(&config.content_processor);
        let evaluator = Some(Evaluator::new(Arc::clone(&caller)));

        let service = Arc::new(Self {
            caller,
            registry,
            library: Arc::clone(&library),
            store: Arc::clone(&store),
            evaluator,
            content,
            agents: Arc::new(RwLock::new(agents)),
            executions: Arc::new(RwLock::new(HashMap::new())),
            cancels: Mutex::new(HashMap::new()),
            sessions: tokio::sync::Mutex::new(Vec::new()),
            started_at: std::time::Instant::now(),
            closed: AtomicBool::new(false),
        });

        for def in [AgentDefinition::default_agent(), AgentDefinition::web_researcher()] {
            service.ensure_agent(def);
        }

        // File-backed definitions flow into the shared map via the listener.
        {
            let agents = Arc::clone(&service.agents);
            let listener_store = Arc::clone(&store);
            library.set_listener(Arc::new(move |event| match event {
                LibraryEvent::Upserted(def) => {
                    agents
                        .write()
                        .expect("agent map lock poisoned")
                        .insert(def.id.clone(), def.clone());
                    if let Err(e) = listener_store.save_agent(&def) {
                        tracing::warn!(agent = %def.id, error = %e, "persisting agent failed");
                    }
                }
                LibraryEvent::Removed(id) => {
                    if id != DEFAULT_AGENT_ID {
                        agents
                            .write()
                            .expect("agent map lock poisoned")
                            .remove(&id);
                    }
                }
            }));
        }

        library.load_all()?;
        if config.watch_agents {
            library.watch()?;
        }

        for server_config in &config.tool_servers {
            if let Err(e) = service.connect_tool_server(server_config).await {
                tracing::warn!(server = %server_config.name, error = %e, "tool server unavailable");
            }
        }

        Ok(service)
    }

    fn ensure_agent(&self, def: AgentDefinition) {
        let inserted = {
            let mut agents = self.agents.write().expect("agent map lock poisoned");
            if agents.contains_key(&def.id) {
                false
            } else {
                agents.insert(def.id.clone(), def.clone());
                true
            }
        };
        if inserted {
            self.persist_agent(&def);
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn library(&self) -> &Arc<AgentLibrary> {
        &self.library
    }

    // ------------------------------------------------------------------
    // Agent catalog
    // ------------------------------------------------------------------

    /// Create an agent; assigns timestamps and (if absent) an id.
    pub fn create_agent(
        &self,
        mut def: AgentDefinition,
        save_as_file: bool,
    ) -> Result<AgentDefinition> {
        if def.id.trim().is_empty() {
            def.id = slug(&def.name);
        }
        let now = chrono::Utc::now();
        def.created_at = now;
        def.updated_at = now;
        def.validate()?;

        {
            let mut agents = self.agents.write().expect("agent map lock poisoned");
            if agents.contains_key(&def.id) {
                return Err(LeibnizError::AlreadyExists(format!("agent '{}'", def.id)));
            }
            agents.insert(def.id.clone(), def.clone());
        }

        self.persist_agent(&def);
        if save_as_file {
            if let Err(e) = self.library.save_definition(&def) {
                tracing::warn!(agent = %def.id, error = %e, "writing agent file failed");
            }
        }
        Ok(def)
    }

    /// Apply a partial update; only set fields replace existing values.
    pub fn update_agent(
        &self,
        id: &str,
        patch: AgentPatch,
        save_as_file: bool,
    ) -> Result<AgentDefinition> {
        let mut updated = self
            .agents
            .read()
            .expect("agent map lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| LeibnizError::NotFound(format!("agent '{id}'")))?;
        patch.apply(&mut updated);
        updated.validate()?;
        self.agents
            .write()
            .expect("agent map lock poisoned")
            .insert(id.to_string(), updated.clone());

        self.persist_agent(&updated);
        if save_as_file {
            if let Err(e) = self.library.save_definition(&updated) {
                tracing::warn!(agent = %id, error = %e, "writing agent file failed");
            }
        }
        Ok(updated)
    }

    /// Delete an agent; the default agent is protected.
    pub fn delete_agent(&self, id: &str) -> Result<()> {
        if id == DEFAULT_AGENT_ID {
            return Err(LeibnizError::InvalidArgument(
                "the default agent cannot be deleted".into(),
            ));
        }

        {
            let mut agents = self.agents.write().expect("agent map lock poisoned");
            if agents.remove(id).is_none() {
                return Err(LeibnizError::NotFound(format!("agent '{id}'")));
            }
        }

        if let Err(e) = self.store.delete_agent(id) {
            tracing::warn!(agent = %id, error = %e, "deleting persisted agent failed");
        }

        // A file-backed agent would reappear on the next rescan; drop its file too.
        let file = self.library.dir().join(format!("{id}.toml"));
        if file.exists() {
            if let Err(e) = std::fs::remove_file(&file) {
                tracing::warn!(agent = %id, error = %e, "removing agent file failed");
            }
            self.library.remove_path(&file);
        }
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<AgentDefinition> {
        let id = if id.is_empty() { DEFAULT_AGENT_ID } else { id };
        self.agents
            .read()
            .expect("agent map lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| LeibnizError::NotFound(format!("agent '{id}'")))
    }

    pub fn list_agents(&self) -> Vec<AgentDefinition> {
        let mut defs: Vec<AgentDefinition> = self
            .agents
            .read()
            .expect("agent map lock poisoned")
            .values()
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a task against the default agent.
    pub async fn execute(&self, task: &str) -> Result<ExecutionRecord> {
        self.execute_with_agent(DEFAULT_AGENT_ID, task).await
    }

    /// Run against the default agent with per-call budget overrides.
    pub async fn execute_default(
        &self,
        task: &str,
        tools: Vec<String>,
        max_steps: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionRecord> {
        let mut def = self.get_agent(DEFAULT_AGENT_ID)?;
        if !tools.is_empty() {
            def.tools = tools;
        }
        if let Some(max_steps) = max_steps {
            def.max_steps = max_steps;
        }
        if let Some(timeout) = timeout {
            def.timeout = timeout;
        }
        def.validate()?;
        self.run_agent(&def, task, None).await
    }

    /// Run a task against a named agent.
    pub async fn execute_with_agent(&self, id: &str, task: &str) -> Result<ExecutionRecord> {
        let def = self.get_agent(id)?;
        self.run_agent(&def, task, None).await
    }

    /// Run with the evaluator in the loop, iterating on judge feedback.
    ///
    /// Falls back to a plain run when the agent declares no evaluation, the
    /// caller opts out, or no evaluator is wired.
    pub async fn execute_with_evaluation(
        &self,
        id: &str,
        task: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecutionRecord> {
        let def = self.get_agent(id)?;

        let spec = match (&def.evaluation, &self.evaluator) {
            (Some(spec), Some(_)) if def.evaluation_enabled() && !options.skip_evaluation => {
                let mut spec = spec.clone();
                if let Some(n) = options.max_iterations {
                    spec.max_iterations = n.max(1);
                }
                spec
            }
            _ => return self.run_agent(&def, task, None).await,
        };
        let evaluator = self.evaluator.as_ref().expect("evaluator checked above");

        let pre = self.preprocess(&def, task).await?;
        let record = ExecutionRecord::new(&def.id, task);
        let cancel = self.track(&record);

        // Evaluated executions get an extended overall budget.
        let overall_deadline =
            Instant::now() + def.timeout * (spec.max_iterations.saturating_add(1));

        let snapshot = self.registry.snapshot().restricted(&def.tools);
        let mut current_task = pre;
        let mut iteration = 0u32;
        let mut evaluations = Vec::new();
        let mut final_score = None;
        let mut combined = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();

        let last_outcome = loop {
            let deadline = Instant::now() + def.timeout;
            let outcome = run_loop(LoopRequest {
                execution_id: record.id.clone(),
                caller: Arc::clone(&self.caller),
                model: def.model.clone(),
                system_prompt: def.system_prompt.clone(),
                tools: snapshot.clone(),
                task: current_task.clone(),
                max_steps: def.max_steps,
                cancel: cancel.clone(),
                deadline: deadline.min(overall_deadline),
                sink: None,
            })
            .await;

            for name in &outcome.tools_used {
                if !tools_used.contains(name) {
                    tools_used.push(name.clone());
                }
            }
            combined.extend(outcome.steps.iter().cloned());

            if outcome.status != ExecutionStatus::Completed {
                break outcome;
            }
            let result_text = outcome.result.clone().unwrap_or_default();

            let evaluation = match evaluator
                .evaluate(&result_text, task, &spec.criteria, iteration)
                .await
            {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    tracing::warn!(execution = %record.id, error = %e, "evaluation failed; keeping current result");
                    break outcome;
                }
            };

            let passed = evaluation.passed;
            let score = evaluation.score;
            let feedback = evaluation.feedback.clone();
            evaluations.push(evaluation);
            final_score = Some(score);

            if passed || iteration + 1 >= spec.max_iterations {
                break outcome;
            }

            current_task = format!(
                "{task}\nPrior attempt: {result_text}\nFeedback: {feedback}"
            );
            iteration += 1;
        };

        // Re-index accumulated steps so they stay dense across attempts.
        for (index, step) in combined.iter_mut().enumerate() {
            step.index = index;
        }

        let outcome = LoopOutcome {
            steps: combined,
            tools_used,
            ..last_outcome
        };
        let mut finalized = self.finalize(&record.id, outcome);
        finalized = self.attach_evaluations(&record.id, evaluations, iteration + 1, final_score, finalized);
        self.postprocess(&def, task, finalized).await
    }

    /// Run with streaming events; the stream ends with a `Final` chunk.
    pub fn execute_stream(
        self: Arc<Self>,
        id: &str,
        task: &str,
    ) -> Result<UnboundedReceiverStream<ExecutionEvent>> {
        let def = self.get_agent(id)?;
        let task = task.to_string();
        let service = Arc::clone(&self);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: EventSink = {
            let tx = tx.clone();
            Arc::new(move |event| {
                let _ = tx.send(event);
            })
        };

        tokio::spawn(async move {
            let finished = service.run_agent(&def, &task, Some(sink)).await;
            let event = match finished {
                Ok(record) => ExecutionEvent::Final {
                    execution_id: record.id,
                    status: record.status,
                    result: record.result,
                    error: record.error,
                },
                Err(e) => ExecutionEvent::Final {
                    execution_id: String::new(),
                    status: ExecutionStatus::Error,
                    result: None,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(event);
        });

        Ok(UnboundedReceiverStream::new(rx))
    }

    /// The common single-run path: content pre, loop, content post, finalize.
    async fn run_agent(
        &self,
        def: &AgentDefinition,
        task: &str,
        sink: Option<EventSink>,
    ) -> Result<ExecutionRecord> {
        let effective_task = self.preprocess(def, task).await?;

        let record = ExecutionRecord::new(&def.id, task);
        let cancel = self.track(&record);

        let outcome = run_loop(LoopRequest {
            execution_id: record.id.clone(),
            caller: Arc::clone(&self.caller),
            model: def.model.clone(),
            system_prompt: def.system_prompt.clone(),
            tools: self.registry.snapshot().restricted(&def.tools),
            task: effective_task,
            max_steps: def.max_steps,
            cancel,
            deadline: Instant::now() + def.timeout,
            sink,
        })
        .await;

        let finalized = self.finalize(&record.id, outcome);
        self.postprocess(def, task, finalized).await
    }

    /// Content pre hook. A block stops the run before any model call.
    async fn preprocess(&self, def: &AgentDefinition, task: &str) -> Result<String> {
        let metadata = HashMap::from([("agent_id".to_string(), def.id.clone())]);
        let pre = self
            .content
            .process_pre(task, None, &metadata, &ProcessOptions::default())
            .await;
        if pre.blocked {
            let reason = pre.block_reason.unwrap_or_else(|| "blocked".into());
            return Err(LeibnizError::PermissionDenied(reason));
        }
        Ok(pre.effective_prompt(task).to_string())
    }

    /// Content post hook over the final result, if the run completed.
    async fn postprocess(
        &self,
        def: &AgentDefinition,
        task: &str,
        record: ExecutionRecord,
    ) -> Result<ExecutionRecord> {
        let Some(result) = record.result.clone() else {
            return Ok(record);
        };
        let metadata = HashMap::from([("agent_id".to_string(), def.id.clone())]);
        let post = self
            .content
            .process_post(task, &result, None, &metadata, &ProcessOptions::default())
            .await;
        if post.blocked {
            let reason = post.block_reason.unwrap_or_else(|| "blocked".into());
            return Err(LeibnizError::PermissionDenied(reason));
        }

        let processed = post.effective_response(&result);
        if processed != result {
            let snapshot = {
                let mut executions =
                    self.executions.write().expect("execution map lock poisoned");
                executions.get_mut(&record.id).map(|stored| {
                    stored.result = Some(processed.to_string());
                    stored.clone()
                })
            };
            if let Some(snapshot) = snapshot {
                self.persist_execution(&snapshot);
                return Ok(snapshot);
            }
        }
        Ok(record)
    }

    /// Insert a fresh record and its cancellation handle.
    fn track(&self, record: &ExecutionRecord) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .insert(record.id.clone(), cancel.clone());
        self.executions
            .write()
            .expect("execution map lock poisoned")
            .insert(record.id.clone(), record.clone());
        cancel
    }

    /// Attach a loop outcome to the stored record and persist it.
    ///
    /// A record already cancelled keeps its status; the steps still land.
    fn finalize(&self, id: &str, outcome: LoopOutcome) -> ExecutionRecord {
        let snapshot = {
            let mut executions = self.executions.write().expect("execution map lock poisoned");
            let record = executions.get_mut(id).expect("tracked execution missing");
            record.steps = outcome.steps;
            record.tools_used = outcome.tools_used;
            if record.iterations == 0 {
                record.iterations = 1;
            }
            if record.status == ExecutionStatus::Running {
                record.result = outcome.result;
                record.error = outcome.error;
                record.transition(outcome.status);
            }
            record.clone()
        };

        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .remove(id);
        self.persist_execution(&snapshot);
        snapshot
    }

    fn attach_evaluations(
        &self,
        id: &str,
        evaluations: Vec<crate::eval::EvaluationResult>,
        iterations: u32,
        final_score: Option<f64>,
        fallback: ExecutionRecord,
    ) -> ExecutionRecord {
        let snapshot = {
            let mut executions = self.executions.write().expect("execution map lock poisoned");
            executions.get_mut(id).map(|record| {
                record.evaluation_results = evaluations;
                record.iterations = iterations;
                record.final_quality_score = final_score;
                record.clone()
            })
        };
        match snapshot {
            Some(snapshot) => {
                self.persist_execution(&snapshot);
                snapshot
            }
            None => fallback,
        }
    }

    /// Cancel a running execution; the handle fires exactly once.
    pub fn cancel_execution(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut executions = self.executions.write().expect("execution map lock poisoned");
            let record = executions
                .get_mut(id)
                .ok_or_else(|| LeibnizError::NotFound(format!("execution '{id}'")))?;
            if record.status != ExecutionStatus::Running {
                return Err(LeibnizError::InvalidArgument(format!(
                    "execution '{id}' is not running"
                )));
            }
            record.transition(ExecutionStatus::Cancelled);
            record.clone()
        };

        if let Some(token) = self
            .cancels
            .lock()
            .expect("cancel map lock poisoned")
            .remove(id)
        {
            token.cancel();
        }
        self.persist_execution(&snapshot);
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<ExecutionRecord> {
        if let Some(record) = self
            .executions
            .read()
            .expect("execution map lock poisoned")
            .get(id)
        {
            return Ok(record.clone());
        }
        match self.store.load_execution(id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(LeibnizError::NotFound(format!("execution '{id}'"))),
            Err(e) => {
                tracing::warn!(execution = %id, error = %e, "loading execution failed");
                Err(LeibnizError::NotFound(format!("execution '{id}'")))
            }
        }
    }

    /// Most recent first; `limit == 0` means a default page of 50.
    pub fn list_executions(
        &self,
        agent_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Vec<ExecutionRecord> {
        let limit = if limit == 0 { 50 } else { limit };

        let mut records: Vec<ExecutionRecord> = self
            .executions
            .read()
            .expect("execution map lock poisoned")
            .values()
            .filter(|record| agent_id.map(|id| record.agent_id == id).unwrap_or(true))
            .cloned()
            .collect();

        // Older history lives only in the store.
        if let Ok(persisted) = self.store.list_executions(agent_id, limit + offset, 0) {
            for record in persisted {
                if !records.iter().any(|r| r.id == record.id) {
                    records.push(record);
                }
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.into_iter().skip(offset).take(limit).collect()
    }

    // ------------------------------------------------------------------
    // Tools & tool servers
    // ------------------------------------------------------------------

    pub fn register_tool(&self, tool: Tool) -> Result<()> {
        self.registry.register(tool)
    }

    pub fn unregister_tool(&self, name: &str) -> Result<()> {
        self.registry.unregister(name)
    }

    pub fn list_tools(&self) -> Vec<Arc<Tool>> {
        self.registry.list()
    }

    /// Spawn, connect, and bridge one external tool server.
    pub async fn connect_tool_server(
        &self,
        config: &ToolServerConfig,
    ) -> Result<Arc<ToolServerClient>> {
        let io = ServerIo::spawn(config)?;
        let client = ToolServerClient::connect(&config.name, io).await?;
        register_server_tools(&self.registry, &client)?;
        self.sessions.lock().await.push(Arc::clone(&client));
        Ok(client)
    }

    /// Bridge an already-connected session (tests connect over pipes).
    pub async fn adopt_tool_server(&self, client: Arc<ToolServerClient>) -> Result<()> {
        register_server_tools(&self.registry, &client)?;
        self.sessions.lock().await.push(client);
        Ok(())
    }

    /// Close one session and drop its bridged tools.
    pub async fn disconnect_tool_server(&self, name: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let position = sessions
            .iter()
            .position(|session| session.name() == name)
            .ok_or_else(|| LeibnizError::NotFound(format!("tool server '{name}'")))?;
        let session = sessions.remove(position);
        drop(sessions);

        session.close().await;
        crate::toolserver::unregister_server_tools(&self.registry, name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Selection & health
    // ------------------------------------------------------------------

    /// Best agent for a task; without an embedder this is the default agent
    /// with similarity zero.
    pub async fn find_best_agent(&self, task: &str) -> Result<SelectionMatch> {
        if self.library.selector().has_embedder() {
            if let Some(best) = self.library.find_best(task).await? {
                return Ok(best);
            }
        }
        let default = self.get_agent(DEFAULT_AGENT_ID)?;
        Ok(SelectionMatch {
            agent_id: default.id,
            agent_name: default.name,
            similarity: 0.0,
        })
    }

    /// Top agents for a task; `top_n <= 0` defaults to 3.
    pub async fn find_top_agents(&self, task: &str, top_n: i32) -> Result<Vec<SelectionMatch>> {
        let n = if top_n <= 0 { 3 } else { top_n as usize };
        self.library.find_top(task, n).await
    }

    pub fn health(&self) -> HealthReport {
        let details = HashMap::from([
            (
                "agents".to_string(),
                self.agents
                    .read()
                    .expect("agent map lock poisoned")
                    .len()
                    .to_string(),
            ),
            (
                "executions".to_string(),
                self.executions
                    .read()
                    .expect("execution map lock poisoned")
                    .len()
                    .to_string(),
            ),
            ("tools".to_string(), self.registry.list().len().to_string()),
        ]);
        HealthReport {
            status: "healthy".into(),
            service: "leibniz".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            details,
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop the watcher, close every session and the store, and cancel any
    /// running executions.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.library.stop_watching();

        let running: Vec<String> = {
            let executions = self.executions.read().expect("execution map lock poisoned");
            executions
                .values()
                .filter(|record| record.status == ExecutionStatus::Running)
                .map(|record| record.id.clone())
                .collect()
        };
        for id in running {
            let _ = self.cancel_execution(&id);
        }

        let sessions: Vec<Arc<ToolServerClient>> =
            self.sessions.lock().await.drain(..).collect();
        for session in sessions {
            session.close().await;
            crate::toolserver::unregister_server_tools(&self.registry, session.name());
        }

        if let Err(e) = self.store.close() {
            tracing::warn!(error = %e, "closing store failed");
        }
        Ok(())
    }

    fn persist_agent(&self, def: &AgentDefinition) {
        if let Err(e) = self.store.save_agent(def) {
            tracing::warn!(agent = %def.id, error = %e, "persisting agent failed");
        }
    }

    fn persist_execution(&self, record: &ExecutionRecord) {
        if let Err(e) = self.store.save_execution(record) {
            tracing::warn!(execution = %record.id, error = %e, "persisting execution failed");
        }
    }
}

fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        slug
    }
}
