use crate::storage::{InMemoryStorage, Storage};
use crate::{GraphWalker, RunHandle, ToolRegistry};
use graphcore::events::terminal_stream;
use graphcore::{
    EngineError, EventBroadcaster, EventStream, Fields, Graph, GraphDefinition, GraphId, LogEntry,
    Run, RunEvent, RunFailure, RunId, RunStatus, RunSummary,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Creates runs, drives them, and keeps them observable.
///
/// Cloning is cheap; clones share the same registries. Each run is driven
/// either inline (`run`) or on its own tokio task (`run_async`,
/// `execute_and_stream`). Runs never share state.
#[derive(Clone)]
pub struct GraphRuntime {
    registry: Arc<ToolRegistry>,
    walker: Arc<GraphWalker>,
    broadcaster: Arc<EventBroadcaster>,
    storage: Arc<dyn Storage>,
    runs: Arc<RwLock<HashMap<RunId, RunHandle>>>,
    config: RuntimeConfig,
}

impl GraphRuntime {
    /// Create a new runtime with default settings and no tools
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(ToolRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<ToolRegistry>, config: RuntimeConfig) -> Self {
        Self::with_storage(registry, Arc::new(InMemoryStorage::new()), config)
    }

    pub fn with_storage(
        registry: Arc<ToolRegistry>,
        storage: Arc<dyn Storage>,
        config: RuntimeConfig,
    ) -> Self {
        let walker = Arc::new(GraphWalker::new(registry.clone(), config.max_steps));
        let broadcaster = Arc::new(EventBroadcaster::new(config.event_buffer_size));

        Self {
            registry,
            walker,
            broadcaster,
            storage,
            runs: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate and store a graph definition
    pub async fn create_graph(&self, definition: GraphDefinition) -> Result<GraphId, EngineError> {
        let graph = Arc::new(Graph::compile(definition)?);
        let id = graph.id();
        tracing::info!("Creating graph: {} ({})", graph.name(), id);
        self.storage.save_graph(graph).await?;
        Ok(id)
    }

    pub async fn get_graph(&self, graph_id: GraphId) -> Result<Arc<Graph>, EngineError> {
        self.storage
            .load_graph(graph_id)
            .await?
            .ok_or(EngineError::GraphNotFound(graph_id))
    }

    pub async fn list_graphs(&self) -> Result<Vec<Arc<Graph>>, EngineError> {
        self.storage.list_graphs().await
    }

    /// Remove a graph. Runs already using it keep their reference.
    pub async fn delete_graph(&self, graph_id: GraphId) -> Result<(), EngineError> {
        if self.storage.delete_graph(graph_id).await? {
            tracing::info!("Deleted graph: {}", graph_id);
            Ok(())
        } else {
            Err(EngineError::GraphNotFound(graph_id))
        }
    }

    pub fn list_tools(&self) -> Vec<String> {
        self.registry.list_tools()
    }

    /// Execute a graph on the caller's task and return the finished run
    pub async fn run(
        &self,
        graph_id: GraphId,
        initial_state: Fields,
    ) -> Result<RunOutcome, EngineError> {
        let graph = self.get_graph(graph_id).await?;
        let handle = self.create_run(&graph, initial_state).await?;
        let run = self.drive(graph, handle).await;
        Ok(RunOutcome::from(run))
    }

    /// Start a graph on a background task and return its run id immediately
    pub async fn run_async(
        &self,
        graph_id: GraphId,
        initial_state: Fields,
    ) -> Result<RunId, EngineError> {
        let graph = self.get_graph(graph_id).await?;
        let handle = self.create_run(&graph, initial_state).await?;
        let run_id = handle.id();
        self.spawn(graph, handle);
        Ok(run_id)
    }

    /// Start a fresh run and subscribe to it before it begins
    pub async fn execute_and_stream(
        &self,
        target: GraphTarget,
        initial_state: Fields,
    ) -> Result<(RunId, EventStream), EngineError> {
        let graph = match target {
            GraphTarget::Id(id) => self.get_graph(id).await?,
            GraphTarget::Definition(definition) => {
                let id = self.create_graph(definition).await?;
                self.get_graph(id).await?
            }
        };

        let handle = self.create_run(&graph, initial_state).await?;
        let run_id = handle.id();
        let stream = self
            .broadcaster
            .subscribe(run_id)
            .ok_or(EngineError::RunNotFound(run_id))?;
        self.spawn(graph, handle);
        Ok((run_id, stream))
    }

    /// Current status, fields and log of a run
    pub async fn get_run_state(&self, run_id: RunId) -> Result<Run, EngineError> {
        let live = self.runs.read().await.get(&run_id).cloned();
        match live {
            Some(handle) => Ok(handle.snapshot().await),
            None => self
                .storage
                .load_run(run_id)
                .await?
                .ok_or(EngineError::RunNotFound(run_id)),
        }
    }

    /// Runs, oldest first; live records take precedence over stored ones
    pub async fn list_runs(&self, graph_id: Option<GraphId>) -> Result<Vec<RunSummary>, EngineError> {
        let mut runs: HashMap<RunId, Run> = self
            .storage
            .list_runs(graph_id)
            .await?
            .into_iter()
            .map(|run| (run.id, run))
            .collect();

        let handles: Vec<RunHandle> = self.runs.read().await.values().cloned().collect();
        for handle in handles {
            let run = handle.snapshot().await;
            if graph_id.map_or(true, |id| run.graph_id == id) {
                runs.insert(run.id, run);
            }
        }

        let mut runs: Vec<Run> = runs.into_values().collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs.iter().map(Run::summary).collect())
    }

    /// Live events of a run.
    ///
    /// Events published before the call are not replayed; poll
    /// `get_run_state` for the full log. A finished run yields only its
    /// terminal notification.
    pub async fn subscribe_events(&self, run_id: RunId) -> Result<EventStream, EngineError> {
        if let Some(stream) = self.broadcaster.subscribe(run_id) {
            return Ok(stream);
        }

        let run = self.get_run_state(run_id).await?;
        if run.status.is_terminal() {
            Ok(terminal_stream(RunEvent::finished(run.id, run.status, run.error)))
        } else {
            // stored by another process and never driven here
            Err(EngineError::RunNotFound(run_id))
        }
    }

    /// Events of every run, for process-wide observers
    pub fn subscribe_all(&self) -> broadcast::Receiver<RunEvent> {
        self.broadcaster.subscribe_all()
    }

    /// Ask a run to stop at its next node boundary.
    ///
    /// Returns `false` when the run had already finished.
    pub async fn cancel_run(&self, run_id: RunId) -> Result<bool, EngineError> {
        let live = self.runs.read().await.get(&run_id).cloned();
        let Some(handle) = live else {
            return self
                .storage
                .load_run(run_id)
                .await?
                .map(|_| false)
                .ok_or(EngineError::RunNotFound(run_id));
        };

        if handle.status().await.is_terminal() {
            return Ok(false);
        }

        tracing::info!("Cancelling run {}", run_id);
        handle.cancellation().cancel();
        Ok(true)
    }

    /// Counts of stored graphs and runs, plus the runs still held live
    pub async fn stats(&self) -> Result<RuntimeStats, EngineError> {
        let graphs = self.storage.list_graphs().await?.len();
        let runs = self.storage.list_runs(None).await?.len();
        let handles: Vec<RunHandle> = self.runs.read().await.values().cloned().collect();

        let mut active_runs = 0;
        for handle in &handles {
            if !handle.status().await.is_terminal() {
                active_runs += 1;
            }
        }

        Ok(RuntimeStats {
            graphs,
            runs,
            live_runs: handles.len(),
            active_runs,
            tools: self.registry.len(),
        })
    }

    async fn create_run(&self, graph: &Graph, initial_state: Fields) -> Result<RunHandle, EngineError> {
        let run = Run::new(graph.id(), initial_state);
        self.storage.save_run(&run).await?;

        let events = self.broadcaster.open(run.id);
        let handle = RunHandle::new(run, events);
        self.runs.write().await.insert(handle.id(), handle.clone());

        tracing::debug!("Created run {} for graph {}", handle.id(), graph.id());
        Ok(handle)
    }

    fn spawn(&self, graph: Arc<Graph>, handle: RunHandle) {
        let runtime = self.clone();
        tokio::spawn(async move {
            runtime.drive(graph, handle).await;
        });
    }

    /// Walk the graph and finalize the run. Never fails: every error ends
    /// up in the run record.
    async fn drive(&self, graph: Arc<Graph>, handle: RunHandle) -> Run {
        let run_id = handle.id();
        let result = match handle.mark_running().await {
            Ok(()) => {
                tracing::info!("Starting run {} of graph {}", run_id, graph.id());
                self.walker.walk(&graph, &handle).await
            }
            Err(e) => Err(RunFailure::from_error(&e, None)),
        };

        let run = handle.finish(result).await;
        self.broadcaster.finish(run.id, run.status, run.error.clone());

        // once stored, lookups fall back to storage and the live handle can go
        match self.storage.save_run(&run).await {
            Ok(()) => {
                self.runs.write().await.remove(&run_id);
            }
            Err(e) => tracing::error!("Failed to store run {}: {}", run_id, e),
        }

        match run.status {
            RunStatus::Completed => tracing::info!("Run {} completed", run_id),
            _ => tracing::warn!("Run {} ended with status {:?}", run_id, run.status),
        }
        run
    }
}

impl Default for GraphRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Which graph `execute_and_stream` should run
#[derive(Debug, Clone)]
pub enum GraphTarget {
    Id(GraphId),
    /// Register the definition first, then run it
    Definition(GraphDefinition),
}

/// Result of a synchronous run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub final_state: Fields,
    pub log: Vec<LogEntry>,
    pub error: Option<RunFailure>,
}

impl From<Run> for RunOutcome {
    fn from(run: Run) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            final_state: run.state.fields,
            log: run.state.log,
            error: run.error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub graphs: usize,
    pub runs: usize,
    /// Handles not yet released; finished runs leave once stored
    pub live_runs: usize,
    pub active_runs: usize,
    pub tools: usize,
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Node invocations allowed per run, loop bodies included
    pub max_steps: usize,
    /// Per-subscriber backlog before a slow subscriber starts missing events
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    /// Defaults overridden by `GRAPHFLOW_MAX_STEPS` and `GRAPHFLOW_EVENT_BUFFER`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_steps: env_or("GRAPHFLOW_MAX_STEPS", defaults.max_steps),
            event_buffer_size: env_or("GRAPHFLOW_EVENT_BUFFER", defaults.event_buffer_size),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            event_buffer_size: 1024,
        }
    }
}

fn env_or(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
