//! Persistence boundary for graphs and run records.
//!
//! The runtime mirrors every run here when it is created and again when it
//! finishes. Nothing assumes durability: a restart may lose whatever the
//! backend did not keep.

use async_trait::async_trait;
use graphcore::{EngineError, Graph, GraphId, Run, RunId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_graph(&self, graph: Arc<Graph>) -> Result<(), EngineError>;

    /// `Ok(None)` when no graph has that id
    async fn load_graph(&self, id: GraphId) -> Result<Option<Arc<Graph>>, EngineError>;

    async fn list_graphs(&self) -> Result<Vec<Arc<Graph>>, EngineError>;

    /// Returns whether a graph was removed
    async fn delete_graph(&self, id: GraphId) -> Result<bool, EngineError>;

    /// Insert or replace a run record
    async fn save_run(&self, run: &Run) -> Result<(), EngineError>;

    async fn load_run(&self, id: RunId) -> Result<Option<Run>, EngineError>;

    /// All runs, or only those of one graph
    async fn list_runs(&self, graph_id: Option<GraphId>) -> Result<Vec<Run>, EngineError>;
}

/// Process-local storage, the default backend
#[derive(Default)]
pub struct InMemoryStorage {
    graphs: RwLock<HashMap<GraphId, Arc<Graph>>>,
    runs: RwLock<HashMap<RunId, Run>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_graph(&self, graph: Arc<Graph>) -> Result<(), EngineError> {
        tracing::debug!("Saved graph {}", graph.id());
        self.graphs.write().await.insert(graph.id(), graph);
        Ok(())
    }

    async fn load_graph(&self, id: GraphId) -> Result<Option<Arc<Graph>>, EngineError> {
        Ok(self.graphs.read().await.get(&id).cloned())
    }

    async fn list_graphs(&self) -> Result<Vec<Arc<Graph>>, EngineError> {
        let mut graphs: Vec<_> = self.graphs.read().await.values().cloned().collect();
        graphs.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));
        Ok(graphs)
    }

    async fn delete_graph(&self, id: GraphId) -> Result<bool, EngineError> {
        Ok(self.graphs.write().await.remove(&id).is_some())
    }

    async fn save_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, id: RunId) -> Result<Option<Run>, EngineError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_runs(&self, graph_id: Option<GraphId>) -> Result<Vec<Run>, EngineError> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| graph_id.map_or(true, |id| run.graph_id == id))
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }
}
