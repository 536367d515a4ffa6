use graphcore::{
    EventEmitter, Fields, Phase, Run, RunError, RunFailure, RunId, RunStatus, StateUpdate,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Shared handle to a live run.
///
/// The task driving the run is the only writer; observers take read
/// snapshots. Every log append is published to the run's subscribers while
/// the write lock is held, so subscribers see entries in log order.
#[derive(Clone)]
pub struct RunHandle {
    id: RunId,
    run: Arc<RwLock<Run>>,
    events: EventEmitter,
    cancellation: CancellationToken,
}

impl RunHandle {
    pub fn new(run: Run, events: EventEmitter) -> Self {
        Self {
            id: run.id,
            run: Arc::new(RwLock::new(run)),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub async fn snapshot(&self) -> Run {
        self.run.read().await.clone()
    }

    pub async fn status(&self) -> RunStatus {
        self.run.read().await.status
    }

    /// Owned copy of the current fields
    pub async fn fields(&self) -> Fields {
        self.run.read().await.state.fields.clone()
    }

    /// Append a log entry and publish it
    pub async fn record(
        &self,
        node_id: &str,
        phase: Phase,
        detail: serde_json::Value,
    ) -> Result<(), RunError> {
        let mut run = self.run.write().await;
        let entry = run.state.append(node_id, phase, detail)?;
        self.events.log(entry);
        Ok(())
    }

    /// Merge a tool's update and log `completed` as one step
    pub async fn apply(
        &self,
        node_id: &str,
        update: StateUpdate,
        duration_ms: u64,
    ) -> Result<Vec<String>, RunError> {
        let mut run = self.run.write().await;
        let changed = run.state.merge(update)?;
        let entry = run.state.append(
            node_id,
            Phase::Completed,
            json!({ "changed_keys": changed, "duration_ms": duration_ms }),
        )?;
        self.events.log(entry);
        Ok(changed)
    }

    pub async fn mark_running(&self) -> Result<(), RunError> {
        self.run.write().await.mark_running()
    }

    /// Move the run to its terminal status and seal its state
    pub async fn finish(&self, result: Result<(), RunFailure>) -> Run {
        let mut run = self.run.write().await;
        let transition = match result {
            Ok(()) => run.mark_completed(),
            Err(failure) => run.mark_failed(failure),
        };
        if let Err(e) = transition {
            tracing::warn!("Run {} could not be finalized: {}", self.id, e);
        }
        run.clone()
    }
}
