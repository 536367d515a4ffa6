use crate::{Fields, GraphId, NodeId, RunError, StateContainer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RunId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Legal moves: pending -> running, pending -> failed, running -> terminal.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

/// Why a run failed, in the shape written to its `failed` log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: String,
    pub category: String,
    pub node: Option<NodeId>,
    pub message: String,
}

impl RunFailure {
    pub fn from_error(error: &RunError, node: Option<NodeId>) -> Self {
        Self {
            kind: error.kind().to_string(),
            category: error.category().to_string(),
            node,
            message: error.to_string(),
        }
    }
}

/// One execution of a graph against an initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub graph_id: GraphId,
    pub status: RunStatus,
    pub state: StateContainer,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<RunFailure>,
}

impl Run {
    pub fn new(graph_id: GraphId, initial_state: Fields) -> Self {
        Self {
            id: Uuid::new_v4(),
            graph_id,
            status: RunStatus::Pending,
            state: StateContainer::new(initial_state),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), RunError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), RunError> {
        self.transition(RunStatus::Completed)?;
        self.ended_at = Some(Utc::now());
        self.state.seal();
        Ok(())
    }

    pub fn mark_failed(&mut self, failure: RunFailure) -> Result<(), RunError> {
        self.transition(RunStatus::Failed)?;
        self.ended_at = Some(Utc::now());
        self.error = Some(failure);
        self.state.seal();
        Ok(())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            graph_id: self.graph_id,
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            log_entries: self.state.log.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub graph_id: GraphId,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub log_entries: usize,
}
