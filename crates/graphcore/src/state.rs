use crate::{NodeId, RunError, Value};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named fields carried through a run.
pub type Fields = BTreeMap<String, Value>;

/// Partial update returned by a tool and merged into [`Fields`].
pub type StateUpdate = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Started,
    Completed,
    Failed,
    LoopIteration,
    LoopExit,
}

/// One entry of a run's execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub node_id: NodeId,
    pub phase: Phase,
    pub detail: serde_json::Value,
}

/// Fields plus the append-only log of a single run.
///
/// Timestamps are kept strictly increasing: if the clock has not moved past
/// the previous entry, the new entry is stamped one microsecond after it.
/// Once sealed, every mutation fails with [`RunError::StateSealed`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateContainer {
    pub fields: Fields,
    pub log: Vec<LogEntry>,
    #[serde(default)]
    sealed: bool,
}

impl StateContainer {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            log: Vec::new(),
            sealed: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Append a log entry and return it.
    pub fn append(
        &mut self,
        node_id: impl Into<NodeId>,
        phase: Phase,
        detail: serde_json::Value,
    ) -> Result<&LogEntry, RunError> {
        if self.sealed {
            return Err(RunError::StateSealed);
        }

        let now = Utc::now();
        let timestamp = match self.log.last() {
            Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::microseconds(1),
            _ => now,
        };

        let idx = self.log.len();
        self.log.push(LogEntry {
            seq: idx as u64,
            timestamp,
            node_id: node_id.into(),
            phase,
            detail,
        });

        Ok(&self.log[idx])
    }

    /// Merge a partial update; later keys overwrite. Returns the keys whose
    /// value actually changed, in key order.
    pub fn merge(&mut self, update: StateUpdate) -> Result<Vec<String>, RunError> {
        if self.sealed {
            return Err(RunError::StateSealed);
        }

        let mut changed = Vec::new();
        for (key, value) in update {
            if self.fields.get(&key) != Some(&value) {
                changed.push(key.clone());
            }
            self.fields.insert(key, value);
        }
        Ok(changed)
    }
}
