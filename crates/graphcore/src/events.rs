use crate::{LogEntry, RunFailure, RunId, RunStatus};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Events published while a run executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A log entry was appended to the run's state container
    Log { run_id: RunId, entry: LogEntry },
    /// The run reached a terminal status; nothing follows on this run's stream
    Finished {
        run_id: RunId,
        status: RunStatus,
        error: Option<RunFailure>,
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::Log { run_id, .. } | RunEvent::Finished { run_id, .. } => *run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finished { .. })
    }

    pub fn finished(run_id: RunId, status: RunStatus, error: Option<RunFailure>) -> Self {
        RunEvent::Finished {
            run_id,
            status,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Live event sequence of one run, ending with [`RunEvent::Finished`]
pub type EventStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// Publishing end held by the task driving a run
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    sender: broadcast::Sender<RunEvent>,
    firehose: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Publish a log entry. Having no subscribers is not an error.
    pub fn log(&self, entry: &LogEntry) {
        let event = RunEvent::Log {
            run_id: self.run_id,
            entry: entry.clone(),
        };
        let _ = self.firehose.send(event.clone());
        let _ = self.sender.send(event);
    }
}

/// Per-run fan-out of log events to live subscribers.
///
/// Each run gets its own broadcast channel when it is created. Subscribers
/// see only events published after they subscribe. `finish` sends the
/// terminal notification and drops the channel under the same lock that
/// `subscribe` takes, so a subscriber either receives `Finished` on its
/// stream or finds the channel gone and must ask the run for its status.
pub struct EventBroadcaster {
    capacity: usize,
    channels: Mutex<HashMap<RunId, broadcast::Sender<RunEvent>>>,
    firehose: broadcast::Sender<RunEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (firehose, _) = broadcast::channel(capacity);
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
            firehose,
        }
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, broadcast::Sender<RunEvent>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the channel for a new run and return its emitter
    pub fn open(&self, run_id: RunId) -> EventEmitter {
        let sender = self
            .channels()
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();

        EventEmitter {
            run_id,
            sender,
            firehose: self.firehose.clone(),
        }
    }

    /// Subscribe to a run that has not finished yet
    pub fn subscribe(&self, run_id: RunId) -> Option<EventStream> {
        self.channels()
            .get(&run_id)
            .map(|sender| receiver_stream(run_id, sender.subscribe()))
    }

    /// Subscribe to the events of every run
    pub fn subscribe_all(&self) -> broadcast::Receiver<RunEvent> {
        self.firehose.subscribe()
    }

    /// Send the terminal notification and close the run's channel
    pub fn finish(&self, run_id: RunId, status: RunStatus, error: Option<RunFailure>) {
        let event = RunEvent::finished(run_id, status, error);
        let mut channels = self.channels();
        if let Some(sender) = channels.remove(&run_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.firehose.send(event);
    }

    pub fn is_open(&self, run_id: RunId) -> bool {
        self.channels().contains_key(&run_id)
    }

    pub fn open_channels(&self) -> usize {
        self.channels().len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Stream that yields a single terminal event
pub fn terminal_stream(event: RunEvent) -> EventStream {
    Box::pin(stream::once(async move { event }))
}

fn receiver_stream(run_id: RunId, mut rx: broadcast::Receiver<RunEvent>) -> EventStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    yield event;
                    if terminal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber of run {} lagged, skipped {} events", run_id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
