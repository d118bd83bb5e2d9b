use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::SendError;

use super::history::CycleRecord;
use super::state::EngineState;

/// Progress notifications published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        state: EngineState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    CycleCompleted {
        record: CycleRecord,
    },
    Failure {
        cycle: u64,
        message: String,
    },
    Finished {
        summary: String,
        failed: bool,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Fails only when nobody is subscribed.
    pub fn send(&self, event: EngineEvent) -> Result<usize, SendError<EngineEvent>> {
        self.tx.send(event)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
