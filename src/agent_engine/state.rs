use crate::executor::types::ActionIntent;

/// Lifecycle states of the bot engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    Waiting,
    Perceiving { frame_id: u64 },
    Deciding { frame_id: u64 },
    Acting { frame_id: u64, intents: Vec<ActionIntent> },
    Failed { message: String },
    Done { summary: String },
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Done { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Perceiving { .. } => "perceiving",
            Self::Deciding { .. } => "deciding",
            Self::Acting { .. } => "acting",
            Self::Failed { .. } => "failed",
            Self::Done { .. } => "done",
        }
    }
}

/// What a decision policy wants done with the current snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Act { intents: Vec<ActionIntent> },
    Idle,
    Finish { summary: String },
}

impl Decision {
    pub fn act(intents: Vec<ActionIntent>) -> Self {
        Self::Act { intents }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub mode: LoopMode,
    #[serde(default)]
    pub max_duration_minutes: Option<u32>,
    #[serde(default)]
    pub max_cycles: Option<u64>,
    #[serde(default)]
    pub max_failures: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    UntilStopped,
    Timed,
    MaxCycles,
    FailureLimit,
}
