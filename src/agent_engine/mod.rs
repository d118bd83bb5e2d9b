pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod policy;
pub mod state;

pub use engine::BotEngine;
pub use event_bus::{EngineEvent, EventBus};
pub use history::{CycleRecord, SessionLog};
pub use loop_control::{LoopController, StopFlag};
pub use policy::{ClickTagPolicy, DecisionPolicy};
pub use state::{Decision, EngineState, LoopConfig, LoopMode};
