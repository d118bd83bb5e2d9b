pub mod dispatcher;
pub mod humanizer;
pub mod keyboard;
pub mod mouse;
pub mod sampling;
pub mod types;
pub mod variance;

pub use dispatcher::{play_trace, InputDispatcher, LoggingDispatcher, PlaybackOutcome, RecordingDispatcher};
pub use humanizer::Humanizer;
pub use types::{ActionIntent, ActionTrace, Key, MouseButton, PrimitiveEvent, TimedEvent};
pub use variance::VariationHistory;
