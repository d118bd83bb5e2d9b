pub mod client;
pub mod color;
pub mod components;
pub mod detector;
pub mod frame_slot;
pub mod nms;
pub mod ocr;
pub mod pipeline;
pub mod replay;
pub mod template;
pub mod traits;
pub mod types;

pub use client::ConfiguredClient;
pub use color::{ChannelTolerance, ColorSignature, Rgb};
pub use detector::{DetectionMode, DetectionSpec, Detector, TemplateSpec};
pub use frame_slot::{spawn_capture, FrameReceiver};
pub use nms::SortOrder;
pub use pipeline::{perceive, PerceptionPlan};
pub use template::Template;
pub use traits::{FrameSource, GameClient};
pub use types::{DetectedObject, Frame, FrameId, RecognizedText, Snapshot};
