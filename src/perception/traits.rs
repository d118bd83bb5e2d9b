use async_trait::async_trait;

use crate::errors::ColorBotResult;
use crate::geometry::Rectangle;
use crate::perception::pipeline::PerceptionPlan;
use crate::perception::types::Frame;

/// Screen capture backend. Each call returns a fresh, immutable frame.
#[async_trait]
pub trait FrameSource: Send {
    async fn capture(&mut self) -> ColorBotResult<Frame>;

    fn describe(&self) -> String {
        "frame source".into()
    }
}

/// What a supported game client looks like on screen: which regions to
/// search and how to classify what is found there.
pub trait GameClient: Send + Sync {
    fn name(&self) -> &str;

    /// Detection and OCR requests for a frame with the given extent.
    fn perception_plan(&self, frame_bounds: Rectangle) -> ColorBotResult<PerceptionPlan>;
}
