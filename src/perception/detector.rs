use std::sync::Arc;

use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::Rectangle;
use crate::perception::color::ColorSignature;
use crate::perception::components::{connected_components, MatchMask};
use crate::perception::nms::{non_max_suppression, sort_detections, SortOrder};
use crate::perception::template::{match_template, Template};
use crate::perception::types::{DetectedObject, Frame};

pub const DEFAULT_NMS_IOU: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub template: Arc<Template>,
    /// Template zoom factors to try; `[1.0]` for a single scale.
    pub scales: Vec<f64>,
    /// Overlap above which a weaker window is merged into a stronger one.
    pub nms_iou: f64,
}

impl TemplateSpec {
    pub fn new(template: Arc<Template>) -> Self {
        Self {
            template,
            scales: vec![1.0],
            nms_iou: DEFAULT_NMS_IOU,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DetectionMode {
    /// Connected regions of pixels matching a signature.
    Color(ColorSignature),
    /// Normalized cross-correlation against a reference image.
    Template(TemplateSpec),
}

/// One detector invocation: what to look for, where, and how to rank it.
#[derive(Debug, Clone)]
pub struct DetectionSpec {
    pub tag: String,
    pub mode: DetectionMode,
    pub search: Rectangle,
    pub min_component_size: usize,
    pub confidence_floor: f64,
    pub sort: SortOrder,
}

impl DetectionSpec {
    pub fn color(tag: impl Into<String>, signature: ColorSignature, search: Rectangle) -> Self {
        Self {
            tag: tag.into(),
            mode: DetectionMode::Color(signature),
            search,
            min_component_size: 1,
            confidence_floor: 0.0,
            sort: SortOrder::default(),
        }
    }

    pub fn template(tag: impl Into<String>, template: TemplateSpec, search: Rectangle) -> Self {
        Self {
            tag: tag.into(),
            mode: DetectionMode::Template(template),
            search,
            min_component_size: 1,
            confidence_floor: 0.8,
            sort: SortOrder::default(),
        }
    }

    pub fn validate(&self) -> ColorBotResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ColorBotError::precondition(format!(
                "detection '{}': confidence floor {} outside [0, 1]",
                self.tag, self.confidence_floor
            )));
        }
        match &self.mode {
            DetectionMode::Color(sig) => sig.validate(),
            DetectionMode::Template(t) => {
                if t.scales.is_empty() || t.scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                    return Err(ColorBotError::precondition(format!(
                        "detection '{}': template scales must be positive, got {:?}",
                        self.tag, t.scales
                    )));
                }
                if !(0.0..=1.0).contains(&t.nms_iou) {
                    return Err(ColorBotError::precondition(format!(
                        "detection '{}': nms iou {} outside [0, 1]",
                        self.tag, t.nms_iou
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Runs detection specs against frames. Stateless: identical inputs
/// always produce identical, identically ordered output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detector;

impl Detector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, frame: &Frame, spec: &DetectionSpec) -> ColorBotResult<Vec<DetectedObject>> {
        spec.validate()?;
        frame.check_search(&spec.search)?;

        if spec.search.is_degenerate() {
            return Ok(Vec::new());
        }

        let mut objects = match &spec.mode {
            DetectionMode::Color(sig) => self.detect_color(frame, spec, sig),
            DetectionMode::Template(t) => self.detect_template(frame, spec, t),
        };
        sort_detections(&mut objects, spec.sort, &spec.search);

        tracing::debug!(
            frame_id = %frame.id(),
            tag = %spec.tag,
            search = %spec.search,
            found = objects.len(),
            "detection pass finished"
        );
        Ok(objects)
    }

    fn detect_color(
        &self,
        frame: &Frame,
        spec: &DetectionSpec,
        sig: &ColorSignature,
    ) -> Vec<DetectedObject> {
        let mask = MatchMask::from_frame(frame, spec.search, sig);
        connected_components(&mask, spec.min_component_size.max(1))
            .into_iter()
            .filter_map(|c| {
                let confidence = c.fill_ratio();
                (confidence >= spec.confidence_floor).then(|| DetectedObject {
                    bounds: c.bounds,
                    tag: spec.tag.clone(),
                    confidence,
                    frame_id: frame.id(),
                })
            })
            .collect()
    }

    fn detect_template(
        &self,
        frame: &Frame,
        spec: &DetectionSpec,
        t: &TemplateSpec,
    ) -> Vec<DetectedObject> {
        let candidates = match_template(
            frame,
            &spec.search,
            &t.template,
            &t.scales,
            spec.confidence_floor,
        );
        non_max_suppression(candidates, t.nms_iou)
            .into_iter()
            .map(|c| DetectedObject {
                bounds: c.bounds,
                tag: spec.tag.clone(),
                confidence: c.score,
                frame_id: frame.id(),
            })
            .collect()
    }
}
