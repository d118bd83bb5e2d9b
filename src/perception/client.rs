use std::path::Path;
use std::sync::Arc;

use crate::config::{ClientConfig, DetectionSpecConfig, OcrRequestConfig};
use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::Rectangle;
use crate::perception::detector::{DetectionSpec, TemplateSpec};
use crate::perception::ocr::{GlyphBank, OcrConfig};
use crate::perception::pipeline::{OcrRequest, PerceptionPlan, PlannedDetection};
use crate::perception::template::Template;
use crate::perception::traits::GameClient;

struct PreparedDetection {
    config: DetectionSpecConfig,
    template: Option<Arc<Template>>,
}

struct PreparedOcr {
    config: OcrRequestConfig,
    bank: Arc<GlyphBank>,
}

/// Game client described entirely by the `[client]` config section.
/// Templates and fonts are loaded once, up front.
pub struct ConfiguredClient {
    name: String,
    detections: Vec<PreparedDetection>,
    ocr: Vec<PreparedOcr>,
}

impl ConfiguredClient {
    /// Relative template and font paths resolve against `base_dir`.
    pub fn from_config(config: &ClientConfig, base_dir: &Path) -> ColorBotResult<Self> {
        config.validate()?;

        let mut detections = Vec::with_capacity(config.detections.len());
        for d in &config.detections {
            let template = match &d.template {
                Some(path) => {
                    let path = base_dir.join(path);
                    let name = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or(d.tag.as_str())
                        .to_string();
                    let template = Template::load(&path).map_err(|e| {
                        ColorBotError::Config(format!(
                            "detection '{}': cannot load template {}: {e}",
                            d.tag,
                            path.display()
                        ))
                    })?;
                    tracing::debug!(tag = %d.tag, template = %name, "template loaded");
                    Some(Arc::new(template))
                }
                None => None,
            };
            detections.push(PreparedDetection {
                config: d.clone(),
                template,
            });
        }

        let mut ocr = Vec::with_capacity(config.ocr.len());
        for o in &config.ocr {
            let bank = GlyphBank::load_dir(base_dir.join(&o.font_dir))?;
            ocr.push(PreparedOcr {
                config: o.clone(),
                bank: Arc::new(bank),
            });
        }

        tracing::info!(
            client = %config.name,
            detections = detections.len(),
            ocr = ocr.len(),
            "game client ready"
        );
        Ok(Self {
            name: config.name.clone(),
            detections,
            ocr,
        })
    }

    fn detection_spec(d: &PreparedDetection, frame_bounds: Rectangle) -> ColorBotResult<DetectionSpec> {
        let c = &d.config;
        let search = c.search.unwrap_or(frame_bounds);
        let mut spec = match (&c.color, &d.template) {
            (Some(sig), _) => DetectionSpec::color(c.tag.clone(), sig.clone(), search),
            (None, Some(template)) => {
                let mut t = TemplateSpec::new(template.clone());
                t.scales = c.scales.clone();
                t.nms_iou = c.nms_iou;
                DetectionSpec::template(c.tag.clone(), t, search)
            }
            (None, None) => {
                return Err(ColorBotError::Config(format!(
                    "detection '{}' has neither color nor template",
                    c.tag
                )))
            }
        };
        if let Some(min) = c.min_component_size {
            spec.min_component_size = min;
        }
        if let Some(floor) = c.confidence_floor {
            spec.confidence_floor = floor;
        }
        spec.sort = c.sort;
        Ok(spec)
    }
}

impl GameClient for ConfiguredClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn perception_plan(&self, frame_bounds: Rectangle) -> ColorBotResult<PerceptionPlan> {
        let mut plan = PerceptionPlan::new();
        for d in &self.detections {
            plan.detections.push(PlannedDetection {
                spec: Self::detection_spec(d, frame_bounds)?,
                within: d.config.within.clone(),
            });
        }
        for o in &self.ocr {
            let c = &o.config;
            let mut config = OcrConfig::new(c.search.unwrap_or(frame_bounds), o.bank.clone());
            if !c.signatures.is_empty() {
                config = config.with_signatures(c.signatures.clone());
            }
            if let Some(min) = c.min_glyph_confidence {
                config.min_glyph_confidence = min;
            }
            config.allowed_chars = c.allowed_chars.clone();
            config.word_gap = c.word_gap;
            plan.ocr.push(OcrRequest {
                key: c.key.clone(),
                config,
            });
        }
        Ok(plan)
    }
}
