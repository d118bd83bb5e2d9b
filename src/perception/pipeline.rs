//! Perception pipeline: runs every detection and OCR request of a plan
//! against one immutable frame and assembles the world snapshot.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::ColorBotResult;
use crate::geometry::Rectangle;
use crate::perception::detector::{DetectionSpec, Detector};
use crate::perception::nms::sort_detections;
use crate::perception::ocr::{OcrConfig, OcrEngine};
use crate::perception::types::{DetectedObject, DetectionRef, Frame, Nesting, Snapshot};

#[derive(Debug, Clone)]
pub struct PlannedDetection {
    pub spec: DetectionSpec,
    /// Search inside every detection of this earlier tag instead of `spec.search`.
    pub within: Option<String>,
}

impl From<DetectionSpec> for PlannedDetection {
    fn from(spec: DetectionSpec) -> Self {
        Self { spec, within: None }
    }
}

#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub key: String,
    pub config: OcrConfig,
}

/// Everything to look for in one frame. Requests run in order, so a
/// `within` detection must follow the detection it nests in.
#[derive(Debug, Clone, Default)]
pub struct PerceptionPlan {
    pub detections: Vec<PlannedDetection>,
    pub ocr: Vec<OcrRequest>,
}

impl PerceptionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(mut self, spec: DetectionSpec) -> Self {
        self.detections.push(spec.into());
        self
    }

    pub fn detect_within(mut self, parent_tag: impl Into<String>, spec: DetectionSpec) -> Self {
        self.detections.push(PlannedDetection {
            spec,
            within: Some(parent_tag.into()),
        });
        self
    }

    pub fn read(mut self, key: impl Into<String>, config: OcrConfig) -> Self {
        self.ocr.push(OcrRequest {
            key: key.into(),
            config,
        });
        self
    }
}

/// Run `plan` over `frame`. Any precondition violation aborts the whole
/// pass; misses simply leave empty entries.
pub fn perceive(frame: &Frame, plan: &PerceptionPlan) -> ColorBotResult<Snapshot> {
    let detector = Detector::new();
    let ocr = OcrEngine::new();
    let mut detections: BTreeMap<String, Vec<DetectedObject>> = BTreeMap::new();

    // Step 1: detections, nested ones searching inside their parents
    for planned in &plan.detections {
        let found = match &planned.within {
            None => detector.detect(frame, &planned.spec)?,
            Some(parent) => {
                let parents: Vec<Rectangle> = detections
                    .get(parent)
                    .map(|v| v.iter().map(|d| d.bounds).collect())
                    .unwrap_or_default();
                let mut all: Vec<DetectedObject> = Vec::new();
                for bounds in &parents {
                    let Some(search) = bounds.intersection(&planned.spec.search) else {
                        continue;
                    };
                    let mut spec = planned.spec.clone();
                    spec.search = search;
                    for obj in detector.detect(frame, &spec)? {
                        // overlapping parents see the same object twice
                        match all.iter_mut().find(|o| o.bounds == obj.bounds) {
                            Some(seen) if obj.confidence > seen.confidence => *seen = obj,
                            Some(_) => {}
                            None => all.push(obj),
                        }
                    }
                }
                if let Some(area) = enclosing(&parents) {
                    sort_detections(&mut all, planned.spec.sort, &area);
                }
                all
            }
        };
        detections
            .entry(planned.spec.tag.clone())
            .or_default()
            .extend(found);
    }

    // Step 2: text
    let mut texts = BTreeMap::new();
    for req in &plan.ocr {
        texts.insert(req.key.clone(), ocr.recognize(frame, &req.config)?);
    }

    // Step 3: containment hierarchy
    let parents = compute_hierarchy(&detections);

    tracing::debug!(
        frame_id = %frame.id(),
        tags = detections.len(),
        texts = texts.len(),
        nested = parents.len(),
        "snapshot built"
    );

    Ok(Snapshot {
        frame_id: frame.id(),
        captured_at: frame.captured_at(),
        frame_bounds: frame.bounds(),
        origin: frame.origin(),
        scale: frame.scale(),
        detections,
        texts,
        parents,
    })
}

/// Smallest rectangle covering every rectangle in `rects`.
fn enclosing(rects: &[Rectangle]) -> Option<Rectangle> {
    let first = rects.first()?;
    let (mut left, mut top) = (first.left as i64, first.top as i64);
    let (mut right, mut bottom) = (first.right(), first.bottom());
    for r in &rects[1..] {
        left = left.min(r.left as i64);
        top = top.min(r.top as i64);
        right = right.max(r.right());
        bottom = bottom.max(r.bottom());
    }
    Some(Rectangle::new(
        left as i32,
        top as i32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

/// Run `perceive` on the blocking pool; scanning is CPU-bound.
pub async fn perceive_blocking(
    frame: Arc<Frame>,
    plan: Arc<PerceptionPlan>,
) -> ColorBotResult<Snapshot> {
    tokio::task::spawn_blocking(move || perceive(&frame, &plan)).await?
}

/// For each detection, find its *smallest* strictly larger enclosing
/// detection of a different tag.
fn compute_hierarchy(detections: &BTreeMap<String, Vec<DetectedObject>>) -> Vec<Nesting> {
    let flat: Vec<(DetectionRef, &DetectedObject)> = detections
        .iter()
        .flat_map(|(tag, objs)| {
            objs.iter().enumerate().map(move |(index, obj)| {
                (
                    DetectionRef {
                        tag: tag.clone(),
                        index,
                    },
                    obj,
                )
            })
        })
        .collect();

    let mut parents = Vec::new();
    for (child_ref, child) in &flat {
        let mut best: Option<(&DetectionRef, u64)> = None;
        for (parent_ref, parent) in &flat {
            if parent_ref.tag == child_ref.tag {
                continue;
            }
            let area = parent.bounds.area();
            if area > child.bounds.area()
                && parent.bounds.contains(&child.bounds)
                && best.map_or(true, |(_, a)| area < a)
            {
                best = Some((parent_ref, area));
            }
        }
        if let Some((p, _)) = best {
            parents.push(Nesting {
                child: child_ref.clone(),
                parent: p.clone(),
            });
        }
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::color::{ColorSignature, Rgb};

    const PANEL: Rgb = Rgb::new(40, 40, 120);
    const GEM: Rgb = Rgb::new(0, 220, 0);

    fn scene() -> Frame {
        let mut img = image::RgbImage::from_pixel(40, 30, image::Rgb([5, 5, 5]));
        for y in 5..25 {
            for x in 5..35 {
                img.put_pixel(x, y, image::Rgb([PANEL.r, PANEL.g, PANEL.b]));
            }
        }
        for (gx, gy) in [(8u32, 8u32), (20, 15)] {
            for y in gy..gy + 3 {
                for x in gx..gx + 3 {
                    img.put_pixel(x, y, image::Rgb([GEM.r, GEM.g, GEM.b]));
                }
            }
        }
        // a stray gem outside the panel
        for y in 0..2 {
            for x in 0..2 {
                img.put_pixel(x, y, image::Rgb([GEM.r, GEM.g, GEM.b]));
            }
        }
        Frame::from_rgb_image(img)
    }

    #[test]
    fn nested_detections_search_inside_parents() {
        let frame = scene();
        let plan = PerceptionPlan::new()
            .detect(DetectionSpec::color(
                "panel",
                ColorSignature::exact(PANEL),
                frame.bounds(),
            ))
            .detect_within(
                "panel",
                DetectionSpec::color("gem", ColorSignature::exact(GEM), frame.bounds()),
            );
        let snap = perceive(&frame, &plan).unwrap();

        assert_eq!(snap.detections("panel").len(), 1);
        let gems = snap.detections("gem");
        assert_eq!(gems.len(), 2);
        assert!(gems.iter().all(|g| Rectangle::new(5, 5, 30, 20).contains(&g.bounds)));
        let parent = snap.parent_of("gem", 0).unwrap();
        assert_eq!(parent.tag, "panel");
    }

    #[test]
    fn nested_results_are_ranked_across_parents() {
        // two separate panels; a sparse plus-shaped gem on the left (5 of 9
        // pixels) and a solid gem on the right
        let mut img = image::RgbImage::from_pixel(50, 20, image::Rgb([5, 5, 5]));
        for (x0, x1) in [(2u32, 20u32), (28, 46)] {
            for y in 2..18 {
                for x in x0..x1 {
                    img.put_pixel(x, y, image::Rgb([PANEL.r, PANEL.g, PANEL.b]));
                }
            }
        }
        let gem = image::Rgb([GEM.r, GEM.g, GEM.b]);
        for (x, y) in [(9u32, 8u32), (8, 9), (9, 9), (10, 9), (9, 10)] {
            img.put_pixel(x, y, gem);
        }
        for y in 8..11 {
            for x in 35..38 {
                img.put_pixel(x, y, gem);
            }
        }
        let frame = Frame::from_rgb_image(img);

        let plan = PerceptionPlan::new()
            .detect(DetectionSpec::color("panel", ColorSignature::exact(PANEL), frame.bounds()))
            .detect_within(
                "panel",
                DetectionSpec::color("gem", ColorSignature::exact(GEM), frame.bounds()),
            );
        let snap = perceive(&frame, &plan).unwrap();

        assert_eq!(snap.detections("panel").len(), 2);
        let gems = snap.detections("gem");
        assert_eq!(gems.len(), 2);
        assert!(gems[0].confidence >= gems[1].confidence);
        let best = snap.best("gem").unwrap();
        assert_eq!(best.bounds, Rectangle::new(35, 8, 3, 3));
        assert_eq!(best.confidence, 1.0);
    }

    #[test]
    fn nested_search_stays_inside_the_requested_region() {
        let frame = scene();
        // only the lower half of the panel may be searched
        let lower = Rectangle::new(0, 14, 40, 16);
        let plan = PerceptionPlan::new()
            .detect(DetectionSpec::color("panel", ColorSignature::exact(PANEL), frame.bounds()))
            .detect_within("panel", DetectionSpec::color("gem", ColorSignature::exact(GEM), lower));
        let snap = perceive(&frame, &plan).unwrap();
        let gems = snap.detections("gem");
        assert_eq!(gems.len(), 1);
        assert_eq!(gems[0].bounds, Rectangle::new(20, 15, 3, 3));
    }

    #[test]
    fn bad_search_aborts_the_pass() {
        let frame = scene();
        let plan = PerceptionPlan::new().detect(DetectionSpec::color(
            "panel",
            ColorSignature::exact(PANEL),
            Rectangle::new(30, 0, 20, 5),
        ));
        assert!(perceive(&frame, &plan).unwrap_err().is_precondition());
    }

    #[tokio::test]
    async fn blocking_wrapper_returns_same_snapshot() {
        let frame = Arc::new(scene());
        let plan = Arc::new(PerceptionPlan::new().detect(DetectionSpec::color(
            "gem",
            ColorSignature::exact(GEM),
            frame.bounds(),
        )));
        let a = perceive_blocking(frame.clone(), plan.clone()).await.unwrap();
        let b = perceive(&frame, &plan).unwrap();
        assert_eq!(a.detections, b.detections);
        assert_eq!(a.frame_id, frame.id());
    }
}
