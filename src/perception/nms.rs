//! Deterministic ranking and greedy non-maximum suppression.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rectangle};
use crate::perception::types::DetectedObject;

/// Scored window before classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bounds: Rectangle,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Descending confidence, ties broken top-to-bottom then left-to-right.
    #[default]
    Confidence,
    /// Top-to-bottom, then left-to-right.
    ReadingOrder,
    /// Nearest to the search rectangle's center first.
    DistanceFromCenter,
    /// Largest bounding box first.
    AreaDescending,
}

fn by_position(a: &Rectangle, b: &Rectangle) -> Ordering {
    a.top.cmp(&b.top).then(a.left.cmp(&b.left))
}

fn by_score(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| by_position(&a.bounds, &b.bounds))
        .then_with(|| b.bounds.area().cmp(&a.bounds.area()))
}

/// Greedy NMS: walk candidates best-first, dropping any whose IoU with an
/// already kept window exceeds `iou_threshold`.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f64) -> Vec<Candidate> {
    candidates.sort_by(by_score);

    let mut keep: Vec<Candidate> = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i]);
        for j in (i + 1)..candidates.len() {
            if !suppressed[j] && candidates[i].bounds.iou(&candidates[j].bounds) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

/// Order detections; every order ends with a top/left tie-break so the
/// result is a total order over distinct rectangles.
pub fn sort_detections(objects: &mut [DetectedObject], order: SortOrder, search: &Rectangle) {
    let center: Point = search.center();
    objects.sort_by(|a, b| {
        let primary = match order {
            SortOrder::Confidence => b.confidence.total_cmp(&a.confidence),
            SortOrder::ReadingOrder => Ordering::Equal,
            SortOrder::DistanceFromCenter => a
                .bounds
                .center()
                .distance(&center)
                .total_cmp(&b.bounds.center().distance(&center)),
            SortOrder::AreaDescending => b.bounds.area().cmp(&a.bounds.area()),
        };
        primary
            .then_with(|| by_position(&a.bounds, &b.bounds))
            .then_with(|| b.bounds.area().cmp(&a.bounds.area()))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}
