use std::sync::Arc;

use colorbot_lib::geometry::Rectangle;
use colorbot_lib::perception::color::{ColorSignature, Rgb};
use colorbot_lib::perception::detector::DetectionSpec;
use colorbot_lib::perception::ocr::{Bitmap, GlyphBank, OcrConfig};
use colorbot_lib::perception::pipeline::{perceive, PerceptionPlan};
use colorbot_lib::perception::types::Frame;

const RED: Rgb = Rgb::new(220, 30, 30);
const GRAY: Rgb = Rgb::new(60, 60, 60);

fn canvas(width: u32, height: u32, fills: &[(Rectangle, Rgb)]) -> Frame {
    let mut img = image::RgbImage::from_pixel(width, height, image::Rgb([GRAY.r, GRAY.g, GRAY.b]));
    for (rect, c) in fills {
        for y in rect.top..rect.bottom() as i32 {
            for x in rect.left..rect.right() as i32 {
                img.put_pixel(x as u32, y as u32, image::Rgb([c.r, c.g, c.b]));
            }
        }
    }
    Frame::from_rgb_image(img)
}

fn font() -> Arc<GlyphBank> {
    let mut bank = GlyphBank::new();
    bank.insert('1', Bitmap::from_ascii(&[".#.", "##.", ".#.", ".#.", "###"]).unwrap());
    bank.insert('0', Bitmap::from_ascii(&["###", "#.#", "#.#", "#.#", "###"]).unwrap());
    Arc::new(bank)
}

#[test]
fn uniform_search_region_is_a_single_certain_detection() {
    let search = Rectangle::new(12, 6, 5, 5);
    let frame = canvas(40, 30, &[(search, RED)]);
    let mut spec = DetectionSpec::color("enemy", ColorSignature::exact(RED), search);
    spec.min_component_size = 4;

    let snapshot = perceive(&frame, &PerceptionPlan::new().detect(spec)).unwrap();
    let found = snapshot.detections("enemy");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].bounds, search);
    assert_eq!(found[0].confidence, 1.0);
    assert_eq!(found[0].frame_id, frame.id());
}

#[test]
fn ocr_without_matching_pixels_reads_nothing() {
    let frame = canvas(30, 10, &[]);
    let config = OcrConfig::new(frame.bounds(), font())
        .with_signatures(vec![ColorSignature::with_tolerance(Rgb::new(255, 255, 255), 8)]);

    let snapshot = perceive(&frame, &PerceptionPlan::new().read("score", config)).unwrap();
    let read = snapshot.text("score").unwrap();
    assert_eq!(read.text, "");
    assert_eq!(read.confidence(), 0.0);
}

#[test]
fn search_outside_frame_is_rejected_up_front() {
    let frame = canvas(40, 30, &[(Rectangle::new(0, 0, 40, 30), RED)]);
    let inside = DetectionSpec::color("ok", ColorSignature::exact(RED), Rectangle::new(0, 0, 10, 10));
    let outside = DetectionSpec::color("bad", ColorSignature::exact(RED), Rectangle::new(35, 25, 10, 10));

    let err = perceive(&frame, &PerceptionPlan::new().detect(inside).detect(outside)).unwrap_err();
    assert!(err.is_precondition(), "unexpected error {err}");
}

#[test]
fn nested_detection_only_searches_inside_its_parent() {
    let panel = Rectangle::new(4, 4, 16, 12);
    let gem_in = Rectangle::new(8, 8, 3, 3);
    let gem_out = Rectangle::new(30, 20, 3, 3);
    let blue = Rgb::new(20, 40, 200);
    let frame = canvas(40, 30, &[(panel, blue), (gem_in, RED), (gem_out, RED)]);

    let plan = PerceptionPlan::new()
        .detect(DetectionSpec::color("panel", ColorSignature::with_tolerance(blue, 4), frame.bounds()))
        .detect_within(
            "panel",
            DetectionSpec::color("gem", ColorSignature::exact(RED), frame.bounds()),
        );
    let snapshot = perceive(&frame, &plan).unwrap();
    let gems = snapshot.detections("gem");
    assert_eq!(gems.len(), 1);
    assert_eq!(gems[0].bounds, gem_in);
}
