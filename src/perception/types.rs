use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::{Point, Rectangle};
use crate::perception::color::Rgb;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    Rgb8,
    Rgba8,
    Bgra8,
    Gray8,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 | PixelLayout::Bgra8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }

    pub fn has_color(&self) -> bool {
        self.channels() >= 3
    }
}

/// Immutable captured image. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    id: FrameId,
    width: u32,
    height: u32,
    layout: PixelLayout,
    pixels: Arc<[u8]>,
    captured_at: DateTime<Utc>,
    origin: Point,
    scale: f64,
}

impl Frame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        captured_at: DateTime<Utc>,
    ) -> ColorBotResult<Self> {
        let expected = width as usize * height as usize * layout.channels();
        if pixels.len() != expected {
            return Err(ColorBotError::precondition(format!(
                "frame buffer holds {} bytes, {width}x{height} {layout:?} needs {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            id: FrameId::next(),
            width,
            height,
            layout,
            pixels: pixels.into(),
            captured_at,
            origin: Point::default(),
            scale: 1.0,
        })
    }

    pub fn from_rgb_image(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            id: FrameId::next(),
            width,
            height,
            layout: PixelLayout::Rgb8,
            pixels: image.into_raw().into(),
            captured_at: Utc::now(),
            origin: Point::default(),
            scale: 1.0,
        }
    }

    /// Place the frame on screen: `origin` is the screen position of pixel
    /// (0, 0) and `scale` the number of frame pixels per screen pixel.
    pub fn with_placement(mut self, origin: Point, scale: f64) -> ColorBotResult<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ColorBotError::precondition(format!(
                "frame scale must be positive, got {scale}"
            )));
        }
        self.origin = origin;
        self.scale = scale;
        Ok(self)
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Full extent in frame coordinates.
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width, self.height)
    }

    /// Ensure `search` lies inside the frame and the frame carries color channels.
    pub fn check_search(&self, search: &Rectangle) -> ColorBotResult<()> {
        if !self.layout.has_color() {
            return Err(ColorBotError::precondition(format!(
                "frame {} has {:?} layout, color channels required",
                self.id, self.layout
            )));
        }
        if !self.bounds().contains(search) {
            return Err(ColorBotError::precondition(format!(
                "search rectangle {search} lies outside frame {} bounds {}",
                self.id,
                self.bounds()
            )));
        }
        Ok(())
    }

    /// Pixel at (x, y). Callers guarantee the coordinate is inside the frame.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        let ch = self.layout.channels();
        let i = (y as usize * self.width as usize + x as usize) * ch;
        let p = &self.pixels[i..i + ch];
        match self.layout {
            PixelLayout::Rgb8 | PixelLayout::Rgba8 => Rgb::new(p[0], p[1], p[2]),
            PixelLayout::Bgra8 => Rgb::new(p[2], p[1], p[0]),
            PixelLayout::Gray8 => Rgb::new(p[0], p[0], p[0]),
        }
    }

    /// Row-major luma plane of `rect`, which must lie inside the frame.
    pub fn luma_plane(&self, rect: &Rectangle) -> Vec<f32> {
        let mut out = Vec::with_capacity(rect.area() as usize);
        for y in 0..rect.height {
            for x in 0..rect.width {
                out.push(self.pixel(rect.left as u32 + x, rect.top as u32 + y).luma());
            }
        }
        out
    }
}

/// A classified region found within one frame. Only meaningful while its
/// source frame is the latest one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub bounds: Rectangle,
    pub tag: String,
    pub confidence: f64,
    pub frame_id: FrameId,
}

/// Character placed where glyph matching fell below the confidence floor.
pub const UNKNOWN_GLYPH: char = '\u{FFFD}';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub bounds: Rectangle,
    /// One entry per `char` of `text`.
    pub char_confidence: Vec<f64>,
    pub char_bounds: Vec<Rectangle>,
    pub signature: Option<crate::perception::color::ColorSignature>,
}

impl RecognizedText {
    /// "Nothing recognized" inside `search`.
    pub fn empty(search: Rectangle) -> Self {
        Self {
            text: String::new(),
            bounds: Rectangle::new(search.left, search.top, 0, 0),
            char_confidence: Vec::new(),
            char_bounds: Vec::new(),
            signature: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Mean per-character confidence, 0.0 for empty text.
    pub fn confidence(&self) -> f64 {
        if self.char_confidence.is_empty() {
            return 0.0;
        }
        self.char_confidence.iter().sum::<f64>() / self.char_confidence.len() as f64
    }

    pub fn has_unknown(&self) -> bool {
        self.text.contains(UNKNOWN_GLYPH)
    }

    /// Bounding rectangle of every non-overlapping occurrence of `needle`.
    pub fn find(&self, needle: &str) -> Vec<Rectangle> {
        let hay: Vec<char> = self.text.chars().collect();
        let pat: Vec<char> = needle.chars().collect();
        let mut found = Vec::new();
        if pat.is_empty() || pat.len() > hay.len() {
            return found;
        }
        let mut i = 0;
        while i + pat.len() <= hay.len() {
            if hay[i..i + pat.len()] == pat[..] {
                let first = self.char_bounds[i];
                let last = self.char_bounds[i + pat.len() - 1];
                let top = self.char_bounds[i..i + pat.len()]
                    .iter()
                    .map(|r| r.top)
                    .min()
                    .unwrap_or(first.top);
                let bottom = self.char_bounds[i..i + pat.len()]
                    .iter()
                    .map(|r| r.bottom())
                    .max()
                    .unwrap_or(first.bottom());
                found.push(Rectangle::new(
                    first.left,
                    top,
                    (last.right() - first.left as i64) as u32,
                    (bottom - top as i64) as u32,
                ));
                i += pat.len();
            } else {
                i += 1;
            }
        }
        found
    }
}

/// Reference to one detection inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectionRef {
    pub tag: String,
    pub index: usize,
}

/// `child` lies inside `parent`, the smallest enclosing detection of another tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nesting {
    pub child: DetectionRef,
    pub parent: DetectionRef,
}

/// World view built from a single frame, handed to the decision policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub frame_id: FrameId,
    pub captured_at: DateTime<Utc>,
    pub frame_bounds: Rectangle,
    pub origin: Point,
    pub scale: f64,
    pub detections: BTreeMap<String, Vec<DetectedObject>>,
    pub texts: BTreeMap<String, RecognizedText>,
    pub parents: Vec<Nesting>,
}

impl Snapshot {
    pub fn detections(&self, tag: &str) -> &[DetectedObject] {
        self.detections.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest ranked detection for `tag` under its configured sort order.
    pub fn best(&self, tag: &str) -> Option<&DetectedObject> {
        self.detections(tag).first()
    }

    pub fn get(&self, r: &DetectionRef) -> Option<&DetectedObject> {
        self.detections.get(&r.tag).and_then(|v| v.get(r.index))
    }

    pub fn parent_of(&self, tag: &str, index: usize) -> Option<&DetectedObject> {
        self.parents
            .iter()
            .find(|n| n.child.tag == tag && n.child.index == index)
            .and_then(|n| self.get(&n.parent))
    }

    pub fn text(&self, key: &str) -> Option<&RecognizedText> {
        self.texts.get(key)
    }

    pub fn to_screen(&self, rect: &Rectangle) -> Rectangle {
        rect.to_screen(self.origin, self.scale)
    }

    pub fn point_to_screen(&self, point: Point) -> Point {
        point.to_screen(self.origin, self.scale)
    }

    pub fn total_detections(&self) -> usize {
        self.detections.values().map(Vec::len).sum()
    }
}
