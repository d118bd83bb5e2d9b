//! Reference sub-images located by zero-mean normalized cross-correlation.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::Rectangle;
use crate::perception::color::Rgb;
use crate::perception::nms::Candidate;
use crate::perception::types::Frame;

/// Flat windows compare by mean luma within this distance.
const FLAT_LUMA_EPSILON: f64 = 1.0;

/// Per-pixel luma variance below which a window counts as flat.
const FLAT_VARIANCE: f64 = 0.01;

/// A reference image. Fully transparent pixels are ignored when matching.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    image: RgbaImage,
}

impl Template {
    pub fn from_image(name: impl Into<String>, image: DynamicImage) -> ColorBotResult<Self> {
        let image = image.to_rgba8();
        if image.width() == 0 || image.height() == 0 {
            return Err(ColorBotError::precondition("template image is empty"));
        }
        Ok(Self {
            name: name.into(),
            image,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> ColorBotResult<Self> {
        let path = path.as_ref();
        let image = image::open(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "template loaded");
        Self::from_image(name, image)
    }

    /// Cut a template out of a captured frame.
    pub fn from_frame(name: impl Into<String>, frame: &Frame, rect: Rectangle) -> ColorBotResult<Self> {
        frame.check_search(&rect)?;
        let image = RgbaImage::from_fn(rect.width, rect.height, |x, y| {
            let p = frame.pixel(rect.left as u32 + x, rect.top as u32 + y);
            image::Rgba([p.r, p.g, p.b, 255])
        });
        Self::from_image(name, DynamicImage::ImageRgba8(image))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    fn variant(&self, scale: f64) -> Option<ScaledTemplate> {
        let resized;
        let image = if (scale - 1.0).abs() < f64::EPSILON {
            &self.image
        } else {
            let w = (self.image.width() as f64 * scale).round().max(1.0) as u32;
            let h = (self.image.height() as f64 * scale).round().max(1.0) as u32;
            resized = image::imageops::resize(&self.image, w, h, FilterType::Triangle);
            &resized
        };
        ScaledTemplate::build(image)
    }
}

/// Luma values of one template scale, precentered over active pixels.
struct ScaledTemplate {
    width: u32,
    height: u32,
    /// (offset into the window, centered luma) per active pixel
    active: Vec<(usize, f64)>,
    mean: f64,
    norm: f64,
}

impl ScaledTemplate {
    fn build(image: &RgbaImage) -> Option<Self> {
        let (width, height) = image.dimensions();
        let mut raw = Vec::new();
        for (x, y, px) in image.enumerate_pixels() {
            if px.0[3] == 0 {
                continue;
            }
            let luma = Rgb::new(px.0[0], px.0[1], px.0[2]).luma() as f64;
            raw.push(((y * width + x) as usize, luma));
        }
        if raw.is_empty() {
            return None;
        }
        let mean = raw.iter().map(|(_, v)| *v).sum::<f64>() / raw.len() as f64;
        let active: Vec<(usize, f64)> = raw.into_iter().map(|(i, v)| (i, v - mean)).collect();
        let norm = active.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        Some(Self {
            width,
            height,
            active,
            mean,
            norm,
        })
    }

    fn is_flat(&self) -> bool {
        self.norm * self.norm <= FLAT_VARIANCE * self.active.len() as f64
    }

    /// Correlation of the window whose top-left is (x, y) in a plane of width `stride`.
    fn score_at(&self, plane: &[f32], stride: usize, x: usize, y: usize) -> f32 {
        let n = self.active.len() as f64;
        let tw = self.width as usize;
        let (mut s, mut ss, mut st) = (0f64, 0f64, 0f64);
        for &(offset, t) in &self.active {
            let v = plane[(y + offset / tw) * stride + x + offset % tw] as f64;
            s += v;
            ss += v * v;
            st += v * t;
        }
        let window_mean = s / n;
        let window_var = (ss - s * window_mean).max(0.0);
        let window_flat = window_var <= FLAT_VARIANCE * n;

        if self.is_flat() || window_flat {
            // correlation is undefined on flat input: only flat matches flat
            let both_flat = self.is_flat() && window_flat;
            return if both_flat && (window_mean - self.mean).abs() <= FLAT_LUMA_EPSILON {
                1.0
            } else {
                0.0
            };
        }
        (st / (self.norm * window_var.sqrt())) as f32
    }

    fn score_map(&self, plane: &[f32], pw: usize, ph: usize) -> (Vec<f32>, usize, usize) {
        let cols = pw - self.width as usize + 1;
        let rows = ph - self.height as usize + 1;
        let row = |y: usize| -> Vec<f32> {
            (0..cols).map(|x| self.score_at(plane, pw, x, y)).collect()
        };

        #[cfg(feature = "parallel")]
        let scores: Vec<f32> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().flat_map_iter(row).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let scores: Vec<f32> = (0..rows).flat_map(row).collect();

        (scores, cols, rows)
    }
}

/// Score every placement of every scaled variant of `template` inside
/// `search` and return the local maxima scoring at least `floor`.
///
/// `search` must already be validated against the frame.
pub fn match_template(
    frame: &Frame,
    search: &Rectangle,
    template: &Template,
    scales: &[f64],
    floor: f64,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    if search.is_degenerate() {
        return candidates;
    }
    let plane = frame.luma_plane(search);
    let (pw, ph) = (search.width as usize, search.height as usize);

    for &scale in scales {
        let Some(variant) = template.variant(scale) else {
            continue;
        };
        if variant.width as usize > pw || variant.height as usize > ph {
            tracing::trace!(template = %template.name(), scale, "scaled template exceeds search area");
            continue;
        }
        let (scores, cols, rows) = variant.score_map(&plane, pw, ph);
        let before = candidates.len();

        for y in 0..rows {
            for x in 0..cols {
                let s = scores[y * cols + x];
                if (s as f64) < floor || !is_local_max(&scores, cols, rows, x, y) {
                    continue;
                }
                candidates.push(Candidate {
                    bounds: Rectangle::new(
                        search.left + x as i32,
                        search.top + y as i32,
                        variant.width,
                        variant.height,
                    ),
                    score: (s as f64).clamp(0.0, 1.0),
                });
            }
        }
        tracing::trace!(
            template = %template.name(),
            scale,
            peaks = candidates.len() - before,
            "template scale scored"
        );
    }
    candidates
}

fn is_local_max(scores: &[f32], cols: usize, rows: usize, x: usize, y: usize) -> bool {
    let s = scores[y * cols + x];
    for ny in y.saturating_sub(1)..=(y + 1).min(rows - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(cols - 1) {
            if scores[ny * cols + nx] > s {
                return false;
            }
        }
    }
    true
}
