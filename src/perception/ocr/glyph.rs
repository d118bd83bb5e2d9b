//! Binary glyph bitmaps and the font banks they are matched against.

use std::collections::BTreeMap;
use std::path::Path;

use image::DynamicImage;

use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::Rectangle;
use crate::perception::components::MatchMask;

/// Row-major binary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    bits: Vec<bool>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, bits: Vec<bool>) -> ColorBotResult<Self> {
        if width == 0 || height == 0 || bits.len() != (width * height) as usize {
            return Err(ColorBotError::precondition(format!(
                "bitmap {width}x{height} needs {} bits, got {}",
                width * height,
                bits.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    /// `#` (or any non-space, non-`.` character) is ink.
    pub fn from_ascii(rows: &[&str]) -> ColorBotResult<Self> {
        let width = rows.first().map(|r| r.chars().count()).unwrap_or(0) as u32;
        if rows.iter().any(|r| r.chars().count() as u32 != width) {
            return Err(ColorBotError::precondition("ascii glyph rows differ in width"));
        }
        let bits = rows
            .iter()
            .flat_map(|r| r.chars().map(|c| c != '.' && c != ' '))
            .collect();
        Self::new(width, rows.len() as u32, bits)
    }

    /// Light pixels on dark background are ink; transparent pixels never are.
    pub fn from_image(image: &DynamicImage) -> ColorBotResult<Self> {
        let rgba = image.to_rgba8();
        let bits = rgba
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                a > 0 && luma >= 128.0
            })
            .collect();
        Self::new(rgba.width(), rgba.height(), bits)
    }

    /// Cut `rect` (frame coordinates, inside the mask, non-degenerate) out of a match mask.
    pub(crate) fn from_mask(mask: &MatchMask, rect: &Rectangle) -> Self {
        let area = mask.area();
        let ox = (rect.left - area.left) as u32;
        let oy = (rect.top - area.top) as u32;
        let mut bits = Vec::with_capacity(rect.area() as usize);
        for y in 0..rect.height {
            for x in 0..rect.width {
                bits.push(mask.get(ox + x, oy + y));
            }
        }
        Self {
            width: rect.width,
            height: rect.height,
            bits,
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.width + x) as usize]
    }

    pub fn ink(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Nearest-neighbour lookup as if this bitmap were stretched to `w`x`h`.
    #[inline]
    fn sample(&self, x: u32, y: u32, w: u32, h: u32) -> bool {
        let sx = ((x as u64 * self.width as u64) / w as u64) as u32;
        let sy = ((y as u64 * self.height as u64) / h as u64) as u32;
        self.get(sx.min(self.width - 1), sy.min(self.height - 1))
    }

    /// Similarity in [0, 1] between `self` and `other` after stretching
    /// `other` onto this bitmap's grid, scaled by how close the sizes are.
    pub fn correlate(&self, other: &Bitmap) -> f64 {
        let (w, h) = (self.width, self.height);
        let n = (w * h) as f64;
        let (mut ink_a, mut ink_b, mut both, mut agree) = (0f64, 0f64, 0f64, 0f64);
        for y in 0..h {
            for x in 0..w {
                let a = self.get(x, y);
                let b = other.sample(x, y, w, h);
                ink_a += a as u8 as f64;
                ink_b += b as u8 as f64;
                both += (a && b) as u8 as f64;
                agree += (a == b) as u8 as f64;
            }
        }

        let var_a = ink_a - ink_a * ink_a / n;
        let var_b = ink_b - ink_b * ink_b / n;
        let shape = if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
            // solid or empty bitmaps: plain pixel agreement
            agree / n
        } else {
            ((both - ink_a * ink_b / n) / (var_a * var_b).sqrt()).max(0.0)
        };

        let sw = self.width.min(other.width) as f64 / self.width.max(other.width) as f64;
        let sh = self.height.min(other.height) as f64 / self.height.max(other.height) as f64;
        (shape * (sw * sh).sqrt()).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub ch: char,
    pub bitmap: Bitmap,
}

/// A fixed font: one bitmap per character.
#[derive(Debug, Clone, Default)]
pub struct GlyphBank {
    glyphs: BTreeMap<char, Glyph>,
}

impl GlyphBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ch: char, bitmap: Bitmap) {
        self.glyphs.insert(ch, Glyph { ch, bitmap });
    }

    pub fn with_ascii(mut self, ch: char, rows: &[&str]) -> ColorBotResult<Self> {
        self.insert(ch, Bitmap::from_ascii(rows)?);
        Ok(self)
    }

    /// Load every image in `dir` named by a decimal code point, e.g. `65.png` for `A`.
    pub fn load_dir(dir: impl AsRef<Path>) -> ColorBotResult<Self> {
        let dir = dir.as_ref();
        let mut bank = Self::new();
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.path());

        for entry in entries {
            let path = entry.path();
            let code = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
                .and_then(char::from_u32);
            let Some(ch) = code else {
                tracing::debug!(path = %path.display(), "skipping file without code point name");
                continue;
            };
            let image = image::open(&path)?;
            bank.insert(ch, Bitmap::from_image(&image)?);
        }

        if bank.is_empty() {
            return Err(ColorBotError::Config(format!(
                "no glyph images found in {}",
                dir.display()
            )));
        }
        tracing::info!(dir = %dir.display(), glyphs = bank.len(), "glyph bank loaded");
        Ok(bank)
    }

    pub fn get(&self, ch: char) -> Option<&Glyph> {
        self.glyphs.get(&ch)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Glyph> {
        self.glyphs.values()
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn max_width(&self) -> u32 {
        self.iter().map(|g| g.bitmap.width).max().unwrap_or(0)
    }

    pub fn max_height(&self) -> u32 {
        self.iter().map(|g| g.bitmap.height).max().unwrap_or(0)
    }

    /// Best glyph for `candidate`, restricted to `allowed` when given.
    /// Ties keep the lowest code point.
    pub fn best_match(&self, candidate: &Bitmap, allowed: Option<&str>) -> Option<(char, f64)> {
        let mut best: Option<(char, f64)> = None;
        for glyph in self.iter() {
            if allowed.is_some_and(|a| !a.contains(glyph.ch)) {
                continue;
            }
            let score = glyph.bitmap.correlate(candidate);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((glyph.ch, score));
            }
        }
        best
    }
}
