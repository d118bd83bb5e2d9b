use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ColorBotResult;
use crate::geometry::Rectangle;
use crate::perception::color::{ColorSignature, Rgb};
use crate::perception::components::{connected_components, Component, MatchMask};
use crate::perception::ocr::glyph::{Bitmap, GlyphBank};
use crate::perception::types::{Frame, RecognizedText, UNKNOWN_GLYPH};

/// Size limits a connected component must satisfy to be read as a glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphBounds {
    pub min_pixels: usize,
    pub max_width: u32,
    pub max_height: u32,
    /// Width / height.
    pub max_aspect: f64,
}

impl GlyphBounds {
    /// Bounds loose enough for every glyph in `bank` with a little slack.
    pub fn from_bank(bank: &GlyphBank) -> Self {
        let max_aspect = bank
            .iter()
            .map(|g| g.bitmap.width as f64 / g.bitmap.height as f64)
            .fold(1.0, f64::max);
        Self {
            min_pixels: 1,
            max_width: bank.max_width() + 2,
            max_height: bank.max_height() + 2,
            max_aspect: max_aspect * 1.5,
        }
    }

    fn admits(&self, c: &Component) -> bool {
        let (w, h) = (c.bounds.width, c.bounds.height);
        c.pixels >= self.min_pixels
            && w <= self.max_width
            && h <= self.max_height
            && (w as f64 / h as f64) <= self.max_aspect
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub search: Rectangle,
    /// Foreground colors to try; `None` samples the dominant colors of `search`.
    pub candidate_signatures: Option<Vec<ColorSignature>>,
    pub glyph_bank: Arc<GlyphBank>,
    pub min_glyph_confidence: f64,
    pub auto_palette_size: usize,
    pub auto_tolerance: u8,
    /// Derived from the bank when `None`.
    pub bounds: Option<GlyphBounds>,
    /// Restrict matching to these characters.
    pub allowed_chars: Option<String>,
    /// Horizontal gap (px) at or above which a space is inserted.
    pub word_gap: Option<u32>,
}

impl OcrConfig {
    pub fn new(search: Rectangle, glyph_bank: Arc<GlyphBank>) -> Self {
        Self {
            search,
            candidate_signatures: None,
            glyph_bank,
            min_glyph_confidence: 0.75,
            auto_palette_size: 4,
            auto_tolerance: 24,
            bounds: None,
            allowed_chars: None,
            word_gap: None,
        }
    }

    pub fn with_signatures(mut self, signatures: Vec<ColorSignature>) -> Self {
        self.candidate_signatures = Some(signatures);
        self
    }
}

/// Color-tolerant text reader. Never fails on unreadable input; only
/// caller errors (bad rectangle, malformed signature) are reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct OcrEngine;

impl OcrEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn recognize(&self, frame: &Frame, config: &OcrConfig) -> ColorBotResult<RecognizedText> {
        frame.check_search(&config.search)?;
        if let Some(sigs) = &config.candidate_signatures {
            for sig in sigs {
                sig.validate()?;
            }
        }
        if config.search.is_degenerate() || config.glyph_bank.is_empty() {
            return Ok(RecognizedText::empty(config.search));
        }

        let signatures = match &config.candidate_signatures {
            Some(sigs) => sigs.clone(),
            None => dominant_signatures(
                frame,
                &config.search,
                config.auto_palette_size,
                config.auto_tolerance,
            ),
        };
        let bounds = config
            .bounds
            .unwrap_or_else(|| GlyphBounds::from_bank(&config.glyph_bank));

        let mut best = RecognizedText::empty(config.search);
        for sig in signatures {
            let reading = self.read_with(frame, config, &bounds, sig);
            tracing::trace!(
                text = %reading.text,
                confidence = reading.confidence(),
                "ocr interpretation"
            );
            if is_better(&reading, &best) {
                best = reading;
            }
        }

        tracing::debug!(
            frame_id = %frame.id(),
            search = %config.search,
            text = %best.text,
            confidence = best.confidence(),
            "ocr pass finished"
        );
        Ok(best)
    }

    fn read_with(
        &self,
        frame: &Frame,
        config: &OcrConfig,
        bounds: &GlyphBounds,
        sig: ColorSignature,
    ) -> RecognizedText {
        let mask = MatchMask::from_frame(frame, config.search, &sig);
        if mask.count() == 0 {
            return RecognizedText::empty(config.search);
        }

        let mut glyphs: Vec<Component> = merge_stacked(connected_components(&mask, 1))
            .into_iter()
            .filter(|c| bounds.admits(c))
            .collect();
        glyphs.sort_by(|a, b| {
            a.bounds
                .left
                .cmp(&b.bounds.left)
                .then(a.bounds.top.cmp(&b.bounds.top))
        });
        if glyphs.is_empty() {
            return RecognizedText::empty(config.search);
        }

        let mut text = String::new();
        let mut char_confidence = Vec::new();
        let mut char_bounds: Vec<Rectangle> = Vec::new();

        for (i, comp) in glyphs.iter().enumerate() {
            let bitmap = Bitmap::from_mask(&mask, &comp.bounds);
            let (ch, score) = config
                .glyph_bank
                .best_match(&bitmap, config.allowed_chars.as_deref())
                .unwrap_or((UNKNOWN_GLYPH, 0.0));
            let ch = if score >= config.min_glyph_confidence {
                ch
            } else {
                UNKNOWN_GLYPH
            };

            if let (Some(gap), Some(prev)) = (config.word_gap, i.checked_sub(1).map(|p| &glyphs[p])) {
                let space = comp.bounds.left as i64 - prev.bounds.right();
                if space >= gap as i64 {
                    let top = prev.bounds.top.min(comp.bounds.top);
                    let bottom = prev.bounds.bottom().max(comp.bounds.bottom());
                    text.push(' ');
                    char_confidence.push(score.min(*char_confidence.last().unwrap_or(&score)));
                    char_bounds.push(Rectangle::new(
                        prev.bounds.right() as i32,
                        top,
                        space as u32,
                        (bottom - top as i64) as u32,
                    ));
                }
            }

            text.push(ch);
            char_confidence.push(score);
            char_bounds.push(comp.bounds);
        }

        RecognizedText {
            text,
            bounds: union(&char_bounds),
            char_confidence,
            char_bounds,
            signature: Some(sig),
        }
    }
}

fn is_better(candidate: &RecognizedText, current: &RecognizedText) -> bool {
    if candidate.is_empty() {
        return false;
    }
    if current.is_empty() {
        return true;
    }
    let (a, b) = (candidate.confidence(), current.confidence());
    a > b || (a == b && candidate.text.chars().count() > current.text.chars().count())
}

/// Merge components whose horizontal spans overlap by at least half the
/// narrower width (dots over `i`, the halves of `:`).
fn merge_stacked(mut comps: Vec<Component>) -> Vec<Component> {
    comps.sort_by(|a, b| {
        a.bounds
            .left
            .cmp(&b.bounds.left)
            .then(a.bounds.top.cmp(&b.bounds.top))
    });
    let mut merged: Vec<Component> = Vec::with_capacity(comps.len());
    for c in comps {
        if let Some(last) = merged.last_mut() {
            let overlap = last.bounds.right().min(c.bounds.right())
                - (last.bounds.left.max(c.bounds.left) as i64);
            let narrower = last.bounds.width.min(c.bounds.width) as i64;
            if overlap > 0 && overlap * 2 >= narrower {
                *last = last.merge(&c);
                continue;
            }
        }
        merged.push(c);
    }
    merged
}

fn union(rects: &[Rectangle]) -> Rectangle {
    let left = rects.iter().map(|r| r.left).min().unwrap_or(0);
    let top = rects.iter().map(|r| r.top).min().unwrap_or(0);
    let right = rects.iter().map(|r| r.right()).max().unwrap_or(left as i64);
    let bottom = rects.iter().map(|r| r.bottom()).max().unwrap_or(top as i64);
    Rectangle::new(
        left,
        top,
        (right - left as i64) as u32,
        (bottom - top as i64) as u32,
    )
}

/// The `count` most frequent colors of `area`, bucketed to 5 bits per channel.
fn dominant_signatures(
    frame: &Frame,
    area: &Rectangle,
    count: usize,
    tolerance: u8,
) -> Vec<ColorSignature> {
    let mut buckets: HashMap<(u8, u8, u8), (usize, [u64; 3])> = HashMap::new();
    for y in 0..area.height {
        for x in 0..area.width {
            let p = frame.pixel(area.left as u32 + x, area.top as u32 + y);
            let entry = buckets
                .entry((p.r >> 3, p.g >> 3, p.b >> 3))
                .or_insert((0, [0; 3]));
            entry.0 += 1;
            entry.1[0] += p.r as u64;
            entry.1[1] += p.g as u64;
            entry.1[2] += p.b as u64;
        }
    }
    let mut ranked: Vec<_> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(count)
        .map(|(_, (n, sum))| {
            let n = n as u64;
            let mean = Rgb::new((sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8);
            ColorSignature::with_tolerance(mean, tolerance)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FONT: [(char, [&str; 5]); 4] = [
        ('0', ["###", "#.#", "#.#", "#.#", "###"]),
        ('1', [".#.", "##.", ".#.", ".#.", "###"]),
        ('7', ["###", "..#", ".#.", ".#.", ".#."]),
        ('H', ["#.#", "#.#", "###", "#.#", "#.#"]),
    ];
    const BLOCK: [&str; 5] = ["###", "###", "###", "###", "###"];

    fn bank() -> Arc<GlyphBank> {
        let mut bank = GlyphBank::new();
        for (ch, rows) in FONT {
            bank.insert(ch, Bitmap::from_ascii(&rows).unwrap());
        }
        Arc::new(bank)
    }

    fn glyph_rows(ch: char) -> [&'static str; 5] {
        FONT.iter()
            .find(|(c, _)| *c == ch)
            .map(|(_, rows)| *rows)
            .unwrap_or(BLOCK)
    }

    /// Draw `text` at (2, 2) on a 30x9 canvas, one pixel between glyphs,
    /// three extra for a space. `#` draws the solid block.
    fn render(text: &str, fg: Rgb, bg: Rgb) -> Frame {
        let mut img = image::RgbImage::from_pixel(30, 9, image::Rgb([bg.r, bg.g, bg.b]));
        let mut cursor = 2u32;
        for ch in text.chars() {
            if ch == ' ' {
                cursor += 3;
                continue;
            }
            for (y, row) in glyph_rows(ch).iter().enumerate() {
                for (x, c) in row.chars().enumerate() {
                    if c == '#' {
                        img.put_pixel(cursor + x as u32, 2 + y as u32, image::Rgb([fg.r, fg.g, fg.b]));
                    }
                }
            }
            cursor += 4;
        }
        Frame::from_rgb_image(img)
    }

    const WHITE: Rgb = Rgb::new(250, 250, 250);
    const BLUE: Rgb = Rgb::new(20, 40, 160);
    const YELLOW: Rgb = Rgb::new(240, 220, 20);

    #[test]
    fn reads_text_with_supplied_signature() {
        let frame = render("107", WHITE, BLUE);
        let config = OcrConfig::new(frame.bounds(), bank())
            .with_signatures(vec![ColorSignature::with_tolerance(WHITE, 10)]);
        let read = OcrEngine::new().recognize(&frame, &config).unwrap();
        assert_eq!(read.text, "107");
        assert!((read.confidence() - 1.0).abs() < 1e-9);
        assert_eq!(read.bounds, Rectangle::new(2, 2, 11, 5));
        assert_eq!(read.char_bounds.len(), 3);
    }

    #[test]
    fn samples_foreground_when_no_signature_given() {
        let frame = render("H0", YELLOW, Rgb::BLACK);
        let config = OcrConfig::new(frame.bounds(), bank());
        let read = OcrEngine::new().recognize(&frame, &config).unwrap();
        assert_eq!(read.text, "H0");
        assert_eq!(read.signature.map(|s| s.target), Some(YELLOW));
    }

    #[test]
    fn nothing_matching_reads_as_empty_zero_confidence() {
        let frame = render("107", WHITE, BLUE);
        let config = OcrConfig::new(frame.bounds(), bank())
            .with_signatures(vec![ColorSignature::exact(Rgb::new(255, 0, 0))]);
        let read = OcrEngine::new().recognize(&frame, &config).unwrap();
        assert!(read.is_empty());
        assert_eq!(read.confidence(), 0.0);
    }

    #[test]
    fn unreadable_glyph_becomes_placeholder() {
        let frame = render("1#", WHITE, BLUE);
        let mut config = OcrConfig::new(frame.bounds(), bank())
            .with_signatures(vec![ColorSignature::exact(WHITE)]);
        config.min_glyph_confidence = 0.9;
        let read = OcrEngine::new().recognize(&frame, &config).unwrap();
        assert_eq!(read.text, format!("1{UNKNOWN_GLYPH}"));
        assert!(read.has_unknown());
        assert!(read.char_confidence[1] < 0.9);
    }

    #[test]
    fn word_gaps_insert_spaces() {
        let frame = render("1 7", WHITE, BLUE);
        let mut config = OcrConfig::new(frame.bounds(), bank())
            .with_signatures(vec![ColorSignature::exact(WHITE)]);
        config.word_gap = Some(3);
        let read = OcrEngine::new().recognize(&frame, &config).unwrap();
        assert_eq!(read.text, "1 7");
        assert_eq!(read.char_bounds[1], Rectangle::new(5, 2, 4, 5));
        assert_eq!(read.find("7"), vec![Rectangle::new(9, 2, 3, 5)]);
    }

    #[test]
    fn rejects_search_outside_frame() {
        let frame = render("1", WHITE, BLUE);
        let config = OcrConfig::new(Rectangle::new(20, 0, 20, 9), bank());
        assert!(OcrEngine::new()
            .recognize(&frame, &config)
            .unwrap_err()
            .is_precondition());
    }

    #[test]
    fn recognition_is_deterministic() {
        let frame = render("H01", YELLOW, Rgb::BLACK);
        let config = OcrConfig::new(frame.bounds(), bank());
        let first = OcrEngine::new().recognize(&frame, &config).unwrap();
        for _ in 0..3 {
            assert_eq!(OcrEngine::new().recognize(&frame, &config).unwrap(), first);
        }
    }
}
