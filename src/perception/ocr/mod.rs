//! Color-tolerant OCR: glyphs are segmented by color signature rather than
//! by a fixed binarization threshold, then matched against a bitmap font.

pub mod engine;
pub mod glyph;

pub use engine::{GlyphBounds, OcrConfig, OcrEngine};
pub use glyph::{Bitmap, Glyph, GlyphBank};
