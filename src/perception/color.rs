//! Tolerance-banded color signatures.

use serde::{Deserialize, Serialize};

use crate::errors::{ColorBotError, ColorBotResult};

/// Upper bound on alternative colors a signature may carry.
pub const MAX_ALTERNATIVES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` or `rrggbb`.
    pub fn from_hex(text: &str) -> ColorBotResult<Self> {
        let hex = text.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ColorBotError::precondition(format!(
                "malformed color '{text}': expected #rrggbb"
            )));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| {
                ColorBotError::precondition(format!("malformed color '{text}': bad hex digits"))
            })
        };
        Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// ITU-R 601 luma, matching `image`'s grayscale conversion.
    #[inline]
    pub fn luma(&self) -> f32 {
        0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(c: [u8; 3]) -> Self {
        Rgb::new(c[0], c[1], c[2])
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct ChannelTolerance {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ChannelTolerance {
    pub const fn uniform(t: u8) -> Self {
        Self { r: t, g: t, b: t }
    }
}

impl From<[u8; 3]> for ChannelTolerance {
    fn from(c: [u8; 3]) -> Self {
        Self {
            r: c[0],
            g: c[1],
            b: c[2],
        }
    }
}

impl From<ChannelTolerance> for [u8; 3] {
    fn from(c: ChannelTolerance) -> Self {
        [c.r, c.g, c.b]
    }
}

/// Target color plus per-channel tolerance, optionally with alternatives
/// for anti-aliased edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorSignature {
    pub target: Rgb,
    #[serde(default)]
    pub tolerance: ChannelTolerance,
    #[serde(default)]
    pub alternatives: Vec<Rgb>,
}

impl ColorSignature {
    pub fn exact(target: Rgb) -> Self {
        Self {
            target,
            tolerance: ChannelTolerance::default(),
            alternatives: Vec::new(),
        }
    }

    pub fn with_tolerance(target: Rgb, tolerance: u8) -> Self {
        Self {
            target,
            tolerance: ChannelTolerance::uniform(tolerance),
            alternatives: Vec::new(),
        }
    }

    /// Signature covering the inclusive per-channel range `lo..=hi`.
    pub fn from_range(lo: Rgb, hi: Rgb) -> ColorBotResult<Self> {
        if lo.r > hi.r || lo.g > hi.g || lo.b > hi.b {
            return Err(ColorBotError::precondition(format!(
                "malformed color range {lo}..={hi}: lower bound exceeds upper"
            )));
        }
        // odd spans round the tolerance up so both ends stay inside
        let mid = |a: u8, b: u8| ((a as u16 + b as u16) / 2) as u8;
        let half = |a: u8, b: u8| ((b - a) as u16).div_ceil(2) as u8;
        Ok(Self {
            target: Rgb::new(mid(lo.r, hi.r), mid(lo.g, hi.g), mid(lo.b, hi.b)),
            tolerance: ChannelTolerance {
                r: half(lo.r, hi.r),
                g: half(lo.g, hi.g),
                b: half(lo.b, hi.b),
            },
            alternatives: Vec::new(),
        })
    }

    pub fn with_alternatives(mut self, alternatives: impl IntoIterator<Item = Rgb>) -> Self {
        self.alternatives.extend(alternatives);
        self
    }

    pub fn validate(&self) -> ColorBotResult<()> {
        if self.alternatives.len() > MAX_ALTERNATIVES {
            return Err(ColorBotError::precondition(format!(
                "color signature {} carries {} alternatives (max {MAX_ALTERNATIVES})",
                self.target,
                self.alternatives.len()
            )));
        }
        Ok(())
    }

    #[inline(always)]
    fn within(&self, pixel: Rgb, c: Rgb) -> bool {
        // bitwise `&` keeps the comparison free of short-circuit branches
        (pixel.r.abs_diff(c.r) <= self.tolerance.r)
            & (pixel.g.abs_diff(c.g) <= self.tolerance.g)
            & (pixel.b.abs_diff(c.b) <= self.tolerance.b)
    }

    #[inline]
    pub fn matches(&self, pixel: Rgb) -> bool {
        let mut hit = self.within(pixel, self.target);
        for alt in &self.alternatives {
            hit |= self.within(pixel, *alt);
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_within_per_channel_tolerance() {
        let sig = ColorSignature {
            target: Rgb::new(100, 150, 200),
            tolerance: ChannelTolerance { r: 5, g: 0, b: 10 },
            alternatives: vec![],
        };
        assert!(sig.matches(Rgb::new(105, 150, 190)));
        assert!(!sig.matches(Rgb::new(106, 150, 200)));
        assert!(!sig.matches(Rgb::new(100, 151, 200)));
    }

    #[test]
    fn alternatives_extend_the_match() {
        let sig = ColorSignature::with_tolerance(Rgb::new(255, 255, 0), 2)
            .with_alternatives([Rgb::new(128, 128, 0)]);
        assert!(sig.matches(Rgb::new(129, 127, 1)));
        assert!(!sig.matches(Rgb::new(0, 0, 255)));
    }

    #[test]
    fn range_covers_both_ends() {
        let sig = ColorSignature::from_range(Rgb::new(10, 20, 30), Rgb::new(21, 20, 40)).unwrap();
        assert!(sig.matches(Rgb::new(10, 20, 30)));
        assert!(sig.matches(Rgb::new(21, 20, 40)));
        assert!(!sig.matches(Rgb::new(10, 21, 30)));
        assert!(ColorSignature::from_range(Rgb::new(5, 0, 0), Rgb::new(4, 0, 0)).is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Rgb::from_hex("#12345").is_err());
        assert!(Rgb::from_hex("#zz0000").is_err());
        assert_eq!(Rgb::from_hex("#ff8000").unwrap(), Rgb::new(255, 128, 0));

        let sig = ColorSignature::exact(Rgb::BLACK).with_alternatives(vec![Rgb::WHITE; 9]);
        assert!(sig.validate().unwrap_err().is_precondition());
    }
}
