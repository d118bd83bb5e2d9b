//! Bounded random samplers behind every humanized delay, offset and
//! coordinate.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::{Point, Rectangle};

/// Rejection attempts before a sample is clamped into range.
const MAX_REJECTIONS: usize = 64;

/// Weight of the preferred sub-mean in [`biased_truncated_normal`].
const PREFERRED_MEAN_WEIGHT: f64 = 0.8;

/// Normal distribution truncated to `[lo, hi]`. Mean defaults to the
/// midpoint and standard deviation to a sixth of the range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncatedNormal {
    pub lo: f64,
    pub hi: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
}

impl TruncatedNormal {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self {
            lo,
            hi,
            mean: None,
            std: None,
        }
    }

    pub const fn with_mean(lo: f64, hi: f64, mean: f64) -> Self {
        Self {
            lo,
            hi,
            mean: Some(mean),
            std: None,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean.unwrap_or((self.lo + self.hi) / 2.0)
    }

    pub fn std(&self) -> f64 {
        self.std.unwrap_or((self.hi - self.lo) / 6.0)
    }

    pub fn validate(&self, name: &str) -> ColorBotResult<()> {
        let finite = [self.lo, self.hi, self.mean(), self.std()]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.lo > self.hi || self.std() < 0.0 {
            return Err(ColorBotError::Config(format!(
                "{name}: invalid distribution {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        truncated_normal(rng, self.lo, self.hi, self.mean(), self.std())
    }
}

/// Standard normal deviate (Box-Muller).
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

pub fn truncated_normal<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64, mean: f64, std: f64) -> f64 {
    if lo.is_nan() || hi.is_nan() || lo >= hi {
        return lo;
    }
    if std.is_nan() || std <= 0.0 {
        return mean.clamp(lo, hi);
    }
    for _ in 0..MAX_REJECTIONS {
        let s = mean + std * standard_normal(rng);
        if (lo..=hi).contains(&s) {
            return s;
        }
    }
    (mean + std * standard_normal(rng)).clamp(lo, hi)
}

/// Truncated normal whose mean is picked per draw from two sub-means at one
/// and two thirds of the range, weighted 80/20 toward the low (or high) one.
pub fn biased_truncated_normal<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64, prefer_hi: bool) -> f64 {
    let third = (hi - lo) / 3.0;
    let (preferred, other) = if prefer_hi {
        (lo + 2.0 * third, lo + third)
    } else {
        (lo + third, lo + 2.0 * third)
    };
    let mean = if rng.gen_bool(PREFERRED_MEAN_WEIGHT) {
        preferred
    } else {
        other
    };
    truncated_normal(rng, lo, hi, mean, (hi - lo) / 6.0)
}

/// Chi-squared sample with `df` degrees of freedom, restricted to `[min, max]`.
pub fn truncated_chi_squared<R: Rng + ?Sized>(rng: &mut R, df: u32, min: f64, max: f64) -> f64 {
    let df = df.max(1);
    let draw = |rng: &mut R| (0..df).map(|_| standard_normal(rng).powi(2)).sum::<f64>();
    for _ in 0..MAX_REJECTIONS {
        let x = draw(&mut *rng);
        if x >= min && x <= max {
            return x;
        }
    }
    let x = draw(&mut *rng);
    if min <= max {
        x.clamp(min, max)
    } else {
        min
    }
}

pub fn chance<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.gen::<f64>() < probability.clamp(0.0, 1.0)
}

/// Point inside `rect`, drawn from a Gaussian centered on the rectangle
/// after trimming a random 10-15% margin off every side.
pub fn random_point_in<R: Rng + ?Sized>(rng: &mut R, rect: &Rectangle) -> Point {
    if rect.is_degenerate() {
        return rect.top_left();
    }
    let pad = rng.gen_range(0.10..0.15);
    let axis = |rng: &mut R, start: i32, extent: u32| -> i32 {
        let extent = extent as f64;
        let lo = start as f64 + extent * pad;
        let inner = extent * (1.0 - 2.0 * pad);
        let v = truncated_normal(rng, lo, lo + inner, lo + inner / 2.0, inner / 6.0).round() as i64;
        v.clamp(start as i64, start as i64 + extent as i64 - 1) as i32
    };
    let x = axis(&mut *rng, rect.left, rect.width);
    let y = axis(&mut *rng, rect.top, rect.height);
    Point::new(x, y)
}

/// Point within `xpad`/`ypad` pixels of `center`.
pub fn random_point_around<R: Rng + ?Sized>(rng: &mut R, center: Point, xpad: u32, ypad: u32) -> Point {
    let rect = Rectangle::new(
        center.x - xpad as i32,
        center.y - ypad as i32,
        2 * xpad + 1,
        2 * ypad + 1,
    );
    random_point_in(rng, &rect)
}
