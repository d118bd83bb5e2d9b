//! Pointer path generation. Paths are lists of sample points ending exactly
//! on the target; timing is assigned by the humanizer.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{MouseConfig, WindParams};
use crate::executor::sampling::{chance, standard_normal};
use crate::geometry::{Point, Rectangle};

/// Hard stop for WindMouse in case the parameters never converge.
const MAX_WIND_STEPS: usize = 4096;

const SQRT3: f64 = 1.732_050_807_568_877_2;
const SQRT5: f64 = 2.236_067_977_499_79;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MousePathStyle {
    #[default]
    Bezier,
    Wind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl From<Point> for Vec2 {
    fn from(p: Point) -> Self {
        Self {
            x: p.x as f64,
            y: p.y as f64,
        }
    }
}

impl Vec2 {
    fn round(self) -> Point {
        Point::new(self.x.round() as i32, self.y.round() as i32)
    }
}

/// Number of samples for a move of `distance` pixels: grows with distance,
/// with multiplicative noise so equal distances rarely share a count.
pub fn sample_count<R: Rng + ?Sized>(rng: &mut R, distance: f64, config: &MouseConfig) -> f64 {
    let base = config.min_samples as f64 + distance / 100.0 * config.samples_per_100px;
    let noise = 1.0 + config.sample_noise * standard_normal(rng);
    (base * noise.max(0.25)).max(1.0)
}

/// Curved path through two random control points placed off the straight
/// line by up to `spread * distance`.
pub fn bezier_path<R: Rng + ?Sized>(
    rng: &mut R,
    from: Point,
    to: Point,
    samples: usize,
    spread: f64,
    jitter: f64,
) -> Vec<Point> {
    let samples = samples.max(1);
    let (a, d) = (Vec2::from(from), Vec2::from(to));
    let (dx, dy) = (d.x - a.x, d.y - a.y);
    let distance = dx.hypot(dy);
    if distance < 0.5 {
        return vec![to];
    }
    let (nx, ny) = (-dy / distance, dx / distance);

    let control = |rng: &mut R, lo: f64, hi: f64| {
        let along = rng.gen_range(lo..hi);
        let off = rng.gen_range(-1.0..=1.0) * spread * distance;
        Vec2 {
            x: a.x + dx * along + nx * off,
            y: a.y + dy * along + ny * off,
        }
    };
    let b = control(&mut *rng, 0.15, 0.45);
    let c = control(&mut *rng, 0.55, 0.85);

    // ease-out quad or ease-in-out cubic, chosen per path
    let ease_out = chance(&mut *rng, 0.5);
    let ease = |t: f64| {
        if ease_out {
            1.0 - (1.0 - t) * (1.0 - t)
        } else if t < 0.5 {
            4.0 * t * t * t
        } else {
            1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
        }
    };

    let mut points = Vec::with_capacity(samples);
    for i in 1..samples {
        let t = ease(i as f64 / samples as f64);
        let u = 1.0 - t;
        let p = Vec2 {
            x: u * u * u * a.x + 3.0 * u * u * t * b.x + 3.0 * u * t * t * c.x + t * t * t * d.x,
            y: u * u * u * a.y + 3.0 * u * u * t * b.y + 3.0 * u * t * t * c.y + t * t * t * d.y,
        };
        let p = Vec2 {
            x: p.x + jitter * standard_normal(&mut *rng),
            y: p.y + jitter * standard_normal(&mut *rng),
        };
        points.push(p.round());
    }
    points.push(to);
    points
}

/// WindMouse: a mass pulled toward the target by gravity and pushed around
/// by wind that dies down near the end.
pub fn wind_path<R: Rng + ?Sized>(rng: &mut R, from: Point, to: Point, params: &WindParams) -> Vec<Point> {
    let target = Vec2::from(to);
    let mut pos = Vec2::from(from);
    let (mut vx, mut vy, mut wx, mut wy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    let mut max_step = params.max_step;
    let mut points = Vec::new();
    let mut last = from;

    for _ in 0..MAX_WIND_STEPS {
        let dist = (target.x - pos.x).hypot(target.y - pos.y);
        if dist < 1.0 {
            break;
        }
        let wind = params.wind.min(dist);
        if dist >= params.damp_distance {
            wx = wx / SQRT3 + (2.0 * rng.gen::<f64>() - 1.0) * wind / SQRT5;
            wy = wy / SQRT3 + (2.0 * rng.gen::<f64>() - 1.0) * wind / SQRT5;
        } else {
            wx /= SQRT3;
            wy /= SQRT3;
            if max_step < 3.0 {
                max_step = rng.gen::<f64>() * 3.0 + 3.0;
            } else {
                max_step /= SQRT5;
            }
        }
        vx += wx + params.gravity * (target.x - pos.x) / dist;
        vy += wy + params.gravity * (target.y - pos.y) / dist;
        let speed = vx.hypot(vy);
        if speed > max_step {
            let clip = max_step / 2.0 + rng.gen::<f64>() * max_step / 2.0;
            vx = vx / speed * clip;
            vy = vy / speed * clip;
        }
        pos.x += vx;
        pos.y += vy;
        let p = pos.round();
        if p != last {
            points.push(p);
            last = p;
        }
    }

    if points.last() != Some(&to) {
        points.push(to);
    }
    points
}

/// A point past `to` along the approach direction, `magnitude` pixels out
/// with a little sideways drift, kept inside `screen` when given.
pub fn overshoot_point<R: Rng + ?Sized>(
    rng: &mut R,
    from: Point,
    to: Point,
    magnitude: f64,
    screen: Option<&Rectangle>,
) -> Point {
    let (dx, dy) = ((to.x - from.x) as f64, (to.y - from.y) as f64);
    let distance = dx.hypot(dy).max(1.0);
    let (ux, uy) = (dx / distance, dy / distance);
    let drift = magnitude * 0.3 * standard_normal(rng);
    let p = Vec2 {
        x: to.x as f64 + ux * magnitude - uy * drift,
        y: to.y as f64 + uy * magnitude + ux * drift,
    }
    .round();
    match screen {
        Some(s) if !s.is_degenerate() => Point::new(
            (p.x as i64).clamp(s.left as i64, s.right() - 1) as i32,
            (p.y as i64).clamp(s.top as i64, s.bottom() - 1) as i32,
        ),
        _ => p,
    }
}
