//! Turns discrete intents into randomized, timed primitive event traces.
//!
//! The humanizer owns its random source and the pointer position; the
//! caller owns the [`VariationHistory`] so session bias can be inspected or
//! reset independently.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{HumanizerConfig, MouseConfig};
use crate::errors::{ColorBotError, ColorBotResult};
use crate::executor::keyboard::plan_typing;
use crate::executor::mouse::{bezier_path, overshoot_point, sample_count, wind_path, MousePathStyle};
use crate::executor::sampling::{biased_truncated_normal, chance, random_point_in, standard_normal};
use crate::executor::types::{ActionIntent, ActionTrace, Key, MouseButton, PrimitiveEvent, TimedEvent};
use crate::executor::variance::{Metric, VariationHistory};
use crate::geometry::{Point, Rectangle};

/// Share of the full sample count used for the short correction after an overshoot.
const CORRECTION_SAMPLE_SHARE: f64 = 0.35;

/// Longest hold or pause a single intent may ask for.
pub const MAX_INTENT_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// Non-negative finite seconds as a duration, saturating instead of
/// overflowing.
fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Default)]
struct TraceBuilder {
    events: Vec<TimedEvent>,
    at: Duration,
}

impl TraceBuilder {
    fn wait(&mut self, secs: f64) {
        self.at = self.at.saturating_add(seconds(secs));
    }

    fn push(&mut self, event: PrimitiveEvent) {
        self.events.push(TimedEvent {
            offset: self.at,
            event,
        });
    }

    fn finish(self, trailing: f64) -> ActionTrace {
        ActionTrace {
            events: self.events,
            trailing: seconds(trailing),
        }
    }
}

pub struct Humanizer {
    config: HumanizerConfig,
    rng: StdRng,
    cursor: Point,
    screen: Option<Rectangle>,
}

impl Humanizer {
    pub fn new(config: HumanizerConfig) -> ColorBotResult<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible humanizer for tests and replays.
    pub fn seeded(config: HumanizerConfig, seed: u64) -> ColorBotResult<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: HumanizerConfig, rng: StdRng) -> ColorBotResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            cursor: Point::default(),
            screen: None,
        })
    }

    /// Reject pointer targets outside `screen`.
    pub fn with_screen(mut self, screen: Rectangle) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn with_cursor(mut self, cursor: Point) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> Point {
        self.cursor
    }

    /// Resync after the pointer was moved by something else.
    pub fn set_cursor(&mut self, cursor: Point) {
        self.cursor = cursor;
    }

    pub fn config(&self) -> &HumanizerConfig {
        &self.config
    }

    /// Empty history sized from this humanizer's config.
    pub fn new_history(&self) -> VariationHistory {
        VariationHistory::new(self.config.variance_window_size, self.config.bias_strength)
    }

    pub fn humanize(
        &mut self,
        intent: &ActionIntent,
        history: &mut VariationHistory,
    ) -> ColorBotResult<ActionTrace> {
        self.validate(intent)?;

        let mut trace = TraceBuilder::default();
        let mut trailing = None;
        match intent {
            ActionIntent::MoveTo { target } => self.move_to(&mut trace, *target, history),
            ActionIntent::Click {
                target,
                button,
                modifier,
            } => {
                self.move_to(&mut trace, *target, history);
                self.click(&mut trace, *button, *modifier, history);
            }
            ActionIntent::ClickIn {
                region,
                button,
                modifier,
            } => {
                let target = random_point_in(&mut self.rng, region);
                self.move_to(&mut trace, target, history);
                self.click(&mut trace, *button, *modifier, history);
            }
            ActionIntent::TypeText { text } => {
                for stroke in plan_typing(&mut self.rng, text, &self.config.keyboard, history) {
                    trace.wait(stroke.delay);
                    trace.push(PrimitiveEvent::KeyDown { key: stroke.key });
                    trace.wait(stroke.hold);
                    trace.push(PrimitiveEvent::KeyUp { key: stroke.key });
                }
            }
            ActionIntent::HoldKey { key, seconds } => {
                let jitter = 1.0 + self.config.hold_jitter * standard_normal(&mut self.rng);
                trace.push(PrimitiveEvent::KeyDown { key: *key });
                trace.wait((seconds * jitter).max(0.0));
                trace.push(PrimitiveEvent::KeyUp { key: *key });
            }
            ActionIntent::Pause {
                min_seconds,
                max_seconds,
            } => {
                let (lo, hi) = (*min_seconds, *max_seconds);
                trailing = Some(history.biased_sample(&mut self.rng, Metric::Pause, |r| {
                    biased_truncated_normal(r, lo, hi, false)
                }));
            }
        }

        let trailing = match trailing {
            Some(t) => t,
            None => self.config.settle.sample(&mut self.rng),
        };
        let trace = trace.finish(trailing);
        tracing::debug!(
            intent = intent.kind(),
            events = trace.len(),
            moves = trace.move_count(),
            duration_ms = trace.duration().as_millis() as u64,
            "intent humanized"
        );
        Ok(trace)
    }

    fn validate(&self, intent: &ActionIntent) -> ColorBotResult<()> {
        match intent {
            ActionIntent::Click { target, .. } | ActionIntent::MoveTo { target } => {
                self.check_target(*target)
            }
            ActionIntent::ClickIn { region, .. } => {
                if region.is_degenerate() {
                    return Err(ColorBotError::precondition(format!(
                        "click region {region} is empty"
                    )));
                }
                match &self.screen {
                    Some(screen) if !screen.contains(region) => Err(ColorBotError::precondition(
                        format!("click region {region} is outside screen {screen}"),
                    )),
                    _ => Ok(()),
                }
            }
            ActionIntent::TypeText { .. } => Ok(()),
            ActionIntent::HoldKey { seconds, .. } => {
                if !seconds.is_finite() || *seconds < 0.0 {
                    return Err(ColorBotError::precondition(format!(
                        "hold duration must be a non-negative number, got {seconds}"
                    )));
                }
                if *seconds > MAX_INTENT_SECONDS {
                    return Err(ColorBotError::precondition(format!(
                        "hold duration {seconds}s exceeds {MAX_INTENT_SECONDS}s"
                    )));
                }
                Ok(())
            }
            ActionIntent::Pause {
                min_seconds,
                max_seconds,
            } => {
                let valid = min_seconds.is_finite()
                    && max_seconds.is_finite()
                    && *min_seconds >= 0.0
                    && min_seconds <= max_seconds
                    && *max_seconds <= MAX_INTENT_SECONDS;
                if !valid {
                    return Err(ColorBotError::precondition(format!(
                        "pause range {min_seconds}..{max_seconds} is invalid"
                    )));
                }
                Ok(())
            }
        }
    }

    fn check_target(&self, target: Point) -> ColorBotResult<()> {
        match &self.screen {
            Some(screen) if !screen.contains_point(target) => Err(ColorBotError::precondition(
                format!("target ({}, {}) is outside screen {screen}", target.x, target.y),
            )),
            _ => Ok(()),
        }
    }

    // ── Pointer ─────────────────────────────────────────────────────────

    fn move_to(&mut self, trace: &mut TraceBuilder, target: Point, history: &mut VariationHistory) {
        let Self {
            config,
            rng,
            cursor,
            screen,
        } = self;
        let from = *cursor;
        let distance = from.distance(&target);
        if distance < 0.5 {
            return;
        }
        let mouse = &config.mouse;
        trace.wait(mouse.move_base.sample(rng));

        let overshoot = distance >= mouse.overshoot_min_distance
            && chance(rng, mouse.overshoot_probability);
        if overshoot {
            let magnitude = mouse.overshoot_distance.sample(rng);
            let over = overshoot_point(rng, from, target, magnitude, screen.as_ref());
            emit_path(rng, mouse, trace, from, over, history, 1.0);
            trace.wait(mouse.correction_pause.sample(rng));
            emit_path(rng, mouse, trace, over, target, history, CORRECTION_SAMPLE_SHARE);
            tracing::trace!(over_x = over.x, over_y = over.y, "overshoot");
        } else {
            emit_path(rng, mouse, trace, from, target, history, 1.0);
        }
        *cursor = target;
    }

    fn click(
        &mut self,
        trace: &mut TraceBuilder,
        button: MouseButton,
        modifier: Option<Key>,
        history: &mut VariationHistory,
    ) {
        let click = &self.config.click;
        let rng = &mut self.rng;

        let dwell = history.biased_sample(rng, Metric::ClickDwell, |r| click.dwell.sample(r));
        trace.wait(dwell);
        if let Some(key) = modifier {
            trace.push(PrimitiveEvent::KeyDown { key });
            trace.wait(click.modifier_lead.sample(rng));
        }
        trace.push(PrimitiveEvent::ButtonDown { button });
        let hold = history.biased_sample(rng, Metric::ClickHold, |r| click.hold.sample(r));
        trace.wait(hold);
        trace.push(PrimitiveEvent::ButtonUp { button });
        if let Some(key) = modifier {
            trace.wait(click.modifier_lead.sample(rng));
            trace.push(PrimitiveEvent::KeyUp { key });
        }
    }
}

/// Append pointer samples from `from` to `to`, spread over a travel time
/// derived from a sampled pointer speed.
fn emit_path(
    rng: &mut StdRng,
    mouse: &MouseConfig,
    trace: &mut TraceBuilder,
    from: Point,
    to: Point,
    history: &mut VariationHistory,
    sample_share: f64,
) {
    let distance = from.distance(&to);
    let points = match mouse.style {
        MousePathStyle::Bezier => {
            let samples = history
                .biased_sample(rng, Metric::PathSamples, |r| {
                    sample_count(r, distance, mouse) * sample_share
                })
                .round()
                .max(1.0) as usize;
            let spread = history.biased_sample(rng, Metric::CurveSpread, |r| {
                mouse.curve_spread * r.gen_range(0.3..=1.0)
            });
            bezier_path(rng, from, to, samples, spread, mouse.path_jitter)
        }
        MousePathStyle::Wind => {
            let points = wind_path(rng, from, to, &mouse.wind);
            history.record(Metric::PathSamples, points.len() as f64);
            points
        }
    };

    let speed = history.biased_sample(rng, Metric::PointerSpeed, |r| mouse.speed.sample(r));
    let step = distance / speed / points.len() as f64;
    for p in points {
        let factor = 1.0 + mouse.step_jitter * rng.gen_range(-1.0..=1.0);
        trace.wait(step * factor.max(0.0));
        trace.push(PrimitiveEvent::Move { x: p.x, y: p.y });
    }
}
