use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::LoopConfig;
use crate::errors::{ColorBotError, ColorBotResult};
use crate::executor::mouse::MousePathStyle;
use crate::executor::sampling::TruncatedNormal;
use crate::executor::types::{Key, MouseButton};
use crate::geometry::{Point, Rectangle};
use crate::perception::color::ColorSignature;
use crate::perception::nms::SortOrder;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "COLORBOT_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub humanizer: HumanizerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> ColorBotResult<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ColorBotResult<()> {
        self.humanizer.validate()?;
        self.client.validate()?;
        if self.replay.scale <= 0.0 || !self.replay.scale.is_finite() {
            return Err(ColorBotError::Config(format!(
                "replay.scale must be positive, got {}",
                self.replay.scale
            )));
        }
        Ok(())
    }
}

// ── Capture ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture cadence, independent of the decision loop.
    #[serde(default = "default_capture_interval_ms")]
    pub interval_ms: u64,
    /// Consecutive failures tolerated before capture is declared exhausted.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_capture_interval_ms() -> u64 {
    50
}

fn default_retry_budget() -> u32 {
    5
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_capture_interval_ms(),
            retry_budget: default_retry_budget(),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: LoopConfig,
    /// Minimum time between the starts of two cycles.
    #[serde(default)]
    pub cycle_interval_ms: u64,
    /// JSONL file receiving one record per cycle.
    #[serde(default)]
    pub session_log: Option<PathBuf>,
    /// Screen area the pointer may target; unchecked when absent.
    #[serde(default)]
    pub screen: Option<Rectangle>,
}

// ── Humanizer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanizerConfig {
    #[serde(default)]
    pub mouse: MouseConfig,
    #[serde(default)]
    pub click: ClickConfig,
    #[serde(default)]
    pub keyboard: KeyboardConfig,
    /// Recent samples remembered per metric.
    #[serde(default = "default_variance_window_size")]
    pub variance_window_size: usize,
    /// Probability of steering a sample away from recent ones.
    #[serde(default = "default_bias_strength")]
    pub bias_strength: f64,
    /// Idle after every non-pause intent, seconds.
    #[serde(default = "default_settle")]
    pub settle: TruncatedNormal,
    /// Relative jitter on key hold durations.
    #[serde(default = "default_hold_jitter")]
    pub hold_jitter: f64,
}

fn default_variance_window_size() -> usize {
    32
}

fn default_bias_strength() -> f64 {
    0.5
}

fn default_settle() -> TruncatedNormal {
    TruncatedNormal::new(0.02, 0.12)
}

fn default_hold_jitter() -> f64 {
    0.03
}

impl Default for HumanizerConfig {
    fn default() -> Self {
        Self {
            mouse: MouseConfig::default(),
            click: ClickConfig::default(),
            keyboard: KeyboardConfig::default(),
            variance_window_size: default_variance_window_size(),
            bias_strength: default_bias_strength(),
            settle: default_settle(),
            hold_jitter: default_hold_jitter(),
        }
    }
}

impl HumanizerConfig {
    pub fn validate(&self) -> ColorBotResult<()> {
        let m = &self.mouse;
        for (name, dist) in [
            ("humanizer.settle", &self.settle),
            ("humanizer.mouse.move_base", &m.move_base),
            ("humanizer.mouse.speed", &m.speed),
            ("humanizer.mouse.overshoot_distance", &m.overshoot_distance),
            ("humanizer.mouse.correction_pause", &m.correction_pause),
            ("humanizer.click.dwell", &self.click.dwell),
            ("humanizer.click.hold", &self.click.hold),
            ("humanizer.click.modifier_lead", &self.click.modifier_lead),
            ("humanizer.keyboard.keystroke_delay", &self.keyboard.keystroke_delay),
            ("humanizer.keyboard.key_hold", &self.keyboard.key_hold),
            ("humanizer.keyboard.correction_pause", &self.keyboard.correction_pause),
        ] {
            dist.validate(name)?;
            if dist.lo < 0.0 {
                return Err(ColorBotError::Config(format!("{name}: lower bound must not be negative")));
            }
        }
        if m.speed.lo <= 0.0 {
            return Err(ColorBotError::Config("humanizer.mouse.speed must be positive".into()));
        }
        for (name, p) in [
            ("humanizer.bias_strength", self.bias_strength),
            ("humanizer.mouse.overshoot_probability", m.overshoot_probability),
            ("humanizer.keyboard.correction_probability", self.keyboard.correction_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ColorBotError::Config(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        for (name, v) in [
            ("humanizer.hold_jitter", self.hold_jitter),
            ("humanizer.mouse.path_jitter", m.path_jitter),
            ("humanizer.mouse.curve_spread", m.curve_spread),
            ("humanizer.mouse.samples_per_100px", m.samples_per_100px),
            ("humanizer.mouse.sample_noise", m.sample_noise),
            ("humanizer.mouse.step_jitter", m.step_jitter),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ColorBotError::Config(format!("{name} must be a non-negative number, got {v}")));
            }
        }
        if self.variance_window_size == 0 {
            return Err(ColorBotError::Config("humanizer.variance_window_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseConfig {
    #[serde(default)]
    pub style: MousePathStyle,
    /// Standard deviation of per-sample offsets, pixels.
    #[serde(default = "default_path_jitter")]
    pub path_jitter: f64,
    /// Control point offset as a fraction of the move distance.
    #[serde(default = "default_curve_spread")]
    pub curve_spread: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_samples_per_100px")]
    pub samples_per_100px: f64,
    /// Relative noise on the sample count.
    #[serde(default = "default_sample_noise")]
    pub sample_noise: f64,
    /// Reaction time before any move, seconds.
    #[serde(default = "default_move_base")]
    pub move_base: TruncatedNormal,
    /// Pointer speed, pixels per second.
    #[serde(default = "default_speed")]
    pub speed: TruncatedNormal,
    /// Relative jitter of the spacing between samples.
    #[serde(default = "default_step_jitter")]
    pub step_jitter: f64,
    #[serde(default = "default_overshoot_probability")]
    pub overshoot_probability: f64,
    /// Moves shorter than this never overshoot, pixels.
    #[serde(default = "default_overshoot_min_distance")]
    pub overshoot_min_distance: f64,
    /// How far past the target an overshoot lands, pixels.
    #[serde(default = "default_overshoot_distance")]
    pub overshoot_distance: TruncatedNormal,
    /// Pause before correcting an overshoot, seconds.
    #[serde(default = "default_correction_pause")]
    pub correction_pause: TruncatedNormal,
    #[serde(default)]
    pub wind: WindParams,
}

fn default_path_jitter() -> f64 {
    0.6
}

fn default_curve_spread() -> f64 {
    0.25
}

fn default_min_samples() -> u32 {
    8
}

fn default_samples_per_100px() -> f64 {
    5.0
}

fn default_sample_noise() -> f64 {
    0.2
}

fn default_move_base() -> TruncatedNormal {
    TruncatedNormal::new(0.05, 0.15)
}

fn default_speed() -> TruncatedNormal {
    TruncatedNormal::new(900.0, 2400.0)
}

fn default_step_jitter() -> f64 {
    0.25
}

fn default_overshoot_probability() -> f64 {
    0.15
}

fn default_overshoot_min_distance() -> f64 {
    150.0
}

fn default_overshoot_distance() -> TruncatedNormal {
    TruncatedNormal::with_mean(4.0, 18.0, 8.0)
}

fn default_correction_pause() -> TruncatedNormal {
    TruncatedNormal::new(0.04, 0.15)
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            style: MousePathStyle::default(),
            path_jitter: default_path_jitter(),
            curve_spread: default_curve_spread(),
            min_samples: default_min_samples(),
            samples_per_100px: default_samples_per_100px(),
            sample_noise: default_sample_noise(),
            move_base: default_move_base(),
            speed: default_speed(),
            step_jitter: default_step_jitter(),
            overshoot_probability: default_overshoot_probability(),
            overshoot_min_distance: default_overshoot_min_distance(),
            overshoot_distance: default_overshoot_distance(),
            correction_pause: default_correction_pause(),
            wind: WindParams::default(),
        }
    }
}

/// WindMouse forces: gravity toward the target, wind magnitude, step clip
/// and the distance below which wind is damped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindParams {
    pub gravity: f64,
    pub wind: f64,
    pub max_step: f64,
    pub damp_distance: f64,
}

impl Default for WindParams {
    fn default() -> Self {
        Self {
            gravity: 60.0,
            wind: 30.0,
            max_step: 30.0,
            damp_distance: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickConfig {
    /// Settle time between arriving and pressing, seconds.
    #[serde(default = "default_click_dwell")]
    pub dwell: TruncatedNormal,
    /// Button-down to button-up, seconds.
    #[serde(default = "default_click_hold")]
    pub hold: TruncatedNormal,
    /// Gap between a modifier key and the button, seconds.
    #[serde(default = "default_modifier_lead")]
    pub modifier_lead: TruncatedNormal,
}

fn default_click_dwell() -> TruncatedNormal {
    TruncatedNormal::new(0.04, 0.25)
}

fn default_click_hold() -> TruncatedNormal {
    TruncatedNormal::with_mean(0.03, 0.2, 0.06)
}

fn default_modifier_lead() -> TruncatedNormal {
    TruncatedNormal::new(0.02, 0.08)
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            dwell: default_click_dwell(),
            hold: default_click_hold(),
            modifier_lead: default_modifier_lead(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardConfig {
    #[serde(default = "default_keystroke_delay")]
    pub keystroke_delay: TruncatedNormal,
    #[serde(default = "default_key_hold")]
    pub key_hold: TruncatedNormal,
    #[serde(default = "default_correction_probability")]
    pub correction_probability: f64,
    /// Time to notice a typo before pressing backspace, seconds.
    #[serde(default = "default_typo_pause")]
    pub correction_pause: TruncatedNormal,
}

fn default_keystroke_delay() -> TruncatedNormal {
    TruncatedNormal::with_mean(0.05, 0.3, 0.11)
}

fn default_key_hold() -> TruncatedNormal {
    TruncatedNormal::with_mean(0.03, 0.12, 0.06)
}

fn default_correction_probability() -> f64 {
    0.02
}

fn default_typo_pause() -> TruncatedNormal {
    TruncatedNormal::new(0.15, 0.45)
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            keystroke_delay: default_keystroke_delay(),
            key_hold: default_key_hold(),
            correction_probability: default_correction_probability(),
            correction_pause: default_typo_pause(),
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(default)]
    pub detections: Vec<DetectionSpecConfig>,
    #[serde(default)]
    pub ocr: Vec<OcrRequestConfig>,
}

fn default_client_name() -> String {
    "default".into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            detections: Vec::new(),
            ocr: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> ColorBotResult<()> {
        let mut seen = Vec::new();
        for d in &self.detections {
            match (&d.color, &d.template) {
                (Some(sig), None) => sig.validate().map_err(|e| {
                    ColorBotError::Config(format!("detection '{}': {e}", d.tag))
                })?,
                (None, Some(_)) => {}
                _ => {
                    return Err(ColorBotError::Config(format!(
                        "detection '{}' needs exactly one of `color` or `template`",
                        d.tag
                    )))
                }
            }
            if let Some(parent) = &d.within {
                if !seen.contains(&parent) {
                    return Err(ColorBotError::Config(format!(
                        "detection '{}' is nested in '{parent}', which must be declared before it",
                        d.tag
                    )));
                }
            }
            seen.push(&d.tag);
        }
        Ok(())
    }
}

/// `[[client.detections]]` entry. Exactly one of `color` and `template`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSpecConfig {
    pub tag: String,
    /// Search area in frame pixels; the whole frame when absent.
    #[serde(default)]
    pub search: Option<Rectangle>,
    /// Search inside each detection of this tag instead.
    #[serde(default)]
    pub within: Option<String>,
    #[serde(default)]
    pub color: Option<ColorSignature>,
    /// Image file for template matching.
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default = "default_scales")]
    pub scales: Vec<f64>,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f64,
    #[serde(default)]
    pub min_component_size: Option<usize>,
    #[serde(default)]
    pub confidence_floor: Option<f64>,
    #[serde(default)]
    pub sort: SortOrder,
}

fn default_scales() -> Vec<f64> {
    vec![1.0]
}

fn default_nms_iou() -> f64 {
    crate::perception::detector::DEFAULT_NMS_IOU
}

/// `[[client.ocr]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRequestConfig {
    pub key: String,
    #[serde(default)]
    pub search: Option<Rectangle>,
    /// Text colors; sampled from the search area when empty.
    #[serde(default)]
    pub signatures: Vec<ColorSignature>,
    /// Directory of glyph images named by code point.
    pub font_dir: PathBuf,
    #[serde(default)]
    pub min_glyph_confidence: Option<f64>,
    #[serde(default)]
    pub allowed_chars: Option<String>,
    #[serde(default)]
    pub word_gap: Option<u32>,
}

// ── Replay source / demo policy ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub looping: bool,
    /// Screen position of the recorded window.
    #[serde(default)]
    pub origin: Point,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_replay_dir() -> PathBuf {
    PathBuf::from("replay")
}

fn default_true() -> bool {
    true
}

fn default_scale() -> f64 {
    1.0
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dir: default_replay_dir(),
            looping: true,
            origin: Point::default(),
            scale: default_scale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Detection tag whose best match gets clicked.
    #[serde(default = "default_click_tag")]
    pub click_tag: String,
    #[serde(default)]
    pub button: MouseButton,
    #[serde(default)]
    pub modifier: Option<Key>,
    /// Idle range after each click, seconds.
    #[serde(default = "default_pause_seconds")]
    pub pause_seconds: [f64; 2],
    /// Finish the session after this many clicks.
    #[serde(default)]
    pub max_clicks: Option<u32>,
}

fn default_click_tag() -> String {
    "target".into()
}

fn default_pause_seconds() -> [f64; 2] {
    [0.2, 0.8]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            click_tag: default_click_tag(),
            button: MouseButton::Left,
            modifier: None,
            pause_seconds: default_pause_seconds(),
            max_clicks: None,
        }
    }
}

/// `COLORBOT_CONFIG` first, then `config.toml` next to the executable,
/// then in the working directory.
pub fn resolve_config_path() -> ColorBotResult<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found via environment");
            return Ok(candidate);
        }
        return Err(ColorBotError::Config(format!(
            "{CONFIG_ENV} points at missing file {}",
            candidate.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(ColorBotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> ColorBotResult<AppConfig> {
    load_config_from(&resolve_config_path()?)
}

pub fn load_config_from(path: &Path) -> ColorBotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = AppConfig::from_toml_str(&content)?;
    tracing::info!(
        path = %path.display(),
        client = %config.client.name,
        detections = config.client.detections.len(),
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> ColorBotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::LoopMode;
    use crate::perception::color::Rgb;

    const SAMPLE: &str = r#"
[capture]
interval_ms = 30
retry_budget = 2

[engine]
cycle_interval_ms = 250

[engine.limits]
mode = "max_cycles"
max_cycles = 40

[humanizer]
bias_strength = 0.7

[humanizer.mouse]
style = "wind"
overshoot_probability = 0.3

[humanizer.click]
hold = { lo = 0.03, hi = 0.2, mean = 0.06 }

[client]
name = "fishing"

[[client.detections]]
tag = "panel"
color = { target = [40, 40, 120] }

[[client.detections]]
tag = "fish"
within = "panel"
color = { target = [0, 220, 0], tolerance = [10, 10, 10] }
min_component_size = 4
sort = "distance_from_center"

[policy]
click_tag = "fish"
modifier = "shift"
"#;

    #[test]
    fn parses_full_document() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.capture.retry_budget, 2);
        assert_eq!(config.engine.limits.mode, LoopMode::MaxCycles);
        assert_eq!(config.engine.limits.max_cycles, Some(40));
        assert_eq!(config.humanizer.mouse.style, MousePathStyle::Wind);
        assert_eq!(config.humanizer.click.hold.mean, Some(0.06));
        // untouched sections keep their defaults
        assert_eq!(config.humanizer.keyboard.correction_probability, 0.02);
        assert_eq!(config.client.detections.len(), 2);
        let fish = &config.client.detections[1];
        assert_eq!(fish.within.as_deref(), Some("panel"));
        assert_eq!(fish.color.as_ref().unwrap().target, Rgb::new(0, 220, 0));
        assert_eq!(fish.sort, SortOrder::DistanceFromCenter);
        assert_eq!(config.policy.modifier, Some(Key::Shift));
    }

    #[test]
    fn empty_document_is_all_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.capture.interval_ms, 50);
        assert_eq!(config.humanizer.variance_window_size, 32);
        assert_eq!(config.engine.limits.mode, LoopMode::UntilStopped);
    }

    #[test]
    fn rejects_detection_without_mode() {
        let doc = "[[client.detections]]\ntag = \"x\"\n";
        assert!(matches!(
            AppConfig::from_toml_str(doc),
            Err(ColorBotError::Config(_))
        ));
    }

    #[test]
    fn rejects_nesting_before_parent() {
        let doc = r#"
[[client.detections]]
tag = "gem"
within = "panel"
color = { target = [1, 2, 3] }
"#;
        assert!(AppConfig::from_toml_str(doc).is_err());
    }

    #[test]
    fn rejects_bad_probability() {
        let doc = "[humanizer.mouse]\novershoot_probability = 1.5\n";
        assert!(AppConfig::from_toml_str(doc).is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.client.detections.len(), 2);
        assert_eq!(back.humanizer.mouse.style, MousePathStyle::Wind);
    }
}
