//! Session-level variation: a bounded memory of recent humanization samples
//! used to steer new samples away from what was just produced.

use std::collections::{BTreeMap, VecDeque};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::executor::sampling::chance;

/// Candidates drawn per biased sample.
const CANDIDATES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PathSamples,
    PointerSpeed,
    CurveSpread,
    ClickDwell,
    ClickHold,
    KeystrokeDelay,
    Pause,
}

/// Rolling window of recent samples per metric. Owned by the caller and
/// passed into every humanization call, so tests can reset it.
#[derive(Debug, Clone)]
pub struct VariationHistory {
    window_size: usize,
    bias_strength: f64,
    recent: BTreeMap<Metric, VecDeque<f64>>,
}

impl VariationHistory {
    pub fn new(window_size: usize, bias_strength: f64) -> Self {
        Self {
            window_size: window_size.max(1),
            bias_strength: bias_strength.clamp(0.0, 1.0),
            recent: BTreeMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn bias_strength(&self) -> f64 {
        self.bias_strength
    }

    pub fn record(&mut self, metric: Metric, value: f64) {
        let window = self.recent.entry(metric).or_default();
        window.push_back(value);
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    pub fn recent(&self, metric: Metric) -> impl Iterator<Item = f64> + '_ {
        self.recent.get(&metric).into_iter().flatten().copied()
    }

    pub fn len(&self, metric: Metric) -> usize {
        self.recent.get(&metric).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.recent.values().all(VecDeque::is_empty)
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    /// Distance from `value` to the closest remembered sample of `metric`.
    pub fn novelty(&self, metric: Metric, value: f64) -> f64 {
        self.recent(metric)
            .map(|r| (r - value).abs())
            .fold(f64::INFINITY, f64::min)
    }

    /// Draw a sample with `draw`. With probability `bias_strength` several
    /// candidates are drawn and the one farthest from recent values wins.
    /// The kept value is recorded.
    pub fn biased_sample<R, F>(&mut self, rng: &mut R, metric: Metric, mut draw: F) -> f64
    where
        R: Rng + ?Sized,
        F: FnMut(&mut R) -> f64,
    {
        let first = draw(&mut *rng);
        let value = if self.len(metric) > 0 && chance(rng, self.bias_strength) {
            let mut best = (first, self.novelty(metric, first));
            for _ in 1..CANDIDATES {
                let candidate = draw(&mut *rng);
                let novelty = self.novelty(metric, candidate);
                if novelty > best.1 {
                    best = (candidate, novelty);
                }
            }
            best.0
        } else {
            first
        };
        self.record(metric, value);
        value
    }
}

impl Default for VariationHistory {
    fn default() -> Self {
        Self::new(32, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn window_is_bounded() {
        let mut history = VariationHistory::new(3, 0.5);
        for v in 0..10 {
            history.record(Metric::ClickHold, v as f64);
        }
        assert_eq!(history.len(Metric::ClickHold), 3);
        assert_eq!(history.recent(Metric::ClickHold).collect::<Vec<_>>(), vec![7.0, 8.0, 9.0]);
        history.reset();
        assert!(history.is_empty());
    }

    #[test]
    fn full_bias_prefers_the_novel_candidate() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut history = VariationHistory::new(8, 1.0);
        history.record(Metric::PathSamples, 20.0);

        let mut script = [20.0, 31.0, 21.0].into_iter();
        let picked = history.biased_sample(&mut rng, Metric::PathSamples, |_| {
            script.next().unwrap_or(20.0)
        });
        assert_eq!(picked, 31.0);
        assert_eq!(history.len(Metric::PathSamples), 2);
    }

    #[test]
    fn no_bias_keeps_first_draw() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut history = VariationHistory::new(8, 0.0);
        history.record(Metric::Pause, 1.0);
        let mut script = [1.0, 50.0].into_iter();
        let picked = history.biased_sample(&mut rng, Metric::Pause, |_| script.next().unwrap_or(0.0));
        assert_eq!(picked, 1.0);
    }
}
