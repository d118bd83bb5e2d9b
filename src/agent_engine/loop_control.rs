use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::agent_engine::state::{LoopConfig, LoopMode};

/// Shared cooperative cancellation flag. Cheap to clone; every clone sees
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct LoopController {
    config: LoopConfig,
    start_time: Instant,
    cycles: u64,
    failure_count: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            cycles: 0,
            failure_count: 0,
        }
    }

    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn failures(&self) -> u32 {
        self.failure_count
    }

    /// Why the loop should end now, if it should.
    pub fn stop_reason(&self) -> Option<String> {
        match self.config.mode {
            LoopMode::UntilStopped => None,
            LoopMode::Timed => {
                let max_min = self.config.max_duration_minutes?;
                (self.start_time.elapsed().as_secs() / 60 >= max_min as u64)
                    .then(|| format!("time limit of {max_min} min reached"))
            }
            LoopMode::MaxCycles => {
                let max = self.config.max_cycles?;
                (self.cycles >= max).then(|| format!("{max} cycles completed"))
            }
            LoopMode::FailureLimit => {
                let max_fail = self.config.max_failures?;
                (self.failure_count >= max_fail).then(|| format!("{max_fail} failures reached"))
            }
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop_reason().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_is_shared() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(!flag.is_stopped());
        other.request_stop();
        assert!(flag.is_stopped());
    }

    #[test]
    fn cycle_limit() {
        let mut ctrl = LoopController::new(LoopConfig {
            mode: LoopMode::MaxCycles,
            max_cycles: Some(2),
            ..LoopConfig::default()
        });
        ctrl.record_cycle();
        assert!(!ctrl.should_stop());
        ctrl.record_cycle();
        assert!(ctrl.stop_reason().unwrap().contains("2 cycles"));
    }

    #[test]
    fn failure_limit_and_unbounded_modes() {
        let mut ctrl = LoopController::new(LoopConfig {
            mode: LoopMode::FailureLimit,
            max_failures: Some(1),
            ..LoopConfig::default()
        });
        ctrl.record_failure();
        assert!(ctrl.should_stop());

        let mut forever = LoopController::new(LoopConfig::default());
        for _ in 0..100 {
            forever.record_cycle();
            forever.record_failure();
        }
        assert!(!forever.should_stop());
    }
}
