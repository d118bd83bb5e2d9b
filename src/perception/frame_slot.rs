//! Depth-1 "latest frame wins" slot fed by a capture task running on its
//! own cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::agent_engine::loop_control::StopFlag;
use crate::config::CaptureConfig;
use crate::errors::{ColorBotError, ColorBotResult};
use crate::perception::traits::FrameSource;
use crate::perception::types::{Frame, FrameId};

#[derive(Debug, Clone)]
pub enum CaptureState {
    Pending,
    Ready(Arc<Frame>),
    Exhausted { failures: u32 },
    Stopped,
}

/// Reader half of the slot. Only ever sees the newest frame; frames
/// published while the reader was busy are dropped.
pub struct FrameReceiver {
    rx: watch::Receiver<CaptureState>,
    last_seen: Option<FrameId>,
}

impl FrameReceiver {
    /// Wait for a frame newer than the one returned last time.
    pub async fn next_frame(&mut self) -> ColorBotResult<Arc<Frame>> {
        loop {
            {
                let state = self.rx.borrow_and_update();
                match &*state {
                    CaptureState::Ready(frame) if Some(frame.id()) != self.last_seen => {
                        self.last_seen = Some(frame.id());
                        return Ok(frame.clone());
                    }
                    CaptureState::Exhausted { failures } => {
                        return Err(ColorBotError::CaptureExhausted {
                            failures: *failures,
                        });
                    }
                    CaptureState::Stopped => return Err(ColorBotError::Cancelled),
                    _ => {}
                }
            }
            self.rx
                .changed()
                .await
                .map_err(|_| ColorBotError::Capture("capture task ended".into()))?;
        }
    }

    /// Newest published frame without waiting, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        match &*self.rx.borrow() {
            CaptureState::Ready(frame) => Some(frame.clone()),
            _ => None,
        }
    }
}

/// Writer half, owned by the capture task.
pub struct FrameSlot {
    tx: watch::Sender<CaptureState>,
}

impl FrameSlot {
    pub fn channel() -> (Self, FrameReceiver) {
        let (tx, rx) = watch::channel(CaptureState::Pending);
        (
            Self { tx },
            FrameReceiver {
                rx,
                last_seen: None,
            },
        )
    }

    /// Replace whatever frame is waiting; never blocks.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(CaptureState::Ready(Arc::new(frame)));
    }

    fn set(&self, state: CaptureState) {
        self.tx.send_replace(state);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the capture producer. After more than `retry_budget` consecutive
/// capture failures the slot reports exhaustion and the task ends with
/// `CaptureExhausted`.
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    config: CaptureConfig,
    stop: StopFlag,
) -> (FrameReceiver, JoinHandle<ColorBotResult<()>>) {
    let (slot, receiver) = FrameSlot::channel();

    let handle = tokio::spawn(async move {
        let source_name = source.describe();
        let mut ticker = tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        tracing::info!(source = %source_name, interval_ms = config.interval_ms, "capture task started");
        loop {
            ticker.tick().await;
            if stop.is_stopped() || slot.is_closed() {
                slot.set(CaptureState::Stopped);
                tracing::info!(source = %source_name, "capture task stopped");
                return Ok(());
            }

            match source.capture().await {
                Ok(frame) => {
                    if failures > 0 {
                        tracing::info!(failures, "capture recovered");
                    }
                    failures = 0;
                    tracing::trace!(frame_id = %frame.id(), "frame published");
                    slot.publish(frame);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, budget = config.retry_budget, "capture failed");
                    if failures > config.retry_budget {
                        tracing::error!(failures, "capture retry budget exhausted");
                        slot.set(CaptureState::Exhausted { failures });
                        return Err(ColorBotError::CaptureExhausted { failures });
                    }
                }
            }
        }
    });

    (receiver, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Scripted {
        /// `true` captures a frame, `false` fails; succeeds once the script runs out.
        script: Vec<bool>,
        at: usize,
    }

    #[async_trait]
    impl FrameSource for Scripted {
        async fn capture(&mut self) -> ColorBotResult<Frame> {
            let ok = self.script.get(self.at).copied().unwrap_or(true);
            self.at += 1;
            if ok {
                Ok(Frame::from_rgb_image(image::RgbImage::new(2, 2)))
            } else {
                Err(ColorBotError::Capture("no window".into()))
            }
        }
    }

    fn config(retry_budget: u32) -> CaptureConfig {
        CaptureConfig {
            interval_ms: 5,
            retry_budget,
        }
    }

    #[tokio::test]
    async fn latest_frame_wins() {
        let (slot, mut rx) = FrameSlot::channel();
        let a = Frame::from_rgb_image(image::RgbImage::new(1, 1));
        let b = Frame::from_rgb_image(image::RgbImage::new(1, 1));
        let b_id = b.id();
        slot.publish(a);
        slot.publish(b);
        assert_eq!(rx.next_frame().await.unwrap().id(), b_id);
        assert_eq!(rx.latest().unwrap().id(), b_id);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_beyond_budget_are_fatal() {
        let source = Scripted {
            script: vec![true, false, false, false],
            at: 0,
        };
        let (mut rx, handle) = spawn_capture(Box::new(source), config(2), StopFlag::new());
        assert!(rx.next_frame().await.is_ok());
        let err = rx.next_frame().await.unwrap_err();
        assert!(matches!(err, ColorBotError::CaptureExhausted { failures: 3 }));
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn intermittent_failures_within_budget_recover() {
        let source = Scripted {
            script: vec![false, false, true, false, true],
            at: 0,
        };
        let stop = StopFlag::new();
        let (mut rx, handle) = spawn_capture(Box::new(source), config(2), stop.clone());
        let first = rx.next_frame().await.unwrap();
        let second = rx.next_frame().await.unwrap();
        assert!(second.id() > first.id());
        stop.request_stop();
        assert!(handle.await.unwrap().is_ok());
        assert!(matches!(rx.next_frame().await, Err(ColorBotError::Cancelled)));
    }
}
