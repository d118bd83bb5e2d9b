//! Hands humanized traces to the input backend on their own schedule.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::agent_engine::loop_control::StopFlag;
use crate::errors::ColorBotResult;
use crate::executor::types::{ActionTrace, Key, MouseButton, PrimitiveEvent};

/// Longest uninterrupted sleep while waiting for the next event, so a stop
/// request is noticed during long pauses.
const STOP_POLL: Duration = Duration::from_millis(50);

/// OS-level input backend. Executes one primitive event at a time.
#[async_trait]
pub trait InputDispatcher: Send {
    async fn dispatch(&mut self, event: &PrimitiveEvent) -> ColorBotResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { dispatched: usize },
    /// Stopped between events; `released` inputs that were still held got
    /// their matching up event.
    Cancelled { dispatched: usize, released: usize },
}

/// Buttons and keys currently down, in press order.
#[derive(Debug, Default)]
struct HeldInputs {
    buttons: Vec<MouseButton>,
    keys: Vec<Key>,
}

impl HeldInputs {
    fn track(&mut self, event: &PrimitiveEvent) {
        match *event {
            PrimitiveEvent::ButtonDown { button } => self.buttons.push(button),
            PrimitiveEvent::ButtonUp { button } => self.buttons.retain(|b| *b != button),
            PrimitiveEvent::KeyDown { key } => self.keys.push(key),
            PrimitiveEvent::KeyUp { key } => self.keys.retain(|k| *k != key),
            PrimitiveEvent::Move { .. } => {}
        }
    }

    /// Up events undoing everything held, most recent first.
    fn releases(&self) -> Vec<PrimitiveEvent> {
        let buttons = self
            .buttons
            .iter()
            .rev()
            .map(|&button| PrimitiveEvent::ButtonUp { button });
        let keys = self.keys.iter().rev().map(|&key| PrimitiveEvent::KeyUp { key });
        buttons.chain(keys).collect()
    }
}

/// Sleep until `deadline`, waking periodically to check `stop`. Returns
/// `false` if stopped first.
async fn wait_until(deadline: Instant, stop: &StopFlag) -> bool {
    loop {
        if stop.is_stopped() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep_until(deadline.min(now + STOP_POLL)).await;
    }
}

/// Dispatch every event of `trace` at its offset, then idle for the
/// trailing time. A stop request is honoured only between events; anything
/// left pressed is released before returning.
pub async fn play_trace(
    trace: &ActionTrace,
    dispatcher: &mut dyn InputDispatcher,
    stop: &StopFlag,
) -> ColorBotResult<PlaybackOutcome> {
    let start = Instant::now();
    let mut held = HeldInputs::default();
    let mut dispatched = 0;

    for timed in &trace.events {
        if !wait_until(start + timed.offset, stop).await {
            let released = release_all(&held, dispatcher).await?;
            tracing::info!(dispatched, released, "trace playback cancelled");
            return Ok(PlaybackOutcome::Cancelled {
                dispatched,
                released,
            });
        }
        if let Err(e) = dispatcher.dispatch(&timed.event).await {
            tracing::error!(error = %e, "dispatch failed, releasing held inputs");
            let _ = release_all(&held, dispatcher).await;
            return Err(e);
        }
        held.track(&timed.event);
        dispatched += 1;
    }

    // trailing idle; nothing is held by a well-formed trace, but release anyway
    wait_until(start + trace.duration(), stop).await;
    let released = release_all(&held, dispatcher).await?;
    if released > 0 {
        tracing::warn!(released, "trace left inputs held");
    }
    Ok(PlaybackOutcome::Completed { dispatched })
}

async fn release_all(held: &HeldInputs, dispatcher: &mut dyn InputDispatcher) -> ColorBotResult<usize> {
    let releases = held.releases();
    for event in &releases {
        dispatcher.dispatch(event).await?;
    }
    Ok(releases.len())
}

/// Logs every event instead of touching the OS.
#[derive(Debug, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl InputDispatcher for LoggingDispatcher {
    async fn dispatch(&mut self, event: &PrimitiveEvent) -> ColorBotResult<()> {
        tracing::info!(event = ?event, "input");
        Ok(())
    }
}

/// Records events with their dispatch time. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    log: Arc<Mutex<Vec<(Instant, PrimitiveEvent)>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PrimitiveEvent> {
        self.entries().into_iter().map(|(_, e)| e).collect()
    }

    pub fn entries(&self) -> Vec<(Instant, PrimitiveEvent)> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl InputDispatcher for RecordingDispatcher {
    async fn dispatch(&mut self, event: &PrimitiveEvent) -> ColorBotResult<()> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((Instant::now(), *event));
        Ok(())
    }
}
