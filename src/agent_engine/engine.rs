use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::agent_engine::event_bus::{EngineEvent, EventBus};
use crate::agent_engine::history::{CycleRecord, SessionLog};
use crate::agent_engine::loop_control::{LoopController, StopFlag};
use crate::agent_engine::policy::DecisionPolicy;
use crate::agent_engine::state::{Decision, EngineState};
use crate::config::EngineConfig;
use crate::errors::{ColorBotError, ColorBotResult};
use crate::executor::dispatcher::{play_trace, InputDispatcher, PlaybackOutcome};
use crate::executor::humanizer::Humanizer;
use crate::executor::types::ActionIntent;
use crate::executor::variance::VariationHistory;
use crate::perception::frame_slot::FrameReceiver;
use crate::perception::pipeline::perceive_blocking;
use crate::perception::traits::GameClient;
use crate::perception::types::{Frame, Snapshot};

/// Perceive, decide, act. One cycle per fresh frame; intents are played
/// strictly one after another.
pub struct BotEngine {
    state: EngineState,
    frames: FrameReceiver,
    client: Arc<dyn GameClient>,
    policy: Box<dyn DecisionPolicy>,
    humanizer: Humanizer,
    variation: VariationHistory,
    dispatcher: Box<dyn InputDispatcher>,
    stop: StopFlag,
    loop_ctrl: LoopController,
    session: SessionLog,
    events: EventBus,
    cycle_interval: Duration,

    // ── Current cycle ─────────────────────────────────────────────────────
    frame: Option<Arc<Frame>>,
    snapshot: Option<Snapshot>,
    record: Option<CycleRecord>,
    cycle_started: Option<Instant>,
    next_cycle_at: Option<Instant>,
    fatal: Option<ColorBotError>,
}

impl BotEngine {
    pub fn new(
        frames: FrameReceiver,
        client: Arc<dyn GameClient>,
        policy: Box<dyn DecisionPolicy>,
        humanizer: Humanizer,
        dispatcher: Box<dyn InputDispatcher>,
        config: &EngineConfig,
        stop: StopFlag,
    ) -> ColorBotResult<Self> {
        let session = match &config.session_log {
            Some(path) => SessionLog::with_file(path)?,
            None => SessionLog::new(),
        };
        let humanizer = match config.screen {
            Some(screen) => humanizer.with_screen(screen),
            None => humanizer,
        };
        let variation = humanizer.new_history();
        Ok(Self {
            state: EngineState::Waiting,
            frames,
            client,
            policy,
            humanizer,
            variation,
            dispatcher,
            stop,
            loop_ctrl: LoopController::new(config.limits.clone()),
            session,
            events: EventBus::new(),
            cycle_interval: Duration::from_millis(config.cycle_interval_ms),
            frame: None,
            snapshot: None,
            record: None,
            cycle_started: None,
            next_cycle_at: None,
            fatal: None,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn session(&self) -> &SessionLog {
        &self.session
    }

    pub fn cycles(&self) -> u64 {
        self.loop_ctrl.cycles()
    }

    pub fn failures(&self) -> u32 {
        self.loop_ctrl.failures()
    }

    /// Drive the loop until a stop request, a loop limit, a policy finish or
    /// a fatal error. Returns the final summary; fatal errors are returned
    /// as they occurred.
    pub async fn run_loop(&mut self) -> ColorBotResult<String> {
        tracing::info!(
            client = %self.client.name(),
            policy = %self.policy.name(),
            session_id = %self.session.session_id,
            "bot loop started"
        );

        loop {
            self.publish_state();
            if self.state.is_terminal() {
                break;
            }

            if self.stop.is_stopped() {
                tracing::info!("stop requested");
                self.state = EngineState::Done {
                    summary: "stop requested".into(),
                };
                continue;
            }

            match self.state.clone() {
                // ── Waiting: pace, then block for a fresh frame ───────────
                EngineState::Waiting => {
                    if let Some(reason) = self.loop_ctrl.stop_reason() {
                        tracing::info!(reason = %reason, "loop controller triggered stop");
                        self.state = EngineState::Done { summary: reason };
                        continue;
                    }
                    if let Some(at) = self.next_cycle_at {
                        tokio::time::sleep_until(at).await;
                    }

                    match self.frames.next_frame().await {
                        Ok(frame) => {
                            let now = Instant::now();
                            let frame_id = frame.id().0;
                            self.cycle_started = Some(now);
                            self.next_cycle_at = Some(now + self.cycle_interval);
                            self.record = Some(CycleRecord::start(self.loop_ctrl.cycles(), frame_id));
                            self.frame = Some(frame);
                            self.state = EngineState::Perceiving { frame_id };
                        }
                        Err(ColorBotError::Cancelled) => {
                            self.state = EngineState::Done {
                                summary: "capture stopped".into(),
                            };
                        }
                        Err(e) => self.fail(e),
                    }
                }

                // ── Perceiving: build the snapshot off the async threads ──
                EngineState::Perceiving { frame_id } => {
                    let Some(frame) = self.frame.take() else {
                        self.state = EngineState::Waiting;
                        continue;
                    };
                    let perceived = match self.client.perception_plan(frame.bounds()) {
                        Ok(plan) => perceive_blocking(frame, Arc::new(plan)).await,
                        Err(e) => Err(e),
                    };
                    match perceived {
                        Ok(snapshot) => {
                            tracing::debug!(
                                frame_id,
                                detections = snapshot.total_detections(),
                                texts = snapshot.texts.len(),
                                "snapshot ready"
                            );
                            if let Some(record) = self.record.as_mut() {
                                record.detections = snapshot.total_detections();
                                record.texts = snapshot.texts.len();
                            }
                            self.snapshot = Some(snapshot);
                            self.state = EngineState::Deciding { frame_id };
                        }
                        Err(e) => self.abandon_cycle(e),
                    }
                }

                // ── Deciding ──────────────────────────────────────────────
                EngineState::Deciding { frame_id } => {
                    let Some(snapshot) = self.snapshot.take() else {
                        self.state = EngineState::Waiting;
                        continue;
                    };
                    match self.policy.decide(&snapshot).await {
                        Ok(Decision::Act { intents }) if !intents.is_empty() => {
                            self.note_decision("act", intents.len());
                            self.state = EngineState::Acting { frame_id, intents };
                        }
                        Ok(Decision::Act { .. }) | Ok(Decision::Idle) => {
                            self.note_decision("idle", 0);
                            self.finish_cycle(None);
                            self.state = EngineState::Waiting;
                        }
                        Ok(Decision::Finish { summary }) => {
                            tracing::info!(summary = %summary, "policy finished");
                            self.note_decision("finish", 0);
                            self.finish_cycle(None);
                            self.state = EngineState::Done { summary };
                        }
                        Err(e) => self.abandon_cycle(e),
                    }
                }

                // ── Acting: humanize everything, then play in order ───────
                EngineState::Acting { frame_id, intents } => match self.act(&intents).await {
                    Ok(dispatched) => {
                        tracing::debug!(frame_id, dispatched, "intents played");
                        if let Some(record) = self.record.as_mut() {
                            record.events_dispatched = dispatched;
                        }
                        self.finish_cycle(None);
                        self.state = EngineState::Waiting;
                    }
                    Err(e) => self.abandon_cycle(e),
                },

                EngineState::Failed { .. } | EngineState::Done { .. } => break,
            }
        }

        // capture has no consumer left
        self.stop.request_stop();

        let failed = matches!(self.state, EngineState::Failed { .. });
        let summary = match &self.state {
            EngineState::Done { summary } => summary.clone(),
            EngineState::Failed { message } => message.clone(),
            other => other.name().to_string(),
        };
        tracing::info!(
            summary = %summary,
            failed,
            cycles = self.loop_ctrl.cycles(),
            failures = self.loop_ctrl.failures(),
            "bot loop finished"
        );
        let _ = self.events.send(EngineEvent::Finished {
            summary: summary.clone(),
            failed,
        });

        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Humanize and play one intent at a time; the next intent is only
    /// humanized once the previous trace has drained.
    async fn act(&mut self, intents: &[ActionIntent]) -> ColorBotResult<usize> {
        let mut dispatched = 0;
        for intent in intents {
            if self.stop.is_stopped() {
                break;
            }
            let trace = self.humanizer.humanize(intent, &mut self.variation)?;
            tracing::debug!(
                intent = intent.kind(),
                events = trace.len(),
                duration_ms = trace.duration().as_millis() as u64,
                "playing trace"
            );
            let outcome = play_trace(&trace, self.dispatcher.as_mut(), &self.stop).await?;
            let cancelled = matches!(outcome, PlaybackOutcome::Cancelled { .. });
            dispatched += match outcome {
                PlaybackOutcome::Completed { dispatched } => dispatched,
                PlaybackOutcome::Cancelled {
                    dispatched,
                    released,
                } => dispatched + released,
            };
            if let Some(record) = self.record.as_mut() {
                record.events_dispatched = dispatched;
            }
            if cancelled {
                break;
            }
        }
        Ok(dispatched)
    }

    fn publish_state(&self) {
        tracing::debug!(state = self.state.name(), "engine state");
        let _ = self.events.send(EngineEvent::StateChanged {
            state: self.state.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn note_decision(&mut self, decision: &str, intents: usize) {
        if let Some(record) = self.record.as_mut() {
            record.decision = decision.to_string();
            record.intents = intents;
        }
    }

    /// Log, count and skip. Fatal errors end the loop instead.
    fn abandon_cycle(&mut self, error: ColorBotError) {
        if error.is_fatal() {
            self.fail(error);
            return;
        }
        let cycle = self.loop_ctrl.cycles();
        tracing::error!(cycle, error = %error, "cycle abandoned");
        self.loop_ctrl.record_failure();
        let _ = self.events.send(EngineEvent::Failure {
            cycle,
            message: error.to_string(),
        });
        self.snapshot = None;
        self.frame = None;
        self.finish_cycle(Some(error.to_string()));
        self.state = EngineState::Waiting;
    }

    fn fail(&mut self, error: ColorBotError) {
        let message = error.to_string();
        tracing::error!(error = %message, "bot loop failed");
        if self.record.is_some() {
            self.finish_cycle(Some(message.clone()));
        }
        self.state = EngineState::Failed { message };
        self.fatal = Some(error);
    }

    fn finish_cycle(&mut self, error: Option<String>) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        self.loop_ctrl.record_cycle();
        record.error = error;
        record.elapsed_ms = self
            .cycle_started
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        tracing::info!(
            cycle = record.cycle,
            frame_id = record.frame_id,
            detections = record.detections,
            decision = %record.decision,
            events = record.events_dispatched,
            elapsed_ms = record.elapsed_ms,
            "cycle finished"
        );
        if let Err(e) = self.session.push(record.clone()) {
            tracing::warn!(error = %e, "session log write failed");
        }
        let _ = self.events.send(EngineEvent::CycleCompleted { record });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::policy::ClickTagPolicy;
    use crate::agent_engine::state::{LoopConfig, LoopMode};
    use crate::config::{AppConfig, CaptureConfig, HumanizerConfig, PolicyConfig};
    use crate::executor::dispatcher::RecordingDispatcher;
    use crate::executor::types::PrimitiveEvent;
    use crate::perception::client::ConfiguredClient;
    use crate::perception::frame_slot::spawn_capture;
    use crate::perception::replay::ReplaySource;
    use crate::perception::traits::FrameSource;
    use async_trait::async_trait;
    use std::path::Path;

    const GREEN_TARGET: &str = r#"
[[client.detections]]
tag = "target"
color = { target = [0, 200, 0], tolerance = [10, 10, 10] }
"#;

    fn scene() -> image::RgbImage {
        image::RgbImage::from_fn(40, 30, |x, y| {
            if (10..16).contains(&x) && (8..14).contains(&y) {
                image::Rgb([0, 200, 0])
            } else {
                image::Rgb([20, 20, 20])
            }
        })
    }

    fn client(toml: &str) -> Arc<dyn GameClient> {
        let config = AppConfig::from_toml_str(toml).unwrap();
        Arc::new(ConfiguredClient::from_config(&config.client, Path::new(".")).unwrap())
    }

    fn capture_config() -> CaptureConfig {
        CaptureConfig {
            interval_ms: 10,
            retry_budget: 1,
        }
    }

    fn engine(
        source: Box<dyn FrameSource>,
        client: Arc<dyn GameClient>,
        policy: PolicyConfig,
        limits: LoopConfig,
        stop: &StopFlag,
    ) -> (
        BotEngine,
        RecordingDispatcher,
        tokio::task::JoinHandle<ColorBotResult<()>>,
    ) {
        let (frames, handle) = spawn_capture(source, capture_config(), stop.clone());
        let rec = RecordingDispatcher::new();
        let config = EngineConfig {
            limits,
            ..EngineConfig::default()
        };
        let engine = BotEngine::new(
            frames,
            client,
            Box::new(ClickTagPolicy::new(policy)),
            Humanizer::seeded(HumanizerConfig::default(), 11).unwrap(),
            Box::new(rec.clone()),
            &config,
            stop.clone(),
        )
        .unwrap();
        (engine, rec, handle)
    }

    fn presses(events: &[PrimitiveEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, PrimitiveEvent::ButtonDown { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn clicks_until_policy_finishes() {
        let stop = StopFlag::new();
        let source = ReplaySource::from_images(vec![scene()]).unwrap();
        let policy = PolicyConfig {
            max_clicks: Some(2),
            ..PolicyConfig::default()
        };
        let (mut engine, rec, handle) =
            engine(Box::new(source), client(GREEN_TARGET), policy, LoopConfig::default(), &stop);

        let summary = engine.run_loop().await.unwrap();
        assert_eq!(summary, "clicked 'target' 2 times");
        assert_eq!(engine.cycles(), 3);
        assert_eq!(engine.failures(), 0);
        assert!(matches!(engine.state(), EngineState::Done { .. }));

        let events = rec.events();
        assert_eq!(presses(&events), 2);
        // every press lands on the green blob
        let mut last_move = None;
        for event in &events {
            match *event {
                PrimitiveEvent::Move { x, y } => last_move = Some((x, y)),
                PrimitiveEvent::ButtonDown { .. } => {
                    let (x, y) = last_move.unwrap();
                    assert!((10..16).contains(&x) && (8..14).contains(&y), "press at {x},{y}");
                }
                _ => {}
            }
        }

        let decisions: Vec<_> = engine.session().records().map(|r| r.decision.clone()).collect();
        assert_eq!(decisions, vec!["act", "act", "finish"]);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_cycles() {
        let stop = StopFlag::new();
        let source = ReplaySource::from_images(vec![image::RgbImage::new(40, 30)]).unwrap();
        let limits = LoopConfig {
            mode: LoopMode::MaxCycles,
            max_cycles: Some(4),
            ..LoopConfig::default()
        };
        let (mut engine, rec, _handle) =
            engine(Box::new(source), client(GREEN_TARGET), PolicyConfig::default(), limits, &stop);

        let summary = engine.run_loop().await.unwrap();
        assert_eq!(summary, "4 cycles completed");
        assert!(rec.events().is_empty());
        assert!(engine.session().records().all(|r| r.decision == "idle"));
        // each cycle saw a different frame
        let mut ids: Vec<u64> = engine.session().records().map(|r| r.frame_id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    struct Broken;

    #[async_trait]
    impl FrameSource for Broken {
        async fn capture(&mut self) -> ColorBotResult<Frame> {
            Err(ColorBotError::Capture("window not found".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn capture_exhaustion_halts_the_loop() {
        let stop = StopFlag::new();
        let (mut engine, rec, handle) = engine(
            Box::new(Broken),
            client(GREEN_TARGET),
            PolicyConfig::default(),
            LoopConfig::default(),
            &stop,
        );

        let err = engine.run_loop().await.unwrap_err();
        assert!(matches!(err, ColorBotError::CaptureExhausted { failures: 2 }));
        assert!(matches!(engine.state(), EngineState::Failed { .. }));
        assert!(rec.events().is_empty());
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn precondition_errors_skip_the_cycle() {
        let stop = StopFlag::new();
        let source = ReplaySource::from_images(vec![scene()]).unwrap();
        // search region hangs off the 40x30 frame
        let client = client(
            r#"
[[client.detections]]
tag = "target"
color = { target = [0, 200, 0] }
search = { left = 30, top = 20, width = 20, height = 20 }
"#,
        );
        let limits = LoopConfig {
            mode: LoopMode::FailureLimit,
            max_failures: Some(3),
            ..LoopConfig::default()
        };
        let (mut engine, rec, _handle) =
            engine(Box::new(source), client, PolicyConfig::default(), limits, &stop);
        let mut events = engine.events().subscribe();

        let summary = engine.run_loop().await.unwrap();
        assert_eq!(summary, "3 failures reached");
        assert_eq!(engine.failures(), 3);
        assert!(rec.events().is_empty());
        assert!(engine.session().records().all(|r| r.failed()));

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Failure { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn off_screen_click_is_rejected_before_any_input() {
        let stop = StopFlag::new();
        // frame placed far right; the detection maps outside the screen
        let source = ReplaySource::from_images(vec![scene()])
            .unwrap()
            .with_placement(crate::geometry::Point::new(5000, 0), 1.0);
        let (frames, _handle) = spawn_capture(Box::new(source), capture_config(), stop.clone());
        let rec = RecordingDispatcher::new();
        let config = EngineConfig {
            limits: LoopConfig {
                mode: LoopMode::FailureLimit,
                max_failures: Some(2),
                ..LoopConfig::default()
            },
            screen: Some(crate::geometry::Rectangle::new(0, 0, 1920, 1080)),
            ..EngineConfig::default()
        };
        let mut engine = BotEngine::new(
            frames,
            client(GREEN_TARGET),
            Box::new(ClickTagPolicy::new(PolicyConfig::default())),
            Humanizer::seeded(HumanizerConfig::default(), 3).unwrap(),
            Box::new(rec.clone()),
            &config,
            stop.clone(),
        )
        .unwrap();

        assert_eq!(engine.run_loop().await.unwrap(), "2 failures reached");
        assert!(rec.events().is_empty());
    }

    /// Clicks once, then asks for a key hold with a negative duration.
    struct ClickThenBadHold;

    #[async_trait]
    impl DecisionPolicy for ClickThenBadHold {
        async fn decide(&mut self, _snapshot: &Snapshot) -> ColorBotResult<Decision> {
            Ok(Decision::act(vec![
                ActionIntent::Click {
                    target: crate::geometry::Point::new(20, 15),
                    button: crate::executor::types::MouseButton::Left,
                    modifier: None,
                },
                ActionIntent::HoldKey {
                    key: crate::executor::types::Key::Space,
                    seconds: -1.0,
                },
            ]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_intents_play_before_a_later_one_is_rejected() {
        let stop = StopFlag::new();
        let source = ReplaySource::from_images(vec![scene()]).unwrap();
        let (frames, _handle) = spawn_capture(Box::new(source), capture_config(), stop.clone());
        let rec = RecordingDispatcher::new();
        let config = EngineConfig {
            limits: LoopConfig {
                mode: LoopMode::FailureLimit,
                max_failures: Some(1),
                ..LoopConfig::default()
            },
            ..EngineConfig::default()
        };
        let mut engine = BotEngine::new(
            frames,
            client(GREEN_TARGET),
            Box::new(ClickThenBadHold),
            Humanizer::seeded(HumanizerConfig::default(), 5).unwrap(),
            Box::new(rec.clone()),
            &config,
            stop.clone(),
        )
        .unwrap();

        assert_eq!(engine.run_loop().await.unwrap(), "1 failures reached");
        let events = rec.events();
        assert_eq!(presses(&events), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, PrimitiveEvent::ButtonUp { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, PrimitiveEvent::KeyDown { .. })));

        let record = engine.session().last().unwrap();
        assert!(record.failed());
        assert_eq!(record.events_dispatched, events.len());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_ends_the_loop() {
        let stop = StopFlag::new();
        let source = ReplaySource::from_images(vec![scene()]).unwrap();
        let (mut engine, rec, handle) = engine(
            Box::new(source),
            client(GREEN_TARGET),
            PolicyConfig::default(),
            LoopConfig::default(),
            &stop,
        );
        stop.request_stop();

        assert_eq!(engine.run_loop().await.unwrap(), "stop requested");
        assert!(rec.events().is_empty());
        assert!(handle.await.unwrap().is_ok());
    }
}
