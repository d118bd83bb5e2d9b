pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod geometry;
pub mod perception;

use std::path::Path;
use std::sync::Arc;

use crate::agent_engine::engine::BotEngine;
use crate::agent_engine::loop_control::StopFlag;
use crate::agent_engine::policy::ClickTagPolicy;
use crate::config::AppConfig;
use crate::errors::ColorBotResult;
use crate::executor::dispatcher::LoggingDispatcher;
use crate::executor::humanizer::Humanizer;
use crate::perception::client::ConfiguredClient;
use crate::perception::frame_slot::spawn_capture;
use crate::perception::replay::ReplaySource;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Load the config, replay recorded frames through the full loop and log
/// the input that would have been sent. Ctrl-C stops the loop.
pub async fn run() -> ColorBotResult<()> {
    init_tracing();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let path = config::resolve_config_path()?;
    let cfg = config::load_config_from(&path)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let summary = run_with(cfg, &base_dir).await?;
    tracing::info!(summary = %summary, "colorbot finished");
    Ok(())
}

/// Wire capture, perception, policy and dispatch from `cfg`. Relative paths
/// resolve against `base_dir`.
pub async fn run_with(mut cfg: AppConfig, base_dir: &Path) -> ColorBotResult<String> {
    let stop = StopFlag::new();
    if let Some(log) = cfg.engine.session_log.as_mut() {
        if log.is_relative() {
            *log = base_dir.join(&*log);
        }
    }

    let replay = &cfg.replay;
    let mut source = ReplaySource::from_dir(base_dir.join(&replay.dir))?
        .with_placement(replay.origin, replay.scale);
    if !replay.looping {
        source = source.once();
    }
    let (frames, capture) = spawn_capture(Box::new(source), cfg.capture.clone(), stop.clone());

    let client = ConfiguredClient::from_config(&cfg.client, base_dir)?;
    let humanizer = Humanizer::new(cfg.humanizer.clone())?;
    let mut engine = BotEngine::new(
        frames,
        Arc::new(client),
        Box::new(ClickTagPolicy::new(cfg.policy.clone())),
        humanizer,
        Box::new(LoggingDispatcher),
        &cfg.engine,
        stop.clone(),
    )?;

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, stopping");
            ctrl_c_stop.request_stop();
        }
    });

    let result = engine.run_loop().await;
    stop.request_stop();
    match capture.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "capture task ended with error"),
        Err(e) => tracing::warn!(error = %e, "capture task panicked"),
    }
    result
}
