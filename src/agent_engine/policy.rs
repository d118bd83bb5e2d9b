use async_trait::async_trait;

use crate::agent_engine::state::Decision;
use crate::config::PolicyConfig;
use crate::errors::ColorBotResult;
use crate::executor::types::ActionIntent;
use crate::perception::types::Snapshot;

/// Per-game decision logic. Receives one snapshot per cycle and answers
/// with zero or more intents.
#[async_trait]
pub trait DecisionPolicy: Send {
    async fn decide(&mut self, snapshot: &Snapshot) -> ColorBotResult<Decision>;

    fn name(&self) -> &str {
        "policy"
    }
}

/// Clicks somewhere inside the best detection of one tag, then idles for a
/// moment. Finishes after `max_clicks` clicks when set.
pub struct ClickTagPolicy {
    config: PolicyConfig,
    clicks: u32,
}

impl ClickTagPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config, clicks: 0 }
    }

    pub fn clicks(&self) -> u32 {
        self.clicks
    }
}

#[async_trait]
impl DecisionPolicy for ClickTagPolicy {
    async fn decide(&mut self, snapshot: &Snapshot) -> ColorBotResult<Decision> {
        if let Some(max) = self.config.max_clicks {
            if self.clicks >= max {
                return Ok(Decision::Finish {
                    summary: format!("clicked '{}' {} times", self.config.click_tag, self.clicks),
                });
            }
        }

        let Some(best) = snapshot.best(&self.config.click_tag) else {
            tracing::debug!(tag = %self.config.click_tag, frame_id = %snapshot.frame_id, "nothing to click");
            return Ok(Decision::Idle);
        };

        self.clicks += 1;
        let region = snapshot.to_screen(&best.bounds);
        let [min_seconds, max_seconds] = self.config.pause_seconds;
        tracing::debug!(
            tag = %self.config.click_tag,
            region = %region,
            confidence = best.confidence,
            "clicking best detection"
        );
        Ok(Decision::act(vec![
            ActionIntent::ClickIn {
                region,
                button: self.config.button,
                modifier: self.config.modifier,
            },
            ActionIntent::Pause {
                min_seconds,
                max_seconds,
            },
        ]))
    }

    fn name(&self) -> &str {
        "click_tag"
    }
}
