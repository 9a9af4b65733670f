//! Agent configuration.
//!
//! Every knob has a default; a JSON file only needs the fields it overrides.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::NetworkConfig;
use crate::reward::RewardConfig;

/// What the agent writes back after each accepted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResponseMode {
    /// Held button names, then `END`.
    #[default]
    Actions,
    /// Bare `END` acknowledgment; the chosen actions are not transmitted.
    Ack,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AgentConfig {
    pub listen_addr: String,
    /// Upper bound on a single request, in bytes.
    pub read_buffer_size: usize,
    pub read_timeout_ms: u64,

    pub network: NetworkConfig,
    pub reward: RewardConfig,

    /// Discount factor.
    pub gamma: f32,
    /// Per-button exploration rate.
    pub epsilon: f32,
    pub action_threshold: f32,

    pub response_mode: ResponseMode,

    /// Log an ASCII grid every N frames (0 disables).
    pub dump_every: u64,

    /// Fixed seed for weight init and exploration; `None` seeds from the clock.
    pub seed: Option<u64>,

    /// Warm-start from / save to the on-disk network image.
    pub persist_weights: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:2022".to_string(),
            read_buffer_size: 512,
            read_timeout_ms: 10_000,
            network: NetworkConfig::default(),
            reward: RewardConfig::default(),
            gamma: 0.9,
            epsilon: 0.1,
            action_threshold: 0.0,
            response_mode: ResponseMode::Actions,
            dump_every: 60,
            seed: None,
            persist_weights: false,
        }
    }
}

impl AgentConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: AgentConfig = serde_json::from_str(text).map_err(|e| Error::InvalidConfig {
            message: format!("config parse: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> { Err(Error::InvalidConfig { message }) };

        if self.read_buffer_size < 8 {
            return invalid(format!(
                "read_buffer_size {} cannot hold a frame",
                self.read_buffer_size
            ));
        }
        if self.read_timeout_ms == 0 {
            return invalid("read_timeout_ms must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.gamma) {
            return invalid(format!("gamma {} must be in [0, 1)", self.gamma));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return invalid(format!("epsilon {} must be in [0, 1]", self.epsilon));
        }
        if !self.action_threshold.is_finite() {
            return invalid("action_threshold must be finite".to_string());
        }
        if self.network.hidden_layers > 0 && self.network.hidden_width == 0 {
            return invalid("hidden_width must be positive".to_string());
        }
        if !(self.network.learning_rate > 0.0 && self.network.learning_rate.is_finite()) {
            return invalid(format!(
                "learning_rate {} must be positive",
                self.network.learning_rate
            ));
        }
        if self.reward.max_level_width <= 0.0 || self.reward.max_level_time <= 0.0 {
            return invalid("level normalisation constants must be positive".to_string());
        }
        Ok(())
    }
}
