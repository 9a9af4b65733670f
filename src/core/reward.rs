//! Shaped reward: rightward progress, minus elapsed time, plus a win bonus.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RewardConfig {
    /// Width (in x units) of the longest supported level.
    pub max_level_width: f32,
    /// Frame count of the longest supported level.
    pub max_level_time: f32,
    pub w_distance: f32,
    pub w_time: f32,
    pub w_win: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            max_level_width: 3500.0,
            max_level_time: 24_000.0,
            w_distance: 1.0,
            w_time: 0.5,
            w_win: 10.0,
        }
    }
}

/// `x / MAX_W * W_D - frame / MAX_T * W_T + (won ? W_WIN : 0)`.
///
/// Values beyond the normalisation constants are not clamped.
pub fn reward(cfg: &RewardConfig, won: bool, player_x: i32, frame: u64) -> f32 {
    let distance = (player_x as f32 / cfg.max_level_width) * cfg.w_distance;
    let time = (frame as f32 / cfg.max_level_time) * cfg.w_time;
    let bonus = if won { cfg.w_win } else { 0.0 };
    distance - time + bonus
}
