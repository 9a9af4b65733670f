use std::fmt::Write as _;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::codec::Grid;
use crate::session::{Phase, Session};

/// A read-only snapshot of what a session is doing.
///
/// Observers cannot mutate the session; snapshotting allocates and is meant for
/// logging at session boundaries, not for the per-frame hot path.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SessionSnapshot {
    #[cfg_attr(feature = "serde", serde(serialize_with = "phase_name"))]
    pub phase: Phase,
    pub frame_counter: u64,
    pub dropped_frames: u64,
    pub vision_size: Option<usize>,
    pub param_count: usize,
    pub optimizer_steps: u64,
    pub last_reward: Option<f32>,
    pub last_loss: Option<f32>,
}

#[cfg(feature = "serde")]
fn phase_name<S: serde::Serializer>(phase: &Phase, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{phase:?}"))
}

impl SessionSnapshot {
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

pub struct SessionAdapter<'a> {
    session: &'a Session,
}

impl<'a> SessionAdapter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.session.state();
        let net = state.network.get();

        SessionSnapshot {
            phase: self.session.phase(),
            frame_counter: state.frame_counter,
            dropped_frames: self.session.dropped_frames(),
            vision_size: state.vision_size(),
            param_count: net.map(|n| n.param_count()).unwrap_or(0),
            optimizer_steps: net.map(|n| n.steps()).unwrap_or(0),
            last_reward: self.session.last_reward(),
            last_loss: self.session.last_loss(),
        }
    }
}

/// ASCII view of a grid, one row per line, with `*` on the player's cell.
pub fn render_grid(grid: &Grid) -> String {
    let side = grid.side();
    let centre = grid.vision_size();
    let mut out = String::with_capacity(side * side * 3 + side);
    for row in 0..side {
        let mut line = String::with_capacity(side * 3);
        for col in 0..side {
            if row == centre && col == centre {
                line.push_str(" * ");
            } else {
                let tile = grid.get(row, col).unwrap_or_default();
                let _ = write!(line, "{tile:>2} ");
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
