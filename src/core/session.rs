//! Per-connection agent state and the per-frame decide/learn cycle.
//!
//! Transport is not handled here: the daemon feeds one raw message at a time
//! into [`Session::on_message`] and writes back [`FrameReport::response`].

use crate::codec::{self, Grid, SENTINEL};
use crate::config::{AgentConfig, ResponseMode};
use crate::error::{Error, Result};
use crate::learner::{TdLearner, Transition};
use crate::network::{NetworkConfig, ValueNetwork};
use crate::observer;
use crate::policy::{ActionMask, ActionSelector};
use crate::prng::Prng;
use crate::reward::reward;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingConnection,
    Connected,
    Decoding,
    Acting,
    Learning,
    Responding,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Empty read: the client hung up.
    PeerClosed,
    /// No message within the read timeout.
    Timeout,
    /// Lower-level I/O failure.
    Transport(String),
}

impl SessionEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, SessionEnd::Transport(_))
    }
}

/// The value network does not exist until the first frame fixes the grid size.
#[derive(Debug, Clone, Default)]
pub struct NetworkSlot {
    net: Option<ValueNetwork>,
}

impl NetworkSlot {
    pub fn get(&self) -> Option<&ValueNetwork> {
        self.net.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.net.is_some()
    }

    /// Install a network. Only valid once per session.
    pub fn install(&mut self, net: ValueNetwork) -> Result<&mut ValueNetwork> {
        if let Some(existing) = &self.net {
            return Err(Error::NetworkAlreadyBuilt {
                vision_size: existing.vision_size(),
            });
        }
        Ok(self.net.insert(net))
    }

    /// The installed network, building it first if the slot is empty.
    /// The flag is true when this call built it.
    pub fn get_or_build(
        &mut self,
        build: impl FnOnce() -> ValueNetwork,
    ) -> (&mut ValueNetwork, bool) {
        let built = self.net.is_none();
        (self.net.get_or_insert_with(build), built)
    }

    fn take(&mut self) -> Option<ValueNetwork> {
        self.net.take()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Accepted frames so far; starts at 0.
    pub frame_counter: u64,
    pub network: NetworkSlot,
    /// Grid and action of the last accepted frame.
    pub previous: Option<(Grid, ActionMask)>,
}

impl SessionState {
    pub fn vision_size(&self) -> Option<usize> {
        self.network.get().map(ValueNetwork::vision_size)
    }
}

/// Result of one accepted frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    pub actions: ActionMask,
    pub reward: Option<f32>,
    pub loss: Option<f32>,
    pub network_built: bool,
    pub response: String,
    /// ASCII grid when this frame is due for a periodic dump.
    pub grid_dump: Option<String>,
}

/// What is left after a session closes.
#[derive(Debug)]
pub struct ClosedSession {
    pub end: SessionEnd,
    pub snapshot: observer::SessionSnapshot,
    pub network: Option<ValueNetwork>,
}

pub struct Session {
    cfg: AgentConfig,
    selector: ActionSelector,
    learner: TdLearner,
    rng: Prng,
    state: SessionState,
    warm_start: Option<ValueNetwork>,
    phase: Phase,
    dropped_frames: u64,
    last_reward: Option<f32>,
    last_loss: Option<f32>,
}

impl Session {
    pub fn new(cfg: AgentConfig) -> Self {
        Self {
            selector: ActionSelector::new(cfg.action_threshold, cfg.epsilon),
            learner: TdLearner::new(cfg.gamma),
            rng: Prng::seeded_or_entropy(cfg.seed),
            cfg,
            state: SessionState::default(),
            warm_start: None,
            phase: Phase::Connected,
            dropped_frames: 0,
            last_reward: None,
            last_loss: None,
        }
    }

    /// Offer previously trained weights. They are used only if the first
    /// accepted frame has the same vision size.
    pub fn with_warm_start(mut self, net: ValueNetwork) -> Self {
        self.warm_start = Some(net);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn last_reward(&self) -> Option<f32> {
        self.last_reward
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.last_loss
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    /// Reply for a request that was dropped: nothing held, state untouched.
    /// Keeps a lock-step client in step with the server.
    pub fn drop_response(&self) -> String {
        encode_response(self.cfg.response_mode, &ActionMask::NONE)
    }

    /// Count a request the transport discarded before it reached the codec.
    pub fn record_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    /// Process one raw request.
    ///
    /// Errors leave the session untouched. For frame-local errors
    /// (`MalformedMessage`, `GridSizeMismatch`) the caller answers with
    /// [`Session::drop_response`] and waits for the next request.
    pub fn on_message(&mut self, raw: &str) -> Result<FrameReport> {
        self.phase = Phase::Decoding;
        let result = self.step(raw);
        self.phase = Phase::Connected;
        if let Err(e) = &result {
            if e.is_frame_local() {
                self.dropped_frames += 1;
            }
        }
        result
    }

    fn step(&mut self, raw: &str) -> Result<FrameReport> {
        let obs = codec::decode(raw)?;
        if let Some(net) = self.state.network.get() {
            if net.side() != obs.grid.side() {
                return Err(Error::GridSizeMismatch {
                    expected: net.side(),
                    got: obs.grid.side(),
                });
            }
        }

        let frame = self.state.frame_counter + 1;

        let vision_size = obs.vision_size();
        let (warm_start, net_cfg, rng) = (&mut self.warm_start, &self.cfg.network, &mut self.rng);
        let (net, network_built) = self
            .state
            .network
            .get_or_build(|| fresh_network(warm_start, net_cfg, rng, vision_size));

        self.phase = Phase::Acting;
        let q = net.evaluate(&obs.grid)?;
        let actions = self.selector.select(&q, &mut self.rng);

        self.phase = Phase::Learning;
        let mut frame_reward = None;
        let mut loss = None;
        if let Some((prev_state, prev_action)) = self.state.previous.take() {
            let r = reward(&self.cfg.reward, obs.won, obs.player_x, frame);
            let transition = Transition {
                prev_state,
                prev_action,
                reward: r,
                next_state: obs.grid.clone(),
            };
            match self.learner.update(net, &transition) {
                Ok(l) => loss = Some(l),
                Err(e) => {
                    // Leave the stored transition in place for the next frame.
                    self.state.previous = Some((transition.prev_state, transition.prev_action));
                    return Err(e);
                }
            }
            frame_reward = Some(r);
        }
        self.state.frame_counter = frame;

        self.phase = Phase::Responding;
        let grid_dump = if self.cfg.dump_every > 0 && frame % self.cfg.dump_every == 0 {
            Some(observer::render_grid(&obs.grid))
        } else {
            None
        };
        self.state.previous = Some((obs.grid, actions));
        self.last_reward = frame_reward.or(self.last_reward);
        self.last_loss = loss.or(self.last_loss);

        Ok(FrameReport {
            frame,
            actions,
            reward: frame_reward,
            loss,
            network_built,
            response: encode_response(self.cfg.response_mode, &actions),
            grid_dump,
        })
    }

    /// Terminal transition; consumes the session so it can only happen once.
    pub fn close(mut self, end: SessionEnd) -> ClosedSession {
        self.phase = Phase::Closed;
        let snapshot = observer::SessionAdapter::new(&self).snapshot();
        let network = self.state.network.take();
        ClosedSession {
            end,
            snapshot,
            network,
        }
    }
}

/// Adopt the warm-start network when its vision size matches, else build fresh.
fn fresh_network(
    warm_start: &mut Option<ValueNetwork>,
    cfg: &NetworkConfig,
    rng: &mut Prng,
    vision_size: usize,
) -> ValueNetwork {
    match warm_start.take() {
        Some(mut net) if net.vision_size() == vision_size => {
            net.set_learning_rate(cfg.learning_rate);
            net
        }
        _ => ValueNetwork::build(vision_size, cfg, rng),
    }
}

/// Single response line for an accepted frame.
pub fn encode_response(mode: ResponseMode, actions: &ActionMask) -> String {
    match mode {
        ResponseMode::Ack => format!("{SENTINEL}\n"),
        ResponseMode::Actions => {
            let mut line = String::new();
            for name in actions.names() {
                line.push_str(name);
                line.push(' ');
            }
            line.push_str(SENTINEL);
            line.push('\n');
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use crate::policy::Button;

    const FIRST: &str = "0 100 0 0 0 0 0 0 0 0 0 END";
    const SECOND: &str = "1 200 0 0 0 0 0 0 0 0 0 END";

    fn test_cfg() -> AgentConfig {
        AgentConfig {
            network: NetworkConfig {
                hidden_layers: 1,
                hidden_width: 8,
                ..NetworkConfig::default()
            },
            seed: Some(1234),
            dump_every: 0,
            ..AgentConfig::default()
        }
    }

    fn five_by_five() -> String {
        let mut s = String::from("0 10");
        for _ in 0..25 {
            s.push_str(" 0");
        }
        s.push_str(" END");
        s
    }

    #[test]
    fn first_frame_builds_network_without_learning() {
        let mut session = Session::new(test_cfg());
        assert!(session.state().network.get().is_none());

        let report = session.on_message(FIRST).unwrap();
        assert!(report.network_built);
        assert_eq!(report.frame, 1);
        assert!(report.reward.is_none());
        assert!(report.loss.is_none());

        let net = session.state().network.get().unwrap();
        assert_eq!(net.side(), 3);
        assert_eq!(net.steps(), 0);
        assert!(session.state().previous.is_some());
        assert!(report.response.ends_with("END\n"));
    }

    #[test]
    fn two_frame_scenario_learns_once() {
        let cfg = test_cfg();
        let reward_cfg = cfg.reward;
        let mut session = Session::new(cfg);

        session.on_message(FIRST).unwrap();
        let report = session.on_message(SECOND).unwrap();

        assert!(!report.network_built);
        assert_eq!(report.frame, 2);
        assert_eq!(session.state().frame_counter, 2);
        assert_eq!(report.reward, Some(reward(&reward_cfg, true, 200, 2)));
        assert!(report.loss.is_some());
        assert_eq!(session.state().network.get().unwrap().steps(), 1);
    }

    #[test]
    fn mismatched_grid_is_dropped_without_resizing() {
        let mut session = Session::new(test_cfg());
        session.on_message(FIRST).unwrap();

        for _ in 0..3 {
            let err = session.on_message(&five_by_five()).unwrap_err();
            assert!(matches!(
                err,
                Error::GridSizeMismatch {
                    expected: 3,
                    got: 5
                }
            ));
        }
        assert_eq!(session.state().frame_counter, 1);
        assert_eq!(session.state().vision_size(), Some(1));
        assert_eq!(session.dropped_frames(), 3);

        // The stored transition still pairs with the next valid frame.
        let report = session.on_message(SECOND).unwrap();
        assert_eq!(report.frame, 2);
        assert!(report.loss.is_some());
    }

    #[test]
    fn malformed_frame_does_not_advance_previous() {
        let mut session = Session::new(test_cfg());
        session.on_message(FIRST).unwrap();
        let before = session.state().previous.clone();

        assert!(matches!(
            session.on_message("0 100 0 0 0").unwrap_err(),
            Error::MalformedMessage { .. }
        ));
        assert_eq!(session.state().previous, before);
        assert_eq!(session.state().frame_counter, 1);
        assert_eq!(session.phase(), Phase::Connected);
    }

    #[test]
    fn malformed_first_frame_defers_network() {
        let mut session = Session::new(test_cfg());
        assert!(session.on_message("garbage").is_err());
        assert!(session.state().network.get().is_none());

        let report = session.on_message(&five_by_five()).unwrap();
        assert!(report.network_built);
        assert_eq!(session.state().vision_size(), Some(2));
    }

    #[test]
    fn network_slot_refuses_second_install() {
        let mut slot = NetworkSlot::default();
        let cfg = NetworkConfig::default();
        let mut rng = Prng::new(1);
        slot.install(ValueNetwork::build(1, &cfg, &mut rng)).unwrap();
        let err = slot
            .install(ValueNetwork::build(2, &cfg, &mut rng))
            .unwrap_err();
        assert!(matches!(err, Error::NetworkAlreadyBuilt { vision_size: 1 }));
        assert_eq!(slot.get().unwrap().vision_size(), 1);
    }

    #[test]
    fn slot_builds_once() {
        let cfg = NetworkConfig::default();
        let mut rng = Prng::new(1);
        let mut slot = NetworkSlot::default();
        assert!(!slot.is_ready());

        let (net, built) = slot.get_or_build(|| ValueNetwork::build(1, &cfg, &mut rng));
        assert!(built);
        assert_eq!(net.vision_size(), 1);

        let (net, built) = slot.get_or_build(|| ValueNetwork::build(3, &cfg, &mut rng));
        assert!(!built);
        assert_eq!(net.vision_size(), 1);
    }

    #[test]
    fn failed_update_keeps_transition_and_counter() {
        let mut session = Session::new(test_cfg());
        session.on_message(FIRST).unwrap();

        // A stored grid the network cannot evaluate makes the update fail.
        let stale = (Grid::empty(2), ActionMask::from_buttons(&[Button::A]));
        session.state.previous = Some(stale.clone());

        let err = session.on_message(SECOND).unwrap_err();
        assert!(matches!(err, Error::GridSizeMismatch { .. }));
        assert_eq!(session.state().frame_counter, 1);
        assert_eq!(session.state().previous, Some(stale));
        assert_eq!(session.state().network.get().unwrap().steps(), 0);
        assert_eq!(session.phase(), Phase::Connected);
    }

    #[test]
    fn warm_start_used_only_when_sizes_match() {
        let cfg = test_cfg();
        let trained = ValueNetwork::build(1, &cfg.network, &mut Prng::new(99));
        let grid = Grid::empty(1);
        let expected = trained.evaluate(&grid).unwrap();

        let mut session = Session::new(cfg.clone()).with_warm_start(trained.clone());
        session.on_message(FIRST).unwrap();
        let adopted = session.state().network.get().unwrap();
        assert_eq!(adopted.evaluate(&grid).unwrap(), expected);

        let mut session = Session::new(cfg).with_warm_start(trained);
        session.on_message(&five_by_five()).unwrap();
        assert_eq!(session.state().vision_size(), Some(2));
    }

    #[test]
    fn seeded_sessions_replay_identically() {
        let run = || {
            let mut s = Session::new(test_cfg());
            (0..5)
                .map(|i| {
                    let msg = format!("0 {} 1 0 0 0 0 2 0 0 1 END", 100 + i * 10);
                    s.on_message(&msg).unwrap().actions
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn response_modes() {
        let mask = ActionMask::from_buttons(&[Button::Right, Button::A]);
        assert_eq!(
            encode_response(ResponseMode::Actions, &mask),
            "RIGHT A END\n"
        );
        assert_eq!(
            encode_response(ResponseMode::Actions, &ActionMask::NONE),
            "END\n"
        );
        assert_eq!(encode_response(ResponseMode::Ack, &mask), "END\n");
    }

    #[test]
    fn dropped_request_reply_holds_nothing() {
        let mut session = Session::new(test_cfg());
        assert_eq!(session.drop_response(), "END\n");
        session.record_dropped();
        assert_eq!(session.dropped_frames(), 1);

        let ack = Session::new(AgentConfig {
            response_mode: ResponseMode::Ack,
            ..test_cfg()
        });
        assert_eq!(ack.drop_response(), "END\n");
    }

    #[test]
    fn periodic_grid_dump() {
        let cfg = AgentConfig {
            dump_every: 2,
            ..test_cfg()
        };
        let mut session = Session::new(cfg);
        assert!(session.on_message(FIRST).unwrap().grid_dump.is_none());
        let dump = session.on_message(SECOND).unwrap().grid_dump.unwrap();
        assert_eq!(dump.lines().count(), 3);
    }

    #[test]
    fn close_hands_back_network_and_snapshot() {
        let mut session = Session::new(test_cfg());
        session.on_message(FIRST).unwrap();
        session.on_message(SECOND).unwrap();

        let closed = session.close(SessionEnd::PeerClosed);
        assert_eq!(closed.end, SessionEnd::PeerClosed);
        assert_eq!(closed.snapshot.phase, Phase::Closed);
        assert_eq!(closed.snapshot.frame_counter, 2);
        assert_eq!(closed.snapshot.vision_size, Some(1));
        assert_eq!(closed.network.unwrap().steps(), 1);
        assert!(!SessionEnd::Timeout.is_error());
        assert!(SessionEnd::Transport("reset".into()).is_error());
    }
}
