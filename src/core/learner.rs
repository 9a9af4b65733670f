//! One-step temporal-difference learning over multi-hot actions.

use crate::codec::Grid;
use crate::error::Result;
use crate::network::ValueNetwork;
use crate::policy::{ActionMask, BUTTON_COUNT};

/// What happened between two consecutive frames. Lives for one update only.
#[derive(Debug, Clone)]
pub struct Transition {
    pub prev_state: Grid,
    pub prev_action: ActionMask,
    pub reward: f32,
    pub next_state: Grid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TdLearner {
    pub gamma: f32,
}

impl TdLearner {
    pub fn new(gamma: f32) -> Self {
        Self { gamma }
    }

    /// TD target: `q(prev)` with every held button replaced by
    /// `reward + gamma * q(next)[i]`. Each button bootstraps from its own
    /// next-state value, not from the maximum over buttons.
    pub fn target(&self, q: &[f32], q_next: &[f32], t: &Transition) -> Vec<f32> {
        let mut target = q.to_vec();
        for i in 0..BUTTON_COUNT {
            if t.prev_action.slots()[i] {
                target[i] = t.reward + self.gamma * q_next[i];
            }
        }
        target
    }

    /// Apply one optimizer step; returns the loss before the step.
    pub fn update(&self, network: &mut ValueNetwork, t: &Transition) -> Result<f32> {
        let q = network.evaluate(&t.prev_state)?;
        let q_next = network.evaluate(&t.next_state)?;
        let target = self.target(&q, &q_next, t);
        network.train_step(&t.prev_state, &target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::network::{Activation, NetworkConfig};
    use crate::policy::Button;
    use crate::prng::Prng;

    fn grid() -> Grid {
        Grid::new(3, vec![0, 1, 0, 0, 2, 0, 1, 1, 1]).unwrap()
    }

    fn transition(action: ActionMask, reward: f32) -> Transition {
        Transition {
            prev_state: grid(),
            prev_action: action,
            reward,
            next_state: grid(),
        }
    }

    #[test]
    fn target_only_touches_held_buttons() {
        let learner = TdLearner::new(0.5);
        let q = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let q_next = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let t = transition(ActionMask::from_buttons(&[Button::Right, Button::A]), 1.0);

        let target = learner.target(&q, &q_next, &t);
        assert_eq!(target, vec![1.0, 2.0, 3.0, 21.0, 26.0, 6.0]);
    }

    #[test]
    fn empty_action_leaves_target_equal_to_prediction() {
        let learner = TdLearner::new(0.9);
        let q = [0.1, -0.2, 0.3, 0.0, 1.0, 2.0];
        let t = transition(ActionMask::NONE, 100.0);
        assert_eq!(learner.target(&q, &q, &t), q.to_vec());
    }

    #[test]
    fn update_rejects_mismatched_grid() {
        let mut rng = Prng::new(1);
        let mut net = ValueNetwork::build(1, &NetworkConfig::default(), &mut rng);
        let t = Transition {
            prev_state: grid(),
            prev_action: ActionMask::from_buttons(&[Button::A]),
            reward: 1.0,
            next_state: Grid::empty(2),
        };
        let err = TdLearner::new(0.9).update(&mut net, &t).unwrap_err();
        assert!(matches!(err, Error::GridSizeMismatch { .. }));
        assert_eq!(net.steps(), 0);
    }

    #[test]
    fn held_value_converges_to_discounted_return() {
        // next_state == prev_state, so the fixed point of
        // q = r + gamma * q is r / (1 - gamma).
        let gamma = 0.9;
        let reward = 1.0;
        let fixed_point = reward / (1.0 - gamma);

        let cfg = NetworkConfig {
            hidden_layers: 1,
            hidden_width: 16,
            activation: Activation::Relu,
            learning_rate: 1e-2,
        };
        let mut net = ValueNetwork::build(1, &cfg, &mut Prng::new(4));
        let learner = TdLearner::new(gamma);
        let t = transition(ActionMask::from_buttons(&[Button::Right]), reward);
        let held = Button::Right.index();

        let value = |n: &ValueNetwork| n.evaluate(&grid()).unwrap()[held];
        let mut distances = vec![(value(&net) - fixed_point).abs()];
        for _ in 0..8 {
            for _ in 0..500 {
                learner.update(&mut net, &t).unwrap();
            }
            distances.push((value(&net) - fixed_point).abs());
        }

        assert!(distances[1] < distances[0], "{distances:?}");
        for w in distances.windows(2).skip(1) {
            assert!(w[1] <= w[0] + 0.05, "drifted away: {distances:?}");
        }
        let last = *distances.last().unwrap();
        assert!(last < 0.05 * distances[0], "{distances:?}");
        assert!(last < 0.5, "{distances:?}");
    }

    #[test]
    fn unheld_buttons_are_pulled_toward_their_own_prediction() {
        let cfg = NetworkConfig {
            hidden_layers: 1,
            hidden_width: 8,
            activation: Activation::Tanh,
            learning_rate: 1e-2,
        };
        let mut net = ValueNetwork::build(1, &cfg, &mut Prng::new(8));
        let learner = TdLearner::new(0.0);
        let t = transition(ActionMask::from_buttons(&[Button::B]), 3.0);

        let q = net.evaluate(&grid()).unwrap();
        let target = learner.target(&q, &q, &t);
        // Only the held slot carries error, so the loss is (q_B - 3)^2 / 6.
        let expected = (q[Button::B.index()] - 3.0).powi(2) / BUTTON_COUNT as f32;
        let loss = learner.update(&mut net, &t).unwrap();
        assert!((loss - expected).abs() < 1e-5);
        assert_eq!(target[Button::B.index()], 3.0);
    }
}
