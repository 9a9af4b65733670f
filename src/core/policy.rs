//! Button vocabulary, action masks and the exploration policy.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::prng::Prng;

/// Controllable inputs. Declaration order is the network's output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
}

pub const BUTTON_COUNT: usize = 6;

pub const BUTTONS: [Button; BUTTON_COUNT] = [
    Button::Up,
    Button::Down,
    Button::Left,
    Button::Right,
    Button::A,
    Button::B,
];

impl Button {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Button::Up => "UP",
            Button::Down => "DOWN",
            Button::Left => "LEFT",
            Button::Right => "RIGHT",
            Button::A => "A",
            Button::B => "B",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which buttons are held this frame, one slot per button in vocabulary order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionMask([bool; BUTTON_COUNT]);

impl ActionMask {
    pub const NONE: ActionMask = ActionMask([false; BUTTON_COUNT]);

    pub fn from_slots(slots: [bool; BUTTON_COUNT]) -> Self {
        Self(slots)
    }

    pub fn from_buttons(buttons: &[Button]) -> Self {
        let mut slots = [false; BUTTON_COUNT];
        for b in buttons {
            slots[b.index()] = true;
        }
        Self(slots)
    }

    pub fn is_held(&self, button: Button) -> bool {
        self.0[button.index()]
    }

    pub fn slots(&self) -> &[bool; BUTTON_COUNT] {
        &self.0
    }

    pub fn held(&self) -> impl Iterator<Item = Button> + '_ {
        BUTTONS.iter().copied().filter(|b| self.is_held(*b))
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|h| **h).count()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.held().map(Button::name).collect()
    }
}

impl fmt::Display for ActionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(" "))
    }
}

/// Per-button epsilon-greedy wrapped around a fixed threshold.
///
/// Each slot is decided independently: with probability `epsilon` it is a fair
/// coin flip, otherwise it is `q[i] > threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSelector {
    pub threshold: f32,
    pub epsilon: f32,
}

impl ActionSelector {
    pub fn new(threshold: f32, epsilon: f32) -> Self {
        Self { threshold, epsilon }
    }

    /// Network-driven decision, no exploration.
    pub fn threshold_mask(&self, q: &[f32]) -> ActionMask {
        let mut slots = [false; BUTTON_COUNT];
        for (slot, v) in slots.iter_mut().zip(q) {
            *slot = *v > self.threshold;
        }
        ActionMask(slots)
    }

    pub fn select(&self, q: &[f32], rng: &mut Prng) -> ActionMask {
        let greedy = self.threshold_mask(q);
        let mut slots = greedy.0;
        for slot in slots.iter_mut() {
            if rng.chance(self.epsilon) {
                *slot = rng.next_bool();
            }
        }
        ActionMask(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_order_is_output_order() {
        for (i, b) in BUTTONS.iter().enumerate() {
            assert_eq!(b.index(), i);
        }
        assert_eq!(
            BUTTONS.map(Button::name),
            ["UP", "DOWN", "LEFT", "RIGHT", "A", "B"]
        );
    }

    #[test]
    fn mask_lists_names_in_vocabulary_order() {
        let mask = ActionMask::from_buttons(&[Button::A, Button::Right]);
        assert_eq!(mask.names(), vec!["RIGHT", "A"]);
        assert_eq!(mask.to_string(), "RIGHT A");
        assert_eq!(mask.count(), 2);
        assert_eq!(ActionMask::NONE.to_string(), "");
    }

    #[test]
    fn zero_epsilon_is_pure_threshold() {
        let sel = ActionSelector::new(0.5, 0.0);
        let q = [0.9, 0.1, 0.5, 0.51, -3.0, 2.0];
        let mut rng = Prng::new(1);
        let mask = sel.select(&q, &mut rng);
        assert_eq!(mask, sel.threshold_mask(&q));
        assert_eq!(
            mask,
            ActionMask::from_slots([true, false, false, true, false, true])
        );
    }

    #[test]
    fn full_epsilon_ignores_network() {
        let sel = ActionSelector::new(0.0, 1.0);
        let q = [10.0; BUTTON_COUNT];
        let mut rng = Prng::new(2);
        let held: usize = (0..2000).map(|_| sel.select(&q, &mut rng).count()).sum();
        // Each slot is a fair coin: expect about half of 12_000 decisions.
        assert!((5_400..6_600).contains(&held), "held = {held}");
    }

    #[test]
    fn exploration_rate_matches_epsilon() {
        // Threshold says "release everything"; only random slots can be held,
        // and a random slot is held half the time.
        let sel = ActionSelector::new(0.0, 0.2);
        let q = [-1.0; BUTTON_COUNT];
        let mut rng = Prng::new(3);
        let trials = 10_000;
        let held: usize = (0..trials).map(|_| sel.select(&q, &mut rng).count()).sum();
        let rate = held as f32 / (trials * BUTTON_COUNT) as f32;
        assert!((rate - 0.1).abs() < 0.01, "rate = {rate}");
    }
}
