//! N-step return accumulation
//!
//! Converts a raw per-step reward sequence into n-step transitions ready
//! for the replay buffer. The return is a flat multiply-and-accumulate of
//! `N_STEP_DISCOUNT * r[i]` over `[tau + 1, tau + n)` — it is NOT further
//! discounted by powers of gamma per step. This matches the production
//! estimator as shipped; a textbook n-step sum would compound the
//! discount, so treat the flat form as a deliberate simplification.

use ndarray::{ArrayView3, Axis};

use crate::memory::replay::{Action, Transition};

/// Fixed discount applied to every term of the n-step sum. Distinct from
/// the agent's adaptive gamma.
pub const N_STEP_DISCOUNT: f32 = 0.99;

/// Builds n-step transitions from a window's reward sequence.
#[derive(Debug, Clone, Copy)]
pub struct NStepAccumulator {
    n: usize,
}

impl NStepAccumulator {
    pub fn new(n: usize) -> Self {
        assert!(n >= 1, "n-step horizon must be at least 1");
        Self { n }
    }

    /// Horizon length.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Flat n-step return over a reward slice (already cut to
    /// `[tau + 1, tau + n)`).
    pub fn n_step_return(&self, rewards: &[f32]) -> f32 {
        rewards.iter().map(|r| N_STEP_DISCOUNT * r).sum()
    }

    /// Emit one transition per time index `t` where `tau = t - n + 1 >= 0`.
    ///
    /// The tuple pairs `states[tau]` with `states[tau + n]`: the "next
    /// state" is `n` steps ahead, as required for an n-step TD target.
    /// Produces at most `T - n` transitions.
    pub fn transitions(
        &self,
        states: ArrayView3<'_, f32>,
        actions: &[Action],
        rewards: &[f32],
    ) -> Vec<Transition> {
        let steps = rewards.len();
        debug_assert_eq!(states.len_of(Axis(0)), steps);
        debug_assert_eq!(actions.len(), steps);

        let mut out = Vec::new();
        if steps < 2 {
            return out;
        }
        for t in 0..steps - 1 {
            let Some(tau) = t.checked_sub(self.n - 1) else {
                continue;
            };
            if tau + self.n >= steps {
                break;
            }
            let n_step_return = self.n_step_return(&rewards[tau + 1..tau + self.n]);
            out.push(Transition {
                state: states.index_axis(Axis(0), tau).to_owned(),
                action: actions[tau].clone(),
                n_step_return,
                next_state: states.index_axis(Axis(0), tau + self.n).to_owned(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn actions(n: usize) -> Vec<Action> {
        (0..n).map(Action::Discrete).collect()
    }

    #[test]
    fn flat_return_matches_hand_computed_values() {
        let acc = NStepAccumulator::new(3);
        let rewards = [0.0f32, 1.0, 2.0, 3.0, 4.0];

        // tau = 0 sums 0.99 * (r[1] + r[2])
        assert!((acc.n_step_return(&rewards[1..3]) - 2.97).abs() < 1e-6);
        // tau = 1 sums 0.99 * (r[2] + r[3])
        assert!((acc.n_step_return(&rewards[2..4]) - 4.95).abs() < 1e-6);
    }

    #[test]
    fn transitions_pair_state_with_nth_successor() {
        let acc = NStepAccumulator::new(3);
        let steps = 6;
        let mut states = Array3::zeros((steps, 2, 2));
        for t in 0..steps {
            states.index_axis_mut(Axis(0), t).fill(t as f32);
        }
        let rewards = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];

        let out = acc.transitions(states.view(), &actions(steps), &rewards);

        // tau in {0, 1, 2}: at most T - n transitions
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].state[[0, 0]], 0.0);
        assert_eq!(out[0].next_state[[0, 0]], 3.0);
        assert_eq!(out[0].action, Action::Discrete(0));
        assert!((out[0].n_step_return - 2.97).abs() < 1e-6);
        assert_eq!(out[2].state[[0, 0]], 2.0);
        assert_eq!(out[2].next_state[[0, 0]], 5.0);
    }

    #[test]
    fn short_windows_emit_nothing() {
        let acc = NStepAccumulator::new(3);
        let states = Array3::zeros((3, 2, 2));
        let rewards = vec![0.0, 1.0, 2.0];
        assert!(acc.transitions(states.view(), &actions(3), &rewards).is_empty());
    }
}
