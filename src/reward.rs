//! Reward engine seam
//!
//! Reward shaping is an external collaborator: the loop hands it the
//! window's trend/price-range channels and the chosen actions, then reads
//! back the per-step growth trajectory and asset totals. The shaping
//! formulas themselves are out of scope for the harness.

use crate::memory::Action;

/// One reward evaluation request covering a full episode window.
#[derive(Debug, Clone, Copy)]
pub struct RewardCall<'a> {
    pub trend: &'a [f32],
    pub high: &'a [f32],
    pub low: &'a [f32],
    /// One action per window step
    pub actions: &'a [Action],
    /// Per-step leverage, present for the actor-critic variant only
    pub leverage: Option<&'a [f32]>,
    pub atr: &'a [f32],
    pub scale_atr: &'a [f32],
}

/// External collaborator computing per-step rewards and the simulated
/// asset trajectory. `reset` clears per-episode accumulators.
pub trait RewardEngine {
    /// Evaluate one window of actions.
    fn reward(&mut self, call: RewardCall<'_>);

    /// Per-step growth rates accumulated by the last evaluation.
    fn growth_rate(&self) -> &[f32];

    /// Cumulative gain trajectory aligned with `growth_rate`.
    fn total_gain(&self) -> &[f32];

    /// Current simulated assets.
    fn assets(&self) -> f64;

    /// Assets at episode start.
    fn initial_assets(&self) -> f64;

    /// Clear per-episode accumulators.
    fn reset(&mut self);
}

/// Deterministic engine for tests and demos: pays the trend delta when
/// the action class agrees with the move's direction.
#[derive(Debug, Clone)]
pub struct DirectionalRewardEngine {
    initial_assets: f64,
    assets: f64,
    growth_rate: Vec<f32>,
    total_gain: Vec<f32>,
}

impl DirectionalRewardEngine {
    pub fn new(initial_assets: f64) -> Self {
        Self {
            initial_assets,
            assets: initial_assets,
            growth_rate: Vec::new(),
            total_gain: Vec::new(),
        }
    }

    fn class_of(action: &Action) -> usize {
        match action {
            Action::Discrete(i) => *i,
            // Continuous first channel above 0.5 maps to class 0 (buy)
            Action::Continuous(v) => {
                if v[0] > 0.5 {
                    0
                } else {
                    1
                }
            }
        }
    }
}

impl RewardEngine for DirectionalRewardEngine {
    fn reward(&mut self, call: RewardCall<'_>) {
        let mut gain = 1.0f32;
        for (step, action) in call.actions.iter().enumerate() {
            let delta = if step + 1 < call.trend.len() {
                call.trend[step + 1] - call.trend[step]
            } else {
                0.0
            };
            let class = Self::class_of(action);
            // class 0 = buy, 1 = sell, anything else = hold
            let direction = match class {
                0 => 1.0,
                1 => -1.0,
                _ => 0.0,
            };
            let lev = call.leverage.map_or(1.0, |l| l[step].abs().max(0.01));
            let rate = direction * delta * lev;
            gain = (gain * (1.0 + rate * 0.01)).max(1e-6);
            self.growth_rate.push(rate);
            self.total_gain.push(gain);
        }
        self.assets = self.initial_assets * gain as f64;
    }

    fn growth_rate(&self) -> &[f32] {
        &self.growth_rate
    }

    fn total_gain(&self) -> &[f32] {
        &self.total_gain
    }

    fn assets(&self) -> f64 {
        self.assets
    }

    fn initial_assets(&self) -> f64 {
        self.initial_assets
    }

    fn reset(&mut self) {
        self.growth_rate.clear();
        self.total_gain.clear();
        self.assets = self.initial_assets;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directional_engine_tracks_actions_against_trend() {
        let mut engine = DirectionalRewardEngine::new(1_000_000.0);
        let trend = [1.0f32, 2.0, 1.5, 1.5];
        let flat = [0.0f32; 4];
        let actions = vec![
            Action::Discrete(0), // buy into a rise
            Action::Discrete(1), // sell into a fall
            Action::Discrete(2), // hold
            Action::Discrete(0),
        ];
        engine.reward(RewardCall {
            trend: &trend,
            high: &flat,
            low: &flat,
            actions: &actions,
            leverage: None,
            atr: &flat,
            scale_atr: &flat,
        });

        assert_eq!(engine.growth_rate().len(), 4);
        assert!(engine.growth_rate()[0] > 0.0);
        assert!(engine.growth_rate()[1] > 0.0);
        assert_eq!(engine.growth_rate()[2], 0.0);
        assert!(engine.assets() > engine.initial_assets());

        engine.reset();
        assert!(engine.growth_rate().is_empty());
        assert_eq!(engine.assets(), engine.initial_assets());
    }
}
