//! Training loop
//!
//! Orchestrates one agent against one dataset: slice an episode window,
//! act, score the actions through the reward engine, fold the per-step
//! rewards into n-step transitions, feed the prioritized buffer and run
//! the agent's optimization step. Single-threaded and synchronous; buffer
//! and shape errors propagate, the only self-healing is the periodic
//! buffer reconstruction.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::agent::{is_eval_iteration, TrainableAgent, EVAL_CADENCE};
use crate::config::HarnessConfig;
use crate::data::MarketDataset;
use crate::error::{FxrlError, Result};
use crate::memory::{NStepAccumulator, PrioritizedReplayBuffer};
use crate::reward::{RewardCall, RewardEngine};
use crate::training::checkpointing::Checkpointer;

/// Iterations an evaluation-only run drives over the held-out tail.
const EVAL_RUN_ITERATIONS: usize = 6;

/// Loop mode: full training run or a short evaluation pass over the
/// held-out tail with no stores or updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Evaluate,
}

/// Counters accumulated over one `run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Iterations executed
    pub iterations: usize,
    /// Optimization steps taken
    pub train_steps: usize,
    /// Transitions pushed into the buffer
    pub stored_transitions: usize,
    /// Checkpoints written
    pub checkpoints: usize,
    /// Simulated assets after the last evaluated window
    pub final_assets: f64,
    /// `final_assets / initial_assets` for the same window
    pub growth_ratio: f64,
}

/// Drives a [`TrainableAgent`] through the episodic train/evaluate cycle.
pub struct AgentLoop {
    agent: Box<dyn TrainableAgent>,
    engine: Box<dyn RewardEngine>,
    data: MarketDataset,
    memory: PrioritizedReplayBuffer,
    nstep: NStepAccumulator,
    checkpointer: Option<Checkpointer>,
    config: HarnessConfig,
    /// Iterations since the last buffer reconstruction; training is
    /// gated until it passes the warm-up threshold
    reset_counter: usize,
    /// Episode window start, carried across iterations
    window_start: usize,
    rng: StdRng,
}

impl AgentLoop {
    /// Assemble the loop. The dataset must be long enough to carve both
    /// the training range and the held-out tail at the configured window
    /// size.
    pub fn new(
        agent: Box<dyn TrainableAgent>,
        engine: Box<dyn RewardEngine>,
        data: MarketDataset,
        config: HarnessConfig,
        checkpointer: Option<Checkpointer>,
        seed: u64,
    ) -> Result<Self> {
        let step = config.training.step_size;
        let holdout = data.holdout_start();
        if holdout <= step || data.len() <= holdout + step * EVAL_CADENCE {
            return Err(FxrlError::InsufficientData {
                available: data.len(),
                required: step * EVAL_CADENCE * 5,
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let window_start = rng.gen_range(0..holdout - step);
        let memory = PrioritizedReplayBuffer::new(&config.memory);
        let nstep = NStepAccumulator::new(config.agent.n_step);
        Ok(Self {
            agent,
            engine,
            data,
            memory,
            nstep,
            checkpointer,
            config,
            reset_counter: 0,
            window_start,
            rng,
        })
    }

    pub fn agent(&self) -> &dyn TrainableAgent {
        self.agent.as_ref()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Resume from the newest checkpoint, if the loop has a checkpointer
    /// and one exists. Returns whether a snapshot was applied.
    pub fn restore_latest(&mut self) -> Result<bool> {
        let snapshot = match &self.checkpointer {
            Some(checkpointer) => checkpointer.load_latest()?,
            None => None,
        };
        match snapshot {
            Some(snapshot) => {
                self.agent.restore(&snapshot)?;
                info!(
                    iteration = self.agent.state().iteration,
                    "resumed from checkpoint"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the loop to completion (or through the short evaluation pass).
    pub fn run(&mut self, mode: RunMode) -> Result<RunStats> {
        let (start, end) = match mode {
            RunMode::Train => (
                self.agent.state().iteration,
                self.config.training.iterations,
            ),
            RunMode::Evaluate => (0, EVAL_RUN_ITERATIONS),
        };
        let mut stats = RunStats::default();
        for i in start..end {
            self.step(i, mode, &mut stats)?;
            stats.iterations += 1;
        }
        Ok(stats)
    }

    fn step(&mut self, i: usize, mode: RunMode, stats: &mut RunStats) -> Result<()> {
        let step = self.config.training.step_size;
        let holdout = self.data.holdout_start();
        let evaluating = mode == RunMode::Evaluate || is_eval_iteration(i);

        // Every 5th iteration reads the held-out tail; the slot right
        // after an evaluation keeps the previous window start.
        if evaluating {
            self.window_start = self
                .rng
                .gen_range(holdout..self.data.len() - step * EVAL_CADENCE);
        } else if i % EVAL_CADENCE != 0 {
            self.window_start = self.rng.gen_range(0..holdout - step);
        }
        let window = self.data.window(self.window_start, step)?;
        let states = window.states.to_owned();

        let policy_iteration = match mode {
            RunMode::Train => i,
            // Exploration off: drive the policy at its trained iteration,
            // aligned to the evaluation cadence
            RunMode::Evaluate => eval_aligned(self.agent.state().iteration.max(i)),
        };
        if mode == RunMode::Train {
            self.agent.state_mut().iteration = i;
        }

        let actions = self.agent.policy(&states, policy_iteration);
        let decision = self.agent.decision(&actions);
        let action_list = actions.actions();

        let trend = window.trend.to_vec();
        let high = window.high.to_vec();
        let low = window.low.to_vec();
        let atr = window.atr.to_vec();
        let scale_atr = window.scale_atr.to_vec();
        self.engine.reward(RewardCall {
            trend: &trend,
            high: &high,
            low: &low,
            actions: &action_list,
            leverage: decision.leverage.as_deref(),
            atr: &atr,
            scale_atr: &scale_atr,
        });

        if mode == RunMode::Train
            && (self.reset_counter + 1) % self.config.training.memory_reset_interval == 0
        {
            self.memory = PrioritizedReplayBuffer::new(&self.config.memory);
            self.reset_counter = 0;
            info!(iteration = i, "replay buffer reconstructed");
        }

        if mode == RunMode::Train && !evaluating && !self.engine.growth_rate().is_empty() {
            let rewards = per_step_rewards(self.engine.total_gain());
            let mut transitions = self.nstep.transitions(window.states, &action_list, &rewards);

            // Keep a shuffled fraction of the window, without replacement
            transitions.shuffle(&mut self.rng);
            let keep = ((step as f32 * self.config.training.store_fraction) as usize)
                .min(transitions.len());
            transitions.truncate(keep);

            if !transitions.is_empty() {
                let priorities = self.agent.priorities(&transitions)?;
                for (transition, priority) in transitions.into_iter().zip(priorities) {
                    self.memory.store(transition, priority)?;
                    stats.stored_transitions += 1;
                }
            }
        }

        if mode == RunMode::Train && self.reset_counter > self.config.training.warmup_resets {
            self.agent.train(&mut self.memory)?;
            stats.train_steps += 1;
        }
        if mode == RunMode::Train {
            self.agent.lr_decay(i);
            self.agent.gamma_update(i);
        }
        self.reset_counter += 1;

        if evaluating {
            let (buy, sell, hold) = decision.class_frequencies();
            let assets = self.engine.assets();
            let growth = assets / self.engine.initial_assets();
            stats.final_assets = assets;
            stats.growth_ratio = growth;
            info!(
                iteration = i + 1,
                buy, sell, hold, assets, growth, "evaluation window"
            );
        }

        if mode == RunMode::Train && (i + 1) % self.config.training.checkpoint_interval == 0 {
            self.agent.state_mut().iteration = i + 1;
            if let Some(checkpointer) = &self.checkpointer {
                checkpointer.save(&self.agent.snapshot(), i + 1)?;
                stats.checkpoints += 1;
            }
        }

        self.engine.reset();
        Ok(())
    }
}

/// Smallest evaluation-cadence iteration at or above `iteration`.
fn eval_aligned(iteration: usize) -> usize {
    iteration + (EVAL_CADENCE - (iteration + 1) % EVAL_CADENCE) % EVAL_CADENCE
}

/// Per-step rewards from the cumulative gain trajectory: scaled log
/// ratios of consecutive gains, truncated to two decimals of the scaled
/// value. The first step pays zero.
fn per_step_rewards(total_gain: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; total_gain.len()];
    for idx in 1..total_gain.len() {
        let scaled = (total_gain[idx] / total_gain[idx - 1]).ln() * 100.0;
        let truncated = (scaled * 1_000.0).trunc() / 100.0;
        // A degenerate gain trajectory pays nothing rather than
        // poisoning the priority tree
        out[idx] = if truncated.is_finite() { truncated } else { 0.0 };
    }
    out
}
