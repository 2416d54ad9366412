//! Value-based agent (double DQN)
//!
//! Epsilon-greedy discrete policy over the Q-network, double-DQN Bellman
//! backups (action selection from the online network, value evaluation
//! from the target network), TD-error priorities, and inverse-time
//! learning-rate decay. The target network is a frozen copy taken at
//! construction or restore; only the actor-critic variant runs soft
//! target updates.

use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::agent::{
    is_eval_iteration, stack_batch, ActionBatch, AgentSnapshot, AgentState, TradeDecision,
    TrainReport, TrainableAgent, PRIORITY_EPSILON,
};
use crate::config::AgentConfig;
use crate::error::{FxrlError, Result};
use crate::memory::{Action, PrioritizedReplayBuffer, Transition};
use crate::network::QFunction;

/// Double-DQN agent over a discrete trade-class action space.
pub struct DqnAgent {
    online: Box<dyn QFunction>,
    target: Box<dyn QFunction>,
    state: AgentState,
    config: AgentConfig,
    /// Initial learning rate, the numerator of the decay schedule
    base_lr: f32,
    rng: StdRng,
}

impl DqnAgent {
    /// Build the agent and freeze the target network from the online one.
    pub fn new(
        online: Box<dyn QFunction>,
        mut target: Box<dyn QFunction>,
        config: AgentConfig,
        seed: u64,
    ) -> Result<Self> {
        target.set_weights(&online.weights())?;
        let state = AgentState::new(config.lr, config.gamma);
        Ok(Self {
            online,
            target,
            base_lr: config.lr,
            state,
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn argmax(row: ndarray::ArrayView1<'_, f32>) -> usize {
        let mut best = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (i, &v) in row.iter().enumerate() {
            if v > best_value {
                best_value = v;
                best = i;
            }
        }
        best
    }

    /// Double-DQN backup: `q_backup[i, a_i] = r_i + gamma * target_q[i,
    /// argmax_online(next_i)]`. Returns `(target, prediction)`.
    fn loss(
        &self,
        states: &Array3<f32>,
        next_states: &Array3<f32>,
        rewards: &Array1<f32>,
        actions: &[Action],
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let q = self.online.predict(states);
        let target_q = self.target.predict(next_states);
        let arg_q = self.online.predict(next_states);

        let mut q_backup = q.clone();
        for i in 0..rewards.len() {
            let action = actions[i].index().ok_or_else(|| {
                FxrlError::shape("discrete action", format!("{:?}", actions[i]))
            })?;
            if action >= self.online.num_actions() {
                return Err(FxrlError::shape(self.online.num_actions(), action));
            }
            let best_next = Self::argmax(arg_q.index_axis(Axis(0), i));
            q_backup[[i, action]] =
                rewards[i] + self.state.gamma * target_q[[i, best_next]];
        }
        Ok((q_backup, q))
    }

    /// Per-transition TD-error magnitude: row sum of `|target - q|`.
    fn td_errors(q_backup: &Array2<f32>, q: &Array2<f32>) -> Vec<f32> {
        (q_backup - q)
            .mapv(f32::abs)
            .sum_axis(Axis(1))
            .into_raw_vec()
    }
}

impl TrainableAgent for DqnAgent {
    fn policy(&mut self, states: &Array3<f32>, iteration: usize) -> ActionBatch {
        let q = self.online.predict(states);
        let num_actions = self.online.num_actions();

        let classes = if is_eval_iteration(iteration) {
            // Deterministic pass for the evaluation log
            (0..q.nrows())
                .map(|i| Self::argmax(q.index_axis(Axis(0), i)))
                .collect()
        } else {
            (0..q.nrows())
                .map(|i| {
                    if self.rng.gen::<f32>() > self.config.exploration_rate {
                        Self::argmax(q.index_axis(Axis(0), i))
                    } else {
                        self.rng.gen_range(0..num_actions)
                    }
                })
                .collect()
        };
        ActionBatch::Discrete(classes)
    }

    fn decision(&self, actions: &ActionBatch) -> TradeDecision {
        let classes = match actions {
            ActionBatch::Discrete(v) => v.clone(),
            ActionBatch::Continuous(_) => Vec::new(),
        };
        TradeDecision {
            classes,
            leverage: None,
        }
    }

    fn priorities(&self, transitions: &[Transition]) -> Result<Vec<f32>> {
        let (states, next_states, rewards, actions) = stack_batch(transitions)?;
        let (q_backup, q) = self.loss(&states, &next_states, &rewards, &actions)?;
        Ok(Self::td_errors(&q_backup, &q))
    }

    fn train(&mut self, memory: &mut PrioritizedReplayBuffer) -> Result<TrainReport> {
        let batch = memory.sample(self.config.batch_size, &mut self.rng)?;
        let (states, next_states, rewards, actions) = stack_batch(&batch.transitions)?;

        let (q_backup, q) = self.loss(&states, &next_states, &rewards, &actions)?;

        let new_priorities: Vec<f32> = Self::td_errors(&q_backup, &q)
            .into_iter()
            .map(|e| e + PRIORITY_EPSILON)
            .collect();
        memory.batch_update(&batch.tree_indices, &new_priorities)?;

        let loss = self.online.fit(&states, &q_backup)?;
        self.state.train_steps += 1;
        debug!(loss, step = self.state.train_steps, "dqn train step");

        Ok(TrainReport {
            loss,
            batch_size: batch.len(),
        })
    }

    fn lr_decay(&mut self, iteration: usize) {
        let lr = self.base_lr / (1.0 + 1e-6 * iteration as f32);
        self.online.set_learning_rate(lr);
        self.state.learning_rate = lr;
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            state: self.state.clone(),
            weights: self.online.weights(),
            target_weights: self.target.weights(),
            population: None,
            saved_at: chrono::Utc::now(),
        }
    }

    fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        self.online.set_weights(&snapshot.weights)?;
        self.target.set_weights(&snapshot.target_weights)?;
        self.state = snapshot.state.clone();
        self.online.set_learning_rate(self.state.learning_rate);
        Ok(())
    }
}
