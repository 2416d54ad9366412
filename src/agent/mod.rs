//! Trainable agents
//!
//! The loop drives every agent variant through the [`TrainableAgent`]
//! capability trait; the variants form a closed set (value-based
//! [`DqnAgent`], actor-critic [`ActorCriticAgent`]) and are never
//! dispatched by name.

pub mod actor_critic;
pub mod dqn;
pub mod evolution;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{FxrlError, Result};
use crate::memory::{Action, PrioritizedReplayBuffer, Transition};
use crate::network::NetworkWeights;

pub use actor_critic::ActorCriticAgent;
pub use dqn::DqnAgent;
pub use evolution::{Individual, Population};

/// Epsilon added to every priority write-back so no transition starves
/// at zero sampling probability.
pub const PRIORITY_EPSILON: f32 = 1e-10;

/// Every `EVAL_CADENCE`-th iteration runs the policy deterministically on
/// held-out data and emits the progress report.
pub const EVAL_CADENCE: usize = 5;

/// True when `iteration` is an evaluation iteration.
pub fn is_eval_iteration(iteration: usize) -> bool {
    (iteration + 1) % EVAL_CADENCE == 0
}

/// Mutable training state owned by the agent. Initialized at construction
/// or restored from a checkpoint, mutated every loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Current learning rate after decay
    pub learning_rate: f32,
    /// Discount factor for the TD backup
    pub gamma: f32,
    /// Loop iteration counter, persisted across restarts
    pub iteration: usize,
    /// Completed optimization steps
    pub train_steps: usize,
}

impl AgentState {
    pub fn new(learning_rate: f32, gamma: f32) -> Self {
        Self {
            learning_rate,
            gamma,
            iteration: 0,
            train_steps: 0,
        }
    }
}

/// Raw per-window policy output.
#[derive(Debug, Clone)]
pub enum ActionBatch {
    /// One class index per step (value-based variant)
    Discrete(Vec<usize>),
    /// One `[2]` continuous vector per step (actor-critic variant)
    Continuous(Array2<f32>),
}

impl ActionBatch {
    pub fn len(&self) -> usize {
        match self {
            ActionBatch::Discrete(v) => v.len(),
            ActionBatch::Continuous(a) => a.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Action recorded into a transition at step `t`.
    pub fn action_at(&self, t: usize) -> Action {
        match self {
            ActionBatch::Discrete(v) => Action::Discrete(v[t]),
            ActionBatch::Continuous(a) => Action::Continuous([a[[t, 0]], a[[t, 1]]]),
        }
    }

    /// All per-step actions in order.
    pub fn actions(&self) -> Vec<Action> {
        (0..self.len()).map(|t| self.action_at(t)).collect()
    }
}

/// Policy output mapped onto trade terms for the reward engine: a class
/// per step, plus leverage for the continuous variant.
#[derive(Debug, Clone)]
pub struct TradeDecision {
    /// 0 = buy, 1 = sell, anything else = hold
    pub classes: Vec<usize>,
    /// Per-step leverage (actor-critic variant only)
    pub leverage: Option<Vec<f32>>,
}

impl TradeDecision {
    /// Action-class frequencies `(buy, sell, hold)` for progress logs.
    pub fn class_frequencies(&self) -> (f32, f32, f32) {
        if self.classes.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let n = self.classes.len() as f32;
        let buy = self.classes.iter().filter(|&&c| c == 0).count() as f32 / n;
        let sell = self.classes.iter().filter(|&&c| c == 1).count() as f32 / n;
        (buy, sell, 1.0 - (buy + sell))
    }
}

/// Outcome of one optimization step, for progress logs.
#[derive(Debug, Clone, Copy)]
pub struct TrainReport {
    pub loss: f32,
    pub batch_size: usize,
}

/// Serializable snapshot of an agent's learnable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub state: AgentState,
    pub weights: NetworkWeights,
    pub target_weights: NetworkWeights,
    /// Present for the evolutionary variant only
    pub population: Option<Vec<NetworkWeights>>,
    /// Wall-clock time the snapshot was taken
    pub saved_at: DateTime<Utc>,
}

/// Capability interface shared by every agent variant.
pub trait TrainableAgent {
    /// Select actions for a window of states. Stochastic on ordinary
    /// iterations; deterministic on every 5th (evaluation) iteration.
    fn policy(&mut self, states: &Array3<f32>, iteration: usize) -> ActionBatch;

    /// Map raw policy output onto trade terms for the reward engine.
    fn decision(&self, actions: &ActionBatch) -> TradeDecision;

    /// Recompute the per-transition error magnitude used as the next
    /// priority signal, without mutating any gradients.
    fn priorities(&self, transitions: &[Transition]) -> Result<Vec<f32>>;

    /// Draw a prioritized batch, optimize, and write back new priorities.
    fn train(&mut self, memory: &mut PrioritizedReplayBuffer) -> Result<TrainReport>;

    /// Apply the variant's learning-rate decay schedule.
    fn lr_decay(&mut self, iteration: usize);

    /// Adaptive discount schedule; no-op for the value-based variant.
    fn gamma_update(&mut self, _iteration: usize) {}

    fn state(&self) -> &AgentState;
    fn state_mut(&mut self) -> &mut AgentState;

    /// Snapshot for checkpointing.
    fn snapshot(&self) -> AgentSnapshot;

    /// Restore from a checkpoint snapshot.
    fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()>;
}

/// Stack transition fields into batch tensors:
/// `(states, next_states, returns, actions)`.
pub(crate) fn stack_batch(
    transitions: &[Transition],
) -> Result<(Array3<f32>, Array3<f32>, Array1<f32>, Vec<Action>)> {
    let first = transitions.first().ok_or(FxrlError::EmptyBuffer)?;
    let (window, features) = first.state.dim();
    let batch = transitions.len();

    let mut states = Array3::zeros((batch, window, features));
    let mut next_states = Array3::zeros((batch, window, features));
    let mut returns = Array1::zeros(batch);
    let mut actions = Vec::with_capacity(batch);

    for (i, t) in transitions.iter().enumerate() {
        if t.state.dim() != (window, features) || t.next_state.dim() != (window, features) {
            return Err(FxrlError::shape((window, features), t.state.dim()));
        }
        states.index_axis_mut(Axis(0), i).assign(&t.state);
        next_states.index_axis_mut(Axis(0), i).assign(&t.next_state);
        returns[i] = t.n_step_return;
        actions.push(t.action.clone());
    }
    Ok((states, next_states, returns, actions))
}
