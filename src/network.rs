//! Function approximator seam
//!
//! The harness treats the ML framework as an external collaborator: a
//! differentiable function approximator that can be queried and updated
//! given a loss gradient. [`QFunction`] and [`ActorCriticNetwork`] are the
//! two capability surfaces the agents need; [`NetworkWeights`] is the
//! framework-agnostic weight container used for target networks,
//! population search and checkpoints.
//!
//! [`LinearQFunction`] and [`LinearActorCritic`] are minimal in-crate
//! implementations (flattened-state linear heads with real clipped-gradient
//! updates) so the harness runs and tests on CPU without a framework.

use ndarray::{Array1, Array2, Array3, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{FxrlError, Result};

/// Per-element gradient clipping range applied by every update step.
pub const GRAD_CLIP: f32 = 10.0;

/// Framework-agnostic weight container: an ordered list of 2-D tensors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub tensors: Vec<Array2<f32>>,
}

impl NetworkWeights {
    pub fn new(tensors: Vec<Array2<f32>>) -> Self {
        Self { tensors }
    }

    /// Soft update toward `online`: `self = (1 - tau) * self + tau * online`.
    pub fn soft_update(&mut self, online: &NetworkWeights, tau: f32) -> Result<()> {
        if self.tensors.len() != online.tensors.len() {
            return Err(FxrlError::shape(self.tensors.len(), online.tensors.len()));
        }
        for (target, source) in self.tensors.iter_mut().zip(&online.tensors) {
            if target.dim() != source.dim() {
                return Err(FxrlError::shape(target.dim(), source.dim()));
            }
            target.zip_mut_with(source, |t, &s| *t = (1.0 - tau) * *t + tau * s);
        }
        Ok(())
    }

    /// Check that `other` has the same tensor shapes as `self`.
    pub fn check_compatible(&self, other: &NetworkWeights) -> Result<()> {
        if self.tensors.len() != other.tensors.len() {
            return Err(FxrlError::shape(self.tensors.len(), other.tensors.len()));
        }
        for (a, b) in self.tensors.iter().zip(&other.tensors) {
            if a.dim() != b.dim() {
                return Err(FxrlError::shape(a.dim(), b.dim()));
            }
        }
        Ok(())
    }
}

/// Value-network capability required by the DQN-style agent.
pub trait QFunction {
    /// Number of discrete actions scored per state.
    fn num_actions(&self) -> usize;

    /// Q-values for a batch of feature windows: `[batch, num_actions]`.
    fn predict(&self, states: &Array3<f32>) -> Array2<f32>;

    /// One optimization step toward `targets` (same shape as `predict`
    /// output). The collaborator differentiates the squared error and
    /// applies per-element gradient clipping. Returns the batch loss.
    fn fit(&mut self, states: &Array3<f32>, targets: &Array2<f32>) -> Result<f32>;

    fn learning_rate(&self) -> f32;
    fn set_learning_rate(&mut self, lr: f32);

    /// Snapshot of all weight tensors.
    fn weights(&self) -> NetworkWeights;
    /// Load a compatible snapshot.
    fn set_weights(&mut self, weights: &NetworkWeights) -> Result<()>;
}

/// Twin-critic estimates for a batch of state/action pairs.
#[derive(Debug, Clone)]
pub struct CriticEstimate {
    pub q1: Array1<f32>,
    pub q2: Array1<f32>,
    pub v: Array1<f32>,
}

impl CriticEstimate {
    /// Mean of the twin heads per batch element.
    pub fn mean_q(&self) -> Array1<f32> {
        (&self.q1 + &self.q2) / 2.0
    }
}

/// Actor-critic capability required by the population-search agent.
pub trait ActorCriticNetwork {
    /// Actor forward pass: `[batch, 2]` continuous action vectors.
    fn act(&self, states: &Array3<f32>) -> Array2<f32>;

    /// Critic forward pass: twin Q heads over state/action pairs plus a
    /// state-only value head.
    fn critic(&self, states: &Array3<f32>, actions: &Array2<f32>) -> CriticEstimate;

    /// One critic optimization step: twin Huber losses against `q_backup`
    /// plus a value-head Huber loss against the scalar `v_backup`, with
    /// per-element gradient clipping. Returns the combined batch loss.
    fn fit_critic(
        &mut self,
        states: &Array3<f32>,
        actions: &Array2<f32>,
        q_backup: &Array1<f32>,
        v_backup: f32,
    ) -> Result<f32>;

    fn learning_rate(&self) -> f32;
    fn set_learning_rate(&mut self, lr: f32);

    /// Actor-only weights, the unit of population evolution.
    fn actor_weights(&self) -> NetworkWeights;
    fn set_actor_weights(&mut self, weights: &NetworkWeights) -> Result<()>;

    /// Full weight set (actor + critic heads) for target-network soft
    /// updates and checkpoints.
    fn weights(&self) -> NetworkWeights;
    fn set_weights(&mut self, weights: &NetworkWeights) -> Result<()>;
}

/// Flatten `[batch, window, features]` into `[batch, window * features]`.
fn flatten(states: &Array3<f32>) -> Array2<f32> {
    let (batch, window, features) = states.dim();
    let flat: Vec<f32> = states.iter().copied().collect();
    Array2::from_shape_vec((batch, window * features), flat)
        .expect("collected iterator matches the batch shape")
}

fn random_tensor<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let dist = Normal::new(0.0f32, 0.1).expect("valid normal");
    Array2::from_shape_fn((rows, cols), |_| dist.sample(rng))
}

fn clip(value: f32) -> f32 {
    value.clamp(-GRAD_CLIP, GRAD_CLIP)
}

/// Huber gradient for an error `e = prediction - target`.
fn huber_grad(e: f32, delta: f32) -> f32 {
    if e.abs() < delta {
        e
    } else {
        delta * e.signum()
    }
}

/// Huber loss value for an error `e`.
pub(crate) fn huber_value(e: f32, delta: f32) -> f32 {
    let a = e.abs();
    if a < delta {
        0.5 * a * a
    } else {
        delta * a - 0.5 * delta * delta
    }
}

/// Linear Q-network: one weight tensor `[in_dim, num_actions]`, no bias.
#[derive(Debug, Clone)]
pub struct LinearQFunction {
    weight: Array2<f32>,
    lr: f32,
}

impl LinearQFunction {
    pub fn new<R: Rng>(window_len: usize, feature_dim: usize, num_actions: usize, lr: f32, rng: &mut R) -> Self {
        Self {
            weight: random_tensor(window_len * feature_dim, num_actions, rng),
            lr,
        }
    }
}

impl QFunction for LinearQFunction {
    fn num_actions(&self) -> usize {
        self.weight.ncols()
    }

    fn predict(&self, states: &Array3<f32>) -> Array2<f32> {
        flatten(states).dot(&self.weight)
    }

    fn fit(&mut self, states: &Array3<f32>, targets: &Array2<f32>) -> Result<f32> {
        let inputs = flatten(states);
        if targets.dim() != (inputs.nrows(), self.weight.ncols()) {
            return Err(FxrlError::shape(
                (inputs.nrows(), self.weight.ncols()),
                targets.dim(),
            ));
        }
        let batch = inputs.nrows() as f32;
        let predictions = inputs.dot(&self.weight);
        let error = &predictions - targets;

        // loss = mean((target - q)^2) * 0.5
        let loss = error.mapv(|e| e * e).sum() / (error.len() as f32) * 0.5;

        let mut gradient = inputs.t().dot(&error) / batch;
        gradient.mapv_inplace(clip);
        self.weight.scaled_add(-self.lr, &gradient);
        Ok(loss)
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn weights(&self) -> NetworkWeights {
        NetworkWeights::new(vec![self.weight.clone()])
    }

    fn set_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
        self.weights().check_compatible(weights)?;
        self.weight = weights.tensors[0].clone();
        Ok(())
    }
}

/// Huber delta used by the linear critic heads.
pub(crate) const CRITIC_HUBER_DELTA: f32 = 4.0;

/// Linear actor-critic: tanh actor head `[in_dim, 2]`, twin Q heads over
/// the state/action concatenation, and a state-only value head.
#[derive(Debug, Clone)]
pub struct LinearActorCritic {
    actor: Array2<f32>,
    q1: Array2<f32>,
    q2: Array2<f32>,
    value: Array2<f32>,
    lr: f32,
}

impl LinearActorCritic {
    pub fn new<R: Rng>(window_len: usize, feature_dim: usize, lr: f32, rng: &mut R) -> Self {
        let in_dim = window_len * feature_dim;
        Self {
            actor: random_tensor(in_dim, 2, rng),
            q1: random_tensor(in_dim + 2, 1, rng),
            q2: random_tensor(in_dim + 2, 1, rng),
            value: random_tensor(in_dim, 1, rng),
            lr,
        }
    }

    fn with_actions(inputs: &Array2<f32>, actions: &Array2<f32>) -> Array2<f32> {
        ndarray::concatenate(Axis(1), &[inputs.view(), actions.view()])
            .expect("state and action batches share the first axis")
    }
}

impl ActorCriticNetwork for LinearActorCritic {
    fn act(&self, states: &Array3<f32>) -> Array2<f32> {
        flatten(states).dot(&self.actor).mapv(f32::tanh)
    }

    fn critic(&self, states: &Array3<f32>, actions: &Array2<f32>) -> CriticEstimate {
        let inputs = flatten(states);
        let joint = Self::with_actions(&inputs, actions);
        CriticEstimate {
            q1: joint.dot(&self.q1).index_axis(Axis(1), 0).to_owned(),
            q2: joint.dot(&self.q2).index_axis(Axis(1), 0).to_owned(),
            v: inputs.dot(&self.value).index_axis(Axis(1), 0).to_owned(),
        }
    }

    fn fit_critic(
        &mut self,
        states: &Array3<f32>,
        actions: &Array2<f32>,
        q_backup: &Array1<f32>,
        v_backup: f32,
    ) -> Result<f32> {
        let inputs = flatten(states);
        if q_backup.len() != inputs.nrows() {
            return Err(FxrlError::shape(inputs.nrows(), q_backup.len()));
        }
        let joint = Self::with_actions(&inputs, actions);
        let batch = inputs.nrows() as f32;

        let estimate = self.critic(states, actions);
        let e1 = &estimate.q1 - q_backup;
        let e2 = &estimate.q2 - q_backup;
        let ev = estimate.v.mapv(|v| v - v_backup);

        let loss = (e1.mapv(|e| huber_value(e, CRITIC_HUBER_DELTA)).sum()
            + e2.mapv(|e| huber_value(e, CRITIC_HUBER_DELTA)).sum()
            + ev.mapv(|e| huber_value(e, CRITIC_HUBER_DELTA)).sum())
            / batch;

        for (head, error, input) in [
            (&mut self.q1, &e1, &joint),
            (&mut self.q2, &e2, &joint),
            (&mut self.value, &ev, &inputs),
        ] {
            let grad_col = error.mapv(|e| huber_grad(e, CRITIC_HUBER_DELTA));
            let grad_col = grad_col.insert_axis(Axis(1));
            let mut gradient = input.t().dot(&grad_col) / batch;
            gradient.mapv_inplace(clip);
            head.scaled_add(-self.lr, &gradient);
        }
        Ok(loss)
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn actor_weights(&self) -> NetworkWeights {
        NetworkWeights::new(vec![self.actor.clone()])
    }

    fn set_actor_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
        self.actor_weights().check_compatible(weights)?;
        self.actor = weights.tensors[0].clone();
        Ok(())
    }

    fn weights(&self) -> NetworkWeights {
        NetworkWeights::new(vec![
            self.actor.clone(),
            self.q1.clone(),
            self.q2.clone(),
            self.value.clone(),
        ])
    }

    fn set_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
        self.weights().check_compatible(weights)?;
        self.actor = weights.tensors[0].clone();
        self.q1 = weights.tensors[1].clone();
        self.q2 = weights.tensors[2].clone();
        self.value = weights.tensors[3].clone();
        Ok(())
    }
}
