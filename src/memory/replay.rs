//! Prioritized replay buffer
//!
//! Sum-tree-backed experience storage with stratified weighted sampling.
//! Priorities are TD-error magnitudes supplied by the agent; the caller
//! adds a small epsilon before updates so no transition starves at zero
//! priority.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::error::{FxrlError, Result};
use crate::memory::sum_tree::SumTree;

/// Action recorded in a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Class index chosen by the value-based variant
    Discrete(usize),
    /// Raw continuous vector emitted by the actor
    Continuous([f32; 2]),
}

impl Action {
    /// Discrete class index, if this is a discrete action.
    pub fn index(&self) -> Option<usize> {
        match self {
            Action::Discrete(i) => Some(*i),
            Action::Continuous(_) => None,
        }
    }

    /// Continuous vector, if this is a continuous action.
    pub fn vector(&self) -> Option<[f32; 2]> {
        match self {
            Action::Discrete(_) => None,
            Action::Continuous(v) => Some(*v),
        }
    }
}

/// A single n-step transition. Immutable once stored; owned exclusively
/// by the buffer slot it occupies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Feature window before the action
    pub state: Array2<f32>,
    /// Action taken at `tau`
    pub action: Action,
    /// Flat n-step discounted return
    pub n_step_return: f32,
    /// Feature window `n` steps ahead
    pub next_state: Array2<f32>,
}

/// Result of a prioritized sample: tree indices for the later priority
/// write-back, the transitions themselves, and each leaf's sampling
/// probability for importance correction.
#[derive(Debug, Clone)]
pub struct PrioritizedBatch {
    pub tree_indices: Vec<usize>,
    pub transitions: Vec<Transition>,
    pub probabilities: Vec<f32>,
}

impl PrioritizedBatch {
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Sum-tree-backed prioritized replay buffer with ring semantics.
#[derive(Debug)]
pub struct PrioritizedReplayBuffer {
    tree: SumTree,
    slots: Vec<Option<Transition>>,
    max_priority: f32,
}

impl PrioritizedReplayBuffer {
    /// Create an empty buffer from its configuration.
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            tree: SumTree::new(config.capacity),
            slots: vec![None; config.capacity],
            max_priority: config.max_priority,
        }
    }

    /// Number of transitions currently retrievable.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True when nothing has ever been stored.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Fixed leaf capacity.
    pub fn capacity(&self) -> usize {
        self.tree.capacity()
    }

    /// Insert at the next ring slot, overwriting the oldest transition
    /// when full. The priority is clipped to the configured maximum to
    /// bound importance-sampling variance.
    pub fn store(&mut self, transition: Transition, priority: f32) -> Result<()> {
        let clipped = priority.min(self.max_priority);
        let slot = self.tree.add(clipped)?;
        self.slots[slot] = Some(transition);
        Ok(())
    }

    /// Stratified sample of `batch_size` transitions.
    ///
    /// The cumulative-priority range `[0, total)` is split into
    /// `batch_size` equal-width segments and one uniform value is drawn
    /// per segment, so every segment contributes exactly one transition
    /// while higher-priority leaves are favored.
    pub fn sample<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Result<PrioritizedBatch> {
        if self.is_empty() {
            return Err(FxrlError::EmptyBuffer);
        }
        if self.len() < batch_size {
            return Err(FxrlError::InsufficientData {
                available: self.len(),
                required: batch_size,
            });
        }

        let total = self.tree.total();
        if total <= 0.0 {
            // All-zero priorities carry no sampling mass; the segments
            // would be empty ranges
            return Err(FxrlError::InsufficientData {
                available: 0,
                required: batch_size,
            });
        }
        let segment = total / batch_size as f32;

        let mut tree_indices = Vec::with_capacity(batch_size);
        let mut transitions = Vec::with_capacity(batch_size);
        let mut probabilities = Vec::with_capacity(batch_size);

        for k in 0..batch_size {
            let lo = segment * k as f32;
            let hi = segment * (k + 1) as f32;
            let value = rng.gen_range(lo..hi);
            let (tree_index, priority, data_index) = self.tree.retrieve(value);

            let transition = self.slots[data_index]
                .as_ref()
                .expect("sampled leaf with positive priority holds a transition")
                .clone();

            tree_indices.push(tree_index);
            transitions.push(transition);
            probabilities.push(priority / total);
        }

        Ok(PrioritizedBatch {
            tree_indices,
            transitions,
            probabilities,
        })
    }

    /// Overwrite priorities at the given leaves and propagate the deltas
    /// to the root. Lengths must match; negatives are rejected by the
    /// tree.
    pub fn batch_update(&mut self, tree_indices: &[usize], priorities: &[f32]) -> Result<()> {
        if tree_indices.len() != priorities.len() {
            return Err(FxrlError::shape(tree_indices.len(), priorities.len()));
        }
        for (&index, &priority) in tree_indices.iter().zip(priorities) {
            self.tree.update(index, priority.min(self.max_priority))?;
        }
        Ok(())
    }

    /// Sum of all stored priorities.
    pub fn total_priority(&self) -> f32 {
        self.tree.total()
    }
}
