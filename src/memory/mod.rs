//! Experience memory
//!
//! Sum-tree-backed prioritized replay and n-step return accumulation.

pub mod nstep;
pub mod replay;
pub mod sum_tree;

pub use nstep::{NStepAccumulator, N_STEP_DISCOUNT};
pub use replay::{Action, PrioritizedBatch, PrioritizedReplayBuffer, Transition};
pub use sum_tree::SumTree;
