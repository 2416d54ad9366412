//! fxrl — reinforcement-learning training harness for trading agents
//!
//! Episodic training over windowed market data: a [`training::AgentLoop`]
//! slices episode windows from a [`data::MarketDataset`], drives a
//! [`agent::TrainableAgent`] (value-based DQN or actor-critic with
//! population-based policy search), scores the actions through an
//! external [`reward::RewardEngine`], folds per-step rewards into n-step
//! transitions and feeds a sum-tree prioritized replay buffer. The ML
//! framework sits behind the [`network`] traits; everything here is
//! single-threaded and synchronous.

pub mod agent;
pub mod config;
pub mod data;
pub mod error;
pub mod memory;
pub mod network;
pub mod reward;
pub mod training;

pub use agent::{ActorCriticAgent, AgentSnapshot, AgentState, DqnAgent, TrainableAgent};
pub use config::HarnessConfig;
pub use data::{generate_sample_data, MarketDataset};
pub use error::{FxrlError, Result};
pub use memory::{
    Action, NStepAccumulator, PrioritizedBatch, PrioritizedReplayBuffer, SumTree, Transition,
};
pub use network::{ActorCriticNetwork, NetworkWeights, QFunction};
pub use reward::{RewardCall, RewardEngine};
pub use training::{AgentLoop, Checkpointer, RunMode, RunStats};
