//! Training infrastructure
//!
//! The episodic training loop and agent checkpointing.

pub mod checkpointing;
pub mod trainer;

pub use checkpointing::Checkpointer;
pub use trainer::{AgentLoop, RunMode, RunStats};
