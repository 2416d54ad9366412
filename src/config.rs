//! Harness configuration
//!
//! Configuration structs for the replay memory, agents, evolution and the
//! training loop. Defaults mirror the production training runs.

use serde::{Deserialize, Serialize};

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Agent hyperparameters
    pub agent: AgentConfig,
    /// Replay memory configuration
    pub memory: MemoryConfig,
    /// Training loop configuration
    pub training: TrainingConfig,
    /// Population search configuration (actor-critic variant)
    pub evolution: EvolutionConfig,
}

/// Agent hyperparameters shared by both variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Initial learning rate
    pub lr: f32,
    /// Discount factor for the TD backup
    pub gamma: f32,
    /// N-step return horizon
    pub n_step: usize,
    /// Mini-batch size drawn from the prioritized buffer
    pub batch_size: usize,
    /// Epsilon for epsilon-greedy exploration (value-based variant)
    pub exploration_rate: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            gamma: 0.4,
            n_step: 3,
            batch_size: 128,
            exploration_rate: 0.1,
        }
    }
}

/// Replay memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Fixed leaf capacity of the sum-tree ring buffer
    pub capacity: usize,
    /// Upper clip applied to stored priorities, bounds IS variance
    pub max_priority: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 5_000_000,
            max_priority: 1.0,
        }
    }
}

/// Training loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Window length sliced from the market arrays each iteration
    pub step_size: usize,
    /// Total training iterations
    pub iterations: usize,
    /// Iterations between full buffer reconstructions (staleness bound)
    pub memory_reset_interval: usize,
    /// Iterations the loop must observe after a reset before training
    pub warmup_resets: usize,
    /// Checkpoint save frequency (iterations)
    pub checkpoint_interval: usize,
    /// Fraction of each window's transitions pushed into the buffer
    pub store_fraction: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            step_size: 96,
            iterations: 10_000_000,
            memory_reset_interval: 10_000,
            warmup_resets: 50,
            checkpoint_interval: 500,
            store_fraction: 0.5,
        }
    }
}

/// Population-based policy search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Number of weight vectors in the population
    pub population_size: usize,
    /// Per-element probability of a Gaussian perturbation
    pub mutation_rate: f64,
    /// Standard deviation of the perturbation
    pub mutation_scale: f64,
    /// Fraction of the population carried over unchanged
    pub winner_fraction: f64,
    /// Iterations between generations once past the warm-up
    pub evolve_interval: usize,
    /// Iteration index after which evolution starts
    pub evolve_after: usize,
    /// Soft target-network update coefficient
    pub tau: f32,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 100,
            mutation_rate: 0.1,
            mutation_scale: 1.0,
            winner_fraction: 0.4,
            evolve_interval: 2,
            evolve_after: 50,
            tau: 0.005,
        }
    }
}

impl EvolutionConfig {
    /// Number of individuals that survive a generation unchanged.
    pub fn n_winners(&self) -> usize {
        (self.population_size as f64 * self.winner_fraction) as usize
    }

    /// Number of parents drawn to produce the next generation's children.
    pub fn n_parents(&self) -> usize {
        self.population_size - self.n_winners()
    }
}
