use thiserror::Error;

/// Main error type for the training harness.
///
/// Buffer- and tree-level errors indicate a caller invariant violation
/// (e.g. sampling before warm-up). They are not operational faults and
/// must not be caught and retried.
#[derive(Error, Debug)]
pub enum FxrlError {
    // Replay memory errors
    #[error("replay buffer is empty")]
    EmptyBuffer,

    #[error("insufficient transitions: {available} available, {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("negative priority submitted to sum-tree: {0}")]
    InvalidPriority(f32),

    // Tensor shape errors - fatal, no recovery
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    // Checkpoint errors
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FxrlError
pub type Result<T> = std::result::Result<T, FxrlError>;

impl FxrlError {
    /// Build a shape-mismatch error from expected/actual dimension lists.
    pub fn shape(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        Self::ShapeMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}
