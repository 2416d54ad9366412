//! Agent checkpointing
//!
//! Save and load agent snapshots for persistence across restarts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::agent::AgentSnapshot;
use crate::error::{FxrlError, Result};

/// Checkpointer for saving and loading agent snapshots
pub struct Checkpointer {
    /// Directory for checkpoints
    checkpoint_dir: PathBuf,
    /// Maximum checkpoints to keep
    max_checkpoints: usize,
}

impl Checkpointer {
    /// Create a new checkpointer
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P, max_checkpoints: usize) -> Self {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();

        if !checkpoint_dir.exists() {
            if let Err(e) = fs::create_dir_all(&checkpoint_dir) {
                warn!("Failed to create checkpoint directory: {}", e);
            }
        }

        Self {
            checkpoint_dir,
            max_checkpoints,
        }
    }

    /// Get checkpoint path for a given name
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.json", name))
    }

    /// Zero-padded name so lexicographic listing order matches iteration
    /// order.
    pub fn checkpoint_name(iteration: usize) -> String {
        format!("checkpoint_{:010}", iteration)
    }

    /// Save a snapshot under an iteration-derived name
    pub fn save(&self, snapshot: &AgentSnapshot, iteration: usize) -> Result<PathBuf> {
        let name = Self::checkpoint_name(iteration);
        let path = self.checkpoint_path(&name);

        let json = serde_json::to_string(snapshot)?;
        fs::write(&path, json)?;
        info!("Saved checkpoint to {:?}", path);

        self.cleanup_old_checkpoints();

        Ok(path)
    }

    /// Load a snapshot by name
    pub fn load(&self, name: &str) -> Result<AgentSnapshot> {
        let path = self.checkpoint_path(name);

        if !path.exists() {
            return Err(FxrlError::Checkpoint(format!(
                "checkpoint not found: {:?}",
                path
            )));
        }

        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load the most recent snapshot, if any exist
    pub fn load_latest(&self) -> Result<Option<AgentSnapshot>> {
        match self.latest_checkpoint() {
            Some(name) => Ok(Some(self.load(&name)?)),
            None => Ok(None),
        }
    }

    /// List available checkpoints
    pub fn list_checkpoints(&self) -> Vec<String> {
        let mut checkpoints = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.checkpoint_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.ends_with(".json") {
                        checkpoints.push(name.trim_end_matches(".json").to_string());
                    }
                }
            }
        }

        checkpoints.sort();
        checkpoints
    }

    /// Get latest checkpoint name
    pub fn latest_checkpoint(&self) -> Option<String> {
        self.list_checkpoints().into_iter().last()
    }

    /// Cleanup old checkpoints keeping only max_checkpoints
    fn cleanup_old_checkpoints(&self) {
        let checkpoints = self.list_checkpoints();

        if checkpoints.len() <= self.max_checkpoints {
            return;
        }

        let to_remove = checkpoints.len() - self.max_checkpoints;
        for name in checkpoints.into_iter().take(to_remove) {
            let path = self.checkpoint_path(&name);
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old checkpoint {:?}: {}", path, e);
            } else {
                info!("Removed old checkpoint: {}", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentState;
    use crate::network::NetworkWeights;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn snapshot(iteration: usize) -> AgentSnapshot {
        AgentSnapshot {
            state: AgentState {
                learning_rate: 1e-3,
                gamma: 0.4,
                iteration,
                train_steps: iteration / 2,
            },
            weights: NetworkWeights::new(vec![Array2::from_elem((2, 2), 1.5)]),
            target_weights: NetworkWeights::new(vec![Array2::from_elem((2, 2), 0.5)]),
            population: None,
            saved_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), 3);

        checkpointer.save(&snapshot(500), 500).unwrap();
        let loaded = checkpointer
            .load(&Checkpointer::checkpoint_name(500))
            .unwrap();

        assert_eq!(loaded.state.iteration, 500);
        assert_eq!(loaded.weights.tensors[0][[0, 0]], 1.5);
    }

    #[test]
    fn retention_keeps_only_the_newest() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), 2);

        for i in [500, 1000, 1500, 2000] {
            checkpointer.save(&snapshot(i), i).unwrap();
        }

        let names = checkpointer.list_checkpoints();
        assert_eq!(names.len(), 2);
        assert_eq!(
            checkpointer.latest_checkpoint().unwrap(),
            Checkpointer::checkpoint_name(2000)
        );
    }

    #[test]
    fn load_latest_on_empty_dir_is_none() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), 2);
        assert!(checkpointer.load_latest().unwrap().is_none());
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), 2);
        assert!(checkpointer.load("checkpoint_0000009999").is_err());
    }
}
