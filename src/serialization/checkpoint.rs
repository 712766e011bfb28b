// --- File: src/serialization/checkpoint.rs ---

//! Saving and restoring training checkpoints.
//!
//! A checkpoint is a directory holding:
//! - the model weights (SafeTensors)
//! - the optimizer's slot tensors and hyperparameters, when present
//! - training metadata (step, learning rate, losses)

use super::safetensors_io::{load_safetensors, save_safetensors, SafeTensorsError};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const METADATA_FILE: &str = "metadata.json";
const MODEL_FILE: &str = "model.safetensors";
const OPTIMIZER_FILE: &str = "optimizer.json";
const OPTIMIZER_SLOTS_FILE: &str = "optimizer.safetensors";
const CHECKPOINT_PREFIX: &str = "checkpoint_step";
const FORMAT_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensorsError(#[from] SafeTensorsError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Checkpoint directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid checkpoint: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Training metadata stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub version: String,
    pub model_name: Option<String>,
    /// Number of completed training steps.
    pub step: usize,
    pub learning_rate: f32,
    pub last_loss: Option<f32>,
    pub eval_loss: Option<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            model_name: None,
            step: 0,
            learning_rate: 0.0,
            last_loss: None,
            eval_loss: None,
            metadata: BTreeMap::new(),
        }
    }
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model_name = Some(name.to_string());
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_last_loss(mut self, loss: f32) -> Self {
        self.last_loss = Some(loss);
        self
    }

    pub fn with_eval_loss(mut self, loss: f32) -> Self {
        self.eval_loss = Some(loss);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Optimizer description; its slot tensors are stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub optimizer_type: String,
    pub params: BTreeMap<String, f64>,
    pub slot_names: Vec<String>,
}

impl OptimizerState {
    pub fn new(optimizer_type: &str) -> Self {
        Self {
            optimizer_type: optimizer_type.to_string(),
            params: BTreeMap::new(),
            slot_names: Vec::new(),
        }
    }
}

/// Everything needed to resume training.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub model_weights: HashMap<String, Tensor>,
    pub optimizer_state: Option<OptimizerState>,
    /// Slot tensors keyed `"{slot_name}/{weight_name}"`.
    pub optimizer_slots: HashMap<String, Tensor>,
}

impl Checkpoint {
    pub fn new(model_weights: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self {
            metadata,
            model_weights,
            optimizer_state: None,
            optimizer_slots: HashMap::new(),
        }
    }

    pub fn with_optimizer_state(
        mut self,
        state: OptimizerState,
        slots: HashMap<String, Tensor>,
    ) -> Self {
        self.optimizer_state = Some(state);
        self.optimizer_slots = slots;
        self
    }
}

/// Writes a checkpoint into directory `path`, creating it if needed.
///
/// ```text
/// checkpoint_dir/
/// ├── metadata.json          # step, learning rate, losses
/// ├── model.safetensors      # model weights
/// ├── optimizer.json         # optimizer type and hyperparameters (optional)
/// └── optimizer.safetensors  # optimizer slots (optional)
/// ```
pub fn save_checkpoint<P: AsRef<Path>>(path: P, checkpoint: &Checkpoint) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir)?;

    fs::write(
        dir.join(METADATA_FILE),
        serde_json::to_string_pretty(&checkpoint.metadata)?,
    )?;
    save_safetensors(dir.join(MODEL_FILE), &checkpoint.model_weights)?;

    if let Some(state) = &checkpoint.optimizer_state {
        fs::write(dir.join(OPTIMIZER_FILE), serde_json::to_string_pretty(state)?)?;
        save_safetensors(dir.join(OPTIMIZER_SLOTS_FILE), &checkpoint.optimizer_slots)?;
    }
    Ok(())
}

fn require_file(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(CheckpointError::FileNotFound(path))
    }
}

/// Reads a checkpoint written by [`save_checkpoint`].
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
    let dir = path.as_ref();
    if !dir.is_dir() {
        return Err(CheckpointError::DirectoryNotFound(dir.to_path_buf()));
    }

    let metadata_path = require_file(dir.join(METADATA_FILE))?;
    let metadata: CheckpointMetadata = serde_json::from_str(&fs::read_to_string(metadata_path)?)?;
    if metadata.version != FORMAT_VERSION {
        return Err(CheckpointError::InvalidFormat(format!(
            "unsupported version '{}', expected '{}'",
            metadata.version, FORMAT_VERSION
        )));
    }
    let model_weights = load_safetensors(require_file(dir.join(MODEL_FILE))?)?;

    let optimizer_path = dir.join(OPTIMIZER_FILE);
    let (optimizer_state, optimizer_slots) = if optimizer_path.exists() {
        let state: OptimizerState = serde_json::from_str(&fs::read_to_string(optimizer_path)?)?;
        let slots = load_safetensors(require_file(dir.join(OPTIMIZER_SLOTS_FILE))?)?;
        (Some(state), slots)
    } else {
        (None, HashMap::new())
    };

    Ok(Checkpoint {
        metadata,
        model_weights,
        optimizer_state,
        optimizer_slots,
    })
}

/// Keeps a rolling set of checkpoints under one directory.
///
/// Checkpoints are named `checkpoint_step{step:08}`, so name order is step
/// order.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    pub base_dir: PathBuf,
    pub max_to_keep: usize,
}

impl CheckpointManager {
    pub fn new<P: AsRef<Path>>(base_dir: P, max_to_keep: usize) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            max_to_keep: max_to_keep.max(1),
        }
    }

    pub fn checkpoint_path(&self, step: usize) -> PathBuf {
        self.base_dir.join(format!("{}{:08}", CHECKPOINT_PREFIX, step))
    }

    /// Saves `checkpoint` under its step and prunes the oldest beyond `max_to_keep`.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.checkpoint_path(checkpoint.metadata.step);
        save_checkpoint(&path, checkpoint)?;

        let existing = self.find_checkpoints()?;
        let excess = existing.len().saturating_sub(self.max_to_keep);
        for old in existing.iter().take(excess) {
            fs::remove_dir_all(old)?;
        }
        Ok(path)
    }

    /// Checkpoint directories on disk, oldest first.
    pub fn find_checkpoints(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut checkpoints: Vec<PathBuf> = fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with(CHECKPOINT_PREFIX))
                        .unwrap_or(false)
            })
            .collect();
        checkpoints.sort();
        Ok(checkpoints)
    }

    pub fn latest_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.find_checkpoints()?.pop())
    }

    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        match self.latest_path()? {
            Some(path) => Ok(Some(load_checkpoint(path)?)),
            None => Ok(None),
        }
    }

    /// Path of the checkpoint with the lowest recorded eval loss.
    pub fn best_checkpoint(&self) -> Result<Option<PathBuf>> {
        let mut best: Option<(f32, PathBuf)> = None;
        for path in self.find_checkpoints()? {
            let metadata_path = require_file(path.join(METADATA_FILE))?;
            let metadata: CheckpointMetadata =
                serde_json::from_str(&fs::read_to_string(metadata_path)?)?;
            if let Some(loss) = metadata.eval_loss {
                if best.as_ref().map_or(true, |(b, _)| loss < *b) {
                    best = Some((loss, path));
                }
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}

/// Saves bare model weights.
pub fn save_weights<P: AsRef<Path>>(path: P, weights: &HashMap<String, Tensor>) -> Result<()> {
    save_safetensors(path, weights)?;
    Ok(())
}

/// Loads bare model weights.
pub fn load_weights<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Tensor>> {
    Ok(load_safetensors(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    fn weights() -> HashMap<String, Tensor> {
        HashMap::from([(
            "0.0".to_string(),
            tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        )])
    }

    fn checkpoint(step: usize, eval_loss: f32) -> Checkpoint {
        let metadata = CheckpointMetadata::new()
            .with_step(step)
            .with_eval_loss(eval_loss);
        Checkpoint::new(weights(), metadata)
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = CheckpointMetadata::new()
            .with_model_name("seq2seq")
            .with_step(1000)
            .with_learning_rate(0.001)
            .with_last_loss(0.5)
            .with_metadata("optimizer", "adam");
        assert_eq!(metadata.model_name.as_deref(), Some("seq2seq"));
        assert_eq!(metadata.step, 1000);
        assert_eq!(metadata.last_loss, Some(0.5));
        assert_eq!(metadata.metadata["optimizer"], "adam");
    }

    #[test]
    fn test_save_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = OptimizerState::new("adam");
        state.params.insert("b1".to_string(), 0.9);
        state.slot_names = vec!["m".to_string(), "v".to_string()];
        let slots = HashMap::from([("m/0.0".to_string(), tensor::zeros(&[2, 2]))]);
        let ckpt = checkpoint(7, 1.5).with_optimizer_state(state.clone(), slots.clone());

        save_checkpoint(dir.path(), &ckpt).unwrap();
        let loaded = load_checkpoint(dir.path()).unwrap();

        assert_eq!(loaded.metadata, ckpt.metadata);
        assert_eq!(loaded.model_weights, weights());
        assert_eq!(loaded.optimizer_state, Some(state));
        assert_eq!(loaded.optimizer_slots, slots);
    }

    #[test]
    fn test_checkpoint_without_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        save_checkpoint(dir.path(), &checkpoint(1, 0.0)).unwrap();
        assert!(!dir.path().join(OPTIMIZER_FILE).exists());
        let loaded = load_checkpoint(dir.path()).unwrap();
        assert!(loaded.optimizer_state.is_none());
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_checkpoint(dir.path().join("nope")),
            Err(CheckpointError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            load_checkpoint(dir.path()),
            Err(CheckpointError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_version_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = checkpoint(1, 0.0);
        ckpt.metadata.version = "0.3".to_string();
        save_checkpoint(dir.path(), &ckpt).unwrap();
        assert!(matches!(
            load_checkpoint(dir.path()),
            Err(CheckpointError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_manager_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), 2);
        for (step, loss) in [(100, 3.0), (200, 1.0), (300, 2.0)] {
            manager.save(&checkpoint(step, loss)).unwrap();
        }
        let names: Vec<String> = manager
            .find_checkpoints()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["checkpoint_step00000200", "checkpoint_step00000300"]);

        let latest = manager.load_latest().unwrap().unwrap();
        assert_eq!(latest.metadata.step, 300);
        assert_eq!(
            manager.best_checkpoint().unwrap(),
            Some(manager.checkpoint_path(200))
        );
    }

    #[test]
    fn test_manager_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("missing"), 3);
        assert!(manager.load_latest().unwrap().is_none());
    }
}
