//! Checkpoint policy, canonical naming and the on-disk store.
//!
//! A checkpoint is a JSON document with the keys `net`, `epoch` and
//! `optimizer`. Every qualifying epoch gets its own file, so checkpoints
//! accumulate; a retention limit can be configured to prune the oldest ones
//! written by the current run.

use crate::config::RunConfig;
use crate::error::RunError;
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Name of the per-directory manifest listing written checkpoints.
pub const MANIFEST_FILE: &str = "checkpoints.json";

/// Decides which epochs persist a checkpoint and what the file is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPolicy {
    save_period: usize,
    epochs: usize,
}

impl CheckpointPolicy {
    pub fn new(save_period: usize, epochs: usize) -> Self {
        Self {
            save_period: save_period.max(1),
            epochs,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.effective_save_period(), config.epochs)
    }

    /// Periodic save, or the final epoch.
    pub fn should_save(&self, epoch: usize) -> bool {
        let periodic = (epoch + 1) % self.save_period == 0;
        let last = epoch + 1 == self.epochs;
        periodic || last
    }
}

/// Canonical checkpoint file name for `epoch` of the run described by `config`.
///
/// `<prefix>_<optimizer>_depth=<d>_width=<w>_lr=<lr>_batchsize=<b>_at<epoch>_epoch=<epochs-1>_<task id>.pth`
pub fn canonical_name(config: &RunConfig, epoch: usize) -> String {
    format!(
        "{}_{}_depth={}_width={}_lr={}_batchsize={}_at{}_epoch={}_{}.pth",
        config.checkpoint_prefix,
        config.optimizer,
        config.depth,
        config.width,
        config.lr_label(),
        config.train_batch_size,
        epoch,
        config.last_epoch(),
        config.array_task_id(),
    )
}

/// Serialized checkpoint contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// Model parameters.
    pub net: serde_json::Value,
    pub epoch: usize,
    /// Optimizer state; weights-only checkpoints omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<serde_json::Value>,
}

/// A checkpoint as read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCheckpoint {
    pub model_state: serde_json::Value,
    pub epoch: usize,
    pub optimizer_state: Option<serde_json::Value>,
}

impl LoadedCheckpoint {
    /// First epoch a resumed run executes.
    pub fn start_epoch(&self) -> usize {
        self.epoch + 1
    }
}

/// Manifest entry for one written checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub epoch: usize,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Writes checkpoints into one directory and keeps its manifest current.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_checkpoints: Option<usize>,
    written: Vec<PathBuf>,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, max_checkpoints: Option<usize>) -> Self {
        Self {
            dir,
            max_checkpoints,
            written: Vec::new(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.checkpoint.clone(), config.max_checkpoints)
    }

    /// Checkpoints written through this store that have not been pruned.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Persist `payload` as `file_name` inside the store directory.
    pub fn write(
        &mut self,
        file_name: &str,
        payload: &CheckpointPayload,
    ) -> Result<CheckpointRecord, RunError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);

        let bytes = serde_json::to_vec(payload)?;
        persistence::atomic_write(&path, &bytes)?;

        let record = CheckpointRecord {
            epoch: payload.epoch,
            path: path.clone(),
            sha256: format!("{:x}", Sha256::digest(&bytes)),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let mut manifest = self.manifest()?;
        manifest.retain(|r| r.path != path);
        manifest.push(record.clone());
        self.written.retain(|p| p != &path);
        self.written.push(path);

        if let Some(limit) = self.max_checkpoints {
            while self.written.len() > limit {
                let stale = self.written.remove(0);
                match std::fs::remove_file(&stale) {
                    Ok(()) => tracing::info!(path = %stale.display(), "Pruned old checkpoint"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                manifest.retain(|r| r.path != stale);
            }
        }

        persistence::atomic_write_json(&self.dir.join(MANIFEST_FILE), &manifest)?;
        Ok(record)
    }

    /// Entries of the manifest in write order. Empty if nothing was written yet.
    pub fn manifest(&self) -> Result<Vec<CheckpointRecord>, RunError> {
        let path = self.dir.join(MANIFEST_FILE);
        Ok(persistence::load_json(&path)?.unwrap_or_default())
    }

    /// Read a checkpoint. Missing or corrupt files are errors; nothing is defaulted.
    pub fn load(path: &Path) -> Result<LoadedCheckpoint, RunError> {
        let bytes = std::fs::read(path)
            .map_err(|e| RunError::checkpoint(path, format!("cannot read checkpoint: {e}")))?;
        let payload: CheckpointPayload = serde_json::from_slice(&bytes)
            .map_err(|e| RunError::checkpoint(path, format!("malformed checkpoint: {e}")))?;
        Ok(LoadedCheckpoint {
            model_state: payload.net,
            epoch: payload.epoch,
            optimizer_state: payload.optimizer,
        })
    }
}
