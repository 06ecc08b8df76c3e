//! Error types for the deepthink-core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for run-controller operations.
#[derive(Debug, Error)]
pub enum RunError {
    /// The training loss stopped being a finite number. Terminal for the run.
    #[error("training diverged at epoch {epoch}: loss is {loss}")]
    Diverged { epoch: usize, loss: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error at {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Metrics sink error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RunError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn checkpoint(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn optimizer(msg: impl Into<String>) -> Self {
        Self::Optimizer(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics(msg.into())
    }

    /// Whether this error is the divergence terminal state rather than a fault.
    pub fn is_divergence(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Epoch at which the run diverged, if it did.
    pub fn diverged_epoch(&self) -> Option<usize> {
        match self {
            Self::Diverged { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }
}
