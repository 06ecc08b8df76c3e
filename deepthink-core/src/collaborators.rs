//! Contracts of the external collaborators the run controller drives.
//!
//! The model's forward pass, its loss and the data pipeline live behind these
//! traits. The controller only needs to train for one epoch, evaluate on a
//! split, move the learning rate, read/write serialized state and change the
//! model's iteration budget.

use crate::error::RunError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A recurrent model whose depth is an iteration budget.
pub trait Model: Send + Sync {
    /// Maximum number of recurrent iterations per example.
    fn max_iterations(&self) -> usize;

    fn set_max_iterations(&mut self, iterations: usize);

    fn num_parameters(&self) -> usize;

    /// Serialized parameters (the `net` entry of a checkpoint).
    fn state_dict(&self) -> Result<serde_json::Value, RunError>;

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<(), RunError>;
}

/// An optimizer with one or more parameter groups.
pub trait Optimizer: Send + Sync {
    /// Current learning rate of every parameter group.
    fn learning_rates(&self) -> Vec<f64>;

    /// Set the learning rate of every parameter group.
    fn set_learning_rate(&mut self, lr: f64);

    fn state_dict(&self) -> Result<serde_json::Value, RunError>;

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<(), RunError>;
}

/// Which data source an evaluation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSplit {
    Train,
    Test,
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Test => write!(f, "test"),
        }
    }
}

/// Loss and accuracy of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochOutcome {
    pub loss: f64,
    /// Training accuracy in percent.
    pub accuracy: f64,
}

/// Runs one epoch of gradient updates over the training data.
///
/// The model and optimizer are mutated in place; data loading and device
/// placement belong to the implementation.
#[async_trait]
pub trait Trainer<M: Model, O: Optimizer>: Send {
    async fn train_epoch(
        &mut self,
        model: &mut M,
        optimizer: &mut O,
        mode: &str,
    ) -> Result<EpochOutcome, RunError>;
}

/// Measures accuracy (percent) in inference mode, without gradient updates.
#[async_trait]
pub trait Evaluator<M: Model>: Send {
    async fn evaluate(&mut self, model: &M, split: DataSplit, mode: &str)
    -> Result<f64, RunError>;
}
