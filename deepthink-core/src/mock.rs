//! Scripted collaborators for exercising the controller without a real model.

use crate::collaborators::{DataSplit, EpochOutcome, Evaluator, Model, Optimizer, Trainer};
use crate::error::RunError;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};

/// A model that only tracks its iteration budget and how often it was updated.
#[derive(Debug, Clone, PartialEq)]
pub struct MockModel {
    pub max_iters: usize,
    pub params: usize,
    /// Number of training epochs applied to this model.
    pub updates: usize,
}

impl MockModel {
    pub fn new(max_iters: usize) -> Self {
        Self {
            max_iters,
            params: 1_000,
            updates: 0,
        }
    }
}

impl Model for MockModel {
    fn max_iterations(&self) -> usize {
        self.max_iters
    }

    fn set_max_iterations(&mut self, iterations: usize) {
        self.max_iters = iterations;
    }

    fn num_parameters(&self) -> usize {
        self.params
    }

    fn state_dict(&self) -> Result<serde_json::Value, RunError> {
        Ok(json!({ "updates": self.updates, "max_iters": self.max_iters }))
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<(), RunError> {
        let updates = state
            .get("updates")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RunError::model("state dict is missing `updates`"))?;
        self.updates = updates as usize;
        Ok(())
    }
}

/// Single-group optimizer that remembers every rate it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct MockOptimizer {
    pub name: String,
    pub lr: f64,
    pub steps: usize,
    pub restored: bool,
}

impl MockOptimizer {
    pub fn new(name: &str, lr: f64) -> Self {
        Self {
            name: name.to_string(),
            lr,
            steps: 0,
            restored: false,
        }
    }
}

impl Optimizer for MockOptimizer {
    fn learning_rates(&self) -> Vec<f64> {
        vec![self.lr]
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state_dict(&self) -> Result<serde_json::Value, RunError> {
        Ok(json!({ "name": self.name, "lr": self.lr, "steps": self.steps }))
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<(), RunError> {
        self.steps = state
            .get("steps")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RunError::optimizer("state dict is missing `steps`"))?
            as usize;
        self.restored = true;
        Ok(())
    }
}

/// Trainer that replays a queue of losses, then repeats `default_loss`.
#[derive(Debug, Clone)]
pub struct ScriptedTrainer {
    losses: VecDeque<f64>,
    default_loss: f64,
    /// Learning rate in effect for each call, in call order.
    pub seen_rates: Vec<f64>,
    /// Model iteration budget observed on each call.
    pub seen_depths: Vec<usize>,
}

impl ScriptedTrainer {
    pub fn new(losses: impl IntoIterator<Item = f64>) -> Self {
        Self {
            losses: losses.into_iter().collect(),
            default_loss: 0.5,
            seen_rates: Vec::new(),
            seen_depths: Vec::new(),
        }
    }

    /// A trainer whose loss is always finite.
    pub fn healthy() -> Self {
        Self::new([])
    }

    pub fn calls(&self) -> usize {
        self.seen_rates.len()
    }
}

#[async_trait]
impl Trainer<MockModel, MockOptimizer> for ScriptedTrainer {
    async fn train_epoch(
        &mut self,
        model: &mut MockModel,
        optimizer: &mut MockOptimizer,
        _mode: &str,
    ) -> Result<EpochOutcome, RunError> {
        self.seen_rates.push(optimizer.lr);
        self.seen_depths.push(model.max_iters);
        model.updates += 1;
        optimizer.steps += 1;
        let loss = self.losses.pop_front().unwrap_or(self.default_loss);
        Ok(EpochOutcome {
            loss,
            accuracy: 100.0 * (1.0 - loss.clamp(0.0, 1.0)),
        })
    }
}

/// Evaluator returning a fixed accuracy per split and logging every call.
#[derive(Debug, Clone)]
pub struct ScriptedEvaluator {
    accuracies: HashMap<DataSplit, f64>,
    /// `(split, model iteration budget)` of every call.
    pub calls: Vec<(DataSplit, usize)>,
}

impl ScriptedEvaluator {
    pub fn new(train_acc: f64, test_acc: f64) -> Self {
        Self {
            accuracies: HashMap::from([(DataSplit::Train, train_acc), (DataSplit::Test, test_acc)]),
            calls: Vec::new(),
        }
    }

    pub fn calls_for(&self, split: DataSplit) -> usize {
        self.calls.iter().filter(|(s, _)| *s == split).count()
    }
}

#[async_trait]
impl<M: Model> Evaluator<M> for ScriptedEvaluator {
    async fn evaluate(
        &mut self,
        model: &M,
        split: DataSplit,
        _mode: &str,
    ) -> Result<f64, RunError> {
        self.calls.push((split, model.max_iterations()));
        Ok(self.accuracies.get(&split).copied().unwrap_or(0.0))
    }
}
