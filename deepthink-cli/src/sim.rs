//! Synthetic backend so the binary can drive a full run without an external model.
//!
//! The model is a per-coordinate recurrent fixed-point solver: starting from
//! zero, each iteration moves `x` toward the target by `x += w * (t - x)`, so
//! after `K` iterations the residual is `(1 - w)^K * t`. An example counts as
//! solved when every coordinate's residual is within [`SOLVE_TOLERANCE`].
//! Larger targets ("bigger mazes") need more iterations, which is what the
//! test-time iteration override is for.

use async_trait::async_trait;
use deepthink_core::{
    DataSplit, EpochOutcome, Evaluator, Model, Optimizer, RunConfig, RunError, Trainer,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Absolute residual under which a coordinate counts as solved.
pub const SOLVE_TOLERANCE: f64 = 0.05;

const MODES: &[&str] = &["default"];

fn check_mode(mode: &str) -> Result<(), RunError> {
    if MODES.contains(&mode) {
        Ok(())
    } else {
        Err(RunError::config(format!(
            "unsupported mode `{mode}` (expected one of {MODES:?})"
        )))
    }
}

/// Iteration budget a model of the given depth trains with.
pub fn iterations_for_depth(depth: usize) -> usize {
    (depth.saturating_sub(4) / 4).max(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ModelState {
    weights: Vec<f64>,
    max_iters: usize,
}

/// Recurrent solver with one step size per coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticModel {
    weights: Vec<f64>,
    max_iters: usize,
}

impl SyntheticModel {
    pub fn new(config: &RunConfig, rng: &mut StdRng) -> Self {
        let dim = config.width.max(1) * 8;
        let weights = (0..dim).map(|_| rng.gen_range(0.05..0.15)).collect();
        Self {
            weights,
            max_iters: iterations_for_depth(config.depth),
        }
    }

    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    /// Residuals after `max_iters` iterations on `target`.
    fn residuals<'a>(&'a self, target: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
        let k = self.max_iters as i32;
        self.weights
            .iter()
            .zip(target)
            .map(move |(w, t)| (1.0 - w).powi(k) * t)
    }

    fn solves(&self, target: &[f64]) -> bool {
        self.residuals(target).all(|r| r.abs() < SOLVE_TOLERANCE)
    }

    /// Mean squared scaled residual of a batch and its gradient.
    fn loss_and_grad(&self, batch: &[&Vec<f64>], scale: f64) -> (f64, Vec<f64>) {
        let k = self.max_iters as i32;
        let n = (batch.len() * self.dim()).max(1) as f64;
        let scale_sq = scale * scale;
        let mut loss = 0.0;
        let mut grad = vec![0.0; self.dim()];
        for target in batch {
            for (i, (w, t)) in self.weights.iter().zip(target.iter()).enumerate() {
                let a = 1.0 - w;
                let r = a.powi(k) * t;
                let dr_dw = -(k as f64) * a.powi(k - 1) * t;
                loss += r * r / scale_sq;
                grad[i] += 2.0 * r * dr_dw / scale_sq;
            }
        }
        grad.iter_mut().for_each(|g| *g /= n);
        (loss / n, grad)
    }
}

impl Model for SyntheticModel {
    fn max_iterations(&self) -> usize {
        self.max_iters
    }

    fn set_max_iterations(&mut self, iterations: usize) {
        self.max_iters = iterations;
    }

    fn num_parameters(&self) -> usize {
        self.weights.len()
    }

    fn state_dict(&self) -> Result<serde_json::Value, RunError> {
        Ok(serde_json::to_value(ModelState {
            weights: self.weights.clone(),
            max_iters: self.max_iters,
        })?)
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<(), RunError> {
        let state: ModelState = serde_json::from_value(state)?;
        if state.weights.len() != self.weights.len() {
            return Err(RunError::model(format!(
                "parameter shape mismatch: checkpoint has {}, model has {}",
                state.weights.len(),
                self.weights.len()
            )));
        }
        self.weights = state.weights;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OptimizerKind {
    Sgd,
    Adam,
    AdamW,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct OptimizerState {
    step: u64,
    /// Momentum buffer (SGD) or first moment (Adam).
    m: Vec<f64>,
    /// Second moment (Adam only).
    v: Vec<f64>,
}

/// SGD with momentum, Adam or AdamW over a flat parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticOptimizer {
    kind: OptimizerKind,
    lr: f64,
    state: OptimizerState,
}

impl SyntheticOptimizer {
    const MOMENTUM: f64 = 0.9;
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPS: f64 = 1e-8;
    const WEIGHT_DECAY: f64 = 2e-4;

    pub fn from_name(name: &str, lr: f64) -> Result<Self, RunError> {
        let kind = match name.to_lowercase().as_str() {
            "sgd" => OptimizerKind::Sgd,
            "adam" => OptimizerKind::Adam,
            "adamw" => OptimizerKind::AdamW,
            other => {
                return Err(RunError::config(format!(
                    "unknown optimizer `{other}` (expected sgd, adam or adamw)"
                )));
            }
        };
        Ok(Self {
            kind,
            lr,
            state: OptimizerState::default(),
        })
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        let state = &mut self.state;
        if state.m.len() != params.len() {
            state.m = vec![0.0; params.len()];
            state.v = vec![0.0; params.len()];
        }
        state.step += 1;
        match self.kind {
            OptimizerKind::Sgd => {
                for ((p, g), m) in params.iter_mut().zip(grads).zip(state.m.iter_mut()) {
                    *m = Self::MOMENTUM * *m + g;
                    *p -= self.lr * *m;
                }
            }
            OptimizerKind::Adam | OptimizerKind::AdamW => {
                let t = state.step as i32;
                let bc1 = 1.0 - Self::BETA1.powi(t);
                let bc2 = 1.0 - Self::BETA2.powi(t);
                for (i, (p, g)) in params.iter_mut().zip(grads).enumerate() {
                    if self.kind == OptimizerKind::AdamW {
                        *p -= self.lr * Self::WEIGHT_DECAY * *p;
                    }
                    state.m[i] = Self::BETA1 * state.m[i] + (1.0 - Self::BETA1) * g;
                    state.v[i] = Self::BETA2 * state.v[i] + (1.0 - Self::BETA2) * g * g;
                    let m_hat = state.m[i] / bc1;
                    let v_hat = state.v[i] / bc2;
                    *p -= self.lr * m_hat / (v_hat.sqrt() + Self::EPS);
                }
            }
        }
    }
}

impl Optimizer for SyntheticOptimizer {
    fn learning_rates(&self) -> Vec<f64> {
        vec![self.lr]
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state_dict(&self) -> Result<serde_json::Value, RunError> {
        Ok(serde_json::json!({
            "kind": self.kind,
            "lr": self.lr,
            "state": self.state,
        }))
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<(), RunError> {
        let kind: OptimizerKind = serde_json::from_value(state["kind"].clone())?;
        if kind != self.kind {
            return Err(RunError::optimizer(format!(
                "checkpoint optimizer is {kind:?}, run uses {:?}",
                self.kind
            )));
        }
        self.state = serde_json::from_value(state["state"].clone())?;
        if let Some(lr) = state["lr"].as_f64() {
            self.lr = lr;
        }
        Ok(())
    }
}

/// Target vectors for the train and test splits.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub train: Vec<Vec<f64>>,
    pub test: Vec<Vec<f64>>,
    pub train_scale: f64,
    pub test_scale: f64,
}

impl SyntheticData {
    pub fn generate(config: &RunConfig, dim: usize, rng: &mut StdRng) -> Self {
        let train_scale = config.train_maze_size.max(1) as f64;
        let test_scale = config.test_maze_size.max(1) as f64;
        let mut split = |count: usize, scale: f64| -> Vec<Vec<f64>> {
            (0..count)
                .map(|_| (0..dim).map(|_| rng.gen_range(0.5..1.0) * scale).collect())
                .collect()
        };
        let train = split(config.train_batch_size.max(1) * 8, train_scale);
        let test = split(config.test_batch_size.max(1), test_scale);
        Self {
            train,
            test,
            train_scale,
            test_scale,
        }
    }
}

/// Mini-batch gradient descent over the synthetic training split.
pub struct SyntheticTrainer {
    data: Vec<Vec<f64>>,
    scale: f64,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl SyntheticTrainer {
    pub fn new(config: &RunConfig, data: &SyntheticData, seed: u64) -> Self {
        Self {
            data: data.train.clone(),
            scale: data.train_scale,
            batch_size: config.train_batch_size.max(1),
            shuffle: config.shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl Trainer<SyntheticModel, SyntheticOptimizer> for SyntheticTrainer {
    async fn train_epoch(
        &mut self,
        model: &mut SyntheticModel,
        optimizer: &mut SyntheticOptimizer,
        mode: &str,
    ) -> Result<EpochOutcome, RunError> {
        check_mode(mode)?;
        let mut order: Vec<usize> = (0..self.data.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }

        let mut total_loss = 0.0;
        let mut solved = 0usize;
        let mut batches = 0usize;
        for chunk in order.chunks(self.batch_size) {
            let batch: Vec<&Vec<f64>> = chunk.iter().map(|&i| &self.data[i]).collect();
            let (loss, grad) = model.loss_and_grad(&batch, self.scale);
            optimizer.step(&mut model.weights, &grad);
            solved += batch.iter().filter(|t| model.solves(t)).count();
            total_loss += loss;
            batches += 1;
        }

        Ok(EpochOutcome {
            loss: total_loss / batches.max(1) as f64,
            accuracy: 100.0 * solved as f64 / self.data.len().max(1) as f64,
        })
    }
}

/// Percentage of solved examples per split.
pub struct SyntheticEvaluator {
    data: SyntheticData,
}

impl SyntheticEvaluator {
    pub fn new(data: SyntheticData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Evaluator<SyntheticModel> for SyntheticEvaluator {
    async fn evaluate(
        &mut self,
        model: &SyntheticModel,
        split: DataSplit,
        mode: &str,
    ) -> Result<f64, RunError> {
        check_mode(mode)?;
        let targets = match split {
            DataSplit::Train => &self.data.train,
            DataSplit::Test => &self.data.test,
        };
        if targets.is_empty() {
            return Err(RunError::evaluation(format!("{split} split is empty")));
        }
        let solved = targets.iter().filter(|t| model.solves(t)).count();
        Ok(100.0 * solved as f64 / targets.len() as f64)
    }
}

/// Model, optimizer and collaborators for one run.
pub struct SyntheticBackend {
    pub model: SyntheticModel,
    pub optimizer: SyntheticOptimizer,
    pub trainer: SyntheticTrainer,
    pub evaluator: SyntheticEvaluator,
}

impl SyntheticBackend {
    pub fn build(config: &RunConfig, seed: u64) -> Result<Self, RunError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let model = SyntheticModel::new(config, &mut rng);
        let data = SyntheticData::generate(config, model.dim(), &mut rng);
        let optimizer = SyntheticOptimizer::from_name(&config.optimizer, config.lr)?;
        let trainer = SyntheticTrainer::new(config, &data, seed.wrapping_add(1));
        let evaluator = SyntheticEvaluator::new(data);
        tracing::debug!(
            dim = model.dim(),
            max_iters = model.max_iterations(),
            optimizer = %config.optimizer,
            "Synthetic backend ready"
        );
        Ok(Self {
            model,
            optimizer,
            trainer,
            evaluator,
        })
    }
}
