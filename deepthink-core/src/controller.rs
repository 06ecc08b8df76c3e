//! The epoch loop.
//!
//! Each epoch runs, in order: train, record, divergence check, periodic
//! validation, checkpoint, learning-rate advance. A non-finite loss ends the
//! run on the spot with [`RunError::Diverged`].

use crate::checkpoint::{
    CheckpointPayload, CheckpointPolicy, CheckpointStore, LoadedCheckpoint, canonical_name,
};
use crate::collaborators::{DataSplit, Evaluator, Model, Optimizer, Trainer};
use crate::config::RunConfig;
use crate::divergence::{DivergenceGuard, LossHealth};
use crate::error::RunError;
use crate::metrics::{self, EpochRecord, MetricsSink, TrainingHistory, ValidationResult};
use crate::output::OutputSink;
use crate::schedule::ScheduleComposer;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Termination {
    Completed,
    Diverged { epoch: usize, loss: f64 },
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Terminated(Termination),
}

impl RunState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, RunState::Terminated(_))
    }
}

/// Where the epoch counter starts and whether warmup already elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPoint {
    pub start_epoch: usize,
    pub resumed: bool,
}

impl StartPoint {
    pub fn fresh() -> Self {
        Self {
            start_epoch: 0,
            resumed: false,
        }
    }

    /// Continue after a loaded checkpoint.
    ///
    /// With restored optimizer state the warmup period is dropped entirely.
    /// A weights-only resume keeps the configured warmup, which is still a
    /// function of the absolute epoch: only epochs below `warmup_period` are
    /// scaled, so a checkpoint at or past `warmup_period - 1` resumes at the
    /// full scheduled rate.
    pub fn after(checkpoint: &LoadedCheckpoint, optimizer_restored: bool) -> Self {
        Self {
            start_epoch: checkpoint.start_epoch(),
            resumed: optimizer_restored,
        }
    }
}

impl Default for StartPoint {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Result of a training loop that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub start_epoch: usize,
    /// Epochs actually executed.
    pub epochs_run: usize,
    pub history: TrainingHistory,
    /// Checkpoints written by this run, oldest first, after retention.
    pub checkpoints: Vec<PathBuf>,
}

/// Drives training from `start_epoch` to the last configured epoch.
pub struct TrainingLoopController {
    config: RunConfig,
    start: StartPoint,
    schedule: ScheduleComposer,
    guard: DivergenceGuard,
    policy: CheckpointPolicy,
    store: CheckpointStore,
    metrics: Arc<dyn MetricsSink>,
    output: Arc<dyn OutputSink>,
    history: TrainingHistory,
    state: RunState,
}

impl TrainingLoopController {
    pub fn new(
        config: &RunConfig,
        start: StartPoint,
        metrics: Arc<dyn MetricsSink>,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            config: config.clone(),
            start,
            schedule: ScheduleComposer::from_config(config, start.resumed),
            guard: DivergenceGuard::new(),
            policy: CheckpointPolicy::from_config(config),
            store: CheckpointStore::from_config(config),
            metrics,
            output,
            history: TrainingHistory::new(),
            state: RunState::Running,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn schedule(&self) -> &ScheduleComposer {
        &self.schedule
    }

    /// Records of every epoch executed so far, including a diverged one.
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    fn say(&self, line: impl AsRef<str>) {
        self.output.write_line(line.as_ref());
    }

    fn stamped(&self, line: impl AsRef<str>) {
        let now = Local::now().format("%Y%m%d %H:%M:%S");
        self.output.write_line(&format!("{now} {}", line.as_ref()));
    }

    /// Run the epoch loop. Can only be called once.
    pub async fn run<M, O, T, E>(
        &mut self,
        model: &mut M,
        optimizer: &mut O,
        trainer: &mut T,
        evaluator: &mut E,
    ) -> Result<TrainingReport, RunError>
    where
        M: Model,
        O: Optimizer,
        T: Trainer<M, O>,
        E: Evaluator<M>,
    {
        if self.state.is_terminated() || !self.history.is_empty() {
            return Err(RunError::training("training loop already ran"));
        }
        self.config.validate()?;

        let start_epoch = self.start.start_epoch;
        let epochs = self.config.epochs;
        let remaining = epochs.saturating_sub(start_epoch);
        tracing::info!(
            start_epoch,
            epochs,
            resumed = self.start.resumed,
            warmup = self.schedule.warmup_period(),
            "Starting training loop"
        );
        self.say(format!("==> Starting training for {remaining} epochs..."));

        optimizer.set_learning_rate(self.schedule.rate(start_epoch));

        for epoch in start_epoch..epochs {
            let learning_rates = optimizer.learning_rates();
            let outcome = trainer
                .train_epoch(model, optimizer, &self.config.train_mode)
                .await?;

            self.history.push(EpochRecord {
                epoch,
                train_loss: outcome.loss,
                train_acc: outcome.accuracy,
                learning_rates: learning_rates.clone(),
                validation: None,
            });
            self.say(format!("epoch {epoch}"));
            self.stamped(format!("Training loss at epoch {epoch}: {}", outcome.loss));
            self.stamped(format!("Training accuracy at epoch {epoch}: {}", outcome.accuracy));
            self.metrics
                .add_scalar(metrics::TAG_TRAIN_LOSS, outcome.loss, epoch)?;
            self.metrics
                .add_scalar(metrics::TAG_TRAIN_ACC, outcome.accuracy, epoch)?;
            for (group, lr) in learning_rates.iter().enumerate() {
                self.metrics
                    .add_scalar(&metrics::learning_rate_tag(group), *lr, epoch)?;
            }
            tracing::debug!(epoch, loss = outcome.loss, acc = outcome.accuracy, "Epoch trained");

            if self.guard.classify(outcome.loss) == LossHealth::Fatal {
                self.state = RunState::Terminated(Termination::Diverged {
                    epoch,
                    loss: outcome.loss,
                });
                self.say(format!(
                    "Loss is {} at epoch {epoch}, exiting...",
                    outcome.loss
                ));
                tracing::warn!(epoch, loss = outcome.loss, "Training diverged");
                if let Err(e) = self.metrics.flush() {
                    tracing::warn!(error = %e, "Failed to flush metrics after divergence");
                }
                return Err(RunError::Diverged {
                    epoch,
                    loss: outcome.loss,
                });
            }

            if (epoch + 1) % self.config.val_period == 0 {
                self.validate(model, evaluator, epoch).await?;
            }

            if self.policy.should_save(epoch) {
                self.save_checkpoint(&*model, &*optimizer, epoch)?;
            }

            optimizer.set_learning_rate(self.schedule.rate(epoch + 1));
        }

        self.metrics.flush()?;
        self.state = RunState::Terminated(Termination::Completed);
        tracing::info!(epochs_run = self.history.len(), "Training loop completed");

        Ok(TrainingReport {
            start_epoch,
            epochs_run: self.history.len(),
            history: self.history.clone(),
            checkpoints: self.store.written().to_vec(),
        })
    }

    async fn validate<M, E>(
        &mut self,
        model: &M,
        evaluator: &mut E,
        epoch: usize,
    ) -> Result<(), RunError>
    where
        M: Model,
        E: Evaluator<M>,
    {
        let mode = self.config.test_mode.clone();
        let train_acc = evaluator.evaluate(model, DataSplit::Train, &mode).await?;
        let test_acc = evaluator.evaluate(model, DataSplit::Test, &mode).await?;

        self.say("Val_period");
        self.stamped(format!("Training accuracy: {train_acc}"));
        self.stamped(format!("Testing accuracy: {test_acc}"));
        self.metrics
            .add_scalar(metrics::TAG_TEST_ACC_IN_TRAINING, test_acc, epoch)?;
        self.metrics
            .add_scalar(metrics::TAG_VAL_TRAIN_ACC, train_acc, epoch)?;
        self.metrics
            .add_scalar(metrics::TAG_VAL_TEST_ACC, test_acc, epoch)?;
        tracing::info!(epoch, train_acc, test_acc, "Validation");

        self.history
            .set_last_validation(ValidationResult { train_acc, test_acc });
        Ok(())
    }

    fn save_checkpoint<M: Model, O: Optimizer>(
        &mut self,
        model: &M,
        optimizer: &O,
        epoch: usize,
    ) -> Result<(), RunError> {
        let payload = CheckpointPayload {
            net: model.state_dict()?,
            epoch,
            optimizer: Some(optimizer.state_dict()?),
        };
        let name = canonical_name(&self.config, epoch);
        self.say(format!("Save model weight at epoch {epoch}"));
        let record = self.store.write(&name, &payload)?;
        self.stamped(format!("Saving model to: {}", record.path.display()));
        tracing::info!(epoch, path = %record.path.display(), sha256 = %record.sha256, "Checkpoint written");
        Ok(())
    }
}
