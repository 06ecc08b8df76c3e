//! Per-epoch records and scalar metrics sinks.

use crate::error::RunError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TAG_TRAIN_LOSS: &str = "Loss/train_loss";
pub const TAG_TRAIN_ACC: &str = "Accuracy/train_acc";
pub const TAG_TEST_ACC_IN_TRAINING: &str = "Accuracy/test_acc_in_training";
pub const TAG_VAL_TRAIN_ACC: &str = "val/train_acc";
pub const TAG_VAL_TEST_ACC: &str = "val/test_acc";

/// Tag of the learning-rate series for optimizer parameter group `group`.
pub fn learning_rate_tag(group: usize) -> String {
    format!("Learning_rate/group{group}")
}

/// Train/test accuracy measured at a validation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub train_acc: f64,
    pub test_acc: f64,
}

/// What happened in one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_acc: f64,
    /// Learning rate of each optimizer parameter group during the epoch.
    pub learning_rates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// Ordered per-epoch history of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    /// Attach a validation result to the most recent record.
    pub(crate) fn set_last_validation(&mut self, validation: ValidationResult) {
        if let Some(last) = self.records.last_mut() {
            last.validation = Some(validation);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn epochs(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.epoch).collect()
    }

    pub fn accuracies(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.train_acc).collect()
    }

    /// Epochs at which validation ran.
    pub fn validation_epochs(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.validation.is_some())
            .map(|r| r.epoch)
            .collect()
    }
}

/// Destination for scalar time series keyed by epoch.
pub trait MetricsSink: Send + Sync {
    fn add_scalar(&self, tag: &str, value: f64, step: usize) -> Result<(), RunError>;

    fn flush(&self) -> Result<(), RunError> {
        Ok(())
    }
}

/// One scalar observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub value: f64,
    pub step: usize,
    pub wall_time: f64,
}

/// Appends scalars as JSON lines to `<output>/runs/<run name>/scalars.jsonl`.
pub struct JsonlMetricsSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlMetricsSink {
    pub fn create(log_dir: &Path) -> Result<Self, RunError> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join("scalars.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Run directory used for a given output directory and training-log stem.
    pub fn run_dir(output: &Path, log_stem: &str) -> PathBuf {
        output.join("runs").join(log_stem)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn add_scalar(&self, tag: &str, value: f64, step: usize) -> Result<(), RunError> {
        let event = ScalarEvent {
            tag: tag.to_string(),
            value,
            step,
            wall_time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        let line = serde_json::to_string(&event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| RunError::metrics("scalar writer lock poisoned"))?;
        writeln!(writer, "{line}")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), RunError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| RunError::metrics("scalar writer lock poisoned"))?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps every scalar in memory.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    events: Mutex<Vec<(String, f64, usize)>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(tag, value, step)` triples in insertion order.
    pub fn events(&self) -> Vec<(String, f64, usize)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// The `(step, value)` series recorded under `tag`.
    pub fn series(&self, tag: &str) -> Vec<(usize, f64)> {
        self.events()
            .into_iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, value, step)| (step, value))
            .collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn add_scalar(&self, tag: &str, value: f64, step: usize) -> Result<(), RunError> {
        self.events
            .lock()
            .map_err(|_| RunError::metrics("metrics lock poisoned"))?
            .push((tag.to_string(), value, step));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(epoch: usize, validated: bool) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0 / (epoch + 1) as f64,
            train_acc: epoch as f64,
            learning_rates: vec![0.1],
            validation: validated.then_some(ValidationResult {
                train_acc: 50.0,
                test_acc: 40.0,
            }),
        }
    }

    #[test]
    fn test_history_accessors() {
        let mut history = TrainingHistory::new();
        history.push(record(0, false));
        history.push(record(1, true));
        history.push(record(2, false));
        assert_eq!(history.len(), 3);
        assert_eq!(history.epochs(), vec![0, 1, 2]);
        assert_eq!(history.validation_epochs(), vec![1]);
        assert_eq!(history.accuracies(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_set_last_validation() {
        let mut history = TrainingHistory::new();
        history.push(record(4, false));
        history.set_last_validation(ValidationResult {
            train_acc: 90.0,
            test_acc: 80.0,
        });
        assert_eq!(history.validation_epochs(), vec![4]);
    }

    #[test]
    fn test_memory_metrics_series() {
        let sink = MemoryMetrics::new();
        sink.add_scalar(TAG_TRAIN_LOSS, 0.5, 0).unwrap();
        sink.add_scalar(TAG_TRAIN_ACC, 10.0, 0).unwrap();
        sink.add_scalar(TAG_TRAIN_LOSS, 0.4, 1).unwrap();
        assert_eq!(sink.series(TAG_TRAIN_LOSS), vec![(0, 0.5), (1, 0.4)]);
        assert_eq!(sink.events().len(), 3);
    }

    #[test]
    fn test_jsonl_sink_writes_one_line_per_scalar() {
        let dir = TempDir::new().unwrap();
        let run_dir = JsonlMetricsSink::run_dir(dir.path(), "train_log");
        let sink = JsonlMetricsSink::create(&run_dir).unwrap();
        sink.add_scalar(TAG_TRAIN_LOSS, 0.75, 3).unwrap();
        sink.add_scalar(&learning_rate_tag(0), 0.1, 3).unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let events: Vec<ScalarEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag, "Loss/train_loss");
        assert_eq!(events[1].tag, "Learning_rate/group0");
        assert_eq!(events[1].step, 3);
    }
}
