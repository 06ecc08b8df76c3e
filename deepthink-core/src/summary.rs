//! Final run summary and the file names of run reports.

use crate::config::RunConfig;
use crate::depth::DepthSetting;
use crate::error::RunError;
use crate::persistence;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Accuracy reported when the final train-split evaluation was skipped.
pub const SKIPPED_ACCURACY: f64 = -1.0;

/// Ordered statistics of a finished run. Field order is the export order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub epochs: usize,
    #[serde(rename = "learning rate")]
    pub learning_rate: f64,
    pub lr: f64,
    pub lr_factor: f64,
    /// `<model>_depth=<depth>_width=<width>`
    pub model: String,
    pub num_params: usize,
    pub optimizer: String,
    pub test_acc: f64,
    /// Test-time iteration override, `-1` when evaluated at training depth.
    pub test_iter: i64,
    pub test_mode: String,
    /// `-1` when skipped.
    pub train_acc: f64,
    pub train_batch_size: usize,
    pub train_mode: String,
}

impl RunSummary {
    pub fn new(
        config: &RunConfig,
        num_params: usize,
        depth: DepthSetting,
        test_acc: f64,
        train_acc: Option<f64>,
    ) -> Self {
        Self {
            epochs: config.epochs,
            learning_rate: config.lr,
            lr: config.lr,
            lr_factor: config.lr_factor,
            model: config.model_name(),
            num_params,
            optimizer: config.optimizer.clone(),
            test_acc,
            test_iter: depth.reported(),
            test_mode: config.test_mode.clone(),
            train_acc: train_acc.unwrap_or(SKIPPED_ACCURACY),
            train_batch_size: config.train_batch_size,
            train_mode: config.train_mode.clone(),
        }
    }

    pub fn evaluated_at_training_depth(&self) -> bool {
        self.test_iter < 0
    }

    /// Write the summary as JSON to `path`.
    pub fn write_json(&self, path: &Path) -> Result<(), RunError> {
        persistence::atomic_write_json(path, self)?;
        Ok(())
    }
}

/// Tag shared by the run's report files.
///
/// `model=<model>_depth=<d>_width=<w>_lr=<lr>_batch=<b>_epoch=<epochs>_testiter=<n|-1>`
pub fn run_tag(config: &RunConfig) -> String {
    format!(
        "model={}_depth={}_width={}_lr={}_batch={}_epoch={}_testiter={}",
        config.model,
        config.depth,
        config.width,
        config.lr_label(),
        config.train_batch_size,
        config.epochs,
        config.reported_test_iterations(),
    )
}

/// Per-epoch history export, for external plotting.
pub fn history_path(config: &RunConfig) -> PathBuf {
    config
        .output
        .join(format!("train_metrics_{}.json", run_tag(config)))
}

/// Text log of the final evaluation phase.
pub fn report_path(config: &RunConfig) -> PathBuf {
    config
        .output
        .join(format!("train_metrics_{}.txt", run_tag(config)))
}

/// Summary statistics export.
pub fn summary_path(config: &RunConfig) -> PathBuf {
    config
        .output
        .join(format!("stats_{}.json", config.log_stem()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary_keys_in_order() {
        let config = RunConfig {
            depth: 20,
            ..Default::default()
        };
        let summary = RunSummary::new(&config, 1234, DepthSetting::Overridden(50), 88.5, None);
        let json = serde_json::to_string(&summary).unwrap();
        let keys: Vec<String> = json
            .trim_matches(|c| c == '{' || c == '}')
            .split(',')
            .map(|kv| kv.split(':').next().unwrap().trim_matches('"').to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "epochs",
                "learning rate",
                "lr",
                "lr_factor",
                "model",
                "num_params",
                "optimizer",
                "test_acc",
                "test_iter",
                "test_mode",
                "train_acc",
                "train_batch_size",
                "train_mode",
            ]
        );
        assert_eq!(summary.test_iter, 50);
        assert_eq!(summary.train_acc, -1.0);
        assert_eq!(summary.model, "recur_resnet_depth=20_width=4");
        assert!(!summary.evaluated_at_training_depth());
    }

    #[test]
    fn test_training_depth_sentinel() {
        let summary = RunSummary::new(
            &RunConfig::default(),
            10,
            DepthSetting::TrainingDepth,
            70.0,
            Some(75.0),
        );
        assert_eq!(summary.test_iter, -1);
        assert_eq!(summary.train_acc, 75.0);
        assert!(summary.evaluated_at_training_depth());
    }

    #[test]
    fn test_report_file_names() {
        let config = RunConfig {
            test_iterations: Some(30),
            train_log: "train_log_4.txt".into(),
            ..Default::default()
        };
        assert_eq!(
            run_tag(&config),
            "model=recur_resnet_depth=1_width=4_lr=0.1_batch=128_epoch=200_testiter=30"
        );
        assert!(report_path(&config).to_string_lossy().ends_with("_testiter=30.txt"));
        let integral = RunConfig {
            lr: 1.0,
            ..Default::default()
        };
        assert!(run_tag(&integral).contains("_lr=1.0_"));
        assert!(summary_path(&config).ends_with("stats_train_log_4.json"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let summary = RunSummary::new(
            &RunConfig::default(),
            10,
            DepthSetting::TrainingDepth,
            70.0,
            None,
        );
        summary.write_json(&path).unwrap();
        let back: RunSummary =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, summary);
    }
}
