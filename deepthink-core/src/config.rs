//! Run configuration.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI flags.
//! The resulting [`RunConfig`] is normalized once at startup and then only read.

use crate::error::RunError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment-variable overrides (`DEEPTHINK_EPOCHS=50`, ...).
pub const ENV_PREFIX: &str = "DEEPTHINK_";

/// Run/array identifier used when the training-log name carries no numeric suffix.
pub const DEFAULT_ARRAY_TASK_ID: &str = "1";

/// Every hyperparameter of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory checkpoints are written to.
    pub checkpoint: PathBuf,
    /// Name prefix of checkpoint files (model family).
    pub checkpoint_prefix: String,
    pub data_path: PathBuf,
    pub depth: usize,
    pub epochs: usize,
    /// Base learning rate.
    pub lr: f64,
    /// Multiplicative decay applied at each milestone.
    pub lr_factor: f64,
    /// Decay milestones, in epochs.
    pub lr_schedule: Vec<usize>,
    /// Keep at most this many checkpoints from the current run. `None` keeps all of them.
    pub max_checkpoints: Option<usize>,
    pub model: String,
    /// Checkpoint to resume from.
    pub model_path: Option<PathBuf>,
    pub optimizer: String,
    pub output: PathBuf,
    /// Skip the final train-split evaluation.
    pub quick_test: bool,
    pub save_json: bool,
    /// Save every `save_period` epochs. Unset means "only at the end".
    pub save_period: Option<usize>,
    pub shuffle: bool,
    pub test_batch_size: usize,
    /// Iteration budget for the final evaluation, if it differs from training.
    pub test_iterations: Option<usize>,
    pub test_maze_size: usize,
    pub test_mode: String,
    pub train_batch_size: usize,
    pub train_log: String,
    pub train_maze_size: usize,
    pub train_mode: String,
    pub val_period: usize,
    pub warmup_period: usize,
    pub width: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("check_default"),
            checkpoint_prefix: "recur_resnet_act".to_string(),
            data_path: PathBuf::from("../data"),
            depth: 1,
            epochs: 200,
            lr: 0.1,
            lr_factor: 0.1,
            lr_schedule: vec![100, 150],
            max_checkpoints: None,
            model: "recur_resnet".to_string(),
            model_path: None,
            optimizer: "adam".to_string(),
            output: PathBuf::from("output_default"),
            quick_test: false,
            save_json: false,
            save_period: None,
            shuffle: true,
            test_batch_size: 500,
            test_iterations: None,
            test_maze_size: 13,
            test_mode: "default".to_string(),
            train_batch_size: 128,
            train_log: "train_log.txt".to_string(),
            train_maze_size: 9,
            train_mode: "default".to_string(),
            val_period: 20,
            warmup_period: 5,
            width: 4,
        }
    }
}

impl RunConfig {
    /// Normalize and validate a freshly loaded configuration.
    ///
    /// Lower-cases the train/test modes and fills an unset `save_period` with `epochs`.
    pub fn normalize(mut self) -> Result<Self, RunError> {
        self.train_mode = self.train_mode.to_lowercase();
        self.test_mode = self.test_mode.to_lowercase();
        if self.save_period.is_none() {
            self.save_period = Some(self.epochs);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the run loop cannot work with.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.epochs == 0 {
            return Err(RunError::config("epochs must be greater than zero"));
        }
        if self.val_period == 0 {
            return Err(RunError::config("val_period must be greater than zero"));
        }
        if self.save_period == Some(0) {
            return Err(RunError::config("save_period must be greater than zero"));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(RunError::config(format!(
                "lr must be a positive number, got {}",
                self.lr
            )));
        }
        if !self.lr_factor.is_finite() || self.lr_factor <= 0.0 {
            return Err(RunError::config(format!(
                "lr_factor must be a positive number, got {}",
                self.lr_factor
            )));
        }
        if self.test_iterations == Some(0) {
            return Err(RunError::config("test_iterations must be a positive integer"));
        }
        if self.max_checkpoints == Some(0) {
            return Err(RunError::config("max_checkpoints must be greater than zero"));
        }
        if self.checkpoint_prefix.is_empty() {
            return Err(RunError::config("checkpoint_prefix must not be empty"));
        }
        Ok(())
    }

    /// Save period in epochs; `epochs` when none was configured.
    pub fn effective_save_period(&self) -> usize {
        self.save_period.unwrap_or(self.epochs)
    }

    /// Index of the final epoch.
    pub fn last_epoch(&self) -> usize {
        self.epochs.saturating_sub(1)
    }

    /// Training-log file name without its extension.
    pub fn log_stem(&self) -> String {
        Path::new(&self.train_log)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.train_log.clone())
    }

    /// Run/array identifier: the trailing `_<digits>` token of the training-log stem.
    ///
    /// `train_log_3.txt` yields `"3"`; `train_log.txt` falls back to `"1"`.
    pub fn array_task_id(&self) -> String {
        let stem = self.log_stem();
        match stem.rsplit('_').next() {
            Some(token) if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) => {
                token.to_string()
            }
            _ => DEFAULT_ARRAY_TASK_ID.to_string(),
        }
    }

    /// Model identifier used in summaries: `<model>_depth=<depth>_width=<width>`.
    pub fn model_name(&self) -> String {
        format!("{}_depth={}_width={}", self.model, self.depth, self.width)
    }

    /// Learning rate as it appears in checkpoint and report file names.
    pub fn lr_label(&self) -> String {
        display_float(self.lr)
    }

    /// Test-iteration value as reported in summaries, `-1` meaning "training depth".
    pub fn reported_test_iterations(&self) -> i64 {
        self.test_iterations.map(|n| n as i64).unwrap_or(-1)
    }

    /// `key: value` lines describing every field, in key order.
    pub fn describe(&self) -> Vec<String> {
        let value = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return Vec::new(),
        };
        value
            .into_iter()
            .map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::Null => "none".to_string(),
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                format!("{key}: {rendered}")
            })
            .collect()
    }
}

/// Render a float the way run artifacts name it: `0.1`, `1.0`, `1e-05`, `2.5e+16`.
///
/// Shortest round-trip digits, a trailing `.0` on integral values, and
/// scientific notation with an at-least-two-digit exponent below `1e-4` or
/// from `1e16` on.
pub fn display_float(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let magnitude = value.abs();
    if value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{value:e}");
        return match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => sci,
        };
    }
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Load the run configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (CLI flags; only the fields they serialize are applied)
/// 2. Environment variables (prefixed with `DEEPTHINK_`)
/// 3. The optional TOML config file
/// 4. Built-in defaults
///
/// The result still needs [`RunConfig::normalize`].
pub fn load_run_config<T: Serialize>(
    config_file: Option<&Path>,
    overrides: Option<&T>,
) -> Result<RunConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RunConfig::default()));

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Partial {
        epochs: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        test_iterations: Option<usize>,
    }

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.epochs, 200);
        assert_eq!(config.lr_schedule, vec![100, 150]);
        assert_eq!(config.warmup_period, 5);
        assert_eq!(config.val_period, 20);
        assert!(config.shuffle);
        assert!(config.save_period.is_none());
        assert!(config.test_iterations.is_none());
    }

    #[test]
    fn test_normalize_fills_save_period_and_lowercases_modes() {
        let config = RunConfig {
            epochs: 30,
            train_mode: "Default".into(),
            test_mode: "MAX_CONF".into(),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(config.save_period, Some(30));
        assert_eq!(config.train_mode, "default");
        assert_eq!(config.test_mode, "max_conf");
    }

    #[test]
    fn test_normalize_rejects_invalid_values() {
        for bad in [
            RunConfig {
                epochs: 0,
                ..Default::default()
            },
            RunConfig {
                val_period: 0,
                ..Default::default()
            },
            RunConfig {
                lr: f64::NAN,
                ..Default::default()
            },
            RunConfig {
                lr_factor: -0.5,
                ..Default::default()
            },
            RunConfig {
                test_iterations: Some(0),
                ..Default::default()
            },
            RunConfig {
                save_period: Some(0),
                ..Default::default()
            },
        ] {
            assert!(matches!(bad.normalize(), Err(RunError::Config(_))));
        }
    }

    #[test]
    fn test_array_task_id_from_log_name() {
        let mut config = RunConfig {
            train_log: "train_log_42.txt".into(),
            ..Default::default()
        };
        assert_eq!(config.array_task_id(), "42");

        config.train_log = "train_log.txt".into();
        assert_eq!(config.array_task_id(), DEFAULT_ARRAY_TASK_ID);

        config.train_log = "run_7b.txt".into();
        assert_eq!(config.array_task_id(), DEFAULT_ARRAY_TASK_ID);

        config.train_log = "noext_5".into();
        assert_eq!(config.array_task_id(), "5");
    }

    #[test]
    fn test_model_name_and_reported_iterations() {
        let mut config = RunConfig {
            depth: 20,
            width: 8,
            ..Default::default()
        };
        assert_eq!(config.model_name(), "recur_resnet_depth=20_width=8");
        assert_eq!(config.reported_test_iterations(), -1);
        config.test_iterations = Some(50);
        assert_eq!(config.reported_test_iterations(), 50);
    }

    #[test]
    fn test_display_float_in_file_names() {
        assert_eq!(display_float(0.1), "0.1");
        assert_eq!(display_float(0.001), "0.001");
        assert_eq!(display_float(0.0001), "0.0001");
        assert_eq!(display_float(1e-5), "1e-05");
        assert_eq!(display_float(2.5e-5), "2.5e-05");
        assert_eq!(display_float(1.0), "1.0");
        assert_eq!(display_float(0.0), "0.0");
        assert_eq!(display_float(1e16), "1e+16");
        assert_eq!(display_float(1e-100), "1e-100");

        let config = RunConfig {
            lr: 1e-5,
            ..Default::default()
        };
        assert_eq!(config.lr_label(), "1e-05");
    }

    #[test]
    fn test_describe_lists_every_field() {
        let lines = RunConfig::default().describe();
        assert!(lines.contains(&"epochs: 200".to_string()));
        assert!(lines.contains(&"model_path: none".to_string()));
        assert!(lines.contains(&"optimizer: adam".to_string()));
        assert!(lines.contains(&"lr_schedule: [100,150]".to_string()));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = RunConfig {
            test_iterations: Some(50),
            ..Default::default()
        };
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: RunConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_load_run_config_defaults() {
        let config = load_run_config::<RunConfig>(None, None).unwrap();
        assert_eq!(config.lr_schedule, vec![100, 150]);
    }

    #[test]
    fn test_load_run_config_with_partial_overrides() {
        let overrides = Partial {
            epochs: 12,
            test_iterations: None,
        };
        let config = load_run_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.epochs, 12);
        assert_eq!(config.optimizer, "adam");
        assert!(config.test_iterations.is_none());
    }

    #[test]
    fn test_load_run_config_from_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            r#"
epochs = 40
optimizer = "sgd"
lr_schedule = [10, 20, 30]
test_iterations = 8
"#,
        )
        .unwrap();

        let overrides = Partial {
            epochs: 50,
            test_iterations: None,
        };
        let config = load_run_config(Some(&path), Some(&overrides)).unwrap();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.optimizer, "sgd");
        assert_eq!(config.lr_schedule, vec![10, 20, 30]);
        assert_eq!(config.test_iterations, Some(8));
    }
}
