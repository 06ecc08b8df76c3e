//! Test-time iteration budget.
//!
//! A recurrent model trained with one iteration budget can be benchmarked
//! with another; this is applied once, after training has completed.

use crate::collaborators::Model;
use crate::config::RunConfig;
use crate::controller::TrainingReport;
use serde::{Deserialize, Serialize};

/// Depth the final evaluation runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthSetting {
    /// The model kept the budget it was trained with.
    TrainingDepth,
    Overridden(usize),
}

impl DepthSetting {
    /// Value written to summaries: the override, or `-1` for training depth.
    pub fn reported(&self) -> i64 {
        match self {
            DepthSetting::TrainingDepth => -1,
            DepthSetting::Overridden(n) => *n as i64,
        }
    }
}

/// Applies the optional `test_iterations` override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestTimeDepthController {
    fixed_iterations: Option<usize>,
}

impl TestTimeDepthController {
    pub fn new(fixed_iterations: Option<usize>) -> Self {
        Self { fixed_iterations }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.test_iterations)
    }

    /// Reconfigure `model` for the final evaluation.
    ///
    /// Takes the finished run's report so the override cannot precede training.
    pub fn apply_override<M: Model>(&self, model: &mut M, trained: &TrainingReport) -> DepthSetting {
        match self.fixed_iterations {
            Some(iterations) => {
                let native = model.max_iterations();
                model.set_max_iterations(iterations);
                tracing::info!(
                    native,
                    iterations,
                    epochs_run = trained.epochs_run,
                    "Overriding iteration budget for final evaluation"
                );
                DepthSetting::Overridden(iterations)
            }
            None => {
                tracing::debug!(
                    native = model.max_iterations(),
                    "Evaluating at training depth"
                );
                DepthSetting::TrainingDepth
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrainingHistory;
    use crate::mock::MockModel;

    fn report() -> TrainingReport {
        TrainingReport {
            start_epoch: 0,
            epochs_run: 0,
            history: TrainingHistory::new(),
            checkpoints: Vec::new(),
        }
    }

    #[test]
    fn test_override_sets_model_budget() {
        let mut model = MockModel::new(20);
        let setting = TestTimeDepthController::new(Some(50)).apply_override(&mut model, &report());
        assert_eq!(model.max_iters, 50);
        assert_eq!(setting, DepthSetting::Overridden(50));
        assert_eq!(setting.reported(), 50);
    }

    #[test]
    fn test_no_override_keeps_native_depth() {
        let mut model = MockModel::new(20);
        let setting = TestTimeDepthController::new(None).apply_override(&mut model, &report());
        assert_eq!(model.max_iters, 20);
        assert_eq!(setting, DepthSetting::TrainingDepth);
        assert_eq!(setting.reported(), -1);
    }
}
