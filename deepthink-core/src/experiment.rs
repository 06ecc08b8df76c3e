//! End-to-end run: resume, train, re-configure depth, evaluate, summarize.

use crate::checkpoint::CheckpointStore;
use crate::collaborators::{DataSplit, Evaluator, Model, Optimizer, Trainer};
use crate::config::RunConfig;
use crate::controller::{StartPoint, TrainingLoopController, TrainingReport};
use crate::depth::{DepthSetting, TestTimeDepthController};
use crate::error::RunError;
use crate::metrics::{MetricsSink, TrainingHistory};
use crate::output::{OutputSink, TeeOutput};
use crate::persistence;
use crate::summary::{self, RunSummary};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentOutcome {
    pub summary: RunSummary,
    pub report: TrainingReport,
    pub depth: DepthSetting,
    /// Where the summary was written, if `save_json` was set.
    pub summary_file: Option<PathBuf>,
}

/// Restore `model` (and `optimizer`, when the checkpoint carries its state)
/// from `config.model_path`. Load failures propagate unchanged.
pub fn resume<M: Model, O: Optimizer>(
    config: &RunConfig,
    model: &mut M,
    optimizer: &mut O,
    output: &dyn OutputSink,
) -> Result<StartPoint, RunError> {
    let Some(path) = config.model_path.as_deref() else {
        return Ok(StartPoint::fresh());
    };

    output.write_line(&format!("Loading model from checkpoint {}...", path.display()));
    let loaded = CheckpointStore::load(path)?;
    model.load_state_dict(loaded.model_state.clone())?;

    let optimizer_restored = match loaded.optimizer_state.clone() {
        Some(state) => {
            output.write_line(&format!(
                "Loading optimizer from checkpoint {}...",
                path.display()
            ));
            optimizer.load_state_dict(state)?;
            true
        }
        None => false,
    };

    let start = StartPoint::after(&loaded, optimizer_restored);
    tracing::info!(
        path = %path.display(),
        saved_epoch = loaded.epoch,
        start_epoch = start.start_epoch,
        optimizer_restored,
        "Resumed from checkpoint"
    );
    Ok(start)
}

/// Append the effective configuration to `<output>/<train_log>`.
fn log_config(config: &RunConfig, output: &dyn OutputSink) -> Result<(), RunError> {
    let lines = config.describe();
    for line in &lines {
        output.write_line(line);
    }

    std::fs::create_dir_all(&config.output)?;
    let path = config.output.join(&config.train_log);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{} train run", Local::now().format("%Y%m%d %H:%M:%S"))?;
    for line in &lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// Run a whole experiment against the given collaborators.
///
/// Divergence surfaces as [`RunError::Diverged`]; nothing after the training
/// loop runs in that case.
pub async fn run_experiment<M, O, T, E>(
    config: &RunConfig,
    model: &mut M,
    optimizer: &mut O,
    trainer: &mut T,
    evaluator: &mut E,
    metrics: Arc<dyn MetricsSink>,
    output: Arc<dyn OutputSink>,
) -> Result<ExperimentOutcome, RunError>
where
    M: Model,
    O: Optimizer,
    T: Trainer<M, O>,
    E: Evaluator<M>,
{
    config.validate()?;
    log_config(config, output.as_ref())?;

    let start = resume(config, model, optimizer, output.as_ref())?;
    let num_params = model.num_parameters();
    output.write_line(&format!(
        "This {} has {:.3} million parameters.",
        config.model,
        num_params as f64 / 1e6
    ));
    output.write_line(&format!("Training will start at epoch {}.", start.start_epoch));

    let mut controller = TrainingLoopController::new(config, start, metrics, output.clone());
    let report = controller.run(model, optimizer, trainer, evaluator).await?;

    write_history(config, &report.history)?;

    let report_file = summary::report_path(config);
    let tee: Arc<dyn OutputSink> = Arc::new(TeeOutput::create(output, &report_file)?);
    tee.write_line("==> Starting testing...");

    let depth = TestTimeDepthController::from_config(config).apply_override(model, &report);
    let mode = config.test_mode.as_str();
    let test_acc = evaluator.evaluate(model, DataSplit::Test, mode).await?;
    let train_acc = if config.quick_test {
        None
    } else {
        Some(evaluator.evaluate(model, DataSplit::Train, mode).await?)
    };

    let summary = RunSummary::new(config, num_params, depth, test_acc, train_acc);
    let now = Local::now().format("%Y%m%d %H:%M:%S");
    tee.write_line(&format!("{now} Training accuracy: {}", summary.train_acc));
    tee.write_line(&format!("{now} Testing accuracy: {}", summary.test_acc));
    tee.write_line(&format!("Test iterations: {}", summary.test_iter));

    let summary_file = if config.save_json {
        let path = summary::summary_path(config);
        summary.write_json(&path)?;
        tracing::info!(path = %path.display(), "Summary written");
        Some(path)
    } else {
        None
    };

    Ok(ExperimentOutcome {
        summary,
        report,
        depth,
        summary_file,
    })
}

fn write_history(config: &RunConfig, history: &TrainingHistory) -> Result<(), RunError> {
    let path = summary::history_path(config);
    persistence::atomic_write_json(&path, history)?;
    tracing::debug!(path = %path.display(), epochs = history.len(), "History written");
    Ok(())
}
