//! deepthink CLI: trains a recurrent, variable-depth model end to end.
//!
//! Flags override `DEEPTHINK_*` environment variables, which override the
//! config file, which overrides the built-in defaults.

mod sim;

use clap::Parser;
use deepthink_core::{
    JsonlMetricsSink, MetricsSink, OutputSink, RunError, StdoutOutput, load_run_config,
    run_experiment,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Exit status of a run that stopped on a non-finite loss.
const EXIT_DIVERGED: u8 = 2;

/// Train a recurrent residual network with warmup, milestone decay and checkpointing
#[derive(Parser, Debug)]
#[command(name = "deepthink", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the synthetic data and weight initialization
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

/// Run hyperparameters. Only the flags given on the command line are applied.
#[derive(clap::Args, Serialize, Debug, Default)]
struct RunArgs {
    /// Directory to save checkpoints in
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<PathBuf>,

    /// Checkpoint file-name prefix
    #[arg(long = "checkpoint_prefix")]
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint_prefix: Option<String>,

    /// Where the data lives
    #[arg(long = "data_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_path: Option<PathBuf>,

    /// Depth of the network
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<usize>,

    /// Number of epochs to train for
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    epochs: Option<usize>,

    /// Base learning rate
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    lr: Option<f64>,

    /// Learning-rate decay factor
    #[arg(long = "lr_factor")]
    #[serde(skip_serializing_if = "Option::is_none")]
    lr_factor: Option<f64>,

    /// Epochs at which the learning rate decays
    #[arg(long = "lr_schedule", num_args = 1..)]
    #[serde(skip_serializing_if = "Option::is_none")]
    lr_schedule: Option<Vec<usize>>,

    /// Keep at most this many checkpoints from this run
    #[arg(long = "max_checkpoints")]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_checkpoints: Option<usize>,

    /// Model family
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,

    /// Checkpoint to resume from
    #[arg(long = "model_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    model_path: Option<PathBuf>,

    /// Optimizer: sgd, adam or adamw
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    optimizer: Option<String>,

    /// Output directory
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,

    /// Skip the final evaluation on the training split
    #[arg(long = "quick_test")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    quick_test: bool,

    /// Write the run summary as JSON
    #[arg(long = "save_json")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    save_json: bool,

    /// Save a checkpoint every this many epochs
    #[arg(long = "save_period")]
    #[serde(skip_serializing_if = "Option::is_none")]
    save_period: Option<usize>,

    /// Do not shuffle the training data
    #[arg(long = "no_shuffle")]
    #[serde(skip)]
    no_shuffle: bool,

    #[arg(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    shuffle: Option<bool>,

    /// Batch size for testing
    #[arg(long = "test_batch_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    test_batch_size: Option<usize>,

    /// Iteration budget for the final evaluation
    #[arg(long = "test_iterations")]
    #[serde(skip_serializing_if = "Option::is_none")]
    test_iterations: Option<usize>,

    /// Maze size of the test data
    #[arg(long = "test_maze_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    test_maze_size: Option<usize>,

    /// Testing mode
    #[arg(long = "test_mode")]
    #[serde(skip_serializing_if = "Option::is_none")]
    test_mode: Option<String>,

    /// Batch size for training
    #[arg(long = "train_batch_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    train_batch_size: Option<usize>,

    /// Name of the training log file
    #[arg(long = "train_log")]
    #[serde(skip_serializing_if = "Option::is_none")]
    train_log: Option<String>,

    /// Maze size of the training data
    #[arg(long = "train_maze_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    train_maze_size: Option<usize>,

    /// Training mode
    #[arg(long = "train_mode")]
    #[serde(skip_serializing_if = "Option::is_none")]
    train_mode: Option<String>,

    /// Validate every this many epochs
    #[arg(long = "val_period")]
    #[serde(skip_serializing_if = "Option::is_none")]
    val_period: Option<usize>,

    /// Warmup length in epochs
    #[arg(long = "warmup_period")]
    #[serde(skip_serializing_if = "Option::is_none")]
    warmup_period: Option<usize>,

    /// Width of the network
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<usize>,
}

impl RunArgs {
    /// Fold negative flags into the fields they override.
    fn resolve(mut self) -> Self {
        if self.no_shuffle {
            self.shuffle = Some(false);
        }
        self
    }
}

/// Stderr for humans, a daily JSON file under `<output>/logs` for machines.
fn init_tracing(
    verbose: u8,
    quiet: bool,
    output: &Path,
) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = output.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepthink.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let overrides = cli.run.resolve();

    let config = load_run_config(cli.config.as_deref(), Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?
        .normalize()?;

    let _guard = init_tracing(cli.verbose, cli.quiet, &config.output);
    tracing::info!(
        epochs = config.epochs,
        optimizer = %config.optimizer,
        depth = config.depth,
        "Starting run"
    );

    let sim::SyntheticBackend {
        mut model,
        mut optimizer,
        mut trainer,
        mut evaluator,
    } = sim::SyntheticBackend::build(&config, cli.seed)?;

    let metrics: Arc<dyn MetricsSink> = Arc::new(JsonlMetricsSink::create(
        &JsonlMetricsSink::run_dir(&config.output, &config.log_stem()),
    )?);
    let output: Arc<dyn OutputSink> = Arc::new(StdoutOutput);

    let result = run_experiment(
        &config,
        &mut model,
        &mut optimizer,
        &mut trainer,
        &mut evaluator,
        metrics.clone(),
        output,
    )
    .await;
    metrics.flush()?;

    match result {
        Ok(outcome) => {
            tracing::info!(
                test_acc = outcome.summary.test_acc,
                train_acc = outcome.summary.train_acc,
                test_iter = outcome.summary.test_iter,
                "Run finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(RunError::Diverged { epoch, loss }) => {
            tracing::error!(epoch, loss, "Training diverged");
            Ok(ExitCode::from(EXIT_DIVERGED))
        }
        Err(e) => Err(e.into()),
    }
}
