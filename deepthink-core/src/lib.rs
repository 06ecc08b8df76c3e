//! # deepthink-core: run controller for recurrent, variable-depth models
//!
//! Drives the epoch loop of a training run and owns the policies around it:
//!
//! - [`schedule`]: exponential warmup composed with milestone decay, as a pure
//!   function of the epoch, so resuming never re-applies a passed milestone.
//! - [`divergence`]: non-finite losses end the run.
//! - [`checkpoint`]: when to persist, canonical file names, the on-disk store.
//! - [`controller`]: the per-epoch state machine.
//! - [`depth`]: the test-time iteration-budget override.
//! - [`experiment`]: resume, train, override, evaluate and summarize in one call.
//!
//! The model, optimizer, trainer and evaluator are collaborators behind the
//! traits in [`collaborators`].

pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod depth;
pub mod divergence;
pub mod error;
pub mod experiment;
pub mod metrics;
pub mod mock;
pub mod output;
pub mod persistence;
pub mod schedule;
pub mod summary;

pub use checkpoint::{CheckpointPolicy, CheckpointStore, canonical_name};
pub use collaborators::{DataSplit, EpochOutcome, Evaluator, Model, Optimizer, Trainer};
pub use config::{RunConfig, load_run_config};
pub use controller::{RunState, StartPoint, Termination, TrainingLoopController, TrainingReport};
pub use depth::{DepthSetting, TestTimeDepthController};
pub use divergence::{DivergenceGuard, LossHealth};
pub use error::RunError;
pub use experiment::{ExperimentOutcome, run_experiment};
pub use metrics::{EpochRecord, JsonlMetricsSink, MemoryMetrics, MetricsSink, TrainingHistory};
pub use output::{OutputSink, RecordingOutput, StdoutOutput, TeeOutput};
pub use schedule::ScheduleComposer;
pub use summary::RunSummary;
