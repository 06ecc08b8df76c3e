//! Divergence detection on the per-epoch training loss.

use serde::{Deserialize, Serialize};

/// Outcome of inspecting one epoch's loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossHealth {
    Healthy,
    /// The loss is NaN or infinite; every later gradient step would be poisoned.
    Fatal,
}

/// Circuit breaker for non-finite losses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DivergenceGuard;

impl DivergenceGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, loss: f64) -> LossHealth {
        if loss.is_finite() {
            LossHealth::Healthy
        } else {
            LossHealth::Fatal
        }
    }
}
