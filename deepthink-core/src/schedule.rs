//! Learning-rate schedule: exponential warmup composed with milestone decay.
//!
//! The composed rate is a pure function of the epoch, so a resumed run computes
//! exactly the rate an uninterrupted run would have reached at the same epoch
//! and milestones passed before the checkpoint are never applied twice.

use crate::config::RunConfig;
use std::collections::BTreeSet;

/// Composes the warmup ramp with the milestone-decay curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleComposer {
    base_rate: f64,
    lr_factor: f64,
    milestones: BTreeSet<usize>,
    warmup_period: usize,
}

impl ScheduleComposer {
    pub fn new(base_rate: f64, lr_factor: f64, milestones: &[usize], warmup_period: usize) -> Self {
        Self {
            base_rate,
            lr_factor,
            milestones: milestones.iter().copied().collect(),
            warmup_period,
        }
    }

    /// Build the schedule for a run. A resumed run has no warmup left.
    pub fn from_config(config: &RunConfig, resumed: bool) -> Self {
        let warmup_period = if resumed { 0 } else { config.warmup_period };
        Self::new(config.lr, config.lr_factor, &config.lr_schedule, warmup_period)
    }

    /// Warmup length in effect (0 after a resume).
    pub fn warmup_period(&self) -> usize {
        self.warmup_period
    }

    /// Number of distinct milestones at or before `epoch`.
    pub fn milestones_passed(&self, epoch: usize) -> usize {
        self.milestones.range(..=epoch).count()
    }

    /// Piecewise-constant decay multiplier: `lr_factor ^ milestones_passed(epoch)`.
    pub fn decay_factor(&self, epoch: usize) -> f64 {
        self.lr_factor.powi(self.milestones_passed(epoch) as i32)
    }

    /// Exponential warmup multiplier, exactly 1 from `warmup_period` on.
    pub fn warmup_factor(&self, epoch: usize) -> f64 {
        if epoch >= self.warmup_period {
            return 1.0;
        }
        let period = self.warmup_period as f64;
        1.0 - (-((epoch + 1) as f64) / period).exp()
    }

    /// Combined multiplier applied to the base rate.
    pub fn multiplier(&self, epoch: usize) -> f64 {
        self.warmup_factor(epoch) * self.decay_factor(epoch)
    }

    /// Learning rate in effect during `epoch`.
    pub fn rate(&self, epoch: usize) -> f64 {
        self.base_rate * self.multiplier(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn test_base_rate_before_milestones_after_warmup() {
        let schedule = ScheduleComposer::new(0.1, 0.1, &[100, 150], 5);
        for epoch in 5..100 {
            assert_eq!(schedule.rate(epoch), 0.1);
        }
    }

    #[test]
    fn test_milestone_decay() {
        let schedule = ScheduleComposer::new(0.1, 0.1, &[100, 150], 0);
        assert!(approx(schedule.rate(99), 0.1));
        assert!(approx(schedule.rate(100), 0.01));
        assert!(approx(schedule.rate(120), 0.01));
        assert!(approx(schedule.rate(149), 0.01));
        assert!(approx(schedule.rate(150), 0.001));
        assert!(approx(schedule.rate(199), 0.001));
    }

    #[test]
    fn test_duplicate_and_unsorted_milestones_collapse() {
        let schedule = ScheduleComposer::new(1.0, 0.5, &[30, 10, 10, 30], 0);
        assert_eq!(schedule.milestones_passed(9), 0);
        assert_eq!(schedule.milestones_passed(10), 1);
        assert_eq!(schedule.milestones_passed(30), 2);
        assert!(approx(schedule.rate(40), 0.25));
    }

    #[test]
    fn test_warmup_ramps_up_to_one() {
        let schedule = ScheduleComposer::new(0.1, 0.1, &[], 5);
        let mut previous = 0.0;
        for epoch in 0..5 {
            let factor = schedule.warmup_factor(epoch);
            assert!(factor > previous && factor < 1.0, "epoch {epoch}: {factor}");
            previous = factor;
        }
        assert_eq!(schedule.warmup_factor(5), 1.0);
        assert!(schedule.rate(0) < 0.1 * 0.25);
    }

    #[test]
    fn test_resume_collapses_warmup() {
        let config = RunConfig {
            warmup_period: 5,
            ..Default::default()
        };
        let fresh = ScheduleComposer::from_config(&config, false);
        let resumed = ScheduleComposer::from_config(&config, true);
        assert_eq!(fresh.warmup_period(), 5);
        assert_eq!(resumed.warmup_period(), 0);
        assert_eq!(resumed.rate(0), config.lr);
    }

    #[test]
    fn test_resume_does_not_reapply_passed_milestones() {
        let config = RunConfig {
            lr: 0.1,
            lr_schedule: vec![100, 150],
            ..Default::default()
        };
        let fresh = ScheduleComposer::from_config(&config, false);
        let resumed = ScheduleComposer::from_config(&config, true);
        for epoch in [100, 120, 150, 180] {
            assert_eq!(resumed.rate(epoch), fresh.rate(epoch));
        }
    }
}
