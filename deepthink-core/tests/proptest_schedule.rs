//! Property-based tests for the schedule and checkpoint policy using proptest.

use proptest::prelude::*;

use deepthink_core::checkpoint::{CheckpointPolicy, canonical_name};
use deepthink_core::{DivergenceGuard, LossHealth, RunConfig, ScheduleComposer};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * b.abs().max(1e-300)
}

// --- Schedule properties ---

proptest! {
    #[test]
    fn rate_is_base_before_first_milestone_after_warmup(
        base in 1e-5f64..1.0,
        warmup in 0usize..20,
        first_milestone in 20usize..200,
        offset in 0usize..200,
    ) {
        let schedule = ScheduleComposer::new(base, 0.1, &[first_milestone], warmup);
        let epoch = warmup + offset % (first_milestone - warmup).max(1);
        prop_assume!(epoch < first_milestone);
        prop_assert_eq!(schedule.rate(epoch), base);
    }

    #[test]
    fn rate_follows_milestone_count(
        base in 1e-4f64..1.0,
        factor in 0.05f64..0.95,
        milestones in proptest::collection::vec(1usize..300, 0..6),
        epoch in 0usize..400,
    ) {
        let schedule = ScheduleComposer::new(base, factor, &milestones, 0);
        let mut distinct = milestones.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let passed = distinct.iter().filter(|&&m| m <= epoch).count();
        prop_assert!(close(schedule.rate(epoch), base * factor.powi(passed as i32)));
    }

    #[test]
    fn rate_is_non_increasing_after_warmup(
        milestones in proptest::collection::vec(0usize..100, 0..5),
        epoch in 0usize..150,
    ) {
        let schedule = ScheduleComposer::new(0.1, 0.5, &milestones, 0);
        prop_assert!(schedule.rate(epoch + 1) <= schedule.rate(epoch));
    }

    #[test]
    fn warmup_factor_stays_in_unit_interval(warmup in 1usize..50, epoch in 0usize..100) {
        let schedule = ScheduleComposer::new(1.0, 0.1, &[], warmup);
        let factor = schedule.warmup_factor(epoch);
        prop_assert!(factor > 0.0 && factor <= 1.0);
        if epoch >= warmup {
            prop_assert_eq!(factor, 1.0);
        }
    }
}

// --- Checkpoint policy properties ---

proptest! {
    #[test]
    fn last_epoch_always_saves(epochs in 1usize..500, save_period in 1usize..500) {
        let policy = CheckpointPolicy::new(save_period, epochs);
        prop_assert!(policy.should_save(epochs - 1));
    }

    #[test]
    fn save_period_equal_to_epochs_saves_once(epochs in 1usize..300) {
        let policy = CheckpointPolicy::new(epochs, epochs);
        let saves = (0..epochs).filter(|&e| policy.should_save(e)).count();
        prop_assert_eq!(saves, 1);
    }

    #[test]
    fn checkpoint_names_are_unique_per_epoch(epochs in 2usize..200, a in 0usize..200, b in 0usize..200) {
        prop_assume!(a != b);
        let config = RunConfig { epochs, ..Default::default() };
        prop_assert_ne!(canonical_name(&config, a), canonical_name(&config, b));
    }

    #[test]
    fn checkpoint_names_distinguish_batch_size(x in 1usize..4096, y in 1usize..4096, epoch in 0usize..200) {
        prop_assume!(x != y);
        let a = RunConfig { train_batch_size: x, ..Default::default() };
        let b = RunConfig { train_batch_size: y, ..Default::default() };
        prop_assert_ne!(canonical_name(&a, epoch), canonical_name(&b, epoch));
        prop_assert_eq!(canonical_name(&a, epoch), canonical_name(&a, epoch));
    }

    #[test]
    fn finite_losses_are_healthy(loss in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        prop_assert_eq!(DivergenceGuard::new().classify(loss), LossHealth::Healthy);
    }
}
