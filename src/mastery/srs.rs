//! Pure spaced-repetition math.
//!
//! Deliberately simple: an exponentially-weighted estimate blend plus a
//! geometric review interval. Every constant comes from [`MasteryConfig`].

use crate::config::MasteryConfig;

/// Weight of a new outcome in the EWMA blend. Shrinks as the review count
/// grows so an established estimate stops swinging on single outcomes.
pub fn outcome_weight(review_count: u32, config: &MasteryConfig) -> f64 {
    config.base_weight / (1.0 + review_count as f64 * config.weight_shrink)
}

/// New mastery estimate after observing `outcome` in [0,1].
pub fn blend_estimate(prior: f64, outcome: f64, review_count: u32, config: &MasteryConfig) -> f64 {
    let w = outcome_weight(review_count, config);
    ((1.0 - w) * prior + w * outcome).clamp(0.0, 1.0)
}

/// Next review interval in days. Success multiplies the current interval by
/// the growth factor, clamped to [min, max]; a zero prior (first review)
/// therefore lands on the minimum. Failure resets to the minimum.
pub fn next_interval_days(current_days: f64, success: bool, config: &MasteryConfig) -> f64 {
    if !success {
        return config.min_interval_days;
    }
    (current_days * config.growth_factor)
        .clamp(config.min_interval_days, config.max_interval_days)
}

/// Symmetric confidence interval around the estimate. Narrows with review
/// count; each lapse widens it again until the learner re-stabilizes with
/// `stabilize_successes` consecutive successes.
pub fn confidence_bounds(
    estimate: f64,
    review_count: u32,
    lapse_count: u32,
    consecutive_successes: u32,
    config: &MasteryConfig,
) -> (f64, f64) {
    let mut half_width = config.confidence_z / (review_count as f64 + 1.0).sqrt();
    if lapse_count > 0 && consecutive_successes < config.stabilize_successes {
        half_width *= 1.0 + 0.3 * lapse_count as f64;
    }
    (
        (estimate - half_width).max(0.0),
        (estimate + half_width).min(1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_shrinks_with_review_count() {
        let config = MasteryConfig::default();
        let w0 = outcome_weight(0, &config);
        let w5 = outcome_weight(5, &config);
        let w50 = outcome_weight(50, &config);
        assert!(w0 > w5);
        assert!(w5 > w50);
        assert!((w0 - config.base_weight).abs() < 1e-9);
    }

    #[test]
    fn blend_moves_toward_outcome_and_stays_bounded() {
        let config = MasteryConfig::default();
        let up = blend_estimate(0.3, 1.0, 2, &config);
        assert!(up > 0.3 && up <= 1.0);

        let down = blend_estimate(0.3, 0.0, 2, &config);
        assert!(down < 0.3 && down >= 0.0);
    }

    #[test]
    fn first_success_starts_at_the_minimum_interval() {
        let config = MasteryConfig::default();
        assert_eq!(
            next_interval_days(0.0, true, &config),
            config.min_interval_days
        );
    }

    #[test]
    fn interval_grows_on_success_and_is_capped() {
        let config = MasteryConfig::default();
        let mut interval = config.min_interval_days;
        let mut previous = 0.0;
        for _ in 0..32 {
            interval = next_interval_days(interval, true, &config);
            assert!(interval > previous || interval == config.max_interval_days);
            assert!(interval <= config.max_interval_days);
            previous = interval;
        }
        assert_eq!(interval, config.max_interval_days);
    }

    #[test]
    fn interval_resets_on_failure() {
        let config = MasteryConfig::default();
        let grown = next_interval_days(16.0, true, &config);
        assert!(grown > 16.0);
        assert_eq!(
            next_interval_days(grown, false, &config),
            config.min_interval_days
        );
    }

    #[test]
    fn confidence_narrows_with_reviews_and_widens_on_lapse() {
        let config = MasteryConfig::default();
        let (low_new, high_new) = confidence_bounds(0.5, 1, 0, 1, &config);
        let (low_old, high_old) = confidence_bounds(0.5, 25, 0, 25, &config);
        assert!(high_old - low_old < high_new - low_new);

        let (low_lapsed, high_lapsed) = confidence_bounds(0.5, 25, 2, 0, &config);
        assert!(high_lapsed - low_lapsed > high_old - low_old);

        // Re-stabilized: lapse penalty no longer applies.
        let (low_stable, high_stable) =
            confidence_bounds(0.5, 25, 2, config.stabilize_successes, &config);
        assert!((high_stable - low_stable) - (high_old - low_old) < 1e-9);
    }
}
