use serde::{Deserialize, Serialize};

/// Spaced-repetition and mastery-estimate parameters.
///
/// The exact constants are a product decision, so all of them live here with
/// documented defaults instead of being baked into the math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryConfig {
    /// EWMA weight of a brand-new outcome (first review).
    pub base_weight: f64,
    /// How fast the outcome weight shrinks per recorded review.
    pub weight_shrink: f64,
    /// Scores at or above this count as a successful review.
    pub success_threshold: f64,
    /// Interval a skill drops to after a failed review, in days.
    pub min_interval_days: f64,
    /// Multiplier applied to the interval after a successful review.
    pub growth_factor: f64,
    /// Upper bound on the review interval, in days.
    pub max_interval_days: f64,
    /// Consecutive successes required before a lapse stops widening the
    /// confidence interval.
    pub stabilize_successes: u32,
    /// Repeat outcomes for the same item within this window collapse into
    /// the first one.
    pub debounce_secs: i64,
    /// Estimate multiplier applied when a review window is missed entirely.
    pub rollover_decay: f64,
    /// Half-width scale of the confidence interval at one review.
    pub confidence_z: f64,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            base_weight: 0.35,
            weight_shrink: 0.08,
            success_threshold: 0.6,
            min_interval_days: 1.0,
            growth_factor: 2.0,
            max_interval_days: 180.0,
            stabilize_successes: 3,
            debounce_secs: 30,
            rollover_decay: 0.95,
            confidence_z: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum prerequisite mastery before an item may enter a queue.
    pub mastery_floor: f64,
    /// Sessions with no activity for this long are swept to Abandoned.
    pub idle_timeout_secs: i64,
    /// Optional completion rule: session may complete once this many
    /// attempts are recorded, even with items left in the queue.
    pub fixed_item_count: Option<u32>,
    /// Optional completion rule: session may complete early once its
    /// running accuracy reaches this threshold.
    pub mastery_threshold: Option<f64>,
    /// The accuracy rule only applies after this many attempts.
    pub min_attempts_for_threshold: u32,
    /// How many mastery writes a learning path may lag behind before
    /// seeding a session from it is rejected as stale.
    pub snapshot_tolerance: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mastery_floor: 0.5,
            idle_timeout_secs: 1800,
            fixed_item_count: None,
            mastery_threshold: None,
            min_attempts_for_threshold: 5,
            snapshot_tolerance: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Hard cap on (skill, items) entries per generated path.
    pub max_path_entries: usize,
    /// Catalog items selected per gap skill.
    pub items_per_skill: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            max_path_entries: 20,
            items_per_skill: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mastery: MasteryConfig,
    pub session: SessionConfig,
    pub path: PathConfig,
}

impl EngineConfig {
    /// Defaults overridden by the commonly tuned knobs.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PROGRESSION_MASTERY_FLOOR") {
            if let Ok(parsed) = val.parse() {
                config.session.mastery_floor = parsed;
            }
        }
        if let Ok(val) = std::env::var("PROGRESSION_IDLE_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.session.idle_timeout_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("PROGRESSION_GROWTH_FACTOR") {
            if let Ok(parsed) = val.parse() {
                config.mastery.growth_factor = parsed;
            }
        }
        if let Ok(val) = std::env::var("PROGRESSION_DEBOUNCE_SECS") {
            if let Ok(parsed) = val.parse() {
                config.mastery.debounce_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("PROGRESSION_MAX_PATH_ENTRIES") {
            if let Ok(parsed) = val.parse() {
                config.path.max_path_entries = parsed;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_interval_contract() {
        let config = MasteryConfig::default();
        assert!(config.growth_factor >= 2.0);
        assert!(config.min_interval_days < config.max_interval_days);
        assert!(config.rollover_decay < 1.0);
    }
}
