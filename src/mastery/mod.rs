//! Per-learner, per-skill mastery estimates and the spaced-repetition
//! schedule built on them.
//!
//! Concurrency model: one record set per learner behind its own `RwLock`
//! (single writer per learner, many readers), version-stamped so snapshot
//! readers always observe either the pre- or post-update state, never a
//! partial write. Operations across learners are fully independent.

pub mod srs;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::MasteryConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMastery {
    pub learner_id: String,
    pub skill_id: String,
    /// Estimated competency in [0,1].
    pub estimate: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub last_reviewed_at: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
    pub interval_step_days: f64,
    pub review_count: u32,
    pub lapse_count: u32,
    pub consecutive_successes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueSkill {
    pub skill_id: String,
    pub overdue_secs: i64,
    pub estimate: f64,
}

/// Copy-on-read view of a learner's mastery records, stamped with the write
/// version it was taken at. Path generation is pure with respect to one of
/// these.
#[derive(Debug, Clone)]
pub struct MasterySnapshot {
    pub learner_id: String,
    pub version: u64,
    pub skills: BTreeMap<String, SkillMastery>,
}

impl MasterySnapshot {
    /// Estimate for a skill, 0.0 when the learner has never touched it.
    pub fn estimate(&self, skill_id: &str) -> f64 {
        self.skills.get(skill_id).map(|s| s.estimate).unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct LearnerMastery {
    version: u64,
    skills: HashMap<String, SkillMastery>,
    /// Per skill: the item and timestamp of the last accepted outcome,
    /// used for the rapid-retry debounce.
    last_outcome: HashMap<String, (String, DateTime<Utc>)>,
}

pub struct MasteryModel {
    config: MasteryConfig,
    learners: RwLock<HashMap<String, Arc<RwLock<LearnerMastery>>>>,
}

impl MasteryModel {
    pub fn new(config: MasteryConfig) -> Self {
        Self {
            config,
            learners: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    async fn learner_entry(&self, learner_id: &str) -> Arc<RwLock<LearnerMastery>> {
        {
            let map = self.learners.read().await;
            if let Some(entry) = map.get(learner_id) {
                return Arc::clone(entry);
            }
        }
        let mut map = self.learners.write().await;
        Arc::clone(
            map.entry(learner_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(LearnerMastery::default()))),
        )
    }

    /// Record one attempt outcome against a skill and reschedule it.
    ///
    /// A repeat outcome for the same item within the debounce window counts
    /// as the original outcome: the existing record is returned unchanged.
    /// The record is created on the first outcome touching the skill.
    pub async fn record_outcome(
        &self,
        learner_id: &str,
        skill_id: &str,
        item_id: &str,
        score: f64,
        at: DateTime<Utc>,
    ) -> SkillMastery {
        let entry = self.learner_entry(learner_id).await;
        let mut learner = entry.write().await;

        if let Some((last_item, last_at)) = learner.last_outcome.get(skill_id) {
            let within_window = (at - *last_at).num_seconds() < self.config.debounce_secs;
            if last_item == item_id && within_window {
                if let Some(existing) = learner.skills.get(skill_id) {
                    debug!(
                        learner_id,
                        skill_id, item_id, "outcome debounced as rapid retry"
                    );
                    return existing.clone();
                }
            }
        }

        let score = score.clamp(0.0, 1.0);
        let success = score >= self.config.success_threshold;

        let (prior_estimate, prior_interval, review_count, lapse_count, consecutive) =
            match learner.skills.get(skill_id) {
                Some(existing) => (
                    existing.estimate,
                    existing.interval_step_days,
                    existing.review_count,
                    existing.lapse_count,
                    existing.consecutive_successes,
                ),
                None => (0.0, 0.0, 0, 0, 0),
            };

        let estimate = srs::blend_estimate(prior_estimate, score, review_count, &self.config);
        let interval_step_days = srs::next_interval_days(prior_interval, success, &self.config);
        let lapse_count = if success { lapse_count } else { lapse_count + 1 };
        let consecutive_successes = if success { consecutive + 1 } else { 0 };
        let review_count = review_count + 1;
        let (confidence_low, confidence_high) = srs::confidence_bounds(
            estimate,
            review_count,
            lapse_count,
            consecutive_successes,
            &self.config,
        );

        let updated = SkillMastery {
            learner_id: learner_id.to_string(),
            skill_id: skill_id.to_string(),
            estimate,
            confidence_low,
            confidence_high,
            last_reviewed_at: at,
            next_due_at: at + days_to_duration(interval_step_days),
            interval_step_days,
            review_count,
            lapse_count,
            consecutive_successes,
        };

        learner
            .skills
            .insert(skill_id.to_string(), updated.clone());
        learner
            .last_outcome
            .insert(skill_id.to_string(), (item_id.to_string(), at));
        learner.version += 1;

        debug!(
            learner_id,
            skill_id,
            estimate = updated.estimate,
            interval_days = updated.interval_step_days,
            success,
            "mastery updated"
        );

        updated
    }

    /// Skills due for review at `as_of`: most overdue first, weakest first
    /// among equally overdue, skill id as the final tie-break.
    ///
    /// `UnknownLearner` only when the learner has no records at all; callers
    /// treat that as the signal to bootstrap via a placement path.
    pub async fn due_skills(
        &self,
        learner_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<DueSkill>, EngineError> {
        let entry = {
            let map = self.learners.read().await;
            map.get(learner_id).cloned()
        };
        let entry = entry.ok_or_else(|| EngineError::UnknownLearner {
            learner_id: learner_id.to_string(),
        })?;
        let learner = entry.read().await;
        if learner.skills.is_empty() {
            return Err(EngineError::UnknownLearner {
                learner_id: learner_id.to_string(),
            });
        }

        let mut due: Vec<DueSkill> = learner
            .skills
            .values()
            .filter(|s| s.next_due_at <= as_of)
            .map(|s| DueSkill {
                skill_id: s.skill_id.clone(),
                overdue_secs: (as_of - s.next_due_at).num_seconds(),
                estimate: s.estimate,
            })
            .collect();
        due.sort_by(|a, b| {
            b.overdue_secs
                .cmp(&a.overdue_secs)
                .then(a.estimate.total_cmp(&b.estimate))
                .then(a.skill_id.cmp(&b.skill_id))
        });
        Ok(due)
    }

    /// Versioned copy of a learner's records. Unknown learners get an empty
    /// snapshot at version 0, which is the bootstrap state for gap analysis.
    pub async fn snapshot(&self, learner_id: &str) -> MasterySnapshot {
        let entry = {
            let map = self.learners.read().await;
            map.get(learner_id).cloned()
        };
        match entry {
            Some(entry) => {
                let learner = entry.read().await;
                MasterySnapshot {
                    learner_id: learner_id.to_string(),
                    version: learner.version,
                    skills: learner
                        .skills
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                }
            }
            None => MasterySnapshot {
                learner_id: learner_id.to_string(),
                version: 0,
                skills: BTreeMap::new(),
            },
        }
    }

    /// Current write version for the learner, 0 if never written.
    pub async fn version(&self, learner_id: &str) -> u64 {
        let entry = {
            let map = self.learners.read().await;
            map.get(learner_id).cloned()
        };
        match entry {
            Some(entry) => entry.read().await.version,
            None => 0,
        }
    }

    /// Estimate for one skill, 0.0 when absent.
    pub async fn estimate(&self, learner_id: &str, skill_id: &str) -> f64 {
        let entry = {
            let map = self.learners.read().await;
            map.get(learner_id).cloned()
        };
        match entry {
            Some(entry) => entry
                .read()
                .await
                .skills
                .get(skill_id)
                .map(|s| s.estimate)
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// True when every prerequisite skill meets the gating floor.
    pub async fn meets_floor(&self, learner_id: &str, prereqs: &[String], floor: f64) -> bool {
        for skill_id in prereqs {
            if self.estimate(learner_id, skill_id).await < floor {
                return false;
            }
        }
        true
    }

    /// Explicit decay sweep: a skill's estimate is multiplied by the
    /// rollover decay once per fully missed review window, and its due date
    /// advanced past those windows. A record many windows overdue catches up
    /// in a single sweep, so the derived estimate depends on elapsed time,
    /// not on how often the host runs maintenance. This is the only mastery
    /// mutation without a backing attempt. Returns the number of decay
    /// applications.
    pub async fn decay_rollover(&self, as_of: DateTime<Utc>) -> u64 {
        let entries: Vec<Arc<RwLock<LearnerMastery>>> = {
            let map = self.learners.read().await;
            map.values().cloned().collect()
        };

        let decay = self.config.rollover_decay;
        let mut decayed = 0u64;
        for entry in entries {
            let mut learner = entry.write().await;
            let mut touched = false;
            for record in learner.skills.values_mut() {
                let step = days_to_duration(record.interval_step_days);
                if step <= Duration::zero() {
                    continue;
                }
                while record.next_due_at + step <= as_of {
                    record.estimate = (record.estimate * decay).max(0.0);
                    record.next_due_at += step;
                    touched = true;
                    decayed += 1;
                }
            }
            if touched {
                learner.version += 1;
            }
        }
        if decayed > 0 {
            debug!(decayed, "rollover decay applied");
        }
        decayed
    }
}

fn days_to_duration(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0).round() as i64)
}
