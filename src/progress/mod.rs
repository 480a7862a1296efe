//! Folds per-attempt outcomes into session- and learner-level rollups.
//!
//! Summaries are derived state: everything here is recomputable from the
//! attempt history and is never the source of truth. The aggregator updates
//! the mastery model synchronously on every attempt, then fans events out
//! to the sink; sink trouble is the sink's problem, never the attempt's.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::Clock;
use crate::content::LearningItem;
use crate::events::{
    AttemptRecordedPayload, EventSink, MasteryUpdatedPayload, ProgressEvent,
    SessionCompletedPayload,
};
use crate::mastery::MasteryModel;
use crate::session::Session;

/// One recorded answer. Append-only and immutable once recorded; the
/// durable source of truth for all derived progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: String,
    pub session_id: String,
    pub learner_id: String,
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    pub response: String,
    /// Correctness/score in [0,1], graded by the caller.
    pub score: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub session_id: String,
    pub learner_id: String,
    pub items_completed: u32,
    pub correct_count: u32,
    pub accuracy: f64,
    pub time_spent_ms: u64,
    /// Skills whose estimate rose during this session, sorted.
    pub skills_advanced: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerSummary {
    pub learner_id: String,
    pub sessions_completed: u32,
    pub items_completed: u32,
    pub correct_count: u32,
    pub accuracy: f64,
    pub time_spent_ms: u64,
    pub skills_advanced: Vec<String>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
}

pub struct ProgressAggregator {
    mastery: Arc<MasteryModel>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, ProgressSummary>>,
    learners: RwLock<HashMap<String, LearnerSummary>>,
}

impl ProgressAggregator {
    pub fn new(
        mastery: Arc<MasteryModel>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mastery,
            events,
            clock,
            sessions: RwLock::new(HashMap::new()),
            learners: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one attempt into the running session summary, updating mastery
    /// for every skill the item is tagged with. Called synchronously from
    /// the attempt path so the returned summary already reflects the
    /// mastery updates. Never fails.
    pub async fn on_attempt(&self, attempt: &Attempt, item: &LearningItem) -> ProgressSummary {
        let success_threshold = self.mastery.config().success_threshold;
        let mut advanced = Vec::new();

        for skill_id in &item.skill_tags {
            let prior = self.mastery.estimate(&attempt.learner_id, skill_id).await;
            let updated = self
                .mastery
                .record_outcome(
                    &attempt.learner_id,
                    skill_id,
                    &attempt.item_id,
                    attempt.score,
                    attempt.timestamp,
                )
                .await;
            // An applied outcome stamps `last_reviewed_at` with the attempt
            // time; an older stamp means the outcome was debounced as a
            // rapid retry and the record is unchanged, so no event goes out.
            if updated.last_reviewed_at != attempt.timestamp {
                continue;
            }
            if updated.estimate > prior {
                advanced.push(skill_id.clone());
            }

            self.events
                .publish(ProgressEvent::MasteryUpdated(MasteryUpdatedPayload {
                    learner_id: attempt.learner_id.clone(),
                    skill_id: skill_id.clone(),
                    outcome: attempt.score,
                    new_mastery_estimate: updated.estimate,
                    next_due_at: updated.next_due_at,
                    timestamp: attempt.timestamp,
                }))
                .await;
        }

        self.events
            .publish(ProgressEvent::AttemptRecorded(AttemptRecordedPayload {
                learner_id: attempt.learner_id.clone(),
                session_id: attempt.session_id.clone(),
                item_id: attempt.item_id.clone(),
                score: attempt.score,
                latency_ms: attempt.latency_ms,
                timestamp: attempt.timestamp,
            }))
            .await;

        let mut sessions = self.sessions.write().await;
        let summary = sessions
            .entry(attempt.session_id.clone())
            .or_insert_with(|| ProgressSummary {
                session_id: attempt.session_id.clone(),
                learner_id: attempt.learner_id.clone(),
                ..Default::default()
            });
        summary.items_completed += 1;
        if attempt.score >= success_threshold {
            summary.correct_count += 1;
        }
        summary.accuracy = summary.correct_count as f64 / summary.items_completed as f64;
        summary.time_spent_ms += attempt.latency_ms;
        for skill_id in advanced {
            if let Err(pos) = summary.skills_advanced.binary_search(&skill_id) {
                summary.skills_advanced.insert(pos, skill_id);
            }
        }
        summary.clone()
    }

    /// Fold a finished session into the learner-level rollup. Drives the
    /// day-streak counters used by downstream gamification and the target
    /// profile refinement of subsequent path generation.
    pub async fn on_session_complete(&self, session: &Session) -> LearnerSummary {
        let session_summary = {
            let sessions = self.sessions.read().await;
            sessions.get(&session.id).cloned().unwrap_or_default()
        };

        let completed_at = session.completed_at.unwrap_or_else(|| self.clock.now());
        let activity_date = completed_at.date_naive();

        let mut learners = self.learners.write().await;
        let rollup = learners
            .entry(session.learner_id.clone())
            .or_insert_with(|| LearnerSummary {
                learner_id: session.learner_id.clone(),
                ..Default::default()
            });

        rollup.sessions_completed += 1;
        rollup.items_completed += session_summary.items_completed;
        rollup.correct_count += session_summary.correct_count;
        rollup.accuracy = if rollup.items_completed > 0 {
            rollup.correct_count as f64 / rollup.items_completed as f64
        } else {
            0.0
        };
        rollup.time_spent_ms += session_summary.time_spent_ms;
        for skill_id in &session_summary.skills_advanced {
            if let Err(pos) = rollup.skills_advanced.binary_search(skill_id) {
                rollup.skills_advanced.insert(pos, skill_id.clone());
            }
        }

        rollup.current_streak = match rollup.last_activity_date {
            Some(last) if activity_date == last => rollup.current_streak,
            Some(last) if activity_date == last + Duration::days(1) => rollup.current_streak + 1,
            _ => 1,
        };
        rollup.longest_streak = rollup.longest_streak.max(rollup.current_streak);
        rollup.last_activity_date = Some(activity_date);

        let result = rollup.clone();
        drop(learners);

        debug!(
            learner_id = %session.learner_id,
            session_id = %session.id,
            items = session_summary.items_completed,
            "session folded into learner rollup"
        );

        self.events
            .publish(ProgressEvent::SessionCompleted(SessionCompletedPayload {
                learner_id: session.learner_id.clone(),
                session_id: session.id.clone(),
                items_completed: session_summary.items_completed,
                accuracy: session_summary.accuracy,
                timestamp: completed_at,
            }))
            .await;

        result
    }

    pub async fn session_summary(&self, session_id: &str) -> Option<ProgressSummary> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn learner_summary(&self, learner_id: &str) -> Option<LearnerSummary> {
        self.learners.read().await.get(learner_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MasteryConfig;
    use crate::content::ItemType;
    use crate::events::{BroadcastEventSink, NullEventSink};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn aggregator() -> (ProgressAggregator, Arc<MasteryModel>) {
        let mastery = Arc::new(MasteryModel::new(MasteryConfig::default()));
        let aggregator = ProgressAggregator::new(
            Arc::clone(&mastery),
            Arc::new(NullEventSink),
            Arc::new(ManualClock::new(t0())),
        );
        (aggregator, mastery)
    }

    fn item(id: &str, skills: &[&str]) -> LearningItem {
        LearningItem {
            id: id.to_string(),
            title: id.to_string(),
            skill_tags: skills.iter().map(|s| s.to_string()).collect(),
            difficulty: 1,
            item_type: ItemType::MultipleChoice,
            prerequisite_skills: vec![],
        }
    }

    fn attempt(session: &str, item_id: &str, score: f64, at: DateTime<Utc>) -> Attempt {
        Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session.to_string(),
            learner_id: "learner-1".to_string(),
            item_id: item_id.to_string(),
            timestamp: at,
            response: "42".to_string(),
            score,
            latency_ms: 1500,
        }
    }

    #[tokio::test]
    async fn attempt_updates_mastery_and_running_summary() {
        let (aggregator, mastery) = aggregator();
        let summary = aggregator
            .on_attempt(&attempt("s1", "i1", 1.0, t0()), &item("i1", &["algebra"]))
            .await;

        assert_eq!(summary.items_completed, 1);
        assert_eq!(summary.correct_count, 1);
        assert_eq!(summary.accuracy, 1.0);
        assert_eq!(summary.skills_advanced, vec!["algebra"]);
        assert!(mastery.estimate("learner-1", "algebra").await > 0.0);
    }

    #[tokio::test]
    async fn failed_attempt_counts_item_but_not_correct() {
        let (aggregator, _) = aggregator();
        aggregator
            .on_attempt(&attempt("s1", "i1", 1.0, t0()), &item("i1", &["algebra"]))
            .await;
        let summary = aggregator
            .on_attempt(
                &attempt("s1", "i2", 0.0, t0() + Duration::minutes(1)),
                &item("i2", &["algebra"]),
            )
            .await;
        assert_eq!(summary.items_completed, 2);
        assert_eq!(summary.correct_count, 1);
        assert_eq!(summary.accuracy, 0.5);
    }

    #[tokio::test]
    async fn debounced_retry_emits_no_mastery_event() {
        let mastery = Arc::new(MasteryModel::new(MasteryConfig::default()));
        let sink = Arc::new(BroadcastEventSink::new());
        let mut receiver = sink.subscribe();
        let aggregator = ProgressAggregator::new(
            Arc::clone(&mastery),
            sink,
            Arc::new(ManualClock::new(t0())),
        );

        aggregator
            .on_attempt(&attempt("s1", "i1", 1.0, t0()), &item("i1", &["algebra"]))
            .await;
        // Same item 5s later: inside the debounce window, mastery unchanged.
        aggregator
            .on_attempt(
                &attempt("s1", "i1", 0.0, t0() + Duration::seconds(5)),
                &item("i1", &["algebra"]),
            )
            .await;

        let mut mastery_events = 0;
        let mut attempt_events = 0;
        while let Ok(event) = receiver.try_recv() {
            match event {
                ProgressEvent::MasteryUpdated(_) => mastery_events += 1,
                ProgressEvent::AttemptRecorded(_) => attempt_events += 1,
                _ => {}
            }
        }
        assert_eq!(mastery_events, 1);
        assert_eq!(attempt_events, 2);
    }

    #[tokio::test]
    async fn consecutive_day_completions_extend_the_streak() {
        let (aggregator, _) = aggregator();

        let mut session = Session::seeded("learner-1", "org-1", "path-1", vec![]);
        session.completed_at = Some(t0());
        let day1 = aggregator.on_session_complete(&session).await;
        assert_eq!(day1.current_streak, 1);

        session.completed_at = Some(t0() + Duration::days(1));
        let day2 = aggregator.on_session_complete(&session).await;
        assert_eq!(day2.current_streak, 2);
        assert_eq!(day2.longest_streak, 2);

        // Same day again: streak holds.
        let same_day = aggregator.on_session_complete(&session).await;
        assert_eq!(same_day.current_streak, 2);

        // A gap resets the current streak but not the longest.
        session.completed_at = Some(t0() + Duration::days(5));
        let after_gap = aggregator.on_session_complete(&session).await;
        assert_eq!(after_gap.current_streak, 1);
        assert_eq!(after_gap.longest_streak, 2);
    }
}
