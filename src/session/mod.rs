//! Session state machine and item sequencing.
//!
//! One `Mutex` per session serializes queue advancement with the mastery
//! updates triggered by each attempt; sessions for different learners never
//! contend. The mutex is held for exactly one operation at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::content::ContentIndex;
use crate::context::LearnerContext;
use crate::error::EngineError;
use crate::events::{
    EventSink, ProgressEvent, SessionAbandonedPayload, SessionStartedPayload,
};
use crate::mastery::MasteryModel;
use crate::progress::{Attempt, LearnerSummary, ProgressAggregator, ProgressSummary};
use crate::recommend::LearningPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Abandoned => "ABANDONED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub learner_id: String,
    pub org_id: String,
    pub path_id: String,
    /// Not-yet-served items from `position` onward; the served prefix is
    /// frozen history.
    pub queue: Vec<String>,
    pub position: usize,
    pub state: SessionState,
    /// Items pulled from the queue because their prerequisites fell below
    /// the gating floor mid-session. Left for a future session.
    pub deferred_items: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub attempts: Vec<Attempt>,
}

impl Session {
    pub fn seeded_at(
        learner_id: impl Into<String>,
        org_id: impl Into<String>,
        path_id: impl Into<String>,
        queue: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.into(),
            org_id: org_id.into(),
            path_id: path_id.into(),
            queue,
            position: 0,
            state: SessionState::Created,
            deferred_items: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            last_activity_at: now,
            attempts: Vec::new(),
        }
    }

    pub fn seeded(
        learner_id: impl Into<String>,
        org_id: impl Into<String>,
        path_id: impl Into<String>,
        queue: Vec<String>,
    ) -> Self {
        Self::seeded_at(learner_id, org_id, path_id, queue, Utc::now())
    }

    pub fn current_item(&self) -> Option<&str> {
        self.queue.get(self.position).map(|s| s.as_str())
    }

    pub fn remaining(&self) -> &[String] {
        &self.queue[self.position.min(self.queue.len())..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.queue.len()
    }

    fn accuracy(&self, success_threshold: f64) -> f64 {
        if self.attempts.is_empty() {
            return 0.0;
        }
        let correct = self
            .attempts
            .iter()
            .filter(|a| a.score >= success_threshold)
            .count();
        correct as f64 / self.attempts.len() as f64
    }
}

/// Caller-graded answer for the current queue item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInput {
    pub response: String,
    /// Correctness/score in [0,1].
    pub score: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub attempt: Attempt,
    pub summary: ProgressSummary,
    /// Items deferred out of the queue by this attempt's re-ranking pass.
    pub deferred: Vec<String>,
    /// Whether `complete_session` would succeed right now.
    pub completable: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
    pub scanned: u32,
    pub abandoned: u32,
    pub already_terminal: u32,
}

pub struct SessionEngine {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    content: Arc<dyn ContentIndex>,
    mastery: Arc<MasteryModel>,
    aggregator: Arc<ProgressAggregator>,
    events: Arc<dyn EventSink>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionEngine {
    pub fn new(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        content: Arc<dyn ContentIndex>,
        mastery: Arc<MasteryModel>,
        aggregator: Arc<ProgressAggregator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            clock,
            content,
            mastery,
            aggregator,
            events,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session in `Created`, seeding the queue from `seed_item_ids`
    /// filtered through prerequisite-mastery gating. Duplicate seed ids are
    /// collapsed to their first occurrence.
    pub async fn create_session(
        &self,
        ctx: &LearnerContext,
        path_id: &str,
        seed_item_ids: &[String],
    ) -> Result<Session, EngineError> {
        let mut queue = Vec::new();
        let mut seen = HashSet::new();
        for item_id in seed_item_ids {
            if !seen.insert(item_id.clone()) {
                continue;
            }
            let item = self
                .content
                .get_item(item_id)
                .await
                .ok_or_else(|| EngineError::not_found("learning item", item_id))?;
            if self
                .mastery
                .meets_floor(
                    &ctx.learner_id,
                    &item.prerequisite_skills,
                    self.config.mastery_floor,
                )
                .await
            {
                queue.push(item_id.clone());
            }
        }
        if queue.is_empty() {
            return Err(EngineError::EmptyQueue);
        }

        let session = Session::seeded_at(
            &ctx.learner_id,
            &ctx.org_id,
            path_id,
            queue,
            self.clock.now(),
        );
        info!(
            session_id = %session.id,
            learner_id = %ctx.learner_id,
            queue_len = session.queue.len(),
            "session created"
        );

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        Ok(session)
    }

    /// Seed a session from a generated learning path, rejecting paths whose
    /// mastery snapshot has been invalidated beyond the configured
    /// tolerance.
    pub async fn create_session_from_path(
        &self,
        ctx: &LearnerContext,
        path: &LearningPath,
    ) -> Result<Session, EngineError> {
        if path.learner_id != ctx.learner_id {
            return Err(EngineError::not_found("learning path", &path.id));
        }
        let current_version = self.mastery.version(&ctx.learner_id).await;
        if current_version.saturating_sub(path.snapshot_version) > self.config.snapshot_tolerance {
            return Err(EngineError::StaleSnapshot {
                path_version: path.snapshot_version,
                current_version,
            });
        }
        self.create_session(ctx, &path.id, &path.item_ids()).await
    }

    pub async fn start_session(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.ensure_access(ctx, &session)?;
        if session.state != SessionState::Created {
            return Err(EngineError::InvalidTransition {
                from: session.state.as_str(),
                action: "start",
            });
        }
        let now = self.clock.now();
        session.state = SessionState::Active;
        session.started_at = Some(now);
        session.last_activity_at = now;

        self.events
            .publish(ProgressEvent::SessionStarted(SessionStartedPayload {
                learner_id: session.learner_id.clone(),
                session_id: session.id.clone(),
                queue_len: session.queue.len(),
                timestamp: now,
            }))
            .await;
        Ok(session.clone())
    }

    pub async fn pause_session(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        self.transition(ctx, session_id, SessionState::Active, SessionState::Paused, "pause")
            .await
    }

    pub async fn resume_session(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        self.transition(ctx, session_id, SessionState::Paused, SessionState::Active, "resume")
            .await
    }

    /// Explicit cancellation: `Created`/`Active` → `Abandoned`.
    pub async fn cancel_session(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.ensure_access(ctx, &session)?;
        if !matches!(session.state, SessionState::Created | SessionState::Active) {
            return Err(EngineError::InvalidTransition {
                from: session.state.as_str(),
                action: "cancel",
            });
        }
        let now = self.clock.now();
        let idle_secs = (now - session.last_activity_at).num_seconds();
        session.state = SessionState::Abandoned;
        session.completed_at = Some(now);

        self.events
            .publish(ProgressEvent::SessionAbandoned(SessionAbandonedPayload {
                learner_id: session.learner_id.clone(),
                session_id: session.id.clone(),
                idle_secs,
                timestamp: now,
            }))
            .await;
        Ok(session.clone())
    }

    /// Record an attempt against the current queue item.
    ///
    /// Sequencing is strict: only the item at the current queue position is
    /// accepted, anything else fails with `SequenceViolation` and leaves the
    /// session untouched. On success the attempt is appended, the position
    /// advances, the aggregator runs synchronously, and the remaining queue
    /// is re-ranked against the learner's updated due skills.
    pub async fn submit_attempt(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
        item_id: &str,
        input: AttemptInput,
    ) -> Result<AttemptOutcome, EngineError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.ensure_access(ctx, &session)?;
        if session.state != SessionState::Active {
            return Err(EngineError::InvalidTransition {
                from: session.state.as_str(),
                action: "submit an attempt to",
            });
        }
        let expected = session
            .current_item()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<end of queue>".to_string());
        if expected != item_id {
            return Err(EngineError::SequenceViolation {
                expected,
                got: item_id.to_string(),
            });
        }

        // Resolve the item before mutating anything so a catalog miss
        // leaves the session untouched.
        let item = self
            .content
            .get_item(item_id)
            .await
            .ok_or_else(|| EngineError::not_found("learning item", item_id))?;

        let now = self.clock.now();
        let attempt = Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            learner_id: session.learner_id.clone(),
            item_id: item_id.to_string(),
            timestamp: now,
            response: input.response,
            score: input.score.clamp(0.0, 1.0),
            latency_ms: input.latency_ms,
        };
        session.attempts.push(attempt.clone());
        session.position += 1;
        session.last_activity_at = now;

        // Synchronous so the returned summary already reflects the mastery
        // effects of this attempt.
        let summary = self.aggregator.on_attempt(&attempt, &item).await;

        let deferred = self.rerank_remaining(&mut session, now).await;
        let completable = self.is_completable(&session);

        Ok(AttemptOutcome {
            attempt,
            summary,
            deferred,
            completable,
        })
    }

    /// `Active` → `Completed` once the queue is exhausted or a configured
    /// completion rule is satisfied; early completion is not an error.
    pub async fn complete_session(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
    ) -> Result<(Session, LearnerSummary), EngineError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.ensure_access(ctx, &session)?;
        if session.state != SessionState::Active {
            return Err(EngineError::InvalidTransition {
                from: session.state.as_str(),
                action: "complete",
            });
        }
        if !self.is_completable(&session) {
            return Err(EngineError::InvalidTransition {
                from: session.state.as_str(),
                action: "complete (no completion rule satisfied)",
            });
        }
        let now = self.clock.now();
        session.state = SessionState::Completed;
        session.completed_at = Some(now);
        session.last_activity_at = now;

        let rollup = self.aggregator.on_session_complete(&session).await;
        info!(
            session_id = %session.id,
            learner_id = %session.learner_id,
            attempts = session.attempts.len(),
            "session completed"
        );
        Ok((session.clone(), rollup))
    }

    pub async fn get_session(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        let entry = self.entry(session_id).await?;
        let session = entry.lock().await;
        self.ensure_access(ctx, &session)?;
        Ok(session.clone())
    }

    /// Periodic idle sweep: `Created`/`Active` sessions with no activity for
    /// the idle threshold become `Abandoned`. Idempotent: terminal sessions
    /// are counted and skipped, never an error.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> SweepStats {
        debug!("starting idle session sweep");
        let entries: Vec<Arc<Mutex<Session>>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut stats = SweepStats::default();
        for entry in entries {
            let mut session = entry.lock().await;
            stats.scanned += 1;
            if session.state.is_terminal() {
                stats.already_terminal += 1;
                continue;
            }
            if !matches!(session.state, SessionState::Created | SessionState::Active) {
                continue;
            }
            let idle_secs = (now - session.last_activity_at).num_seconds();
            if idle_secs < self.config.idle_timeout_secs {
                continue;
            }
            session.state = SessionState::Abandoned;
            session.completed_at = Some(now);
            stats.abandoned += 1;

            self.events
                .publish(ProgressEvent::SessionAbandoned(SessionAbandonedPayload {
                    learner_id: session.learner_id.clone(),
                    session_id: session.id.clone(),
                    idle_secs,
                    timestamp: now,
                }))
                .await;
        }

        info!(
            scanned = stats.scanned,
            abandoned = stats.abandoned,
            already_terminal = stats.already_terminal,
            "idle session sweep completed"
        );
        stats
    }

    async fn entry(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, EngineError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("session", session_id))
    }

    fn ensure_access(&self, ctx: &LearnerContext, session: &Session) -> Result<(), EngineError> {
        if session.org_id != ctx.org_id {
            return Err(EngineError::OrgBoundary {
                expected: session.org_id.clone(),
                got: ctx.org_id.clone(),
            });
        }
        if session.learner_id != ctx.learner_id {
            // Another learner's session is invisible, not forbidden.
            return Err(EngineError::not_found("session", &session.id));
        }
        Ok(())
    }

    async fn transition(
        &self,
        ctx: &LearnerContext,
        session_id: &str,
        from: SessionState,
        to: SessionState,
        action: &'static str,
    ) -> Result<Session, EngineError> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.ensure_access(ctx, &session)?;
        if session.state != from {
            return Err(EngineError::InvalidTransition {
                from: session.state.as_str(),
                action,
            });
        }
        session.state = to;
        session.last_activity_at = self.clock.now();
        Ok(session.clone())
    }

    /// Re-rank the remaining queue by the learner's updated due-skill order
    /// (stable for items with no due skill), deferring items whose
    /// prerequisites no longer meet the gating floor. Returns the deferred
    /// item ids.
    async fn rerank_remaining(&self, session: &mut Session, now: DateTime<Utc>) -> Vec<String> {
        if session.remaining().is_empty() {
            return Vec::new();
        }

        let due_rank: HashMap<String, usize> = self
            .mastery
            .due_skills(&session.learner_id, now)
            .await
            .map(|due| {
                due.into_iter()
                    .enumerate()
                    .map(|(rank, d)| (d.skill_id, rank))
                    .collect()
            })
            .unwrap_or_default();

        let remaining: Vec<String> = session.remaining().to_vec();
        let mut kept: Vec<(usize, String)> = Vec::with_capacity(remaining.len());
        let mut deferred = Vec::new();
        for item_id in remaining {
            let Some(item) = self.content.get_item(&item_id).await else {
                debug!(item_id = %item_id, "queued item no longer in catalog, deferring");
                deferred.push(item_id);
                continue;
            };
            if !self
                .mastery
                .meets_floor(
                    &session.learner_id,
                    &item.prerequisite_skills,
                    self.config.mastery_floor,
                )
                .await
            {
                deferred.push(item_id);
                continue;
            }
            let rank = item
                .skill_tags
                .iter()
                .filter_map(|tag| due_rank.get(tag).copied())
                .min()
                .unwrap_or(usize::MAX);
            kept.push((rank, item_id));
        }
        // Stable: equal ranks keep their pre-existing relative order.
        kept.sort_by_key(|(rank, _)| *rank);

        session.queue.truncate(session.position);
        session.queue.extend(kept.into_iter().map(|(_, id)| id));
        session.deferred_items.extend(deferred.iter().cloned());
        deferred
    }

    fn is_completable(&self, session: &Session) -> bool {
        if session.is_exhausted() {
            return true;
        }
        if let Some(count) = self.config.fixed_item_count {
            if session.attempts.len() as u32 >= count {
                return true;
            }
        }
        if let Some(threshold) = self.config.mastery_threshold {
            if session.attempts.len() as u32 >= self.config.min_attempts_for_threshold
                && session.accuracy(self.mastery.config().success_threshold) >= threshold
            {
                return true;
            }
        }
        false
    }
}
