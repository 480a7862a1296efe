//! Top-level assembly: wires the mastery model, aggregator, session engine
//! and recommendation engine to one config, clock, catalog and event sink.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::content::{ContentIndex, ItemSuggester};
use crate::events::{EventSink, NullEventSink};
use crate::mastery::MasteryModel;
use crate::progress::ProgressAggregator;
use crate::recommend::RecommendationEngine;
use crate::session::SessionEngine;

pub struct ProgressionEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    mastery: Arc<MasteryModel>,
    aggregator: Arc<ProgressAggregator>,
    sessions: Arc<SessionEngine>,
    recommendations: Arc<RecommendationEngine>,
}

impl ProgressionEngine {
    pub fn new(
        config: EngineConfig,
        content: Arc<dyn ContentIndex>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        suggester: Option<Arc<dyn ItemSuggester>>,
    ) -> Self {
        let mastery = Arc::new(MasteryModel::new(config.mastery.clone()));
        let aggregator = Arc::new(ProgressAggregator::new(
            Arc::clone(&mastery),
            Arc::clone(&events),
            Arc::clone(&clock),
        ));
        let sessions = Arc::new(SessionEngine::new(
            config.session.clone(),
            Arc::clone(&clock),
            Arc::clone(&content),
            Arc::clone(&mastery),
            Arc::clone(&aggregator),
            Arc::clone(&events),
        ));
        let recommendations = Arc::new(RecommendationEngine::new(
            config.path.clone(),
            config.session.mastery_floor,
            Arc::clone(&clock),
            content,
            Arc::clone(&mastery),
            events,
            suggester,
        ));

        Self {
            config,
            clock,
            mastery,
            aggregator,
            sessions,
            recommendations,
        }
    }

    /// Engine with the default config, system clock and no event fan-out.
    pub fn with_defaults(content: Arc<dyn ContentIndex>) -> Self {
        Self::new(
            EngineConfig::default(),
            content,
            Arc::new(NullEventSink),
            Arc::new(SystemClock),
            None,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mastery(&self) -> &Arc<MasteryModel> {
        &self.mastery
    }

    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.aggregator
    }

    pub fn sessions(&self) -> &Arc<SessionEngine> {
        &self.sessions
    }

    pub fn recommendations(&self) -> &Arc<RecommendationEngine> {
        &self.recommendations
    }

    /// One maintenance pass: abandon idle sessions, then apply rollover
    /// decay to skills whose review window lapsed. Safe to call on a timer
    /// from multiple places; both halves are idempotent per window.
    pub async fn run_maintenance(&self) -> (crate::session::SweepStats, u64) {
        let now = self.clock.now();
        let sweep = self.sessions.sweep_idle(now).await;
        let decayed = self.mastery.decay_rollover(now).await;
        (sweep, decayed)
    }

    /// Background maintenance loop on a fixed period.
    pub fn spawn_maintenance(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        info!(period_secs = period.as_secs(), "maintenance worker started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                engine.run_maintenance().await;
            }
        })
    }
}
