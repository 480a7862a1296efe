//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use progression_engine::{
    AttemptInput, Clock, EngineConfig, InMemoryContentIndex, ItemType, LearnerContext,
    LearningItem, ManualClock, NullEventSink, ProgressionEngine,
};

pub const ORG: &str = "org-1";

pub struct TestHarness {
    pub engine: Arc<ProgressionEngine>,
    pub clock: Arc<ManualClock>,
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn item(id: &str, skills: &[&str], difficulty: u8, prereqs: &[&str]) -> LearningItem {
    LearningItem {
        id: id.to_string(),
        title: format!("Item {id}"),
        skill_tags: skills.iter().map(|s| s.to_string()).collect(),
        difficulty,
        item_type: ItemType::MultipleChoice,
        prerequisite_skills: prereqs.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn harness(items: Vec<LearningItem>) -> TestHarness {
    harness_with_config(items, EngineConfig::default())
}

pub fn harness_with_config(items: Vec<LearningItem>, config: EngineConfig) -> TestHarness {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Arc::new(ProgressionEngine::new(
        config,
        Arc::new(InMemoryContentIndex::from_items(items)),
        Arc::new(NullEventSink),
        Arc::clone(&clock) as Arc<dyn Clock>,
        None,
    ));
    TestHarness { engine, clock }
}

pub fn ctx(learner_id: &str) -> LearnerContext {
    LearnerContext::new(learner_id, ORG)
}

pub fn answer(score: f64) -> AttemptInput {
    AttemptInput {
        response: "response".to_string(),
        score,
        latency_ms: 2000,
    }
}
