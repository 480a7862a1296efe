//! Skill-gap analysis and deterministic learning-path generation.
//!
//! A path is a pure function of one mastery snapshot, the target profile and
//! the catalog: generating twice against the same inputs yields the same
//! entries in the same order. The snapshot version is stamped onto the path
//! so session creation can detect when the path has gone stale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::PathConfig;
use crate::content::{skill_prerequisites, ContentIndex, ItemSuggester, LearningItem};
use crate::error::EngineError;
use crate::events::{EventSink, PathGeneratedPayload, ProgressEvent};
use crate::mastery::{MasteryModel, MasterySnapshot};

/// Required mastery per skill for a role, course or placement goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetProfile {
    pub name: String,
    /// Skill id to required estimate in [0,1]. Ordered map so iteration is
    /// deterministic.
    pub required: std::collections::BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillGap {
    pub skill_id: String,
    /// Required minus current estimate, always positive.
    pub gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub skill_id: String,
    /// Item ids for the skill, difficulty ascending.
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub id: String,
    pub learner_id: String,
    pub entries: Vec<PathEntry>,
    pub generated_at: DateTime<Utc>,
    pub source_gaps: Vec<SkillGap>,
    /// Mastery write version the path was generated against.
    pub snapshot_version: u64,
}

impl LearningPath {
    /// All item ids in path order, the seed queue for a session.
    pub fn item_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|e| e.item_ids.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathInteraction {
    Accepted,
    Rejected,
    Completed,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEffectiveness {
    pub acceptance_rate: f64,
    pub completion_rate: f64,
    pub engagement_score: f64,
}

pub struct RecommendationEngine {
    config: PathConfig,
    mastery_floor: f64,
    clock: Arc<dyn Clock>,
    content: Arc<dyn ContentIndex>,
    mastery: Arc<MasteryModel>,
    events: Arc<dyn EventSink>,
    suggester: Option<Arc<dyn ItemSuggester>>,
    interactions: RwLock<HashMap<String, Vec<(String, PathInteraction)>>>,
}

impl RecommendationEngine {
    pub fn new(
        config: PathConfig,
        mastery_floor: f64,
        clock: Arc<dyn Clock>,
        content: Arc<dyn ContentIndex>,
        mastery: Arc<MasteryModel>,
        events: Arc<dyn EventSink>,
        suggester: Option<Arc<dyn ItemSuggester>>,
    ) -> Self {
        Self {
            config,
            mastery_floor,
            clock,
            content,
            mastery,
            events,
            suggester,
            interactions: RwLock::new(HashMap::new()),
        }
    }

    /// Positive gaps between the profile and the learner's current
    /// estimates: widest gap first, foundational skills (shallower in the
    /// prerequisite graph) before dependent ones at equal width, skill id as
    /// the final tie-break. An untouched learner gaps on every profile
    /// skill, which is exactly the placement bootstrap.
    pub async fn analyze_gaps(
        &self,
        learner_id: &str,
        profile: &TargetProfile,
    ) -> Vec<SkillGap> {
        let snapshot = self.mastery.snapshot(learner_id).await;
        self.gaps_from_snapshot(&snapshot, profile).await
    }

    async fn gaps_from_snapshot(
        &self,
        snapshot: &MasterySnapshot,
        profile: &TargetProfile,
    ) -> Vec<SkillGap> {
        let mut gaps: Vec<SkillGap> = profile
            .required
            .iter()
            .filter_map(|(skill_id, required)| {
                let gap = required - snapshot.estimate(skill_id);
                (gap > 0.0).then(|| SkillGap {
                    skill_id: skill_id.clone(),
                    gap,
                })
            })
            .collect();

        let skills: Vec<String> = gaps.iter().map(|g| g.skill_id.clone()).collect();
        let depths = self.prereq_depths(&skills).await;
        gaps.sort_by(|a, b| {
            b.gap
                .total_cmp(&a.gap)
                .then_with(|| {
                    let da = depths.get(&a.skill_id).copied().unwrap_or(0);
                    let db = depths.get(&b.skill_id).copied().unwrap_or(0);
                    da.cmp(&db)
                })
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        gaps
    }

    /// Generate a learning path closing the learner's gaps against the
    /// profile. One mastery snapshot backs both gap analysis and
    /// prerequisite checks; unmet prerequisites are pulled ahead of the
    /// skills that need them. A gapped skill with no catalog items fails the
    /// whole generation rather than silently producing a path with a hole.
    pub async fn generate_path(
        &self,
        learner_id: &str,
        profile: &TargetProfile,
    ) -> Result<LearningPath, EngineError> {
        let snapshot = self.mastery.snapshot(learner_id).await;
        let gaps = self.gaps_from_snapshot(&snapshot, profile).await;

        let ordered = self.expand_with_prerequisites(&snapshot, &gaps).await;

        let mut entries = Vec::new();
        for skill_id in ordered {
            if entries.len() >= self.config.max_path_entries {
                break;
            }
            let items = self.content.items_for_skill(&skill_id).await;
            if items.is_empty() {
                return Err(EngineError::NoEligibleContent { skill_id });
            }
            let item_ids = items
                .into_iter()
                .take(self.config.items_per_skill)
                .map(|i| i.id)
                .collect();
            entries.push(PathEntry { skill_id, item_ids });
        }

        let path = LearningPath {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            entries,
            generated_at: self.clock.now(),
            source_gaps: gaps,
            snapshot_version: snapshot.version,
        };
        info!(
            learner_id,
            path_id = %path.id,
            entries = path.entries.len(),
            snapshot_version = path.snapshot_version,
            "learning path generated"
        );

        self.events
            .publish(ProgressEvent::PathGenerated(PathGeneratedPayload {
                learner_id: learner_id.to_string(),
                path_id: path.id.clone(),
                entry_count: path.entries.len(),
                snapshot_version: path.snapshot_version,
                timestamp: path.generated_at,
            }))
            .await;

        Ok(path)
    }

    /// Gap skills with their unmet prerequisites spliced in front of them,
    /// depth-first, deduplicated. A prerequisite is unmet when its estimate
    /// in the snapshot sits below the gating floor.
    async fn expand_with_prerequisites(
        &self,
        snapshot: &MasterySnapshot,
        gaps: &[SkillGap],
    ) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut emitted: HashSet<String> = HashSet::new();

        for gap in gaps {
            // Post-order walk so prerequisites land before the skill.
            let mut stack = vec![(gap.skill_id.clone(), false)];
            let mut on_stack: HashSet<String> = HashSet::new();
            while let Some((skill_id, expanded)) = stack.pop() {
                if emitted.contains(&skill_id) {
                    continue;
                }
                if expanded {
                    on_stack.remove(&skill_id);
                    emitted.insert(skill_id.clone());
                    ordered.push(skill_id);
                    continue;
                }
                if !on_stack.insert(skill_id.clone()) {
                    // Prerequisite cycle; break it here.
                    debug!(skill_id = %skill_id, "prerequisite cycle detected, breaking");
                    continue;
                }
                stack.push((skill_id.clone(), true));
                let prereqs = skill_prerequisites(self.content.as_ref(), &skill_id).await;
                // Reverse push so the sorted prerequisite order is preserved.
                for prereq in prereqs.into_iter().rev() {
                    if emitted.contains(&prereq) || on_stack.contains(&prereq) {
                        continue;
                    }
                    if snapshot.estimate(&prereq) < self.mastery_floor {
                        stack.push((prereq, false));
                    }
                }
            }
        }
        ordered
    }

    /// Depth of each skill in the prerequisite graph: 0 for skills with no
    /// prerequisites, otherwise one past the deepest prerequisite. Cycles
    /// are broken by ignoring back-edges.
    async fn prereq_depths(&self, skills: &[String]) -> HashMap<String, usize> {
        let mut depths: HashMap<String, usize> = HashMap::new();
        let mut prereq_cache: HashMap<String, Vec<String>> = HashMap::new();

        for root in skills {
            let mut stack = vec![root.clone()];
            let mut in_progress: HashSet<String> = HashSet::new();
            while let Some(skill_id) = stack.last().cloned() {
                if depths.contains_key(&skill_id) {
                    stack.pop();
                    continue;
                }
                let prereqs = match prereq_cache.get(&skill_id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let fetched =
                            skill_prerequisites(self.content.as_ref(), &skill_id).await;
                        prereq_cache.insert(skill_id.clone(), fetched.clone());
                        fetched
                    }
                };
                let pending: Vec<String> = prereqs
                    .iter()
                    .filter(|p| !depths.contains_key(*p) && !in_progress.contains(*p))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    let depth = prereqs
                        .iter()
                        .filter_map(|p| depths.get(p))
                        .max()
                        .map(|d| d + 1)
                        .unwrap_or(0);
                    depths.insert(skill_id.clone(), depth);
                    in_progress.remove(&skill_id);
                    stack.pop();
                } else {
                    in_progress.insert(skill_id.clone());
                    stack.extend(pending);
                }
            }
        }
        depths
    }

    /// Record how the learner responded to a generated path.
    pub async fn record_interaction(
        &self,
        learner_id: &str,
        path_id: &str,
        interaction: PathInteraction,
    ) {
        let mut interactions = self.interactions.write().await;
        interactions
            .entry(learner_id.to_string())
            .or_default()
            .push((path_id.to_string(), interaction));
        debug!(learner_id, path_id, ?interaction, "path interaction recorded");
    }

    /// Aggregate effectiveness of paths generated for a learner. `None`
    /// until at least one interaction has been recorded.
    pub async fn path_effectiveness(&self, learner_id: &str) -> Option<PathEffectiveness> {
        let interactions = self.interactions.read().await;
        let recorded = interactions.get(learner_id)?;
        if recorded.is_empty() {
            return None;
        }

        let total = recorded.len() as f64;
        let accepted = recorded
            .iter()
            .filter(|(_, i)| {
                matches!(i, PathInteraction::Accepted | PathInteraction::Completed)
            })
            .count() as f64;
        let completed = recorded
            .iter()
            .filter(|(_, i)| matches!(i, PathInteraction::Completed))
            .count() as f64;

        Some(PathEffectiveness {
            acceptance_rate: accepted / total,
            completion_rate: if accepted > 0.0 {
                completed / accepted
            } else {
                0.0
            },
            engagement_score: (accepted * 0.6 + completed * 0.4) / total,
        })
    }

    /// Pass-through to the optional generative suggester for skills the
    /// catalog does not cover. Empty when no suggester is configured.
    pub async fn suggest_items(&self, skill_id: &str) -> Vec<LearningItem> {
        match &self.suggester {
            Some(suggester) => suggester.suggest_items(skill_id).await,
            None => Vec::new(),
        }
    }
}
