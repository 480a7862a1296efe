//! Read-only view over the item/skill catalog.
//!
//! The catalog itself is external; the engine only resolves item ids to
//! skill tags, difficulty and prerequisite skills through the
//! [`ContentIndex`] trait. [`InMemoryContentIndex`] is the reference
//! implementation used by tests and placement seeding.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    MultipleChoice,
    FreeResponse,
    AudioResponse,
    Reading,
    Interactive,
}

/// A published instructional item. Immutable once published; owned by the
/// content catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningItem {
    pub id: String,
    pub title: String,
    pub skill_tags: Vec<String>,
    /// Ordinal difficulty, low to high.
    pub difficulty: u8,
    pub item_type: ItemType,
    pub prerequisite_skills: Vec<String>,
}

#[async_trait]
pub trait ContentIndex: Send + Sync {
    async fn get_item(&self, item_id: &str) -> Option<LearningItem>;

    /// All published items tagged with the skill, in deterministic order
    /// (difficulty ascending, then id).
    async fn items_for_skill(&self, skill_id: &str) -> Vec<LearningItem>;
}

/// Narrow seam for a generative collaborator that can propose items for a
/// skill the catalog does not cover. Never consulted by path generation,
/// which must stay deterministic.
#[async_trait]
pub trait ItemSuggester: Send + Sync {
    async fn suggest_items(&self, skill_id: &str) -> Vec<LearningItem>;
}

/// A skill's prerequisite skills, derived from the catalog: the union of
/// `prerequisite_skills` over the skill's items, minus the skill itself.
/// Sorted for deterministic traversal.
pub async fn skill_prerequisites(index: &dyn ContentIndex, skill_id: &str) -> Vec<String> {
    let mut prereqs = BTreeSet::new();
    for item in index.items_for_skill(skill_id).await {
        for prereq in item.prerequisite_skills {
            if prereq != skill_id {
                prereqs.insert(prereq);
            }
        }
    }
    prereqs.into_iter().collect()
}

#[derive(Debug, Default)]
pub struct InMemoryContentIndex {
    items: HashMap<String, LearningItem>,
}

impl InMemoryContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<LearningItem>) -> Self {
        let mut index = Self::new();
        for item in items {
            index.insert(item);
        }
        index
    }

    pub fn insert(&mut self, item: LearningItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl ContentIndex for InMemoryContentIndex {
    async fn get_item(&self, item_id: &str) -> Option<LearningItem> {
        self.items.get(item_id).cloned()
    }

    async fn items_for_skill(&self, skill_id: &str) -> Vec<LearningItem> {
        let mut matches: Vec<LearningItem> = self
            .items
            .values()
            .filter(|item| item.skill_tags.iter().any(|tag| tag == skill_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.difficulty.cmp(&b.difficulty).then(a.id.cmp(&b.id)));
        matches
    }
}
