//! Learning-progression engine: session sequencing, spaced-repetition
//! mastery tracking, skill-gap path generation and progress rollups.
//!
//! [`engine::ProgressionEngine`] is the assembled entry point; the
//! individual components are usable on their own for finer-grained embeds.

pub mod clock;
pub mod config;
pub mod content;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod mastery;
pub mod progress;
pub mod recommend;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, MasteryConfig, PathConfig, SessionConfig};
pub use content::{
    ContentIndex, InMemoryContentIndex, ItemSuggester, ItemType, LearningItem,
};
pub use context::LearnerContext;
pub use engine::ProgressionEngine;
pub use error::EngineError;
pub use events::{BroadcastEventSink, EventSink, NullEventSink, ProgressEvent};
pub use mastery::{DueSkill, MasteryModel, MasterySnapshot, SkillMastery};
pub use progress::{Attempt, LearnerSummary, ProgressAggregator, ProgressSummary};
pub use recommend::{
    LearningPath, PathEffectiveness, PathEntry, PathInteraction, RecommendationEngine,
    SkillGap, TargetProfile,
};
pub use session::{
    AttemptInput, AttemptOutcome, Session, SessionEngine, SessionState, SweepStats,
};
