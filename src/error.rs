/// Failure taxonomy for the progression core.
///
/// Every variant is per-operation: a failed call leaves session and mastery
/// state exactly as it was. Downstream best-effort failures (event fan-out)
/// never surface here.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid transition: cannot {action} a session in state {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("sequence violation: expected item {expected}, got {got}")]
    SequenceViolation { expected: String, got: String },

    #[error("no eligible items remain after prerequisite gating")]
    EmptyQueue,

    #[error("no eligible content for outstanding skill {skill_id}")]
    NoEligibleContent { skill_id: String },

    #[error("no mastery records for learner {learner_id}")]
    UnknownLearner { learner_id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("mastery snapshot stale: path generated at version {path_version}, learner now at {current_version}")]
    StaleSnapshot {
        path_version: u64,
        current_version: u64,
    },

    #[error("org boundary violation: resource belongs to org {expected}, caller org is {got}")]
    OrgBoundary { expected: String, got: String },
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
