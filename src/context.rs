use serde::{Deserialize, Serialize};

/// Pre-authenticated caller identity. The identity/permission collaborator
/// resolves this before any core call; the engine trusts it and only
/// enforces the org boundary on session access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerContext {
    pub learner_id: String,
    pub org_id: String,
    pub roles: Vec<String>,
}

impl LearnerContext {
    pub fn new(learner_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            org_id: org_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
