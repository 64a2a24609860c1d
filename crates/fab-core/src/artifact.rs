// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact records: lifecycle, versioning, lineage, payload references.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Mutable working state; the default at creation.
    Draft,
    /// Accepted for its purpose. Accepted rows are immutable; changes
    /// require a new draft descendant.
    Accepted,
    /// Terminal. No further transitions.
    Obsolete,
}

impl LifecycleState {
    /// Returns the set of states reachable from `self`. No back edges.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [LifecycleState] {
        match self {
            Self::Draft => &[Self::Accepted, Self::Obsolete],
            Self::Accepted => &[Self::Obsolete],
            Self::Obsolete => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Returns `true` for the terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Obsolete)
    }
}

/// Who owns an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOwner {
    /// Owned by the client tenant.
    Client,
    /// Owned by the platform.
    Platform,
    /// Jointly owned.
    Shared,
}

/// Why an artifact exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPurpose {
    /// Supports a decision.
    DecisionSupport,
    /// Part of a delivery.
    Delivery,
    /// Governance record.
    Governance,
    /// Learning material.
    Learning,
}

/// Opaque locator for an artifact payload held by a capability store.
///
/// The Runtime never inlines payloads; records carry references only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PayloadRef {
    /// Which store family holds the bytes (e.g. `"blob"`, `"row"`).
    pub store: String,
    /// Store-specific locator.
    pub locator: String,
}

/// One audit entry in an artifact's transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleTransition {
    /// State before.
    pub from: LifecycleState,
    /// State after.
    pub to: LifecycleState,
    /// Who requested the transition.
    pub actor: String,
    /// Why.
    pub reason: String,
    /// When.
    pub at: DateTime<Utc>,
}

/// A stable, typed piece of produced meaning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    /// Stable identifier; deterministic per (tenant, type, key) when the
    /// producer requested it.
    pub artifact_id: String,
    /// Tenant scope.
    pub tenant_id: String,
    /// Session scope, when the artifact is session-bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Execution that produced this row.
    pub execution_id: Uuid,
    /// Artifact type string (`file`, `parsed_content`, `roadmap`, ...).
    pub artifact_type: String,
    /// Realm that produced it.
    pub realm: String,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Ownership.
    pub owner: ArtifactOwner,
    /// Purpose binding.
    pub purpose: ArtifactPurpose,
    /// Version number within the chain, ≥ 1.
    pub version: u32,
    /// Prior current version, when this row was created by acceptance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_artifact_id: Option<String>,
    /// At most one row per chain carries `true`.
    pub is_current_version: bool,
    /// Lineage: artifacts this one was derived from.
    #[serde(default)]
    pub source_artifact_ids: Vec<String>,
    /// Typed fields relevant to the artifact type (e.g. for parsed files:
    /// schema, parser_type, record_count).
    #[serde(default)]
    pub semantic_descriptor: serde_json::Value,
    /// Payload locator; `None` for reference-only artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PayloadRef>,
    /// Audit trail of lifecycle transitions.
    #[serde(default)]
    pub lifecycle_transitions: Vec<LifecycleTransition>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_can_accept_or_obsolete() {
        assert!(LifecycleState::Draft.can_transition_to(LifecycleState::Accepted));
        assert!(LifecycleState::Draft.can_transition_to(LifecycleState::Obsolete));
    }

    #[test]
    fn accepted_only_obsoletes() {
        assert!(LifecycleState::Accepted.can_transition_to(LifecycleState::Obsolete));
        assert!(!LifecycleState::Accepted.can_transition_to(LifecycleState::Draft));
        assert!(!LifecycleState::Accepted.can_transition_to(LifecycleState::Accepted));
    }

    #[test]
    fn obsolete_is_terminal() {
        assert!(LifecycleState::Obsolete.is_terminal());
        assert!(LifecycleState::Obsolete.valid_transitions().is_empty());
    }

    #[test]
    fn no_back_edges_exist() {
        // Exhaustive: no transition may target Draft.
        for state in [
            LifecycleState::Draft,
            LifecycleState::Accepted,
            LifecycleState::Obsolete,
        ] {
            assert!(!state.can_transition_to(LifecycleState::Draft));
        }
    }

    #[test]
    fn lifecycle_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::Draft).unwrap(),
            "\"draft\""
        );
        assert_eq!(
            serde_json::to_string(&ArtifactPurpose::DecisionSupport).unwrap(),
            "\"decision_support\""
        );
    }

    #[test]
    fn artifact_serde_roundtrip() {
        let artifact = Artifact {
            artifact_id: "file-abc".into(),
            tenant_id: "acme".into(),
            session_id: Some(Uuid::new_v4()),
            execution_id: Uuid::new_v4(),
            artifact_type: "file".into(),
            realm: "content".into(),
            lifecycle_state: LifecycleState::Draft,
            owner: ArtifactOwner::Client,
            purpose: ArtifactPurpose::Delivery,
            version: 1,
            parent_artifact_id: None,
            is_current_version: true,
            source_artifact_ids: vec![],
            semantic_descriptor: serde_json::json!({"file_id": "f-1"}),
            payload_ref: Some(PayloadRef {
                store: "blob".into(),
                locator: "tmp/acme/f-1".into(),
            }),
            lifecycle_transitions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.artifact_id, artifact.artifact_id);
        assert_eq!(back.lifecycle_state, LifecycleState::Draft);
        assert_eq!(back.payload_ref, artifact.payload_ref);
    }
}
