// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Artifacts: lifecycle, versioning, lineage, payload references.
pub mod artifact;
/// Boundary contracts, materialization types, and the materialization index row.
pub mod contract;
/// Records of fact: persistent interpreted meaning.
pub mod record;
/// Platform DNA registries: versioned, immutable generalized capabilities.
pub mod registry;
/// Sessions and their anonymous/active sub-states.
pub mod session;

use chrono::{DateTime, Utc};
use fab_error::{FabricError, WireError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use artifact::{
    Artifact, ArtifactOwner, ArtifactPurpose, LifecycleState, LifecycleTransition, PayloadRef,
};
pub use contract::{
    BackingStore, BoundaryContract, ContractStatus, ExternalSourceType, MaterializationAuthorization,
    MaterializationRecord, MaterializationType, ReferenceScope, ScopeMap,
};
pub use record::{RecordOfFact, RecordType};
pub use registry::{DnaRegistry, DnaRegistryEntry, MaterializationPolicy, PolicyRules};
pub use session::{Session, SessionState};

/// Current contract version string embedded in stream envelopes and the
/// health endpoint.
///
/// # Examples
///
/// ```
/// assert_eq!(fab_core::CONTRACT_VERSION, "fabric/v0.1");
/// ```
pub const CONTRACT_VERSION: &str = "fabric/v0.1";

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// The unit of request: a declarative description of work, and the only
/// way to cause side effects in the platform.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Intent {
    /// Unique identifier; client-proposable, assigned when absent.
    pub intent_id: Uuid,

    /// Globally-registered intent type (e.g. `"ingest_file"`).
    pub intent_type: String,

    /// Tenant this intent runs under. Must match the session's tenant.
    pub tenant_id: String,

    /// Session the intent was submitted in.
    pub session_id: Uuid,

    /// User the intent is attributed to.
    pub user_id: String,

    /// Optional binding to a registered Solution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,

    /// Opaque parameter object, validated against the intent type's schema.
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,

    /// Opaque metadata; carries idempotency hints.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Intent {
    /// Shape check independent of any intent-type schema: required
    /// identity fields must be present.
    ///
    /// # Errors
    ///
    /// Returns `invalid_parameters` naming the first empty field.
    pub fn validate_shape(&self) -> Result<(), FabricError> {
        if self.intent_type.trim().is_empty() {
            return Err(FabricError::invalid_parameters("intent_type is empty"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(FabricError::invalid_parameters("tenant_id is empty"));
        }
        if self.user_id.trim().is_empty() {
            return Err(FabricError::invalid_parameters("user_id is empty"));
        }
        if !self.parameters.is_object() {
            return Err(FabricError::invalid_parameters(
                "parameters must be an object",
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`Intent`].
///
/// ```
/// use fab_core::IntentBuilder;
/// use uuid::Uuid;
///
/// let intent = IntentBuilder::new("ingest_file")
///     .tenant("acme")
///     .session(Uuid::new_v4())
///     .user("u-1")
///     .parameter("ui_name", "smoke.txt")
///     .build();
/// assert_eq!(intent.intent_type, "ingest_file");
/// ```
#[derive(Debug, Clone)]
pub struct IntentBuilder {
    intent_id: Option<Uuid>,
    intent_type: String,
    tenant_id: String,
    session_id: Uuid,
    user_id: String,
    solution_id: Option<String>,
    parameters: serde_json::Map<String, serde_json::Value>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl IntentBuilder {
    /// Start building an intent of the given type.
    #[must_use]
    pub fn new(intent_type: impl Into<String>) -> Self {
        Self {
            intent_id: None,
            intent_type: intent_type.into(),
            tenant_id: String::new(),
            session_id: Uuid::nil(),
            user_id: String::new(),
            solution_id: None,
            parameters: serde_json::Map::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Propose a client-side intent id.
    #[must_use]
    pub fn id(mut self, id: Uuid) -> Self {
        self.intent_id = Some(id);
        self
    }

    /// Set the tenant.
    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Set the session.
    #[must_use]
    pub fn session(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the user.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Bind to a registered solution.
    #[must_use]
    pub fn solution(mut self, solution_id: impl Into<String>) -> Self {
        self.solution_id = Some(solution_id.into());
        self
    }

    /// Add one parameter field.
    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.parameters.insert(key.into(), v);
        }
        self
    }

    /// Replace the whole parameter object.
    #[must_use]
    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = parameters {
            self.parameters = map;
        }
        self
    }

    /// Add one metadata entry (idempotency hints live here).
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }

    /// Finalize the intent, assigning an id when none was proposed.
    #[must_use]
    pub fn build(self) -> Intent {
        Intent {
            intent_id: self.intent_id.unwrap_or_else(Uuid::new_v4),
            intent_type: self.intent_type,
            tenant_id: self.tenant_id,
            session_id: self.session_id,
            user_id: self.user_id,
            solution_id: self.solution_id,
            parameters: serde_json::Value::Object(self.parameters),
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Status of one attempt to run an intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Admitted, waiting in the tenant queue.
    Pending,
    /// Handler is executing.
    Running,
    /// Handler returned successfully.
    Completed,
    /// Handler failed; compensations have run.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns `true` if this status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [ExecutionStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    #[must_use]
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// One attempt to run an intent: a state machine plus its recorded outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Execution {
    /// Unique identifier, assigned by the Runtime at admission.
    pub execution_id: Uuid,
    /// The intent this execution runs.
    pub intent_id: Uuid,
    /// Tenant scope.
    pub tenant_id: String,
    /// Session scope.
    pub session_id: Uuid,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Set when the handler starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set when a terminal state is reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Sanitized terminal error, when status is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    /// Artifacts produced, keyed by handler-chosen name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRef>,
    /// Ordered events emitted during execution.
    #[serde(default)]
    pub events: Vec<EventRecord>,
    /// Admission timestamp.
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// A fresh pending execution for the given intent.
    #[must_use]
    pub fn admitted(execution_id: Uuid, intent: &Intent) -> Self {
        Self {
            execution_id,
            intent_id: intent.intent_id,
            tenant_id: intent.tenant_id.clone(),
            session_id: intent.session_id,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            artifacts: BTreeMap::new(),
            events: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Reference to an artifact from an execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    /// Handler-chosen name (unique within the execution).
    pub name: String,
    /// Artifact Plane identifier.
    pub artifact_id: String,
    /// Artifact type string.
    pub artifact_type: String,
}

/// A domain event emitted by a handler during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventRecord {
    /// Event type string (realm-defined).
    pub event_type: String,
    /// Opaque event payload.
    pub data: serde_json::Value,
    /// Emission timestamp.
    pub ts: DateTime<Utc>,
}

impl EventRecord {
    /// Create an event stamped now.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            ts: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WAL
// ---------------------------------------------------------------------------

/// Kind of a write-ahead-log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalKind {
    /// An intent passed admission and an execution was created.
    IntentAdmitted,
    /// The handler was dispatched.
    StepStarted,
    /// A named handler step finished.
    StepCompleted,
    /// An artifact was recorded in the Artifact Plane.
    ArtifactProduced,
    /// A domain event was emitted.
    EventEmitted,
    /// A saga compensation ran (or failed).
    SagaCompensation,
    /// The execution reached a terminal state. Always the last record.
    ExecutionTerminal,
}

impl WalKind {
    /// Stable snake_case name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentAdmitted => "intent_admitted",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::ArtifactProduced => "artifact_produced",
            Self::EventEmitted => "event_emitted",
            Self::SagaCompensation => "saga_compensation",
            Self::ExecutionTerminal => "execution_terminal",
        }
    }
}

/// One append-only record in a tenant's write-ahead log.
///
/// Once written, immutable. Replaying a tenant's records up to any
/// sequence number reconstructs execution state as of that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WalRecord {
    /// Monotonic sequence, per tenant. No cross-tenant ordering.
    pub seq: u64,
    /// Tenant stream this record belongs to.
    pub tenant_id: String,
    /// Session the originating intent ran in.
    pub session_id: Uuid,
    /// Execution this record describes.
    pub execution_id: Uuid,
    /// Record kind.
    pub kind: WalKind,
    /// Opaque payload; shape depends on `kind`.
    pub payload: serde_json::Value,
    /// Append timestamp.
    pub ts: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Stream envelope
// ---------------------------------------------------------------------------

/// Wire envelope for execution event streams (WebSocket / long-poll).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StreamEnvelope {
    /// Envelope discriminator; always `"execution_event"` for WAL-backed
    /// messages.
    #[serde(rename = "type")]
    pub envelope_type: String,
    /// The WAL kind string (e.g. `"artifact_produced"`).
    pub event_type: String,
    /// Record payload, including the per-tenant `seq` for dedupe.
    pub data: serde_json::Value,
    /// Record timestamp.
    pub timestamp: DateTime<Utc>,
}

impl StreamEnvelope {
    /// Returns `true` if this envelope is the terminal message of a stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.event_type == WalKind::ExecutionTerminal.as_str()
    }

    /// The per-tenant WAL sequence carried in `data`, if present.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.data.get("seq").and_then(serde_json::Value::as_u64)
    }
}

impl From<&WalRecord> for StreamEnvelope {
    fn from(rec: &WalRecord) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("seq".into(), rec.seq.into());
        data.insert(
            "execution_id".into(),
            serde_json::Value::String(rec.execution_id.to_string()),
        );
        data.insert("payload".into(), rec.payload.clone());
        Self {
            envelope_type: "execution_event".into(),
            event_type: rec.kind.as_str().into(),
            data: serde_json::Value::Object(data),
            timestamp: rec.ts,
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic ids
// ---------------------------------------------------------------------------

/// Deterministic artifact id for a (tenant, type, key) triple.
///
/// Stable across runs, so re-ingesting the same logical thing lands on the
/// same artifact chain.
///
/// # Examples
///
/// ```
/// let a = fab_core::deterministic_artifact_id("acme", "file", "smoke.txt");
/// let b = fab_core::deterministic_artifact_id("acme", "file", "smoke.txt");
/// assert_eq!(a, b);
/// ```
#[must_use]
pub fn deterministic_artifact_id(tenant_id: &str, artifact_type: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(artifact_type.as_bytes());
    hasher.update([0x1f]);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{artifact_type}-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent() -> Intent {
        IntentBuilder::new("ingest_file")
            .tenant("acme")
            .session(Uuid::new_v4())
            .user("u-1")
            .parameter("ui_name", "smoke.txt")
            .build()
    }

    // -----------------------------------------------------------------------
    // Intent
    // -----------------------------------------------------------------------

    #[test]
    fn builder_assigns_an_id_when_none_proposed() {
        let intent = sample_intent();
        assert_ne!(intent.intent_id, Uuid::nil());
    }

    #[test]
    fn builder_keeps_a_proposed_id() {
        let id = Uuid::new_v4();
        let intent = IntentBuilder::new("x")
            .id(id)
            .tenant("t")
            .user("u")
            .build();
        assert_eq!(intent.intent_id, id);
    }

    #[test]
    fn intent_serde_roundtrip() {
        let intent = sample_intent();
        let json = serde_json::to_string(&intent).unwrap();
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.intent_id, intent.intent_id);
        assert_eq!(back.intent_type, intent.intent_type);
        assert_eq!(back.parameters, intent.parameters);
    }

    #[test]
    fn validate_shape_rejects_empty_tenant() {
        let mut intent = sample_intent();
        intent.tenant_id = "  ".into();
        let err = intent.validate_shape().unwrap_err();
        assert_eq!(err.code, fab_error::ErrorCode::InvalidParameters);
    }

    #[test]
    fn validate_shape_rejects_non_object_parameters() {
        let mut intent = sample_intent();
        intent.parameters = serde_json::json!([1, 2, 3]);
        assert!(intent.validate_shape().is_err());
    }

    #[test]
    fn validate_shape_accepts_complete_intent() {
        assert!(sample_intent().validate_shape().is_ok());
    }

    // -----------------------------------------------------------------------
    // ExecutionStatus state machine
    // -----------------------------------------------------------------------

    #[test]
    fn pending_can_run_or_cancel() {
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Running));
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Cancelled));
        assert!(!ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Completed));
    }

    #[test]
    fn running_reaches_every_terminal() {
        for next in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(ExecutionStatus::Running.can_transition_to(next));
        }
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn execution_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn admitted_execution_is_pending_and_attributed() {
        let intent = sample_intent();
        let exec = Execution::admitted(Uuid::new_v4(), &intent);
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.intent_id, intent.intent_id);
        assert_eq!(exec.tenant_id, intent.tenant_id);
        assert_eq!(exec.session_id, intent.session_id);
        assert!(exec.started_at.is_none());
        assert!(exec.artifacts.is_empty());
    }

    // -----------------------------------------------------------------------
    // WAL
    // -----------------------------------------------------------------------

    #[test]
    fn wal_kind_strings_are_stable() {
        assert_eq!(WalKind::IntentAdmitted.as_str(), "intent_admitted");
        assert_eq!(WalKind::ExecutionTerminal.as_str(), "execution_terminal");
        assert_eq!(WalKind::SagaCompensation.as_str(), "saga_compensation");
    }

    #[test]
    fn wal_record_roundtrip() {
        let rec = WalRecord {
            seq: 7,
            tenant_id: "acme".into(),
            session_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            kind: WalKind::ArtifactProduced,
            payload: serde_json::json!({"artifact_id": "file-abc"}),
            ts: Utc::now(),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: WalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    // -----------------------------------------------------------------------
    // Stream envelope
    // -----------------------------------------------------------------------

    #[test]
    fn envelope_from_wal_record_carries_seq_and_kind() {
        let rec = WalRecord {
            seq: 3,
            tenant_id: "acme".into(),
            session_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            kind: WalKind::EventEmitted,
            payload: serde_json::json!({"event_type": "file_uploaded"}),
            ts: Utc::now(),
        };
        let env = StreamEnvelope::from(&rec);
        assert_eq!(env.envelope_type, "execution_event");
        assert_eq!(env.event_type, "event_emitted");
        assert_eq!(env.seq(), Some(3));
        assert!(!env.is_terminal());
    }

    #[test]
    fn terminal_envelope_is_detected() {
        let rec = WalRecord {
            seq: 9,
            tenant_id: "acme".into(),
            session_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            kind: WalKind::ExecutionTerminal,
            payload: serde_json::json!({"status": "completed"}),
            ts: Utc::now(),
        };
        assert!(StreamEnvelope::from(&rec).is_terminal());
    }

    #[test]
    fn envelope_wire_field_is_named_type() {
        let rec = WalRecord {
            seq: 1,
            tenant_id: "t".into(),
            session_id: Uuid::nil(),
            execution_id: Uuid::nil(),
            kind: WalKind::StepStarted,
            payload: serde_json::json!({}),
            ts: Utc::now(),
        };
        let json = serde_json::to_value(StreamEnvelope::from(&rec)).unwrap();
        assert_eq!(json["type"], "execution_event");
        assert!(json.get("envelope_type").is_none());
    }

    // -----------------------------------------------------------------------
    // Deterministic ids
    // -----------------------------------------------------------------------

    #[test]
    fn deterministic_ids_are_stable_and_tenant_scoped() {
        let a = deterministic_artifact_id("acme", "file", "smoke.txt");
        let b = deterministic_artifact_id("acme", "file", "smoke.txt");
        let other_tenant = deterministic_artifact_id("globex", "file", "smoke.txt");
        assert_eq!(a, b);
        assert_ne!(a, other_tenant);
        assert!(a.starts_with("file-"));
    }

    #[test]
    fn deterministic_ids_separate_fields() {
        // "ab"+"c" must not collide with "a"+"bc".
        let x = deterministic_artifact_id("t", "ab", "c");
        let y = deterministic_artifact_id("t", "a", "bc");
        assert_ne!(x, y);
    }
}
