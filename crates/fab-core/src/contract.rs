// SPDX-License-Identifier: MIT OR Apache-2.0
//! Data boundary contracts and materialization records.
//!
//! A boundary contract is the policy record that gates access to and
//! materialization of external data. A materialization record is the index
//! row for one persisted representation of that data; it must always point
//! at an active contract that allows materialization and whose scope covers
//! the reader.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of external source behind a contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExternalSourceType {
    /// An uploaded or referenced file.
    File,
    /// A remote API.
    Api,
    /// An external database.
    Database,
    /// A streaming source.
    Stream,
}

/// How a representation of external data may be persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationType {
    /// No bytes moved; the index records a locator only.
    Reference,
    /// Specific fields materialized; the original is not.
    PartialExtraction,
    /// Representation promoted immediately to a Record of Fact.
    Deterministic,
    /// Embedding stored in the semantic store; Record of Fact created.
    SemanticEmbedding,
    /// Bytes retained in the blob store; TTL governs purge.
    FullArtifact,
}

impl MaterializationType {
    /// All known types, in declaration order.
    pub const ALL: [MaterializationType; 5] = [
        Self::Reference,
        Self::PartialExtraction,
        Self::Deterministic,
        Self::SemanticEmbedding,
        Self::FullArtifact,
    ];

    /// Types whose representations may be promoted to Records of Fact.
    #[must_use]
    pub fn promotable_to_record(&self) -> bool {
        matches!(self, Self::Deterministic | Self::SemanticEmbedding)
    }
}

/// Which store family backs a materialized representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackingStore {
    /// Blob store.
    Blob,
    /// Row store.
    Row,
    /// Process memory (ephemeral).
    Memory,
    /// Nothing persisted.
    None,
}

/// Status of a boundary contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    /// Created; access granted but materialization not yet authorized.
    Pending,
    /// Materialization authorized and scoped.
    Active,
    /// TTL elapsed; working material purged.
    Expired,
    /// Revoked by steward or tenant.
    Revoked,
    /// Work completed; contract closed.
    Fulfilled,
}

impl ContractStatus {
    /// Returns the set of statuses reachable from `self`.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [ContractStatus] {
        match self {
            Self::Pending => &[Self::Active, Self::Revoked],
            Self::Active => &[Self::Expired, Self::Revoked, Self::Fulfilled],
            Self::Expired | Self::Revoked | Self::Fulfilled => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Returns `true` for a settled contract.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked | Self::Fulfilled)
    }
}

/// Free-form scope map. At minimum carries `user_id` and a `scope_type`
/// such as `"workspace"`.
pub type ScopeMap = BTreeMap<String, serde_json::Value>;

/// The set of users permitted to reference a materialized representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceScope {
    /// Users allowed to reference.
    #[serde(default)]
    pub user_ids: Vec<String>,
    /// Scope granularity (e.g. `"workspace"`).
    #[serde(default)]
    pub scope_type: String,
}

impl ReferenceScope {
    /// Workspace scope for a single user.
    #[must_use]
    pub fn workspace(user_id: impl Into<String>) -> Self {
        Self {
            user_ids: vec![user_id.into()],
            scope_type: "workspace".into(),
        }
    }

    /// Returns `true` if the given user may reference.
    #[must_use]
    pub fn allows(&self, user_id: &str) -> bool {
        self.user_ids.iter().any(|u| u == user_id)
    }
}

/// The policy record gating access to and materialization of external data.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BoundaryContract {
    /// Unique contract identifier.
    pub contract_id: Uuid,
    /// Tenant scope.
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Intent that requested access, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<Uuid>,
    /// Kind of external source.
    pub external_source_type: ExternalSourceType,
    /// Source identifier (path, URL, DSN, ...).
    pub external_source_identifier: String,
    /// Whether read access is granted.
    pub access_granted: bool,
    /// Whether persistence is authorized. Only flips on activation.
    pub materialization_allowed: bool,
    /// Negotiated materialization type, once authorized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_type: Option<MaterializationType>,
    /// TTL in seconds; `None` means permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_ttl_secs: Option<i64>,
    /// Absolute expiry derived from the TTL at activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_expires_at: Option<DateTime<Utc>>,
    /// Store family holding the representation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_backing_store: Option<BackingStore>,
    /// Scope of the materialization itself.
    #[serde(default)]
    pub materialization_scope: ScopeMap,
    /// Who may reference the representation.
    #[serde(default)]
    pub reference_scope: ReferenceScope,
    /// Current status.
    pub contract_status: ContractStatus,
    /// When the contract was negotiated.
    pub negotiated_at: DateTime<Utc>,
    /// When it was activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// When it expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    /// When it was revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why it was revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
}

impl BoundaryContract {
    /// A fresh pending contract: access granted, materialization not.
    #[must_use]
    pub fn pending(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        source_type: ExternalSourceType,
        source_identifier: impl Into<String>,
        intent_id: Option<Uuid>,
    ) -> Self {
        Self {
            contract_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            intent_id,
            external_source_type: source_type,
            external_source_identifier: source_identifier.into(),
            access_granted: true,
            materialization_allowed: false,
            materialization_type: None,
            materialization_ttl_secs: None,
            materialization_expires_at: None,
            materialization_backing_store: None,
            materialization_scope: ScopeMap::new(),
            reference_scope: ReferenceScope::default(),
            contract_status: ContractStatus::Pending,
            negotiated_at: Utc::now(),
            activated_at: None,
            expired_at: None,
            revoked_at: None,
            revoked_reason: None,
        }
    }

    /// Returns `true` when a materialization row may reference this
    /// contract on behalf of `user_id` right now.
    #[must_use]
    pub fn permits_reference(&self, user_id: &str) -> bool {
        self.contract_status == ContractStatus::Active
            && self.materialization_allowed
            && self.reference_scope.allows(user_id)
    }
}

/// Result of a materialization authorization decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MaterializationAuthorization {
    /// Contract the authorization activated.
    pub contract_id: Uuid,
    /// Selected materialization type.
    pub materialization_type: MaterializationType,
    /// TTL in seconds; `None` means permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<i64>,
    /// Selected backing store.
    pub backing_store: BackingStore,
    /// Materialization scope.
    pub scope: ScopeMap,
}

/// Index row for one persisted representation of external data.
///
/// The materialization index is authoritative; rows without a contract are
/// a legacy-migration concern outside the core contract.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaterializationRecord {
    /// Row identifier.
    pub uuid: Uuid,
    /// Tenant scope.
    pub tenant_id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name as the client supplied it.
    pub ui_name: String,
    /// Blob-store path of the bytes, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Declared file type (`structured`, `unstructured`, ...).
    pub file_type: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub file_size: u64,
    /// sha-256 of the content.
    pub file_hash: String,
    /// Row status (`saved`, `archived`).
    pub status: String,
    /// How the data entered the platform (`upload`, `api`, ...).
    pub ingestion_type: String,
    /// The governing contract. Required for all new rows.
    pub boundary_contract_id: Uuid,
    /// Mirrors the contract's materialization type.
    pub representation_type: MaterializationType,
    /// Policy that authorized the materialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_policy_basis: Option<String>,
    /// Purge deadline; `None` means permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_expires_at: Option<DateTime<Utc>>,
    /// Backing store of the representation.
    pub materialization_backing_store: BackingStore,
    /// Scope of the materialization.
    #[serde(default)]
    pub materialization_scope: ScopeMap,
    /// Whether the source is external to the platform.
    pub source_external: bool,
    /// Locator of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
    /// Kind of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Parent file in a derivation chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_file_uuid: Option<Uuid>,
    /// Root file of the derivation chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_file_uuid: Option<Uuid>,
    /// Depth in the derivation chain (0 for roots).
    #[serde(default)]
    pub lineage_depth: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted: bool,
}
