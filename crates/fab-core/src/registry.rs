// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform DNA registries and materialization policies.
//!
//! Registry rows are versioned and immutable; at most one row per
//! identifier carries `is_current_version = true`. Policies are data, not
//! code: the steward evaluates them, never hard-codes them.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contract::{BackingStore, MaterializationType};

/// Which platform DNA registry a row belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DnaRegistry {
    /// Generalized solutions.
    Solution,
    /// Generalized intents.
    Intent,
    /// Generalized realms.
    Realm,
}

/// One versioned, immutable registry row.
///
/// Out-of-tenant; read-only to clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DnaRegistryEntry {
    /// Which registry.
    pub registry: DnaRegistry,
    /// Stable identifier within the registry.
    pub identifier: String,
    /// Version, ≥ 1.
    pub version: u32,
    /// The generalized definition.
    pub definition: serde_json::Value,
    /// Artifact the definition was promoted from.
    pub source_artifact_id: String,
    /// Who promoted it.
    pub promoted_by: String,
    /// At most one row per identifier carries `true`.
    pub is_current_version: bool,
    /// Promotion timestamp.
    pub promoted_at: DateTime<Utc>,
}

/// The rule set a materialization policy evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyRules {
    /// Types this policy permits.
    pub allowed_types: Vec<MaterializationType>,
    /// Type selected when the requester does not ask for one.
    pub default_type: MaterializationType,
    /// Default TTL in seconds for non-permanent materializations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<i64>,
    /// Default backing store.
    pub default_backing_store: BackingStore,
}

impl PolicyRules {
    /// The MVP platform default: every type allowed, 30-day
    /// TTL for non-permanent materializations, blob-backed.
    #[must_use]
    pub fn platform_default() -> Self {
        Self {
            allowed_types: MaterializationType::ALL.to_vec(),
            default_type: MaterializationType::FullArtifact,
            default_ttl_secs: Some(30 * 24 * 60 * 60),
            default_backing_store: BackingStore::Blob,
        }
    }

    /// Returns `true` if this policy permits the given type.
    #[must_use]
    pub fn permits(&self, requested: MaterializationType) -> bool {
        self.allowed_types.contains(&requested)
    }
}

/// A materialization policy row.
///
/// Uniqueness (enforced by the policy store): exactly one platform default
/// per version; at most one active policy per tenant and per solution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaterializationPolicy {
    /// Unique policy identifier.
    pub policy_id: Uuid,
    /// Tenant the policy binds, when tenant-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Solution the policy binds, when solution-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,
    /// Human-readable name.
    pub policy_name: String,
    /// Policy version, ≥ 1.
    pub policy_version: u32,
    /// The rules.
    pub policy_rules: PolicyRules,
    /// Whether this row is the platform default.
    #[serde(default)]
    pub is_platform_default: bool,
    /// Whether this row is active.
    #[serde(default)]
    pub is_active: bool,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Who created it.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
