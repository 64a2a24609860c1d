// SPDX-License-Identifier: MIT OR Apache-2.0
//! Materialization policy store.
//!
//! Uniqueness rules: exactly one platform default per policy version; at
//! most one active policy per tenant and per solution. Activating a new
//! policy deactivates the one it displaces in the same transactional
//! batch.

use chrono::Utc;
use fab_capability::{Predicate, RowOp, RowStore};
use fab_core::{MaterializationPolicy, PolicyRules};
use fab_error::{ErrorCode, FabricError, Result};
use std::sync::Arc;
use uuid::Uuid;

const TABLE: &str = "materialization_policies";

/// Storage and uniqueness enforcement for materialization policies.
#[derive(Clone)]
pub struct PolicyStore {
    rows: Arc<dyn RowStore>,
}

impl PolicyStore {
    /// Create a store over the given row store.
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    fn decode(value: serde_json::Value) -> Result<MaterializationPolicy> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode policy row").with_source(e))
    }

    fn encode(policy: &MaterializationPolicy) -> Result<serde_json::Value> {
        serde_json::to_value(policy)
            .map_err(|e| FabricError::internal("encode policy row").with_source(e))
    }

    /// Seed the platform default policy if none exists yet. Idempotent.
    pub async fn seed_platform_default(&self) -> Result<MaterializationPolicy> {
        if let Some(existing) = self.platform_default().await? {
            return Ok(existing);
        }
        let policy = MaterializationPolicy {
            policy_id: Uuid::new_v4(),
            tenant_id: None,
            solution_id: None,
            policy_name: "platform-default".into(),
            policy_version: 1,
            policy_rules: PolicyRules::platform_default(),
            is_platform_default: true,
            is_active: true,
            description: "Permissive MVP default: all types, 30-day TTL".into(),
            created_by: "platform".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.insert(&policy).await?;
        Ok(policy)
    }

    /// Insert a policy, enforcing the uniqueness rules.
    ///
    /// # Errors
    ///
    /// `integrity_violation` when a second platform default for the same
    /// version, or a second active policy for the same tenant or solution,
    /// would result.
    pub async fn insert(&self, policy: &MaterializationPolicy) -> Result<()> {
        if policy.is_platform_default {
            let same_version = self
                .rows
                .query(
                    TABLE,
                    &Predicate::new()
                        .eq("is_platform_default", true)
                        .eq("policy_version", policy.policy_version),
                )
                .await?;
            if !same_version.is_empty() {
                return Err(FabricError::new(
                    ErrorCode::IntegrityViolation,
                    format!(
                        "platform default v{} already exists",
                        policy.policy_version
                    ),
                ));
            }
        }

        let mut ops = Vec::new();
        if policy.is_active {
            // Deactivate whatever this policy displaces, atomically.
            for displaced in self.displaced_by(policy).await? {
                let mut inactive = displaced;
                inactive.is_active = false;
                inactive.updated_at = Utc::now();
                ops.push(RowOp::Put {
                    table: TABLE.into(),
                    key: inactive.policy_id.to_string(),
                    value: Self::encode(&inactive)?,
                });
            }
        }
        ops.push(RowOp::Put {
            table: TABLE.into(),
            key: policy.policy_id.to_string(),
            value: Self::encode(policy)?,
        });
        self.rows.apply(ops).await
    }

    async fn displaced_by(
        &self,
        policy: &MaterializationPolicy,
    ) -> Result<Vec<MaterializationPolicy>> {
        let mut displaced = Vec::new();
        if let Some(tenant_id) = &policy.tenant_id {
            let rows = self
                .rows
                .query(
                    TABLE,
                    &Predicate::new()
                        .eq("is_active", true)
                        .eq("tenant_id", tenant_id.clone()),
                )
                .await?;
            for row in rows {
                displaced.push(Self::decode(row.value)?);
            }
        }
        if let Some(solution_id) = &policy.solution_id {
            let rows = self
                .rows
                .query(
                    TABLE,
                    &Predicate::new()
                        .eq("is_active", true)
                        .eq("solution_id", solution_id.clone()),
                )
                .await?;
            for row in rows {
                let decoded = Self::decode(row.value)?;
                if !displaced.iter().any(|p: &MaterializationPolicy| {
                    p.policy_id == decoded.policy_id
                }) {
                    displaced.push(decoded);
                }
            }
        }
        Ok(displaced)
    }

    /// The active platform default, if seeded.
    pub async fn platform_default(&self) -> Result<Option<MaterializationPolicy>> {
        let rows = self
            .rows
            .query(
                TABLE,
                &Predicate::new()
                    .eq("is_platform_default", true)
                    .eq("is_active", true),
            )
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(Self::decode(row.value)?)),
            None => Ok(None),
        }
    }

    /// The policy governing a (tenant, solution) pair: solution-scoped
    /// first, then tenant-scoped, then the platform default.
    pub async fn active_for(
        &self,
        tenant_id: &str,
        solution_id: Option<&str>,
    ) -> Result<Option<MaterializationPolicy>> {
        if let Some(solution_id) = solution_id {
            let rows = self
                .rows
                .query(
                    TABLE,
                    &Predicate::new()
                        .eq("is_active", true)
                        .eq("solution_id", solution_id),
                )
                .await?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(Self::decode(row.value)?));
            }
        }
        let rows = self
            .rows
            .query(
                TABLE,
                &Predicate::new()
                    .eq("is_active", true)
                    .eq("tenant_id", tenant_id),
            )
            .await?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(Some(Self::decode(row.value)?));
        }
        self.platform_default().await
    }
}
