// SPDX-License-Identifier: MIT OR Apache-2.0
//! The data steward: boundary contracts and two-phase materialization.
//!
//! Phase A (`request_data_access`) creates a pending contract: access is
//! granted, persistence is not. Phase B (`authorize_materialization`)
//! evaluates the governing policy, activates the contract, and sets its
//! scopes. A materialization row is only ever visible through
//! [`DataSteward::visible_records`], which re-checks the gate at read
//! time.

use chrono::{Duration, Utc};
use fab_capability::RowStore;
use fab_core::{
    BoundaryContract, ContractStatus, ExternalSourceType, MaterializationAuthorization,
    MaterializationRecord, MaterializationType, ReferenceScope, ScopeMap,
};
use fab_error::{ErrorCode, FabricError, Result};
use fab_store::{MaterializationIndex, PolicyStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const TABLE: &str = "data_boundary_contracts";

/// Who is asking for data access.
#[derive(Debug, Clone)]
pub struct AccessContext {
    /// Tenant scope.
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Originating intent, when known.
    pub intent_id: Option<Uuid>,
}

/// Result of Phase A: a pending contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAccessRequest {
    /// The created contract.
    pub contract_id: Uuid,
    /// Whether read access was granted.
    pub access_granted: bool,
}

/// Inputs to the Phase B policy evaluation.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    /// Solution binding, when the intent carries one.
    pub solution_id: Option<String>,
    /// Materialization type the caller asked for, if any.
    pub requested_type: Option<MaterializationType>,
    /// TTL the caller asked for, if any.
    pub requested_ttl_secs: Option<i64>,
}

/// The data steward.
#[derive(Clone)]
pub struct DataSteward {
    rows: Arc<dyn RowStore>,
    policies: PolicyStore,
    index: MaterializationIndex,
}

impl DataSteward {
    /// Create a steward over contract storage, the policy store, and the
    /// materialization index.
    pub fn new(rows: Arc<dyn RowStore>, policies: PolicyStore, index: MaterializationIndex) -> Self {
        Self {
            rows,
            policies,
            index,
        }
    }

    /// The materialization index this steward governs.
    #[must_use]
    pub fn index(&self) -> &MaterializationIndex {
        &self.index
    }

    fn key(tenant_id: &str, contract_id: Uuid) -> String {
        format!("{tenant_id}/{contract_id}")
    }

    fn decode(value: Value) -> Result<BoundaryContract> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode contract row").with_source(e))
    }

    async fn save(&self, contract: &BoundaryContract) -> Result<()> {
        let value = serde_json::to_value(contract)
            .map_err(|e| FabricError::internal("encode contract row").with_source(e))?;
        self.rows
            .put(TABLE, &Self::key(&contract.tenant_id, contract.contract_id), value)
            .await?;
        Ok(())
    }

    /// Phase A: create a pending contract for an external source.
    pub async fn request_data_access(
        &self,
        ctx: &AccessContext,
        source_type: ExternalSourceType,
        source_identifier: &str,
    ) -> Result<DataAccessRequest> {
        let contract = BoundaryContract::pending(
            &ctx.tenant_id,
            &ctx.user_id,
            source_type,
            source_identifier,
            ctx.intent_id,
        );
        self.save(&contract).await?;
        info!(
            target: "fab.steward",
            contract_id = %contract.contract_id,
            tenant_id = %ctx.tenant_id,
            source = %source_identifier,
            "pending contract created"
        );
        Ok(DataAccessRequest {
            contract_id: contract.contract_id,
            access_granted: contract.access_granted,
        })
    }

    /// Look up a contract.
    pub async fn get_contract(&self, tenant_id: &str, contract_id: Uuid) -> Result<BoundaryContract> {
        match self.rows.get(TABLE, &Self::key(tenant_id, contract_id)).await? {
            Some(row) => Self::decode(row.value),
            None => Err(FabricError::new(
                ErrorCode::NotFound,
                format!("contract {contract_id} not found"),
            )),
        }
    }

    /// Phase B: evaluate policy and activate a pending contract.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown contracts, `already_terminal` for contracts
    /// past pending, `denied_by_policy` when the requested type is outside
    /// the governing policy.
    pub async fn authorize_materialization(
        &self,
        tenant_id: &str,
        contract_id: Uuid,
        ctx: &PolicyContext,
    ) -> Result<MaterializationAuthorization> {
        let mut contract = self.get_contract(tenant_id, contract_id).await?;
        if contract.contract_status != ContractStatus::Pending {
            return Err(FabricError::new(
                ErrorCode::AlreadyTerminal,
                format!(
                    "contract {contract_id} is {:?}, not pending",
                    contract.contract_status
                ),
            ));
        }

        let policy = self
            .policies
            .active_for(tenant_id, ctx.solution_id.as_deref())
            .await?
            .ok_or_else(|| {
                FabricError::new(ErrorCode::ConfigInvalid, "no materialization policy available")
            })?;
        let rules = &policy.policy_rules;

        let selected_type = match ctx.requested_type {
            Some(requested) if rules.permits(requested) => requested,
            Some(requested) => {
                warn!(
                    target: "fab.steward",
                    contract_id = %contract_id,
                    requested = ?requested,
                    policy = %policy.policy_name,
                    "materialization type denied by policy"
                );
                return Err(FabricError::denied(format!(
                    "materialization type {requested:?} not permitted by policy '{}'",
                    policy.policy_name
                )));
            }
            None => rules.default_type,
        };

        let ttl_secs = ctx.requested_ttl_secs.or(rules.default_ttl_secs);
        let now = Utc::now();

        let mut scope = ScopeMap::new();
        scope.insert("user_id".into(), Value::String(contract.user_id.clone()));
        scope.insert("scope_type".into(), Value::String("workspace".into()));

        contract.contract_status = ContractStatus::Active;
        contract.materialization_allowed = true;
        contract.materialization_type = Some(selected_type);
        contract.materialization_ttl_secs = ttl_secs;
        contract.materialization_expires_at = ttl_secs.map(|s| now + Duration::seconds(s));
        contract.materialization_backing_store = Some(rules.default_backing_store);
        contract.materialization_scope = scope.clone();
        contract.reference_scope = ReferenceScope::workspace(&contract.user_id);
        contract.activated_at = Some(now);
        self.save(&contract).await?;

        info!(
            target: "fab.steward",
            contract_id = %contract_id,
            materialization_type = ?selected_type,
            policy = %policy.policy_name,
            "contract activated"
        );

        Ok(MaterializationAuthorization {
            contract_id,
            materialization_type: selected_type,
            ttl_secs,
            backing_store: rules.default_backing_store,
            scope,
        })
    }

    /// Transition an active contract to `expired`, stamping the time.
    pub async fn expire_contract(&self, tenant_id: &str, contract_id: Uuid) -> Result<()> {
        self.transition(tenant_id, contract_id, ContractStatus::Expired, None)
            .await
    }

    /// Revoke a contract with a reason.
    pub async fn revoke_contract(
        &self,
        tenant_id: &str,
        contract_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        self.transition(
            tenant_id,
            contract_id,
            ContractStatus::Revoked,
            Some(reason.to_string()),
        )
        .await
    }

    /// Mark a contract fulfilled.
    pub async fn fulfill_contract(&self, tenant_id: &str, contract_id: Uuid) -> Result<()> {
        self.transition(tenant_id, contract_id, ContractStatus::Fulfilled, None)
            .await
    }

    async fn transition(
        &self,
        tenant_id: &str,
        contract_id: Uuid,
        target: ContractStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut contract = self.get_contract(tenant_id, contract_id).await?;
        if !contract.contract_status.can_transition_to(target) {
            return Err(FabricError::new(
                ErrorCode::AlreadyTerminal,
                format!(
                    "contract {contract_id} cannot move {:?} -> {target:?}",
                    contract.contract_status
                ),
            ));
        }
        let now = Utc::now();
        contract.contract_status = target;
        match target {
            ContractStatus::Expired => contract.expired_at = Some(now),
            ContractStatus::Revoked => {
                contract.revoked_at = Some(now);
                contract.revoked_reason = reason;
            }
            _ => {}
        }
        self.save(&contract).await
    }

    /// Materialization rows visible to `user_id` in `tenant_id`.
    ///
    /// The gate is evaluated at read time: the row's contract must be
    /// active with materialization allowed, and the reference scope must
    /// contain the requesting user.
    pub async fn visible_records(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<MaterializationRecord>> {
        let mut out = Vec::new();
        for record in self.index.list(tenant_id).await? {
            let contract = self
                .get_contract(tenant_id, record.boundary_contract_id)
                .await?;
            if contract.permits_reference(user_id) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Check the read-time gate for one materialization row.
    ///
    /// # Errors
    ///
    /// `not_found` when the row is absent or soft-deleted,
    /// `denied_by_policy` when the gate denies the user.
    pub async fn check_reference(
        &self,
        tenant_id: &str,
        user_id: &str,
        record_uuid: Uuid,
    ) -> Result<MaterializationRecord> {
        let record = self
            .index
            .get(tenant_id, record_uuid)
            .await?
            .filter(|r| !r.deleted)
            .ok_or_else(|| FabricError::not_found(format!("file {record_uuid} not found")))?;
        let contract = self
            .get_contract(tenant_id, record.boundary_contract_id)
            .await?;
        if !contract.permits_reference(user_id) {
            return Err(FabricError::denied(
                "reference scope does not include the requesting user",
            ));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fab_capability::MemoryRowStore;
    use fab_core::BackingStore;

    async fn steward() -> DataSteward {
        let rows: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        let steward = DataSteward::new(
            rows.clone(),
            PolicyStore::new(rows.clone()),
            MaterializationIndex::new(rows),
        );
        steward.policies.seed_platform_default().await.unwrap();
        steward
    }

    fn ctx() -> AccessContext {
        AccessContext {
            tenant_id: "acme".into(),
            user_id: "u-1".into(),
            intent_id: None,
        }
    }

    async fn pending_contract(steward: &DataSteward) -> Uuid {
        steward
            .request_data_access(&ctx(), ExternalSourceType::File, "upload:smoke.txt")
            .await
            .unwrap()
            .contract_id
    }

    fn record_for(contract_id: Uuid, expires: Option<DateTime<Utc>>) -> MaterializationRecord {
        MaterializationRecord {
            uuid: Uuid::new_v4(),
            tenant_id: "acme".into(),
            user_id: "u-1".into(),
            ui_name: "smoke.txt".into(),
            file_path: None,
            file_type: "unstructured".into(),
            mime_type: "text/plain".into(),
            file_size: 11,
            file_hash: "h".into(),
            status: "saved".into(),
            ingestion_type: "upload".into(),
            boundary_contract_id: contract_id,
            representation_type: MaterializationType::FullArtifact,
            materialization_policy_basis: None,
            materialization_expires_at: expires,
            materialization_backing_store: BackingStore::Blob,
            materialization_scope: ScopeMap::new(),
            source_external: true,
            source_location: None,
            source_type: None,
            parent_file_uuid: None,
            root_file_uuid: None,
            lineage_depth: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn phase_a_creates_a_pending_contract() {
        let steward = steward().await;
        let request = steward
            .request_data_access(&ctx(), ExternalSourceType::File, "upload:smoke.txt")
            .await
            .unwrap();
        assert!(request.access_granted);

        let contract = steward
            .get_contract("acme", request.contract_id)
            .await
            .unwrap();
        assert_eq!(contract.contract_status, ContractStatus::Pending);
        assert!(!contract.materialization_allowed);
    }

    #[tokio::test]
    async fn phase_b_activates_with_platform_defaults() {
        let steward = steward().await;
        let contract_id = pending_contract(&steward).await;

        let auth = steward
            .authorize_materialization("acme", contract_id, &PolicyContext::default())
            .await
            .unwrap();
        assert_eq!(auth.materialization_type, MaterializationType::FullArtifact);
        assert_eq!(auth.ttl_secs, Some(30 * 24 * 60 * 60));
        assert_eq!(auth.scope.get("scope_type").unwrap(), "workspace");

        let contract = steward.get_contract("acme", contract_id).await.unwrap();
        assert_eq!(contract.contract_status, ContractStatus::Active);
        assert!(contract.materialization_allowed);
        assert!(contract.materialization_expires_at.is_some());
        assert!(contract.reference_scope.allows("u-1"));
    }

    #[tokio::test]
    async fn phase_b_twice_is_already_terminal() {
        let steward = steward().await;
        let contract_id = pending_contract(&steward).await;
        steward
            .authorize_materialization("acme", contract_id, &PolicyContext::default())
            .await
            .unwrap();
        let err = steward
            .authorize_materialization("acme", contract_id, &PolicyContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyTerminal);
    }

    #[tokio::test]
    async fn requested_type_outside_policy_is_denied() {
        let steward = steward().await;
        // Restrict the tenant to reference-only.
        let restrictive = fab_core::MaterializationPolicy {
            policy_id: Uuid::new_v4(),
            tenant_id: Some("acme".into()),
            solution_id: None,
            policy_name: "reference-only".into(),
            policy_version: 1,
            policy_rules: fab_core::PolicyRules {
                allowed_types: vec![MaterializationType::Reference],
                default_type: MaterializationType::Reference,
                default_ttl_secs: None,
                default_backing_store: BackingStore::None,
            },
            is_platform_default: false,
            is_active: true,
            description: String::new(),
            created_by: "steward".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        steward.policies.insert(&restrictive).await.unwrap();

        let contract_id = pending_contract(&steward).await;
        let err = steward
            .authorize_materialization(
                "acme",
                contract_id,
                &PolicyContext {
                    requested_type: Some(MaterializationType::FullArtifact),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeniedByPolicy);

        // The contract is untouched.
        let contract = steward.get_contract("acme", contract_id).await.unwrap();
        assert_eq!(contract.contract_status, ContractStatus::Pending);
    }

    #[tokio::test]
    async fn visibility_gate_filters_by_user_and_contract_state() {
        let steward = steward().await;
        let contract_id = pending_contract(&steward).await;

        // Row inserted before activation: invisible (contract pending).
        let record = record_for(contract_id, None);
        steward.index.insert(&record).await.unwrap();
        assert!(steward.visible_records("acme", "u-1").await.unwrap().is_empty());

        steward
            .authorize_materialization("acme", contract_id, &PolicyContext::default())
            .await
            .unwrap();

        // Owner sees it; another user in the same tenant does not.
        let mine = steward.visible_records("acme", "u-1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert!(steward.visible_records("acme", "u-2").await.unwrap().is_empty());

        // Direct reference for the outsider is a policy deny.
        let err = steward
            .check_reference("acme", "u-2", record.uuid)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeniedByPolicy);
    }

    #[tokio::test]
    async fn expiry_closes_the_gate() {
        let steward = steward().await;
        let contract_id = pending_contract(&steward).await;
        steward
            .authorize_materialization("acme", contract_id, &PolicyContext::default())
            .await
            .unwrap();
        let record = record_for(contract_id, None);
        steward.index.insert(&record).await.unwrap();
        assert_eq!(steward.visible_records("acme", "u-1").await.unwrap().len(), 1);

        steward.expire_contract("acme", contract_id).await.unwrap();
        assert!(steward.visible_records("acme", "u-1").await.unwrap().is_empty());

        let contract = steward.get_contract("acme", contract_id).await.unwrap();
        assert_eq!(contract.contract_status, ContractStatus::Expired);
        assert!(contract.expired_at.is_some());
    }

    #[tokio::test]
    async fn revoke_records_the_reason() {
        let steward = steward().await;
        let contract_id = pending_contract(&steward).await;
        steward
            .revoke_contract("acme", contract_id, "tenant offboarded")
            .await
            .unwrap();
        let contract = steward.get_contract("acme", contract_id).await.unwrap();
        assert_eq!(contract.contract_status, ContractStatus::Revoked);
        assert_eq!(contract.revoked_reason.as_deref(), Some("tenant offboarded"));
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let steward = steward().await;
        let contract_id = pending_contract(&steward).await;
        // Pending cannot expire directly.
        let err = steward.expire_contract("acme", contract_id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyTerminal);
    }
}
