// SPDX-License-Identifier: MIT OR Apache-2.0
//! The curator: promotions out of working material.
//!
//! Two promotions exist. Working material becomes a record of fact when
//! its contract materialized deterministically or semantically. Accepted
//! artifacts become platform DNA once de-identified and generalized.

use chrono::Utc;
use fab_core::{
    Artifact, BoundaryContract, DnaRegistry, DnaRegistryEntry, LifecycleState, RecordOfFact,
    RecordType,
};
use fab_error::{FabricError, Result};
use fab_store::{DnaRegistryStore, RecordOfFactStore};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Keys that must not appear in a generalized definition.
const IDENTIFYING_KEYS: &[&str] = &["tenant_id", "user_id", "session_id", "execution_id"];

/// The curator.
#[derive(Clone)]
pub struct Curator {
    records: RecordOfFactStore,
    dna: DnaRegistryStore,
}

impl Curator {
    /// Create a curator over the record and registry stores.
    pub fn new(records: RecordOfFactStore, dna: DnaRegistryStore) -> Self {
        Self { records, dna }
    }

    /// The record-of-fact store.
    #[must_use]
    pub fn records(&self) -> &RecordOfFactStore {
        &self.records
    }

    /// Promote working material to a record of fact.
    ///
    /// # Errors
    ///
    /// `denied_by_policy` unless the governing contract materialized as
    /// `deterministic` or `semantic_embedding`.
    pub async fn promote_to_record_of_fact(
        &self,
        contract: &BoundaryContract,
        record_type: RecordType,
        source_file_id: Option<Uuid>,
        embedding_id: Option<Uuid>,
        content: Value,
        promoted_by: &str,
        promotion_reason: &str,
    ) -> Result<RecordOfFact> {
        let promotable = contract
            .materialization_type
            .is_some_and(|mt| mt.promotable_to_record());
        if !promotable {
            return Err(FabricError::denied(format!(
                "contract {} materialization type {:?} cannot promote to a record of fact",
                contract.contract_id, contract.materialization_type
            )));
        }

        let record = RecordOfFact {
            record_id: Uuid::new_v4(),
            tenant_id: contract.tenant_id.clone(),
            record_type,
            source_file_id,
            source_boundary_contract_id: Some(contract.contract_id),
            source_expired_at: None,
            embedding_id,
            interpretation_id: None,
            content,
            promoted_at: Utc::now(),
            promoted_by: promoted_by.to_string(),
            promotion_reason: promotion_reason.to_string(),
        };
        self.records.insert(&record).await?;
        info!(
            target: "fab.curator",
            record_id = %record.record_id,
            record_type = ?record_type,
            "record of fact promoted"
        );
        Ok(record)
    }

    /// Promote an accepted artifact into a platform DNA registry.
    ///
    /// # Errors
    ///
    /// `denied_by_policy` unless the artifact is accepted, its descriptor
    /// declares de-identification and generalization, and the definition
    /// carries no identifying fields.
    pub async fn promote_to_platform_dna(
        &self,
        artifact: &Artifact,
        registry: DnaRegistry,
        identifier: &str,
        definition: Value,
        promoted_by: &str,
    ) -> Result<DnaRegistryEntry> {
        if artifact.lifecycle_state != LifecycleState::Accepted {
            return Err(FabricError::denied(format!(
                "artifact {} is {:?}; only accepted artifacts promote to platform DNA",
                artifact.artifact_id, artifact.lifecycle_state
            )));
        }

        let descriptor = &artifact.semantic_descriptor;
        let flagged = |key: &str| descriptor.get(key).and_then(Value::as_bool) == Some(true);
        if !flagged("de_identified") {
            return Err(FabricError::denied(
                "artifact descriptor does not declare de-identification",
            ));
        }
        if !flagged("generalized") {
            return Err(FabricError::denied(
                "artifact descriptor does not declare generalization",
            ));
        }

        if let Some(obj) = definition.as_object() {
            for key in IDENTIFYING_KEYS {
                if obj.contains_key(*key) {
                    return Err(FabricError::denied(format!(
                        "definition carries identifying field '{key}'"
                    )));
                }
            }
        }

        let entry = self
            .dna
            .promote(
                registry,
                identifier,
                definition,
                &artifact.artifact_id,
                promoted_by,
            )
            .await?;
        info!(
            target: "fab.curator",
            registry = ?registry,
            identifier = %identifier,
            version = entry.version,
            "platform DNA promoted"
        );
        Ok(entry)
    }
}
