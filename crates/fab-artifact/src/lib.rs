// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-artifact
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use fab_capability::{BlobStore, Predicate, RowOp, RowStore};
use fab_core::{
    deterministic_artifact_id, Artifact, ArtifactOwner, ArtifactPurpose, LifecycleState,
    LifecycleTransition, PayloadRef,
};
use fab_error::{ErrorCode, FabricError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const TABLE: &str = "artifacts";

/// How many times a contended current-version flip is retried before the
/// conflict is reported.
const TRANSITION_RETRIES: u32 = 3;

/// Input for creating an artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// Tenant scope.
    pub tenant_id: String,
    /// Session scope, when session-bound.
    pub session_id: Option<Uuid>,
    /// Producing execution.
    pub execution_id: Uuid,
    /// Artifact type string.
    pub artifact_type: String,
    /// Producing realm.
    pub realm: String,
    /// Ownership.
    pub owner: ArtifactOwner,
    /// Purpose binding.
    pub purpose: ArtifactPurpose,
    /// Lineage sources.
    pub source_artifact_ids: Vec<String>,
    /// Type-specific descriptor fields.
    pub semantic_descriptor: Value,
    /// Payload locator, when the artifact has a payload.
    pub payload_ref: Option<PayloadRef>,
    /// When set, the artifact id is derived deterministically from
    /// (tenant, type, key) so re-producing the same logical thing lands
    /// on the same chain.
    pub deterministic_key: Option<String>,
}

impl NewArtifact {
    /// A minimal draft input for the given scope and type.
    #[must_use]
    pub fn draft(
        tenant_id: impl Into<String>,
        execution_id: Uuid,
        artifact_type: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: None,
            execution_id,
            artifact_type: artifact_type.into(),
            realm: realm.into(),
            owner: ArtifactOwner::Client,
            purpose: ArtifactPurpose::Delivery,
            source_artifact_ids: Vec::new(),
            semantic_descriptor: Value::Object(serde_json::Map::new()),
            payload_ref: None,
            deterministic_key: None,
        }
    }
}

/// Filters for [`ArtifactPlane::list`].
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    /// Restrict to one artifact type.
    pub artifact_type: Option<String>,
    /// Restrict to one lifecycle state.
    pub lifecycle_state: Option<LifecycleState>,
    /// Restrict to one owner.
    pub owner: Option<ArtifactOwner>,
    /// Restrict to one purpose.
    pub purpose: Option<ArtifactPurpose>,
    /// Restrict to one session.
    pub session_id: Option<Uuid>,
    /// Restrict to one realm.
    pub realm: Option<String>,
    /// Pagination offset.
    pub offset: usize,
    /// Page size; `None` returns everything from the offset.
    pub limit: Option<usize>,
}

/// The Artifact Plane.
#[derive(Clone)]
pub struct ArtifactPlane {
    rows: Arc<dyn RowStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactPlane {
    /// Create a plane over the given stores.
    pub fn new(rows: Arc<dyn RowStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { rows, blobs }
    }

    fn key(tenant_id: &str, artifact_id: &str) -> String {
        format!("{tenant_id}/{artifact_id}")
    }

    fn decode(value: Value) -> Result<Artifact> {
        serde_json::from_value(value)
            .map_err(|e| FabricError::internal("decode artifact row").with_source(e))
    }

    fn encode(artifact: &Artifact) -> Result<Value> {
        serde_json::to_value(artifact)
            .map_err(|e| FabricError::internal("encode artifact row").with_source(e))
    }

    /// The chain base of an id: version-row suffixes stripped.
    fn chain_base(artifact_id: &str) -> &str {
        match artifact_id.rfind("/v") {
            Some(idx) if artifact_id[idx + 2..].chars().all(|c| c.is_ascii_digit()) => {
                &artifact_id[..idx]
            }
            _ => artifact_id,
        }
    }

    /// Create a new artifact row in draft state.
    ///
    /// # Errors
    ///
    /// `integrity_violation` when the (deterministic) id already exists.
    pub async fn create(&self, new: NewArtifact) -> Result<Artifact> {
        let artifact_id = match &new.deterministic_key {
            Some(key) => deterministic_artifact_id(&new.tenant_id, &new.artifact_type, key),
            None => format!("{}-{}", new.artifact_type, Uuid::new_v4()),
        };
        let now = Utc::now();
        let artifact = Artifact {
            artifact_id: artifact_id.clone(),
            tenant_id: new.tenant_id,
            session_id: new.session_id,
            execution_id: new.execution_id,
            artifact_type: new.artifact_type,
            realm: new.realm,
            lifecycle_state: LifecycleState::Draft,
            owner: new.owner,
            purpose: new.purpose,
            version: 1,
            parent_artifact_id: None,
            is_current_version: true,
            source_artifact_ids: new.source_artifact_ids,
            semantic_descriptor: new.semantic_descriptor,
            payload_ref: new.payload_ref,
            lifecycle_transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.rows
            .compare_and_swap(
                TABLE,
                &Self::key(&artifact.tenant_id, &artifact_id),
                0,
                Self::encode(&artifact)?,
            )
            .await
            .map_err(|e| {
                if e.code == ErrorCode::IntegrityViolation {
                    FabricError::new(
                        ErrorCode::IntegrityViolation,
                        format!("artifact '{artifact_id}' already exists"),
                    )
                } else {
                    e
                }
            })?;
        debug!(
            target: "fab.artifact",
            artifact_id = %artifact.artifact_id,
            artifact_type = %artifact.artifact_type,
            "artifact created"
        );
        Ok(artifact)
    }

    /// Read an artifact, optionally resolving its payload bytes.
    pub async fn get(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        include_payload: bool,
    ) -> Result<(Artifact, Option<Vec<u8>>)> {
        let row = self
            .rows
            .get(TABLE, &Self::key(tenant_id, artifact_id))
            .await?
            .ok_or_else(|| FabricError::not_found(format!("artifact '{artifact_id}' not found")))?;
        let artifact = Self::decode(row.value)?;
        let payload = if include_payload {
            match &artifact.payload_ref {
                Some(payload_ref) if payload_ref.store == "blob" => {
                    let blob_ref = fab_capability::BlobRef {
                        key: payload_ref.locator.clone(),
                        content_hash: String::new(),
                    };
                    Some(self.blobs.get(&blob_ref).await?)
                }
                _ => None,
            }
        } else {
            None
        };
        Ok((artifact, payload))
    }

    /// List a tenant's artifacts with filters and pagination, newest first.
    pub async fn list(&self, tenant_id: &str, filter: &ArtifactFilter) -> Result<Vec<Artifact>> {
        let mut predicate = Predicate::new().eq("tenant_id", tenant_id);
        if let Some(t) = &filter.artifact_type {
            predicate = predicate.eq("artifact_type", t.clone());
        }
        if let Some(realm) = &filter.realm {
            predicate = predicate.eq("realm", realm.clone());
        }
        let rows = self.rows.query(TABLE, &predicate).await?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for row in rows {
            let artifact = Self::decode(row.value)?;
            if let Some(state) = filter.lifecycle_state {
                if artifact.lifecycle_state != state {
                    continue;
                }
            }
            if let Some(owner) = filter.owner {
                if artifact.owner != owner {
                    continue;
                }
            }
            if let Some(purpose) = filter.purpose {
                if artifact.purpose != purpose {
                    continue;
                }
            }
            if let Some(session_id) = filter.session_id {
                if artifact.session_id != Some(session_id) {
                    continue;
                }
            }
            artifacts.push(artifact);
        }
        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.artifact_id.cmp(&b.artifact_id))
        });

        let page: Vec<Artifact> = artifacts
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    /// Transition an artifact's lifecycle state.
    ///
    /// Draft → accepted writes a new immutable version row whose parent is
    /// the prior current version and flips the current flag atomically;
    /// transitions to obsolete flip state in place. Every transition is
    /// recorded in the row's audit array.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown artifacts, `already_terminal` for obsolete
    /// sources, `integrity_violation` for disallowed transitions or
    /// unresolved contention.
    pub async fn transition(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        target: LifecycleState,
        actor: &str,
        reason: &str,
    ) -> Result<Artifact> {
        let mut last_err: Option<FabricError> = None;
        for _ in 0..TRANSITION_RETRIES {
            match self
                .try_transition(tenant_id, artifact_id, target, actor, reason)
                .await
            {
                Ok(artifact) => return Ok(artifact),
                Err(e) if e.code == ErrorCode::IntegrityViolation && e.context.contains_key("actual_rev") => {
                    // Contended flip; reread and retry.
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            FabricError::new(ErrorCode::IntegrityViolation, "transition contention")
        }))
    }

    async fn try_transition(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        target: LifecycleState,
        actor: &str,
        reason: &str,
    ) -> Result<Artifact> {
        let row = self
            .rows
            .get(TABLE, &Self::key(tenant_id, artifact_id))
            .await?
            .ok_or_else(|| FabricError::not_found(format!("artifact '{artifact_id}' not found")))?;
        let current = Self::decode(row.value)?;

        if current.lifecycle_state.is_terminal() {
            return Err(FabricError::new(
                ErrorCode::AlreadyTerminal,
                format!("artifact '{artifact_id}' is obsolete"),
            ));
        }
        if !current.lifecycle_state.can_transition_to(target) {
            return Err(FabricError::new(
                ErrorCode::IntegrityViolation,
                format!(
                    "transition {:?} -> {target:?} is not allowed",
                    current.lifecycle_state
                ),
            ));
        }

        let now = Utc::now();
        let audit = LifecycleTransition {
            from: current.lifecycle_state,
            to: target,
            actor: actor.to_string(),
            reason: reason.to_string(),
            at: now,
        };

        if current.lifecycle_state == LifecycleState::Draft && target == LifecycleState::Accepted {
            // Acceptance: new immutable version row, prior current flips.
            let base = Self::chain_base(&current.artifact_id);
            let new_version = current.version + 1;
            let new_id = format!("{base}/v{new_version}");

            let mut accepted = current.clone();
            accepted.artifact_id = new_id.clone();
            accepted.lifecycle_state = LifecycleState::Accepted;
            accepted.version = new_version;
            accepted.parent_artifact_id = Some(current.artifact_id.clone());
            accepted.is_current_version = true;
            accepted.lifecycle_transitions.push(audit);
            accepted.created_at = now;
            accepted.updated_at = now;

            let mut prior = current;
            prior.is_current_version = false;
            prior.updated_at = now;

            self.rows
                .apply(vec![
                    RowOp::CasPut {
                        table: TABLE.into(),
                        key: Self::key(tenant_id, &prior.artifact_id),
                        expected_rev: row.rev,
                        value: Self::encode(&prior)?,
                    },
                    RowOp::CasPut {
                        table: TABLE.into(),
                        key: Self::key(tenant_id, &new_id),
                        expected_rev: 0,
                        value: Self::encode(&accepted)?,
                    },
                ])
                .await?;

            info!(
                target: "fab.artifact",
                artifact_id = %new_id,
                version = new_version,
                "artifact accepted"
            );
            return Ok(accepted);
        }

        // Obsolete: flip in place; the version chain is preserved.
        let mut updated = current;
        updated.lifecycle_state = target;
        updated.lifecycle_transitions.push(audit);
        updated.updated_at = now;
        self.rows
            .compare_and_swap(
                TABLE,
                &Self::key(tenant_id, &updated.artifact_id),
                row.rev,
                Self::encode(&updated)?,
            )
            .await?;
        info!(
            target: "fab.artifact",
            artifact_id = %updated.artifact_id,
            state = ?target,
            "artifact transitioned"
        );
        Ok(updated)
    }

    /// Create a new draft descendant of a chain's current version.
    ///
    /// Accepted rows are immutable; this is the only way to modify an
    /// accepted artifact. The draft becomes the chain's current version.
    ///
    /// # Errors
    ///
    /// `integrity_violation` unless the chain's current version is
    /// accepted.
    pub async fn new_draft_version(&self, tenant_id: &str, artifact_id: &str) -> Result<Artifact> {
        let chain = self.get_versions(tenant_id, artifact_id).await?;
        let current = chain
            .iter()
            .find(|a| a.is_current_version)
            .or_else(|| chain.last())
            .ok_or_else(|| FabricError::not_found(format!("artifact '{artifact_id}' not found")))?
            .clone();
        if current.lifecycle_state != LifecycleState::Accepted {
            return Err(FabricError::new(
                ErrorCode::IntegrityViolation,
                format!(
                    "current version is {:?}; only accepted artifacts take draft descendants",
                    current.lifecycle_state
                ),
            ));
        }

        let current_row = self
            .rows
            .get(TABLE, &Self::key(tenant_id, &current.artifact_id))
            .await?
            .ok_or_else(|| FabricError::not_found(format!("artifact '{artifact_id}' not found")))?;

        let now = Utc::now();
        let base = Self::chain_base(&current.artifact_id);
        let new_version = current.version + 1;
        let new_id = format!("{base}/v{new_version}");

        let mut draft = current.clone();
        draft.artifact_id = new_id.clone();
        draft.lifecycle_state = LifecycleState::Draft;
        draft.version = new_version;
        draft.parent_artifact_id = Some(current.artifact_id.clone());
        draft.is_current_version = true;
        draft.lifecycle_transitions = Vec::new();
        draft.created_at = now;
        draft.updated_at = now;

        let mut prior = current;
        prior.is_current_version = false;
        prior.updated_at = now;

        self.rows
            .apply(vec![
                RowOp::CasPut {
                    table: TABLE.into(),
                    key: Self::key(tenant_id, &prior.artifact_id),
                    expected_rev: current_row.rev,
                    value: Self::encode(&prior)?,
                },
                RowOp::CasPut {
                    table: TABLE.into(),
                    key: Self::key(tenant_id, &new_id),
                    expected_rev: 0,
                    value: Self::encode(&draft)?,
                },
            ])
            .await?;
        Ok(draft)
    }

    /// The full version chain containing `artifact_id`, oldest first.
    pub async fn get_versions(&self, tenant_id: &str, artifact_id: &str) -> Result<Vec<Artifact>> {
        // Walk up to the chain root.
        let (mut cursor, _) = self.get(tenant_id, artifact_id, false).await?;
        while let Some(parent_id) = cursor.parent_artifact_id.clone() {
            cursor = self.get(tenant_id, &parent_id, false).await?.0;
        }

        // Walk down via the parent index.
        let mut chain = vec![cursor];
        loop {
            let tail_id = chain.last().map(|a| a.artifact_id.clone()).unwrap_or_default();
            let children = self
                .rows
                .query(
                    TABLE,
                    &Predicate::new()
                        .eq("tenant_id", tenant_id)
                        .eq("parent_artifact_id", tail_id),
                )
                .await?;
            match children.into_iter().next() {
                Some(child) => chain.push(Self::decode(child.value)?),
                None => break,
            }
        }
        Ok(chain)
    }

    /// Artifacts that list `artifact_id` among their sources.
    pub async fn dependents(&self, tenant_id: &str, artifact_id: &str) -> Result<Vec<Artifact>> {
        let rows = self
            .rows
            .query(
                TABLE,
                &Predicate::new()
                    .eq("tenant_id", tenant_id)
                    .contains("source_artifact_ids", artifact_id),
            )
            .await?;
        rows.into_iter().map(|r| Self::decode(r.value)).collect()
    }

    /// Delete an artifact row (and its blob payload, which the plane owns
    /// the reference to).
    ///
    /// # Errors
    ///
    /// `integrity_violation` while non-obsolete dependents reference it.
    pub async fn delete(&self, tenant_id: &str, artifact_id: &str) -> Result<()> {
        let blocking: Vec<String> = self
            .dependents(tenant_id, artifact_id)
            .await?
            .into_iter()
            .filter(|a| a.lifecycle_state != LifecycleState::Obsolete)
            .map(|a| a.artifact_id)
            .collect();
        if !blocking.is_empty() {
            return Err(FabricError::new(
                ErrorCode::IntegrityViolation,
                format!("artifact '{artifact_id}' has non-obsolete dependents"),
            )
            .with_context("dependents", blocking));
        }

        let (artifact, _) = self.get(tenant_id, artifact_id, false).await?;
        if let Some(payload_ref) = &artifact.payload_ref {
            if payload_ref.store == "blob" {
                let blob_ref = fab_capability::BlobRef {
                    key: payload_ref.locator.clone(),
                    content_hash: String::new(),
                };
                self.blobs.delete(&blob_ref).await?;
            }
        }
        self.rows
            .delete(TABLE, &Self::key(tenant_id, artifact_id))
            .await
    }
}
