// SPDX-License-Identifier: MIT OR Apache-2.0
//! The execution context: everything a handler is allowed to see.
//!
//! No ambient globals. Identifiers, capability-scoped handles, policy
//! primitives, and the cancel signal all arrive through this one value,
//! and every side effect a handler causes flows back through it where the
//! Runtime can observe and record it.

use crate::cancel::CancellableRun;
use crate::saga::CompensationLog;
use crate::AdmitReceipt;
use async_trait::async_trait;
use fab_artifact::{ArtifactPlane, NewArtifact};
use fab_capability::RowStore;
use fab_core::{Artifact, ArtifactRef, EventRecord, Intent, WalKind};
use fab_error::{FabricError, Result};
use fab_policy::SmartCity;
use fab_store::{FileStorage, SemanticStore, StateSurface, TenantScopedRows, Wal, WalAppend};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Cross-realm intent submission. Implemented by the Runtime; handlers
/// never call each other directly.
#[async_trait]
pub trait IntentSubmitter: Send + Sync {
    /// Admit an intent on behalf of a running handler.
    async fn submit(&self, intent: Intent) -> Result<AdmitReceipt>;
}

/// Everything needed to assemble an [`ExecutionContext`].
pub struct ContextParts {
    /// The intent being executed.
    pub intent: Intent,
    /// The execution this context belongs to.
    pub execution_id: Uuid,
    /// Scoped per-execution state.
    pub state: StateSurface,
    /// Row store for intent-scoped dedupe markers.
    pub rows: Arc<dyn RowStore>,
    /// The write-ahead log.
    pub wal: Wal,
    /// File storage abstraction.
    pub files: FileStorage,
    /// Semantic store abstraction.
    pub semantic: SemanticStore,
    /// The Artifact Plane.
    pub artifacts: ArtifactPlane,
    /// Smart City policy primitives.
    pub policy: SmartCity,
    /// Cross-realm submission handle.
    pub services: Arc<dyn IntentSubmitter>,
    /// Cooperative cancel signal.
    pub cancel: CancellableRun,
}

/// What a handler receives.
pub struct ExecutionContext {
    intent: Intent,
    execution_id: Uuid,
    state: StateSurface,
    rows: TenantScopedRows,
    wal: Wal,
    files: FileStorage,
    semantic: SemanticStore,
    artifacts: ArtifactPlane,
    policy: SmartCity,
    services: Arc<dyn IntentSubmitter>,
    cancel: CancellableRun,
    compensations: CompensationLog,
    emitted_artifacts: Mutex<Vec<(String, Artifact)>>,
    emitted_events: Mutex<Vec<EventRecord>>,
}

impl ExecutionContext {
    /// Assemble a context from its parts.
    #[must_use]
    pub fn from_parts(parts: ContextParts) -> Self {
        let rows = TenantScopedRows::new(parts.rows, parts.intent.tenant_id.clone());
        Self {
            intent: parts.intent,
            execution_id: parts.execution_id,
            state: parts.state,
            rows,
            wal: parts.wal,
            files: parts.files,
            semantic: parts.semantic,
            artifacts: parts.artifacts,
            policy: parts.policy,
            services: parts.services,
            cancel: parts.cancel,
            compensations: CompensationLog::new(),
            emitted_artifacts: Mutex::new(Vec::new()),
            emitted_events: Mutex::new(Vec::new()),
        }
    }

    // -- identifiers ------------------------------------------------------

    /// The intent being executed.
    #[must_use]
    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    /// Tenant scope.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.intent.tenant_id
    }

    /// Session scope.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.intent.session_id
    }

    /// Attributed user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.intent.user_id
    }

    /// This execution's id.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    // -- cancellation -----------------------------------------------------

    /// Cooperative cancellation check. Handlers call this between steps;
    /// a cancelled execution returns an error that unwinds the handler.
    ///
    /// # Errors
    ///
    /// `handler_fault` once the cancel signal fired. The Runtime inspects
    /// the token afterwards, so the terminal state is still `cancelled`.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FabricError::new(
                fab_error::ErrorCode::HandlerFault,
                "execution cancelled at suspension point",
            ));
        }
        Ok(())
    }

    /// The raw cancel signal, for `select!`-style suspension.
    #[must_use]
    pub fn cancel_signal(&self) -> &CancellableRun {
        &self.cancel
    }

    // -- state surface ----------------------------------------------------

    /// Read per-execution state.
    pub async fn get_state(&self, key: &str) -> Result<Option<Value>> {
        self.state.get(key).await
    }

    /// Write per-execution state. The write is WAL-logged.
    pub async fn set_state(&self, key: &str, value: Value) -> Result<()> {
        self.state.set(key, value).await?;
        self.wal
            .append(WalAppend {
                tenant_id: self.intent.tenant_id.clone(),
                session_id: self.intent.session_id,
                execution_id: self.execution_id,
                kind: WalKind::EventEmitted,
                payload: serde_json::json!({
                    "event_type": "state_write",
                    "key": key,
                    "internal": true,
                }),
            })
            .await?;
        Ok(())
    }

    /// Intent-scoped idempotency marker for a named step.
    ///
    /// Returns `true` exactly once per `(intent_id, step)` across every
    /// execution and retry of the intent; `false` thereafter. Markers go
    /// through the tenant-scoped row view.
    pub async fn once(&self, step: &str) -> Result<bool> {
        let key = format!(
            "{}/{}/{step}",
            self.intent.tenant_id, self.intent.intent_id
        );
        let marker = serde_json::json!({
            "tenant_id": self.intent.tenant_id,
            "execution_id": self.execution_id.to_string(),
            "step": step,
        });
        match self.rows.compare_and_swap("intent_steps", &key, 0, marker).await {
            Ok(_) => Ok(true),
            Err(e) if e.code == fab_error::ErrorCode::IntegrityViolation => Ok(false),
            Err(e) => Err(e),
        }
    }

    // -- sinks ------------------------------------------------------------

    /// Emit an artifact. The record is created in the Artifact Plane
    /// immediately (the Runtime observes the side effect as it happens)
    /// and recorded in the WAL when the handler returns.
    ///
    /// Scope fields of the input are overridden with this execution's
    /// identifiers; artifacts are always attributable. Emission with a
    /// deterministic key is idempotent: a retry that lands on an existing
    /// row adopts it instead of failing, so repeated invocations of one
    /// intent produce the same artifact set.
    pub async fn emit_artifact(&self, name: &str, mut new: NewArtifact) -> Result<ArtifactRef> {
        new.tenant_id = self.intent.tenant_id.clone();
        new.session_id = Some(self.intent.session_id);
        new.execution_id = self.execution_id;
        let deterministic_id = new
            .deterministic_key
            .as_ref()
            .map(|key| {
                fab_core::deterministic_artifact_id(
                    &self.intent.tenant_id,
                    &new.artifact_type,
                    key,
                )
            });
        let artifact = match self.artifacts.create(new).await {
            Ok(artifact) => artifact,
            Err(e)
                if e.code == fab_error::ErrorCode::IntegrityViolation
                    && deterministic_id.is_some() =>
            {
                let id = deterministic_id.unwrap_or_default();
                self.artifacts
                    .get(&self.intent.tenant_id, &id, false)
                    .await?
                    .0
            }
            Err(e) => return Err(e),
        };
        let artifact_ref = ArtifactRef {
            name: name.to_string(),
            artifact_id: artifact.artifact_id.clone(),
            artifact_type: artifact.artifact_type.clone(),
        };
        self.emitted_artifacts
            .lock()
            .expect("artifact sink poisoned")
            .push((name.to_string(), artifact));
        Ok(artifact_ref)
    }

    /// Emit a domain event, recorded in the WAL when the handler returns.
    pub fn emit_event(&self, event_type: &str, data: Value) {
        self.emitted_events
            .lock()
            .expect("event sink poisoned")
            .push(EventRecord::new(event_type, data));
    }

    /// Register a compensation for a side-effecting step.
    pub fn compensate<F>(&self, step: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.compensations.push(step, action);
    }

    // -- abstractions and policy -----------------------------------------

    /// File storage.
    #[must_use]
    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    /// The semantic store.
    #[must_use]
    pub fn semantic(&self) -> &SemanticStore {
        &self.semantic
    }

    /// The Artifact Plane.
    #[must_use]
    pub fn artifact_plane(&self) -> &ArtifactPlane {
        &self.artifacts
    }

    /// Smart City decision functions.
    #[must_use]
    pub fn policy(&self) -> &SmartCity {
        &self.policy
    }

    /// Submit a cross-realm intent through the Runtime.
    pub async fn submit_intent(&self, intent: Intent) -> Result<AdmitReceipt> {
        self.services.submit(intent).await
    }

    // -- runtime-side access ---------------------------------------------

    /// Take everything the handler emitted (runtime side).
    #[must_use]
    pub fn drain_outputs(&self) -> (Vec<(String, Artifact)>, Vec<EventRecord>) {
        let artifacts = std::mem::take(
            &mut *self
                .emitted_artifacts
                .lock()
                .expect("artifact sink poisoned"),
        );
        let events =
            std::mem::take(&mut *self.emitted_events.lock().expect("event sink poisoned"));
        (artifacts, events)
    }

    /// The compensation log (runtime side).
    #[must_use]
    pub fn compensations(&self) -> &CompensationLog {
        &self.compensations
    }

    /// Discard everything the current attempt emitted or registered
    /// (runtime side). Runs between retry attempts so partial output and
    /// compensations from a failed attempt never leak into the next one;
    /// idempotent handlers re-emit and re-register on the retry.
    pub fn reset_attempt(&self) {
        self.emitted_artifacts
            .lock()
            .expect("artifact sink poisoned")
            .clear();
        self.emitted_events
            .lock()
            .expect("event sink poisoned")
            .clear();
        drop(self.compensations.drain_reverse());
    }
}
