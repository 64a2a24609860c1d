// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-runtime
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cancellation primitives and the live-run registry.
pub mod cancel;
/// The execution context handlers receive.
pub mod context;
/// Per-tenant dispatch with bounded backpressure.
pub mod dispatch;
/// Dispatch metrics counters.
pub mod metrics;
/// The intent registry and the domain-service contract.
pub mod registry;
/// WAL replay into execution snapshots.
pub mod replay;
/// Saga compensation log.
pub mod saga;
/// Execution event streams.
pub mod stream;

use chrono::{DateTime, Utc};
use fab_artifact::ArtifactPlane;
use fab_capability::{
    BlobStore, Cache, MemoryBlobStore, MemoryCache, MemoryPubSub, MemoryRowStore,
    MemoryVectorStore, PubSub, RowStore, VectorBackend,
};
use fab_core::{Execution, ExecutionStatus, Intent, StreamEnvelope, WalKind};
use fab_error::{ErrorCode, FabricError, Result};
use fab_policy::{Curator, DataSteward, Decision, Identity, RetryPolicy, SessionManager, SmartCity};
use fab_store::{
    DnaRegistryStore, FileStorage, MaterializationIndex, PolicyStore, RecordOfFactStore,
    SemanticStore, StateSurface, Wal, WalAppend,
};
use fab_telemetry::{LatencyCollector, LatencySummary};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use cancel::{CancelRegistry, CancellableRun, CancellationReason};
pub use context::{ContextParts, ExecutionContext, IntentSubmitter};
pub use dispatch::{Dispatcher, DispatcherOptions, ExecutionRunner, ExecutionTask};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use registry::{DomainService, IntentRegistration, IntentRegistry};
pub use replay::fold_execution;
pub use saga::CompensationLog;

const EXECUTIONS_TABLE: &str = "executions";

/// Runtime tuning knobs.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Concurrent executions per tenant.
    pub per_tenant_parallelism: usize,
    /// Queue depth beyond which admission rejects with `overloaded`.
    pub queue_high_water: usize,
    /// Execution budget when the intent type declares none.
    pub default_timeout: Duration,
    /// Retry policy for retriable handler failures.
    pub retry: RetryPolicy,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            per_tenant_parallelism: 1,
            queue_high_water: 64,
            default_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// What `admit` returns: the execution handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitReceipt {
    /// Assigned execution id.
    pub execution_id: Uuid,
    /// The admitted intent's id.
    pub intent_id: Uuid,
    /// Status at admission (always pending).
    pub status: ExecutionStatus,
    /// Admission timestamp.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Runtime`] over capability adapters and registered realms.
///
/// Defaults to the in-memory adapters, which is what tests and the local
/// daemon use.
pub struct RuntimeBuilder {
    rows: Arc<dyn RowStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn Cache>,
    pubsub: Arc<dyn PubSub>,
    vector: Arc<dyn VectorBackend>,
    options: RuntimeOptions,
    realms: Vec<Arc<dyn DomainService>>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Start a builder with in-memory adapters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Arc::new(MemoryRowStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            cache: Arc::new(MemoryCache::new()),
            pubsub: Arc::new(MemoryPubSub::new()),
            vector: Arc::new(MemoryVectorStore::new()),
            options: RuntimeOptions::default(),
            realms: Vec::new(),
        }
    }

    /// Swap the row store adapter.
    #[must_use]
    pub fn with_rows(mut self, rows: Arc<dyn RowStore>) -> Self {
        self.rows = rows;
        self
    }

    /// Swap the blob store adapter.
    #[must_use]
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    /// Swap the cache adapter.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    /// Swap the pub/sub adapter.
    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = pubsub;
        self
    }

    /// Swap the vector backend.
    #[must_use]
    pub fn with_vector(mut self, vector: Arc<dyn VectorBackend>) -> Self {
        self.vector = vector;
        self
    }

    /// Override the runtime options.
    #[must_use]
    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a realm. Registration order is irrelevant; duplicate
    /// intent types fail the build.
    #[must_use]
    pub fn register_realm(mut self, realm: Arc<dyn DomainService>) -> Self {
        self.realms.push(realm);
        self
    }

    /// Build the runtime: compile the registry, seed the platform default
    /// policy, and start accepting intents.
    ///
    /// # Errors
    ///
    /// `config_invalid` on duplicate intent types or uncompilable schemas.
    pub async fn build(self) -> Result<Runtime> {
        let mut registry = IntentRegistry::new();
        for realm in self.realms {
            registry.register_realm(realm)?;
        }

        let policy_store = PolicyStore::new(self.rows.clone());
        policy_store.seed_platform_default().await?;

        let wal = Wal::new(self.rows.clone());
        let plane = ArtifactPlane::new(self.rows.clone(), self.blobs.clone());
        let files = FileStorage::new(self.blobs.clone());
        let semantic = SemanticStore::new(self.vector.clone());
        let index = MaterializationIndex::new(self.rows.clone());
        let steward = DataSteward::new(self.rows.clone(), policy_store, index);
        let curator = Curator::new(
            RecordOfFactStore::new(self.rows.clone()),
            DnaRegistryStore::new(self.rows.clone()),
        );
        let sessions = SessionManager::new(self.rows.clone());
        let policy = SmartCity::new(sessions, steward, curator, self.options.retry.clone());

        let dispatcher_options = DispatcherOptions {
            per_tenant_parallelism: self.options.per_tenant_parallelism,
            queue_high_water: self.options.queue_high_water,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let runner: Weak<dyn ExecutionRunner> = weak.clone();
            RuntimeInner {
                registry,
                rows: self.rows,
                cache: self.cache,
                pubsub: self.pubsub,
                wal,
                plane,
                files,
                semantic,
                policy,
                cancels: CancelRegistry::new(),
                dispatcher: Dispatcher::new(runner, dispatcher_options),
                metrics: DispatchMetrics::new(),
                latency: LatencyCollector::new(),
                options: self.options,
                self_weak: weak.clone(),
            }
        });

        info!(
            target: "fab.runtime",
            intent_types = ?inner.registry.intent_types(),
            "runtime built"
        );
        Ok(Runtime { inner })
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// The execution authority: admission, dispatch, WAL, sagas, streaming.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: IntentRegistry,
    rows: Arc<dyn RowStore>,
    cache: Arc<dyn Cache>,
    pubsub: Arc<dyn PubSub>,
    wal: Wal,
    plane: ArtifactPlane,
    files: FileStorage,
    semantic: SemanticStore,
    policy: SmartCity,
    cancels: CancelRegistry,
    dispatcher: Dispatcher,
    metrics: DispatchMetrics,
    latency: LatencyCollector,
    options: RuntimeOptions,
    self_weak: Weak<RuntimeInner>,
}

impl Runtime {
    /// Start building a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Admit an intent: validate, authorize, persist admission, enqueue.
    ///
    /// When this returns `Ok`, the `intent_admitted` WAL record is
    /// durable.
    pub async fn admit(&self, intent: Intent) -> Result<AdmitReceipt> {
        self.inner.admit(intent).await
    }

    /// Snapshot one execution.
    pub async fn status(&self, tenant_id: &str, execution_id: Uuid) -> Result<Execution> {
        self.inner.load_execution(tenant_id, execution_id).await
    }

    /// Open a finite event stream for one execution: buffered history,
    /// then live events, terminating with the terminal envelope.
    pub async fn stream(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> Result<ReceiverStream<StreamEnvelope>> {
        // Existence check up front so unknown executions 404 instead of
        // hanging an empty stream.
        self.inner.load_execution(tenant_id, execution_id).await?;
        stream::open_stream(
            self.inner.wal.clone(),
            self.inner.pubsub.clone(),
            tenant_id,
            execution_id,
        )
        .await
    }

    /// Request cancellation of an execution. Best-effort and cooperative:
    /// pending executions are reaped before dispatch, running ones stop at
    /// their next suspension point.
    pub async fn cancel(&self, tenant_id: &str, execution_id: Uuid) -> Result<()> {
        let execution = self.inner.load_execution(tenant_id, execution_id).await?;
        if execution.status.is_terminal() {
            return Err(FabricError::new(
                ErrorCode::AlreadyTerminal,
                format!("execution {execution_id} is already {:?}", execution.status),
            ));
        }
        match self.inner.cancels.get(execution_id) {
            Some(run) => {
                run.cancel(CancellationReason::UserRequested);
                Ok(())
            }
            // Terminalization raced us; report it as terminal.
            None => Err(FabricError::new(
                ErrorCode::AlreadyTerminal,
                format!("execution {execution_id} just reached a terminal state"),
            )),
        }
    }

    /// Rebuild an execution snapshot by replaying the WAL.
    pub async fn replay_execution(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> Result<Execution> {
        let records = self
            .inner
            .wal
            .records_for_execution(tenant_id, execution_id)
            .await?;
        fold_execution(&records)
            .ok_or_else(|| FabricError::not_found(format!("execution {execution_id} not found")))
    }

    /// Read a tenant's WAL from a sequence number.
    pub async fn wal_records(
        &self,
        tenant_id: &str,
        from_seq: u64,
    ) -> Result<Vec<fab_core::WalRecord>> {
        self.inner.wal.read(tenant_id, from_seq).await
    }

    /// Smart City primitives (sessions, steward, curator, nurse).
    #[must_use]
    pub fn smart_city(&self) -> &SmartCity {
        &self.inner.policy
    }

    /// The Artifact Plane.
    #[must_use]
    pub fn artifact_plane(&self) -> &ArtifactPlane {
        &self.inner.plane
    }

    /// All registered intent types, sorted.
    #[must_use]
    pub fn intent_types(&self) -> Vec<String> {
        self.inner.registry.intent_types()
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Aggregated handler latency, labelled by intent type.
    #[must_use]
    pub fn latency_summary(&self) -> LatencySummary {
        self.inner.latency.summary()
    }

    /// A submission handle for contexts and the edge.
    #[must_use]
    pub fn submitter(&self) -> Arc<dyn IntentSubmitter> {
        self.inner.clone()
    }
}

#[async_trait::async_trait]
impl IntentSubmitter for RuntimeInner {
    async fn submit(&self, intent: Intent) -> Result<AdmitReceipt> {
        self.admit(intent).await
    }
}

impl RuntimeInner {
    fn execution_key(tenant_id: &str, execution_id: Uuid) -> String {
        format!("{tenant_id}/{execution_id}")
    }

    async fn put_execution(&self, execution: &Execution) -> Result<()> {
        let value = serde_json::to_value(execution)
            .map_err(|e| FabricError::internal("encode execution row").with_source(e))?;
        self.rows
            .put(
                EXECUTIONS_TABLE,
                &Self::execution_key(&execution.tenant_id, execution.execution_id),
                value,
            )
            .await?;
        Ok(())
    }

    async fn load_execution(&self, tenant_id: &str, execution_id: Uuid) -> Result<Execution> {
        match self
            .rows
            .get(EXECUTIONS_TABLE, &Self::execution_key(tenant_id, execution_id))
            .await?
        {
            Some(row) => serde_json::from_value(row.value)
                .map_err(|e| FabricError::internal("decode execution row").with_source(e)),
            None => Err(FabricError::not_found(format!(
                "execution {execution_id} not found"
            ))),
        }
    }

    /// Append a WAL record and publish it to the execution's topic.
    async fn log(&self, append: WalAppend) -> Result<fab_core::WalRecord> {
        let record = self.wal.append(append).await?;
        let message = serde_json::to_value(&record)
            .map_err(|e| FabricError::internal("encode stream message").with_source(e))?;
        self.pubsub
            .publish(&stream::topic(record.execution_id), message)
            .await?;
        Ok(record)
    }

    async fn admit(&self, intent: Intent) -> Result<AdmitReceipt> {
        // Validation failures surface synchronously; nothing is WAL-written.
        intent.validate_shape()?;
        let registered = self
            .registry
            .resolve(&intent.intent_type)
            .ok_or_else(|| FabricError::unknown_intent_type(&intent.intent_type))?;
        registered.validate(&intent)?;

        let session = self.policy.sessions().get(intent.session_id).await?;
        if session.tenant_id.as_deref() != Some(intent.tenant_id.as_str()) {
            warn!(
                target: "fab.runtime",
                intent_id = %intent.intent_id,
                session_id = %intent.session_id,
                "tenant mismatch at admission"
            );
            return Err(FabricError::new(
                ErrorCode::TenantMismatch,
                "session tenant does not match intent tenant",
            ));
        }

        let identity = Identity {
            user_id: intent.user_id.clone(),
            tenant_id: intent.tenant_id.clone(),
        };
        let execution_id = Uuid::new_v4();
        if let Decision::Deny { reason } =
            fab_policy::authorize(&identity, &intent, &session, &registered.authorize)
        {
            // Denials are audit-logged to the WAL before surfacing.
            let _ = self
                .log(WalAppend {
                    tenant_id: intent.tenant_id.clone(),
                    session_id: intent.session_id,
                    execution_id,
                    kind: WalKind::EventEmitted,
                    payload: serde_json::json!({
                        "event_type": "admission_denied",
                        "intent_id": intent.intent_id,
                        "intent_type": intent.intent_type,
                        "reason": reason,
                        "internal": true,
                    }),
                })
                .await;
            return Err(FabricError::denied(reason));
        }

        // Backpressure check before anything durable.
        let permit = self.dispatcher.reserve(&intent.tenant_id)?;

        let execution = Execution::admitted(execution_id, &intent);
        self.put_execution(&execution).await?;
        self.log(WalAppend {
            tenant_id: intent.tenant_id.clone(),
            session_id: intent.session_id,
            execution_id,
            kind: WalKind::IntentAdmitted,
            payload: serde_json::json!({
                "intent": intent,
                "execution": execution,
            }),
        })
        .await?;

        self.cancels.register(execution_id);
        self.metrics.record_admitted();
        info!(
            target: "fab.runtime",
            execution_id = %execution_id,
            intent_type = %intent.intent_type,
            tenant_id = %intent.tenant_id,
            "intent admitted"
        );
        permit.send(ExecutionTask {
            execution_id,
            intent,
        });

        Ok(AdmitReceipt {
            execution_id,
            intent_id: execution.intent_id,
            status: execution.status,
            created_at: execution.created_at,
        })
    }

    async fn terminalize(
        &self,
        execution: &mut Execution,
        status: ExecutionStatus,
        error: Option<fab_error::WireError>,
    ) {
        let completed_at = Utc::now();
        execution.status = status;
        execution.completed_at = Some(completed_at);
        execution.error = error.clone();
        if let Err(e) = self.put_execution(execution).await {
            error!(target: "fab.runtime", error = %e, "failed to persist terminal execution");
        }
        let result = self
            .log(WalAppend {
                tenant_id: execution.tenant_id.clone(),
                session_id: execution.session_id,
                execution_id: execution.execution_id,
                kind: WalKind::ExecutionTerminal,
                payload: serde_json::json!({
                    "status": status,
                    "completed_at": completed_at,
                    "error": error,
                }),
            })
            .await;
        if let Err(e) = result {
            error!(target: "fab.runtime", error = %e, "failed to append terminal WAL record");
        }
        match status {
            ExecutionStatus::Completed => self.metrics.record_completed(),
            ExecutionStatus::Failed => self.metrics.record_failed(),
            ExecutionStatus::Cancelled => self.metrics.record_cancelled(),
            _ => {}
        }
        self.cancels.remove(execution.execution_id);
    }

    async fn run_compensations(&self, ctx: &ExecutionContext, execution: &Execution) {
        for compensation in ctx.compensations().drain_reverse() {
            let step = compensation.step.clone();
            let outcome = compensation.run().await;
            self.metrics.record_compensation();
            let payload = match &outcome {
                Ok(()) => serde_json::json!({"step": step, "ok": true}),
                Err(e) => serde_json::json!({"step": step, "ok": false, "error": e.to_wire()}),
            };
            if let Err(e) = self
                .log(WalAppend {
                    tenant_id: execution.tenant_id.clone(),
                    session_id: execution.session_id,
                    execution_id: execution.execution_id,
                    kind: WalKind::SagaCompensation,
                    payload,
                })
                .await
            {
                error!(target: "fab.runtime", error = %e, "failed to log compensation");
            }
            if let Err(e) = outcome {
                // Surfaced, never re-invoked; remediation is manual.
                error!(
                    target: "fab.runtime",
                    execution_id = %execution.execution_id,
                    step = %step,
                    error = %e,
                    "compensation failed"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl ExecutionRunner for RuntimeInner {
    async fn run_execution(&self, task: ExecutionTask) {
        let tenant_id = task.intent.tenant_id.clone();
        let mut execution = match self.load_execution(&tenant_id, task.execution_id).await {
            Ok(execution) => execution,
            Err(e) => {
                error!(target: "fab.runtime", error = %e, "queued execution has no row");
                return;
            }
        };

        let run = self
            .cancels
            .get(task.execution_id)
            .unwrap_or_else(|| self.cancels.register(task.execution_id));

        // Reap cancellations that arrived while pending.
        if run.is_cancelled() {
            self.terminalize(&mut execution, ExecutionStatus::Cancelled, None)
                .await;
            return;
        }

        let Some(service) = self.registry.service_for(&task.intent.intent_type) else {
            self.terminalize(
                &mut execution,
                ExecutionStatus::Failed,
                Some(
                    FabricError::unknown_intent_type(&task.intent.intent_type).to_wire(),
                ),
            )
            .await;
            return;
        };
        let budget = self
            .registry
            .resolve(&task.intent.intent_type)
            .and_then(|r| r.timeout)
            .unwrap_or(self.options.default_timeout);

        // Mark running.
        let run_start = std::time::Instant::now();
        let started_at = Utc::now();
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(started_at);
        if let Err(e) = self.put_execution(&execution).await {
            error!(target: "fab.runtime", error = %e, "failed to mark execution running");
        }
        if let Err(e) = self
            .log(WalAppend {
                tenant_id: tenant_id.clone(),
                session_id: execution.session_id,
                execution_id: execution.execution_id,
                kind: WalKind::StepStarted,
                payload: serde_json::json!({"started_at": started_at}),
            })
            .await
        {
            error!(target: "fab.runtime", error = %e, "failed to log step start");
        }

        let Some(strong_self) = self.self_weak.upgrade() else {
            return;
        };
        let ctx = Arc::new(ExecutionContext::from_parts(ContextParts {
            intent: task.intent.clone(),
            execution_id: execution.execution_id,
            state: StateSurface::new(
                self.rows.clone(),
                self.cache.clone(),
                tenant_id.clone(),
                execution.execution_id,
            ),
            rows: self.rows.clone(),
            wal: self.wal.clone(),
            files: self.files.clone(),
            semantic: self.semantic.clone(),
            artifacts: self.plane.clone(),
            policy: self.policy.clone(),
            services: strong_self,
            cancel: run.clone(),
        }));

        // Attempt loop: handlers run in their own task so a panic is an
        // error, not a dead tenant queue.
        let mut attempt: u32 = 1;
        let outcome: Result<()> = loop {
            let mut handle = {
                let service = service.clone();
                let ctx = ctx.clone();
                let intent = task.intent.clone();
                tokio::spawn(async move { service.handle_intent(&ctx, &intent).await })
            };

            let attempt_result: Result<()> = tokio::select! {
                joined = &mut handle => match joined {
                    Ok(result) => result,
                    Err(join_error) => Err(FabricError::new(
                        ErrorCode::HandlerFault,
                        "handler panicked",
                    )
                    .with_context("panic", join_error.to_string())),
                },
                () = tokio::time::sleep(budget) => {
                    run.cancel(CancellationReason::Timeout);
                    handle.abort();
                    Err(FabricError::new(ErrorCode::Timeout, "timeout"))
                }
                () = run.cancelled() => {
                    handle.abort();
                    Err(FabricError::new(
                        ErrorCode::HandlerFault,
                        "execution cancelled",
                    ))
                }
            };

            match attempt_result {
                Ok(()) => break Ok(()),
                Err(e) if run.is_cancelled() => break Err(e),
                Err(e) => match self.policy.nurse().decide(e.code, attempt) {
                    fab_policy::RetryDecision::Retry { attempt: next, delay } => {
                        warn!(
                            target: "fab.runtime",
                            execution_id = %execution.execution_id,
                            attempt,
                            error = %e,
                            "retrying handler"
                        );
                        self.metrics.record_retry();
                        // The failed attempt's partial output and
                        // compensations must not leak into the retry;
                        // idempotent handlers re-emit what still matters.
                        ctx.reset_attempt();
                        tokio::time::sleep(delay).await;
                        attempt = next;
                    }
                    fab_policy::RetryDecision::GiveUp { .. } => break Err(e),
                },
            }
        };

        match outcome {
            Ok(()) => {
                let (artifacts, events) = ctx.drain_outputs();
                for (name, artifact) in &artifacts {
                    let artifact_ref = fab_core::ArtifactRef {
                        name: name.clone(),
                        artifact_id: artifact.artifact_id.clone(),
                        artifact_type: artifact.artifact_type.clone(),
                    };
                    execution
                        .artifacts
                        .insert(name.clone(), artifact_ref.clone());
                    if let Err(e) = self
                        .log(WalAppend {
                            tenant_id: tenant_id.clone(),
                            session_id: execution.session_id,
                            execution_id: execution.execution_id,
                            kind: WalKind::ArtifactProduced,
                            payload: serde_json::to_value(&artifact_ref)
                                .unwrap_or_default(),
                        })
                        .await
                    {
                        error!(target: "fab.runtime", error = %e, "failed to log artifact");
                    }
                }
                for event in &events {
                    execution.events.push(event.clone());
                    if let Err(e) = self
                        .log(WalAppend {
                            tenant_id: tenant_id.clone(),
                            session_id: execution.session_id,
                            execution_id: execution.execution_id,
                            kind: WalKind::EventEmitted,
                            payload: serde_json::to_value(event).unwrap_or_default(),
                        })
                        .await
                    {
                        error!(target: "fab.runtime", error = %e, "failed to log event");
                    }
                }
                self.terminalize(&mut execution, ExecutionStatus::Completed, None)
                    .await;
            }
            Err(e) => {
                self.run_compensations(&ctx, &execution).await;
                let (status, wire) = match run.reason() {
                    Some(CancellationReason::UserRequested | CancellationReason::SystemShutdown) => {
                        (ExecutionStatus::Cancelled, None)
                    }
                    Some(CancellationReason::Timeout) => (
                        ExecutionStatus::Failed,
                        Some(FabricError::new(ErrorCode::Timeout, "timeout").to_wire()),
                    ),
                    None => (ExecutionStatus::Failed, Some(e.to_wire())),
                };
                self.terminalize(&mut execution, status, wire).await;
            }
        }

        self.latency.record(
            &task.intent.intent_type,
            run_start.elapsed().as_millis() as u64,
        );
    }
}
