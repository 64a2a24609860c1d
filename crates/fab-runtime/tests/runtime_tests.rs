// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end Runtime tests over the in-memory adapters: admission,
//! lifecycle, retries, compensation, cancellation, timeouts, isolation.

use async_trait::async_trait;
use fab_artifact::NewArtifact;
use fab_core::{ExecutionStatus, Intent, IntentBuilder, Session, WalKind};
use fab_error::{ErrorCode, FabricError, Result};
use fab_runtime::{
    DomainService, ExecutionContext, IntentRegistration, Runtime, RuntimeOptions,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

struct TestRealm {
    attempts: AtomicU32,
    compensation_log: Arc<Mutex<Vec<String>>>,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl TestRealm {
    fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            compensation_log: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl DomainService for TestRealm {
    fn realm_id(&self) -> &str {
        "test"
    }

    fn registrations(&self) -> Vec<IntentRegistration> {
        vec![
            IntentRegistration::open("echo").with_schema(json!({
                "type": "object",
                "required": ["message"],
                "properties": {"message": {"type": "string"}}
            })),
            IntentRegistration::open("flaky"),
            IntentRegistration::open("messy_flaky"),
            IntentRegistration::open("flaky_then_fatal"),
            IntentRegistration::open("failing"),
            IntentRegistration::open("blocking"),
            IntentRegistration::open("sleepy").with_timeout(Duration::from_millis(100)),
        ]
    }

    async fn handle_intent(&self, ctx: &ExecutionContext, intent: &Intent) -> Result<()> {
        match intent.intent_type.as_str() {
            "echo" => {
                let message = intent.parameters["message"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let mut new =
                    NewArtifact::draft(ctx.tenant_id(), ctx.execution_id(), "note", "test");
                new.semantic_descriptor = json!({"message": message});
                ctx.emit_artifact("result", new).await?;
                ctx.emit_event("echoed", json!({"message": message}));
                Ok(())
            }
            "flaky" => {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(FabricError::new(ErrorCode::TransientIo, "blip"))
                } else {
                    Ok(())
                }
            }
            "messy_flaky" => {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    // Emit partial output, then flake.
                    ctx.emit_event("partial", json!({"attempt": attempt}));
                    let mut junk =
                        NewArtifact::draft(ctx.tenant_id(), ctx.execution_id(), "note", "test");
                    junk.semantic_descriptor = json!({"junk": true});
                    ctx.emit_artifact("junk", junk).await?;
                    let log = Arc::clone(&self.compensation_log);
                    ctx.compensate("undo_partial", move || {
                        Box::pin(async move {
                            log.lock().unwrap().push("undo_partial".to_string());
                            Ok(())
                        })
                    });
                    return Err(FabricError::new(ErrorCode::TransientIo, "flaked mid-emit"));
                }
                ctx.emit_artifact(
                    "result",
                    NewArtifact::draft(ctx.tenant_id(), ctx.execution_id(), "note", "test"),
                )
                .await?;
                ctx.emit_event("final", json!({}));
                Ok(())
            }
            "flaky_then_fatal" => {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                let log = Arc::clone(&self.compensation_log);
                let step = format!("undo_attempt_{attempt}");
                let pushed = step.clone();
                ctx.compensate(step, move || {
                    Box::pin(async move {
                        log.lock().unwrap().push(pushed);
                        Ok(())
                    })
                });
                if attempt == 0 {
                    Err(FabricError::new(ErrorCode::TransientIo, "first blip"))
                } else {
                    Err(FabricError::new(ErrorCode::HandlerFault, "hard stop"))
                }
            }
            "failing" => {
                for step in ["first", "second"] {
                    let log = Arc::clone(&self.compensation_log);
                    ctx.compensate(step, move || {
                        Box::pin(async move {
                            log.lock().unwrap().push(step.to_string());
                            Ok(())
                        })
                    });
                }
                Err(FabricError::new(ErrorCode::HandlerFault, "boom"))
            }
            "blocking" => {
                let log = Arc::clone(&self.compensation_log);
                ctx.compensate("undo_upload", move || {
                    Box::pin(async move {
                        log.lock().unwrap().push("undo_upload".to_string());
                        Ok(())
                    })
                });
                self.started.notify_one();
                self.release.notified().await;
                ctx.checkpoint()?;
                Ok(())
            }
            "sleepy" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            other => Err(FabricError::unknown_intent_type(other)),
        }
    }
}

async fn runtime_with(realm: Arc<TestRealm>, options: RuntimeOptions) -> Runtime {
    Runtime::builder()
        .options(options)
        .register_realm(realm)
        .build()
        .await
        .expect("build runtime")
}

async fn active_session(runtime: &Runtime, tenant: &str, user: &str) -> Session {
    let session = runtime
        .smart_city()
        .sessions()
        .establish()
        .await
        .expect("establish");
    runtime
        .smart_city()
        .sessions()
        .upgrade(session.session_id, user, tenant, Default::default())
        .await
        .expect("upgrade")
}

fn echo_intent(session: &Session, message: &str) -> Intent {
    IntentBuilder::new("echo")
        .tenant(session.tenant_id.clone().unwrap_or_default())
        .session(session.session_id)
        .user(session.user_id.clone().unwrap_or_default())
        .parameter("message", message)
        .build()
}

fn bare_intent(session: &Session, intent_type: &str) -> Intent {
    IntentBuilder::new(intent_type)
        .tenant(session.tenant_id.clone().unwrap_or_default())
        .session(session.session_id)
        .user(session.user_id.clone().unwrap_or_default())
        .build()
}

async fn wait_terminal(runtime: &Runtime, tenant: &str, execution_id: Uuid) -> fab_core::Execution {
    for _ in 0..500 {
        let execution = runtime.status(tenant, execution_id).await.expect("status");
        if execution.status.is_terminal() {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never reached a terminal state");
}

// ---------- admission ----------

#[tokio::test]
async fn unknown_intent_type_is_rejected_without_wal_write() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let err = runtime
        .admit(bare_intent(&session, "nope"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownIntentType);
    assert!(runtime.wal_records("acme", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_parameters_are_rejected_without_wal_write() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    // "echo" requires a string message.
    let intent = IntentBuilder::new("echo")
        .tenant("acme")
        .session(session.session_id)
        .user("u-1")
        .parameter("message", 42)
        .build();
    let err = runtime.admit(intent).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParameters);
    assert!(runtime.wal_records("acme", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn tenant_mismatch_is_rejected() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let mut intent = echo_intent(&session, "hi");
    intent.tenant_id = "globex".into();
    let err = runtime.admit(intent).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::TenantMismatch);
}

#[tokio::test]
async fn anonymous_sessions_cannot_admit() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = runtime.smart_city().sessions().establish().await.unwrap();
    let intent = IntentBuilder::new("echo")
        .tenant("acme")
        .session(session.session_id)
        .user("u-1")
        .parameter("message", "hi")
        .build();
    let err = runtime.admit(intent).await.unwrap_err();
    // An anonymous session has no tenant; admission reports the mismatch.
    assert_eq!(err.code, ErrorCode::TenantMismatch);
}

#[tokio::test]
async fn admission_is_durable_before_admit_returns() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "hi")).await.unwrap();
    assert_eq!(receipt.status, ExecutionStatus::Pending);

    let records = runtime.wal_records("acme", 1).await.unwrap();
    assert!(records
        .iter()
        .any(|r| r.kind == WalKind::IntentAdmitted && r.execution_id == receipt.execution_id));
}

// ---------- lifecycle ----------

#[tokio::test]
async fn echo_completes_with_artifacts_and_events() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "hello")).await.unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.started_at.is_some());
    assert!(execution.completed_at.is_some());
    assert!(execution.error.is_none());

    let result = execution.artifacts.get("result").expect("artifact ref");
    assert_eq!(result.artifact_type, "note");
    assert_eq!(execution.events.len(), 1);
    assert_eq!(execution.events[0].event_type, "echoed");

    // The artifact really exists in the plane, attributed to this run.
    let (artifact, _) = runtime
        .artifact_plane()
        .get("acme", &result.artifact_id, false)
        .await
        .unwrap();
    assert_eq!(artifact.execution_id, receipt.execution_id);
    assert_eq!(artifact.semantic_descriptor["message"], "hello");
}

#[tokio::test]
async fn replay_reproduces_the_status_snapshot() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "replayed")).await.unwrap();
    let status = wait_terminal(&runtime, "acme", receipt.execution_id).await;

    let replayed = runtime
        .replay_execution("acme", receipt.execution_id)
        .await
        .unwrap();
    assert_eq!(replayed, status);
}

#[tokio::test]
async fn terminal_executions_reject_cancel() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "done")).await.unwrap();
    wait_terminal(&runtime, "acme", receipt.execution_id).await;

    let err = runtime
        .cancel("acme", receipt.execution_id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyTerminal);
}

#[tokio::test]
async fn no_events_follow_the_terminal_record() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "x")).await.unwrap();
    wait_terminal(&runtime, "acme", receipt.execution_id).await;

    let records = runtime.wal_records("acme", 1).await.unwrap();
    let for_exec: Vec<_> = records
        .iter()
        .filter(|r| r.execution_id == receipt.execution_id)
        .collect();
    assert_eq!(
        for_exec.last().unwrap().kind,
        WalKind::ExecutionTerminal,
        "terminal record must be last"
    );
}

// ---------- isolation ----------

#[tokio::test]
async fn status_is_tenant_scoped() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "mine")).await.unwrap();
    wait_terminal(&runtime, "acme", receipt.execution_id).await;

    let err = runtime
        .status("globex", receipt.execution_id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn per_tenant_wal_sequences_are_independent() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let acme = active_session(&runtime, "acme", "u-1").await;
    let globex = active_session(&runtime, "globex", "u-2").await;

    let a = runtime.admit(echo_intent(&acme, "a")).await.unwrap();
    let g = runtime.admit(echo_intent(&globex, "g")).await.unwrap();
    wait_terminal(&runtime, "acme", a.execution_id).await;
    wait_terminal(&runtime, "globex", g.execution_id).await;

    let acme_records = runtime.wal_records("acme", 1).await.unwrap();
    let globex_records = runtime.wal_records("globex", 1).await.unwrap();
    // Both streams start at 1 independently.
    assert_eq!(acme_records[0].seq, 1);
    assert_eq!(globex_records[0].seq, 1);
    assert!(acme_records.iter().all(|r| r.tenant_id == "acme"));
    assert!(globex_records.iter().all(|r| r.tenant_id == "globex"));
}

// ---------- retries, compensation ----------

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm.clone(), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    let receipt = runtime.admit(bare_intent(&session, "flaky")).await.unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    // Two failures, one success.
    assert_eq!(realm.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.metrics().retries, 2);
}

#[tokio::test]
async fn retries_discard_partial_output_from_failed_attempts() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm.clone(), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    let receipt = runtime
        .admit(bare_intent(&session, "messy_flaky"))
        .await
        .unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    // Only the successful attempt's output is recorded.
    assert!(execution.artifacts.contains_key("result"));
    assert!(!execution.artifacts.contains_key("junk"));
    let event_types: Vec<&str> = execution
        .events
        .iter()
        .map(|e| e.event_type.as_str())
        .collect();
    assert_eq!(event_types, vec!["final"]);

    // The discarded attempt's compensation never ran.
    assert!(realm.compensation_log.lock().unwrap().is_empty());

    // And the WAL carries no phantom records from the failed attempt.
    let records = runtime.wal_records("acme", 1).await.unwrap();
    let phantom = records.iter().any(|r| {
        r.execution_id == receipt.execution_id
            && r.kind == WalKind::EventEmitted
            && r.payload["event_type"] == "partial"
    });
    assert!(!phantom, "failed attempt's event leaked into the WAL");
}

#[tokio::test]
async fn give_up_compensates_only_the_final_attempt() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm.clone(), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    let receipt = runtime
        .admit(bare_intent(&session, "flaky_then_fatal"))
        .await
        .unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);

    // The first attempt's compensation was discarded with its attempt;
    // only the fatal attempt's ran.
    assert_eq!(
        *realm.compensation_log.lock().unwrap(),
        vec!["undo_attempt_1".to_string()]
    );
}

#[tokio::test]
async fn handler_failure_compensates_in_reverse_order() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm.clone(), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    let receipt = runtime.admit(bare_intent(&session, "failing")).await.unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let error = execution.error.expect("sanitized error");
    assert_eq!(error.code, ErrorCode::HandlerFault);

    // Registered first, second; compensated second, first.
    assert_eq!(
        *realm.compensation_log.lock().unwrap(),
        vec!["second".to_string(), "first".to_string()]
    );

    // Each compensation is WAL-logged.
    let records = runtime.wal_records("acme", 1).await.unwrap();
    let compensations: Vec<_> = records
        .iter()
        .filter(|r| r.kind == WalKind::SagaCompensation)
        .collect();
    assert_eq!(compensations.len(), 2);
    assert_eq!(compensations[0].payload["step"], "second");
    assert_eq!(compensations[1].payload["step"], "first");
}

// ---------- cancellation ----------

#[tokio::test]
async fn cancel_running_execution_compensates_and_terminates_cancelled() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm.clone(), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    let receipt = runtime.admit(bare_intent(&session, "blocking")).await.unwrap();
    realm.started.notified().await;

    runtime.cancel("acme", receipt.execution_id).await.unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(
        *realm.compensation_log.lock().unwrap(),
        vec!["undo_upload".to_string()]
    );
}

#[tokio::test]
async fn cancel_pending_execution_is_reaped_before_dispatch() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm.clone(), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    // Occupy the tenant's single worker.
    let blocker = runtime.admit(bare_intent(&session, "blocking")).await.unwrap();
    realm.started.notified().await;

    // Queue a second execution and cancel it while pending.
    let queued = runtime.admit(echo_intent(&session, "never")).await.unwrap();
    runtime.cancel("acme", queued.execution_id).await.unwrap();

    // Release the blocker and let both settle.
    realm.release.notify_one();
    wait_terminal(&runtime, "acme", blocker.execution_id).await;
    let cancelled = wait_terminal(&runtime, "acme", queued.execution_id).await;
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

    // The reaped execution never started: no step_started in its records.
    let records = runtime.wal_records("acme", 1).await.unwrap();
    let kinds: Vec<WalKind> = records
        .iter()
        .filter(|r| r.execution_id == queued.execution_id)
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec![WalKind::IntentAdmitted, WalKind::ExecutionTerminal]);
}

// ---------- timeout ----------

#[tokio::test]
async fn timeout_fails_the_execution_with_the_timeout_code() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(realm, RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;

    let receipt = runtime.admit(bare_intent(&session, "sleepy")).await.unwrap();
    let execution = wait_terminal(&runtime, "acme", receipt.execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.expect("error").code, ErrorCode::Timeout);
}

// ---------- backpressure ----------

#[tokio::test]
async fn full_tenant_queue_rejects_with_overloaded() {
    let realm = Arc::new(TestRealm::new());
    let runtime = runtime_with(
        realm.clone(),
        RuntimeOptions {
            queue_high_water: 1,
            ..Default::default()
        },
    )
    .await;
    let session = active_session(&runtime, "acme", "u-1").await;

    // The first execution occupies the worker; the second fills the queue.
    let blocker = runtime.admit(bare_intent(&session, "blocking")).await.unwrap();
    realm.started.notified().await;
    let queued = runtime.admit(echo_intent(&session, "queued")).await.unwrap();

    let err = runtime
        .admit(echo_intent(&session, "rejected"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Overloaded);

    realm.release.notify_one();
    wait_terminal(&runtime, "acme", blocker.execution_id).await;
    wait_terminal(&runtime, "acme", queued.execution_id).await;
}

// ---------- metrics ----------

#[tokio::test]
async fn metrics_count_admissions_and_terminals() {
    let runtime = runtime_with(Arc::new(TestRealm::new()), RuntimeOptions::default()).await;
    let session = active_session(&runtime, "acme", "u-1").await;
    let receipt = runtime.admit(echo_intent(&session, "m")).await.unwrap();
    wait_terminal(&runtime, "acme", receipt.execution_id).await;

    let snapshot = runtime.metrics();
    assert_eq!(snapshot.admitted, 1);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 0);

    // Handler latency is recorded per intent type.
    let latency = runtime.latency_summary();
    assert_eq!(latency.count, 1);
    assert_eq!(latency.intent_counts["echo"], 1);
}
