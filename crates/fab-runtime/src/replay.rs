// SPDX-License-Identifier: MIT OR Apache-2.0
//! Replay: rebuild an execution snapshot from its WAL records.
//!
//! The admission record carries the pending snapshot; every later record
//! carries exactly the fields the Runtime wrote into the live snapshot at
//! the same moment. Folding the records therefore reproduces `status()`
//! bit-for-bit.

use chrono::{DateTime, Utc};
use fab_core::{ArtifactRef, EventRecord, Execution, ExecutionStatus, WalKind, WalRecord};
use serde_json::Value;

fn parse<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

fn is_internal(payload: &Value) -> bool {
    payload.get("internal").and_then(Value::as_bool) == Some(true)
}

/// Fold one execution's WAL records (in sequence order) into a snapshot.
///
/// Returns `None` when the records contain no admission.
#[must_use]
pub fn fold_execution(records: &[WalRecord]) -> Option<Execution> {
    let mut execution: Option<Execution> = None;

    for record in records {
        match record.kind {
            WalKind::IntentAdmitted => {
                execution = record.payload.get("execution").and_then(parse);
            }
            WalKind::StepStarted => {
                if let Some(exec) = execution.as_mut() {
                    exec.status = ExecutionStatus::Running;
                    exec.started_at = record
                        .payload
                        .get("started_at")
                        .and_then(parse::<DateTime<Utc>>);
                }
            }
            WalKind::ArtifactProduced => {
                if let (Some(exec), Some(artifact_ref)) =
                    (execution.as_mut(), parse::<ArtifactRef>(&record.payload))
                {
                    exec.artifacts
                        .insert(artifact_ref.name.clone(), artifact_ref);
                }
            }
            WalKind::EventEmitted => {
                if is_internal(&record.payload) {
                    continue;
                }
                if let (Some(exec), Some(event)) =
                    (execution.as_mut(), parse::<EventRecord>(&record.payload))
                {
                    exec.events.push(event);
                }
            }
            WalKind::StepCompleted | WalKind::SagaCompensation => {}
            WalKind::ExecutionTerminal => {
                if let Some(exec) = execution.as_mut() {
                    if let Some(status) = record.payload.get("status").and_then(parse) {
                        exec.status = status;
                    }
                    exec.completed_at = record
                        .payload
                        .get("completed_at")
                        .and_then(parse::<DateTime<Utc>>);
                    exec.error = record.payload.get("error").and_then(parse);
                }
            }
        }
    }

    execution
}
