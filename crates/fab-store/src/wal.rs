// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-tenant write-ahead log.
//!
//! Records ride on a row-store append stream named `wal:{tenant_id}`.
//! Sequences are monotonic per tenant; there is no cross-tenant ordering.
//! Once appended, a record is immutable.

use chrono::Utc;
use fab_capability::RowStore;
use fab_core::{WalKind, WalRecord};
use fab_error::{FabricError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// What a caller supplies for one append; the log assigns `seq` and `ts`.
#[derive(Debug, Clone)]
pub struct WalAppend {
    /// Tenant stream to append to.
    pub tenant_id: String,
    /// Session of the originating intent.
    pub session_id: Uuid,
    /// Execution the record describes.
    pub execution_id: Uuid,
    /// Record kind.
    pub kind: WalKind,
    /// Opaque payload.
    pub payload: Value,
}

/// Stream entry body. `seq` lives in the stream position, not the body.
#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    tenant_id: String,
    session_id: Uuid,
    execution_id: Uuid,
    kind: WalKind,
    payload: Value,
    ts: chrono::DateTime<Utc>,
}

/// The write-ahead log.
#[derive(Clone)]
pub struct Wal {
    rows: Arc<dyn RowStore>,
}

impl Wal {
    /// Create a log over the given row store.
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        Self { rows }
    }

    fn stream_name(tenant_id: &str) -> String {
        format!("wal:{tenant_id}")
    }

    /// Durably append one record and return it with its assigned sequence.
    ///
    /// # Errors
    ///
    /// Propagates row-store failures; on error nothing was appended.
    pub async fn append(&self, append: WalAppend) -> Result<WalRecord> {
        let entry = WalEntry {
            tenant_id: append.tenant_id.clone(),
            session_id: append.session_id,
            execution_id: append.execution_id,
            kind: append.kind,
            payload: append.payload,
            ts: Utc::now(),
        };
        let value = serde_json::to_value(&entry)
            .map_err(|e| FabricError::internal("encode wal entry").with_source(e))?;
        let seq = self
            .rows
            .append_seq(&Self::stream_name(&append.tenant_id), value)
            .await?;
        Ok(WalRecord {
            seq,
            tenant_id: entry.tenant_id,
            session_id: entry.session_id,
            execution_id: entry.execution_id,
            kind: entry.kind,
            payload: entry.payload,
            ts: entry.ts,
        })
    }

    /// Read a tenant's records with `seq >= from_seq`, in order.
    pub async fn read(&self, tenant_id: &str, from_seq: u64) -> Result<Vec<WalRecord>> {
        let entries = self
            .rows
            .read_seq(&Self::stream_name(tenant_id), from_seq)
            .await?;
        let mut out = Vec::with_capacity(entries.len());
        for (seq, value) in entries {
            let entry: WalEntry = serde_json::from_value(value)
                .map_err(|e| FabricError::internal("decode wal entry").with_source(e))?;
            out.push(WalRecord {
                seq,
                tenant_id: entry.tenant_id,
                session_id: entry.session_id,
                execution_id: entry.execution_id,
                kind: entry.kind,
                payload: entry.payload,
                ts: entry.ts,
            });
        }
        Ok(out)
    }

    /// Read every record of one execution, in sequence order.
    pub async fn records_for_execution(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> Result<Vec<WalRecord>> {
        let all = self.read(tenant_id, 1).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.execution_id == execution_id)
            .collect())
    }

    /// Latest sequence on a tenant's stream (0 when empty).
    pub async fn head(&self, tenant_id: &str) -> Result<u64> {
        let entries = self.rows.read_seq(&Self::stream_name(tenant_id), 1).await?;
        Ok(entries.last().map_or(0, |(seq, _)| *seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_capability::MemoryRowStore;
    use serde_json::json;

    fn wal() -> Wal {
        Wal::new(Arc::new(MemoryRowStore::new()))
    }

    fn append_for(tenant: &str, execution_id: Uuid, kind: WalKind) -> WalAppend {
        WalAppend {
            tenant_id: tenant.into(),
            session_id: Uuid::new_v4(),
            execution_id,
            kind,
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn appends_assign_monotonic_per_tenant_sequences() {
        let wal = wal();
        let exec = Uuid::new_v4();
        let r1 = wal
            .append(append_for("acme", exec, WalKind::IntentAdmitted))
            .await
            .unwrap();
        let r2 = wal
            .append(append_for("acme", exec, WalKind::StepStarted))
            .await
            .unwrap();
        let other = wal
            .append(append_for("globex", exec, WalKind::IntentAdmitted))
            .await
            .unwrap();
        assert_eq!((r1.seq, r2.seq), (1, 2));
        // A different tenant starts its own sequence.
        assert_eq!(other.seq, 1);
    }

    #[tokio::test]
    async fn read_returns_records_in_order_from_offset() {
        let wal = wal();
        let exec = Uuid::new_v4();
        for kind in [
            WalKind::IntentAdmitted,
            WalKind::StepStarted,
            WalKind::ExecutionTerminal,
        ] {
            wal.append(append_for("acme", exec, kind)).await.unwrap();
        }
        let records = wal.read("acme", 2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 2);
        assert_eq!(records[0].kind, WalKind::StepStarted);
        assert_eq!(records[1].kind, WalKind::ExecutionTerminal);
    }

    #[tokio::test]
    async fn records_for_execution_filters_interleaved_streams() {
        let wal = wal();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        wal.append(append_for("acme", a, WalKind::IntentAdmitted)).await.unwrap();
        wal.append(append_for("acme", b, WalKind::IntentAdmitted)).await.unwrap();
        wal.append(append_for("acme", a, WalKind::ExecutionTerminal)).await.unwrap();

        let for_a = wal.records_for_execution("acme", a).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|r| r.execution_id == a));
        // Order is preserved.
        assert!(for_a[0].seq < for_a[1].seq);
    }

    #[tokio::test]
    async fn head_tracks_the_latest_sequence() {
        let wal = wal();
        assert_eq!(wal.head("acme").await.unwrap(), 0);
        let exec = Uuid::new_v4();
        wal.append(append_for("acme", exec, WalKind::IntentAdmitted)).await.unwrap();
        wal.append(append_for("acme", exec, WalKind::StepStarted)).await.unwrap();
        assert_eq!(wal.head("acme").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn payload_survives_the_roundtrip() {
        let wal = wal();
        let exec = Uuid::new_v4();
        let mut append = append_for("acme", exec, WalKind::ArtifactProduced);
        append.payload = json!({"artifact_id": "file-abc", "name": "file"});
        wal.append(append).await.unwrap();
        let records = wal.read("acme", 1).await.unwrap();
        assert_eq!(records[0].payload["artifact_id"], "file-abc");
    }
}
