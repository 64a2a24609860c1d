// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution event streams: buffered WAL history, then live events.
//!
//! Subscription happens before the history read, so nothing published in
//! between is lost; the per-tenant sequence deduplicates the overlap.
//! Within one execution, delivery order is WAL order, and the terminal
//! event is always the last message.

use fab_capability::PubSub;
use fab_core::{StreamEnvelope, WalRecord};
use fab_error::Result;
use fab_store::Wal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// The pub/sub topic carrying one execution's WAL records.
#[must_use]
pub fn topic(execution_id: Uuid) -> String {
    format!("exec:{execution_id}")
}

/// Open a finite stream of envelopes for one execution.
///
/// The stream yields buffered history from admission onward, then live
/// events, and closes after the terminal envelope.
pub async fn open_stream(
    wal: Wal,
    pubsub: Arc<dyn PubSub>,
    tenant_id: &str,
    execution_id: Uuid,
) -> Result<ReceiverStream<StreamEnvelope>> {
    // Subscribe first; overlap with history is deduplicated by seq.
    let mut live = pubsub.subscribe(&topic(execution_id)).await?;
    let history = wal.records_for_execution(tenant_id, execution_id).await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut last_seq = 0;

        for record in history {
            last_seq = record.seq;
            let envelope = StreamEnvelope::from(&record);
            let terminal = envelope.is_terminal();
            if tx.send(envelope).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        }

        while let Some(message) = live.recv().await {
            let Ok(record) = serde_json::from_value::<WalRecord>(message) else {
                debug!(target: "fab.stream", execution_id = %execution_id, "undecodable stream message");
                continue;
            };
            if record.execution_id != execution_id || record.seq <= last_seq {
                continue;
            }
            last_seq = record.seq;
            let envelope = StreamEnvelope::from(&record);
            let terminal = envelope.is_terminal();
            if tx.send(envelope).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        }
    });

    Ok(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fab_capability::{MemoryPubSub, MemoryRowStore};
    use fab_core::{WalKind, WalRecord};
    use fab_store::WalAppend;
    use tokio_stream::StreamExt;

    fn append(execution_id: Uuid, kind: WalKind) -> WalAppend {
        WalAppend {
            tenant_id: "acme".into(),
            session_id: Uuid::nil(),
            execution_id,
            kind,
            payload: serde_json::json!({}),
        }
    }

    async fn publish(pubsub: &MemoryPubSub, record: &WalRecord) {
        pubsub
            .publish(
                &topic(record.execution_id),
                serde_json::to_value(record).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn history_then_terminal_closes_the_stream() {
        let rows = Arc::new(MemoryRowStore::new());
        let wal = Wal::new(rows);
        let pubsub: Arc<MemoryPubSub> = Arc::new(MemoryPubSub::new());
        let execution_id = Uuid::new_v4();

        wal.append(append(execution_id, WalKind::IntentAdmitted)).await.unwrap();
        wal.append(append(execution_id, WalKind::StepStarted)).await.unwrap();
        wal.append(append(execution_id, WalKind::ExecutionTerminal)).await.unwrap();

        let stream = open_stream(wal, pubsub, "acme", execution_id).await.unwrap();
        let envelopes: Vec<StreamEnvelope> = stream.collect().await;
        assert_eq!(envelopes.len(), 3);
        assert_eq!(envelopes[0].event_type, "intent_admitted");
        assert!(envelopes[2].is_terminal());
    }

    #[tokio::test]
    async fn live_events_follow_history_in_seq_order() {
        let rows = Arc::new(MemoryRowStore::new());
        let wal = Wal::new(rows);
        let pubsub = Arc::new(MemoryPubSub::new());
        let execution_id = Uuid::new_v4();

        let first = wal.append(append(execution_id, WalKind::IntentAdmitted)).await.unwrap();

        let stream =
            open_stream(wal.clone(), pubsub.clone(), "acme", execution_id).await.unwrap();

        // Publish the overlap (already in history) plus two live records.
        publish(&pubsub, &first).await;
        let started = wal.append(append(execution_id, WalKind::StepStarted)).await.unwrap();
        publish(&pubsub, &started).await;
        let terminal = wal
            .append(append(execution_id, WalKind::ExecutionTerminal))
            .await
            .unwrap();
        publish(&pubsub, &terminal).await;

        let envelopes: Vec<StreamEnvelope> = stream.collect().await;
        let seqs: Vec<u64> = envelopes.iter().map(|e| e.seq().unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(envelopes.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn foreign_execution_records_are_ignored() {
        let rows = Arc::new(MemoryRowStore::new());
        let wal = Wal::new(rows);
        let pubsub = Arc::new(MemoryPubSub::new());
        let execution_id = Uuid::new_v4();

        wal.append(append(execution_id, WalKind::IntentAdmitted)).await.unwrap();
        let stream =
            open_stream(wal.clone(), pubsub.clone(), "acme", execution_id).await.unwrap();

        // A record for some other execution lands on this topic somehow.
        let foreign = WalRecord {
            seq: 99,
            tenant_id: "acme".into(),
            session_id: Uuid::nil(),
            execution_id: Uuid::new_v4(),
            kind: WalKind::StepStarted,
            payload: serde_json::json!({}),
            ts: Utc::now(),
        };
        publish_to(&pubsub, execution_id, &foreign).await;

        let terminal = wal
            .append(append(execution_id, WalKind::ExecutionTerminal))
            .await
            .unwrap();
        publish(&pubsub, &terminal).await;

        let envelopes: Vec<StreamEnvelope> = stream.collect().await;
        assert_eq!(envelopes.len(), 2);
        assert!(envelopes.iter().all(|e| e.seq() != Some(99)));
    }

    async fn publish_to(pubsub: &MemoryPubSub, topic_execution: Uuid, record: &WalRecord) {
        pubsub
            .publish(
                &topic(topic_execution),
                serde_json::to_value(record).unwrap(),
            )
            .await
            .unwrap();
    }
}
