// SPDX-License-Identifier: MIT OR Apache-2.0
//! Topic pub/sub for decoupled event distribution.
//!
//! Delivery is at-least-once from the consumer's perspective: a lagged
//! subscriber skips ahead and the gap is counted, never silently ignored.
//! Buffered history replay is layered on top by the Runtime's stream bus,
//! which rereads the WAL; the transport itself is live-only.

use async_trait::async_trait;
use fab_error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Default channel capacity per topic.
const DEFAULT_CAPACITY: usize = 256;

/// Shared statistics counters for a pub/sub transport.
#[derive(Debug, Default)]
struct StatsInner {
    total_published: AtomicU64,
    dropped_messages: AtomicU64,
}

/// Snapshot of transport statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubStats {
    /// Total messages published across all topics.
    pub total_published: u64,
    /// Messages lost to lag or absent subscribers.
    pub dropped_messages: u64,
}

/// Narrow contract for topic pub/sub.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a message to a topic.
    async fn publish(&self, topic: &str, msg: Value) -> Result<()>;

    /// Subscribe to future messages on a topic.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// A handle for receiving messages from one topic.
pub struct Subscription {
    rx: broadcast::Receiver<Value>,
    stats: Arc<StatsInner>,
}

impl Subscription {
    /// Receive the next message, waiting asynchronously.
    ///
    /// Returns `None` when the transport is dropped. A lagged subscriber
    /// skips to the oldest retained message; skipped messages are counted.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.dropped_messages.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<Value> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                self.stats.dropped_messages.fetch_add(n, Ordering::Relaxed);
                self.rx.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryPubSub
// ---------------------------------------------------------------------------

/// In-memory [`PubSub`] over broadcast channels.
///
/// Topics are created on first use and kept alive for the life of the
/// transport so a publish before any subscribe is not an error.
pub struct MemoryPubSub {
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    stats: Arc<StatsInner>,
    capacity: usize,
}

impl MemoryPubSub {
    /// Create a transport with the default per-topic capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a transport with the given per-topic capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            stats: Arc::new(StatsInner::default()),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        let mut topics = self.topics.lock().expect("pubsub lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Snapshot of transport statistics.
    #[must_use]
    pub fn stats(&self) -> PubSubStats {
        PubSubStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            dropped_messages: self.stats.dropped_messages.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, msg: Value) -> Result<()> {
        let sender = self.sender(topic);
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if sender.send(msg).is_err() {
            // No live subscribers; count and move on.
            self.stats.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let sender = self.sender(topic);
        Ok(Subscription {
            rx: sender.subscribe(),
            stats: Arc::clone(&self.stats),
        })
    }
}
