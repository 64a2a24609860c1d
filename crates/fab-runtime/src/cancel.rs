// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation primitives for execution runs.
//!
//! One [`CancellableRun`] exists per live execution. It is a
//! reason-carrying signal over a watch channel: the first cancel wins,
//! every clone observes it, and waiters wake at their next suspension
//! point. The registry maps execution ids to their live signals so
//! `Runtime::cancel` can reach an execution that is already dispatched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

/// Why an execution was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The caller requested cancellation.
    UserRequested,
    /// The per-intent-type budget expired.
    Timeout,
    /// The host is shutting down.
    SystemShutdown,
}

// ── CancellableRun ──────────────────────────────────────────────────

/// Reason-carrying cancel signal for one execution.
///
/// Cheap to clone; clones share the signal. Only the first recorded
/// reason sticks, so a user cancel racing a timeout terminalizes under
/// whichever fired first.
#[derive(Debug, Clone)]
pub struct CancellableRun {
    signal: Arc<watch::Sender<Option<CancellationReason>>>,
    observer: watch::Receiver<Option<CancellationReason>>,
}

impl CancellableRun {
    /// A fresh, uncancelled signal.
    #[must_use]
    pub fn new() -> Self {
        let (signal, observer) = watch::channel(None);
        Self {
            signal: Arc::new(signal),
            observer,
        }
    }

    /// Cancel with a reason. Later calls are no-ops: the stored reason
    /// never changes once set.
    pub fn cancel(&self, reason: CancellationReason) {
        self.signal.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Returns `true` once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.borrow().is_some()
    }

    /// The recorded reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancellationReason> {
        *self.signal.borrow()
    }

    /// Resolves when the signal fires; immediately if it already has.
    pub async fn cancelled(&self) {
        let mut observer = self.observer.clone();
        // The sender lives inside self, so the channel cannot close
        // while we wait; a closed channel still counts as cancelled.
        let _ = observer.wait_for(Option::is_some).await;
    }
}

impl Default for CancellableRun {
    fn default() -> Self {
        Self::new()
    }
}

// ── CancelRegistry ──────────────────────────────────────────────────

/// Live cancellation handles keyed by execution id.
#[derive(Default)]
pub struct CancelRegistry {
    runs: Mutex<HashMap<Uuid, CancellableRun>>,
}

impl CancelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh handle for an execution.
    pub fn register(&self, execution_id: Uuid) -> CancellableRun {
        let run = CancellableRun::new();
        self.runs
            .lock()
            .expect("cancel lock poisoned")
            .insert(execution_id, run.clone());
        run
    }

    /// Look up the handle for an execution.
    #[must_use]
    pub fn get(&self, execution_id: Uuid) -> Option<CancellableRun> {
        self.runs
            .lock()
            .expect("cancel lock poisoned")
            .get(&execution_id)
            .cloned()
    }

    /// Drop the handle once the execution is terminal.
    pub fn remove(&self, execution_id: Uuid) {
        self.runs
            .lock()
            .expect("cancel lock poisoned")
            .remove(&execution_id);
    }
}
