// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saga compensation: undo side effects in reverse on failure.
//!
//! Handlers register one compensation per side-effecting step. On failure
//! (or cancellation) the runtime drains the log newest-first and runs each
//! action, WAL-logging every outcome. A failed compensation is surfaced
//! and never re-invoked; remediation is manual from there.

use fab_error::Result;
use futures::future::BoxFuture;
use std::sync::Mutex;

/// A deferred undo action.
pub type CompensationFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// One registered compensation.
pub struct Compensation {
    /// Step the compensation undoes.
    pub step: String,
    action: CompensationFn,
}

impl Compensation {
    /// Run the action, consuming it.
    pub async fn run(self) -> Result<()> {
        (self.action)().await
    }
}

/// Per-execution compensation log.
#[derive(Default)]
pub struct CompensationLog {
    entries: Mutex<Vec<Compensation>>,
}

impl CompensationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compensation for a named step.
    pub fn push<F>(&self, step: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.entries
            .lock()
            .expect("compensation lock poisoned")
            .push(Compensation {
                step: step.into(),
                action: Box::new(action),
            });
    }

    /// Take every compensation, newest first.
    pub fn drain_reverse(&self) -> Vec<Compensation> {
        let mut entries = self.entries.lock().expect("compensation lock poisoned");
        let mut drained: Vec<Compensation> = entries.drain(..).collect();
        drained.reverse();
        drained
    }

    /// How many compensations are registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("compensation lock poisoned").len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn drain_runs_newest_first() {
        let log = CompensationLog::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for step in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            log.push(step, move || {
                Box::pin(async move {
                    order.lock().unwrap().push(step);
                    Ok(())
                })
            });
        }

        for compensation in log.drain_reverse() {
            compensation.run().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn drain_empties_the_log() {
        let log = CompensationLog::new();
        log.push("only", || Box::pin(async { Ok(()) }));
        assert_eq!(log.len(), 1);
        let drained = log.drain_reverse();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn failed_compensations_surface_their_error() {
        let log = CompensationLog::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        log.push("boom", move || {
            Box::pin(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Err(fab_error::FabricError::new(
                    fab_error::ErrorCode::TransientIo,
                    "undo failed",
                ))
            })
        });

        let compensation = log.drain_reverse().pop().unwrap();
        assert_eq!(compensation.step, "boom");
        assert!(compensation.run().await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
