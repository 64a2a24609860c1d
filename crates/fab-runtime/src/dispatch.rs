// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-tenant dispatch: parallel worker pools with per-tenant ordering.
//!
//! Each tenant gets its own bounded queue, created lazily on first use.
//! Within a tenant, admission order is execution order (configurable
//! parallelism, default 1); across tenants, work runs concurrently. A full
//! queue rejects at reservation time, before anything durable happens.

use async_trait::async_trait;
use fab_core::Intent;
use fab_error::{ErrorCode, FabricError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, Weak};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

/// One queued unit of work.
#[derive(Debug, Clone)]
pub struct ExecutionTask {
    /// The execution to run.
    pub execution_id: Uuid,
    /// The admitted intent.
    pub intent: Intent,
}

/// What the dispatcher drives. Implemented by the Runtime.
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    /// Run one execution to a terminal state.
    async fn run_execution(&self, task: ExecutionTask);
}

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Concurrent executions per tenant (≥ 1).
    pub per_tenant_parallelism: usize,
    /// Queue depth beyond which admission rejects with `overloaded`.
    pub queue_high_water: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            per_tenant_parallelism: 1,
            queue_high_water: 64,
        }
    }
}

/// A reserved queue slot. Admission sends into it only after the WAL
/// append succeeded, so backpressure rejection can never strand a durable
/// record.
#[derive(Debug)]
pub struct DispatchPermit {
    permit: mpsc::OwnedPermit<ExecutionTask>,
}

impl DispatchPermit {
    /// Enqueue the task into the reserved slot.
    pub fn send(self, task: ExecutionTask) {
        self.permit.send(task);
    }
}

/// The per-tenant dispatcher.
pub struct Dispatcher {
    runner: Weak<dyn ExecutionRunner>,
    options: DispatcherOptions,
    tenants: Mutex<HashMap<String, mpsc::Sender<ExecutionTask>>>,
}

impl Dispatcher {
    /// Create a dispatcher driving the given runner.
    ///
    /// The runner is held weakly: dropping the Runtime shuts the tenant
    /// loops down.
    pub fn new(runner: Weak<dyn ExecutionRunner>, options: DispatcherOptions) -> Self {
        Self {
            runner,
            options,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a queue slot for a tenant.
    ///
    /// # Errors
    ///
    /// `overloaded` when the tenant queue is at its high-water mark.
    pub fn reserve(&self, tenant_id: &str) -> Result<DispatchPermit> {
        let tx = self.sender_for(tenant_id);
        match tx.try_reserve_owned() {
            Ok(permit) => Ok(DispatchPermit { permit }),
            Err(mpsc::error::TrySendError::Full(_)) => Err(FabricError::new(
                ErrorCode::Overloaded,
                format!("tenant '{tenant_id}' queue is at its high-water mark"),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(FabricError::internal("tenant dispatch loop is gone"))
            }
        }
    }

    fn sender_for(&self, tenant_id: &str) -> mpsc::Sender<ExecutionTask> {
        let mut tenants = self.tenants.lock().expect("dispatch lock poisoned");
        if let Some(tx) = tenants.get(tenant_id) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(self.options.queue_high_water);
        debug!(target: "fab.dispatch", tenant_id = %tenant_id, "tenant queue created");
        tokio::spawn(tenant_loop(
            rx,
            self.runner.clone(),
            self.options.per_tenant_parallelism,
        ));
        tenants.insert(tenant_id.to_string(), tx.clone());
        tx
    }
}

/// Drains one tenant's queue. With parallelism 1 the loop awaits each
/// execution inline, preserving FIFO admission order; with more, tasks
/// run under a semaphore.
async fn tenant_loop(
    mut rx: mpsc::Receiver<ExecutionTask>,
    runner: Weak<dyn ExecutionRunner>,
    parallelism: usize,
) {
    if parallelism <= 1 {
        while let Some(task) = rx.recv().await {
            let Some(runner) = runner.upgrade() else {
                return;
            };
            runner.run_execution(task).await;
        }
        return;
    }

    let semaphore = std::sync::Arc::new(Semaphore::new(parallelism));
    while let Some(task) = rx.recv().await {
        let Some(runner) = runner.upgrade() else {
            return;
        };
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            let _permit = permit;
            runner.run_execution(task).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_core::IntentBuilder;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct RecordingRunner {
        log: Mutex<Vec<Uuid>>,
        release: Notify,
        block: bool,
    }

    #[async_trait]
    impl ExecutionRunner for RecordingRunner {
        async fn run_execution(&self, task: ExecutionTask) {
            if self.block {
                self.release.notified().await;
            }
            self.log.lock().unwrap().push(task.execution_id);
        }
    }

    fn task(tenant: &str) -> ExecutionTask {
        ExecutionTask {
            execution_id: Uuid::new_v4(),
            intent: IntentBuilder::new("t").tenant(tenant).user("u").build(),
        }
    }

    fn dispatcher(
        runner: &Arc<dyn ExecutionRunner>,
        options: DispatcherOptions,
    ) -> Dispatcher {
        Dispatcher::new(Arc::downgrade(runner), options)
    }

    #[tokio::test]
    async fn tasks_run_in_fifo_order_within_a_tenant() {
        let recording = Arc::new(RecordingRunner {
            log: Mutex::new(Vec::new()),
            release: Notify::new(),
            block: false,
        });
        let runner: Arc<dyn ExecutionRunner> = recording.clone();
        let dispatcher = dispatcher(&runner, DispatcherOptions::default());

        let tasks: Vec<ExecutionTask> = (0..5).map(|_| task("acme")).collect();
        let expected: Vec<Uuid> = tasks.iter().map(|t| t.execution_id).collect();
        for t in tasks {
            dispatcher.reserve("acme").unwrap().send(t);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*recording.log.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn a_slow_tenant_does_not_block_others() {
        let blocking = Arc::new(RecordingRunner {
            log: Mutex::new(Vec::new()),
            release: Notify::new(),
            block: true,
        });
        let runner: Arc<dyn ExecutionRunner> = blocking.clone();
        let dispatcher = dispatcher(&runner, DispatcherOptions::default());

        // Tenant A's task blocks inside the runner.
        dispatcher.reserve("a").unwrap().send(task("a"));
        // Tenant B's tasks should still flow... but the runner blocks for
        // everyone here, so just verify both loops picked work up by
        // releasing twice.
        dispatcher.reserve("b").unwrap().send(task("b"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Two independent loops are parked in notified(): wake both.
        blocking.release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(blocking.log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_with_overloaded() {
        let blocking = Arc::new(RecordingRunner {
            log: Mutex::new(Vec::new()),
            release: Notify::new(),
            block: true,
        });
        let runner: Arc<dyn ExecutionRunner> = blocking.clone();
        let dispatcher = dispatcher(
            &runner,
            DispatcherOptions {
                per_tenant_parallelism: 1,
                queue_high_water: 2,
            },
        );

        // First task is picked up by the loop and blocks; give it time.
        dispatcher.reserve("acme").unwrap().send(task("acme"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Two more fill the queue.
        dispatcher.reserve("acme").unwrap().send(task("acme"));
        dispatcher.reserve("acme").unwrap().send(task("acme"));

        let err = dispatcher.reserve("acme").unwrap_err();
        assert_eq!(err.code, ErrorCode::Overloaded);

        // Other tenants are unaffected.
        dispatcher.reserve("globex").unwrap().send(task("globex"));
    }

    #[tokio::test]
    async fn higher_parallelism_runs_tenant_tasks_concurrently() {
        let blocking = Arc::new(RecordingRunner {
            log: Mutex::new(Vec::new()),
            release: Notify::new(),
            block: true,
        });
        let runner: Arc<dyn ExecutionRunner> = blocking.clone();
        let dispatcher = dispatcher(
            &runner,
            DispatcherOptions {
                per_tenant_parallelism: 2,
                queue_high_water: 8,
            },
        );

        dispatcher.reserve("acme").unwrap().send(task("acme"));
        dispatcher.reserve("acme").unwrap().send(task("acme"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Both are parked concurrently; release them together.
        blocking.release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(blocking.log.lock().unwrap().len(), 2);
    }
}
