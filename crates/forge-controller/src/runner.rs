//! Controller runner
//!
//! Owns the work queue and a fixed pool of worker tasks. The watch pump
//! fills the queue, workers drain it and hand each key to the reconciler
//! registered for its kind. The retry decision for a failed pass is made
//! here and nowhere else.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use forge_common::retry::RetryConfig;

use crate::queue::{ObjectKey, ResourceKind, WorkQueue};
use crate::reconciler::Reconcile;
use crate::watch::{pump, EventSource};

/// Default number of worker tasks
pub const DEFAULT_WORKERS: usize = 4;

type Reconcilers = HashMap<ResourceKind, Arc<dyn Reconcile>>;

/// Worker pool dispatching queue keys to per-kind reconcilers
pub struct ControllerRunner {
    queue: Arc<WorkQueue>,
    reconcilers: Reconcilers,
    workers: usize,
}

impl ControllerRunner {
    /// Runner with requeue backoff of 1s doubling up to 300s
    pub fn new(workers: usize) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new(RetryConfig::requeue())),
            reconcilers: HashMap::new(),
            workers: workers.max(1),
        }
    }

    /// Route keys of `kind` to `reconciler`
    pub fn register(&mut self, kind: ResourceKind, reconciler: Arc<dyn Reconcile>) -> &mut Self {
        info!(kind = %kind, "registered reconciler");
        self.reconcilers.insert(kind, reconciler);
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `shutdown` resolves, then drain the workers.
    ///
    /// Workers finish the key they hold and exit; queued keys are dropped
    /// and picked up again by the next process through its initial list.
    pub async fn run<S>(self, source: S, shutdown: impl Future<Output = ()>)
    where
        S: EventSource + 'static,
    {
        let reconcilers = Arc::new(self.reconcilers);
        let pump = tokio::spawn(pump(source, Arc::clone(&self.queue)));

        let workers: Vec<_> = (0..self.workers)
            .map(|id| {
                let queue = Arc::clone(&self.queue);
                let reconcilers = Arc::clone(&reconcilers);
                tokio::spawn(async move {
                    while let Some(key) = queue.get().await {
                        process(&queue, &reconcilers, key).await;
                    }
                    debug!(worker = id, "worker stopped");
                })
            })
            .collect();
        info!(workers = self.workers, "controllers running");

        shutdown.await;
        info!("shutdown requested, draining workers");
        self.queue.shutdown();
        pump.abort();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("controllers stopped");
    }
}

async fn process(queue: &Arc<WorkQueue>, reconcilers: &Reconcilers, key: ObjectKey) {
    match reconcilers.get(&key.kind) {
        None => {
            debug!(key = %key, "kind disabled, dropping key");
            queue.forget(&key);
        }
        Some(reconciler) => match reconciler.reconcile(&key).await {
            Ok(()) => queue.forget(&key),
            Err(e) if e.is_retryable() => {
                let delay = queue.add_rate_limited(key.clone());
                warn!(
                    key = %key,
                    error = %e,
                    failures = queue.failures(&key),
                    retry_in_ms = delay.as_millis() as u64,
                    "reconcile failed, requeueing"
                );
            }
            Err(e) => {
                error!(key = %key, error = %e, "reconcile failed, waiting for a change");
                queue.forget(&key);
            }
        },
    }
    queue.done(&key);
}
