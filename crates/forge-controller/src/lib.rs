//! Reconciliation engine for forge managed jobs
//!
//! Watches ModelTraining and ModelPackaging resources together with the
//! TaskRuns and Secrets they own, queues the affected jobs and reconciles
//! each one into a running pipeline whose progress is mirrored back onto
//! the job status.

pub mod events;
pub mod managed;
pub mod queue;
pub mod reconciler;
pub mod runner;
pub mod status;
pub mod store;
pub mod sync;
pub mod watch;

#[cfg(test)]
mod testing;

pub use managed::ManagedResource;
pub use queue::{ObjectKey, ResourceKind, WorkQueue};
pub use reconciler::{Context, Reconcile, Reconciler};
pub use runner::{ControllerRunner, DEFAULT_WORKERS};
pub use watch::{ChangeEvent, EventSource, KubeEventSource};
