//! Status derivation
//!
//! Maps what the cluster reports about a job's TaskRun, and the pod behind
//! it, onto the job state machine. Derivation is pure: the reconciler does
//! the reads and decides what to write.
//!
//! Priority order:
//! 1. The TaskRun `Succeeded` condition, once `True` or `False`, is final.
//! 2. Without a pod there is nothing running yet: `Scheduling`.
//! 3. An evicted pod is `Failed` whatever its phase says.
//! 4. Pod phase, refined by TaskRun step states while `Running`.
//! 5. Anything unrecognized stays `Scheduling`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;

use forge_common::crd::{JobState, JobStatus, ResultEntry};
use forge_pipeline::{TaskRun, MAIN_STEP, RESULT_STEP, SETUP_STEP};

use crate::managed::ManagedResource;

/// Pod `status.reason` set by the kubelet on eviction
pub const EVICTED_REASON: &str = "Evicted";

/// Outcome of one derivation
#[derive(Clone, Debug, PartialEq)]
pub struct Derived {
    pub state: JobState,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl Derived {
    fn state(state: JobState) -> Self {
        Self {
            state,
            reason: None,
            message: None,
        }
    }

    fn failed(reason: Option<String>, message: Option<String>) -> Self {
        Self {
            state: JobState::Failed,
            reason,
            message,
        }
    }
}

/// Pod worth consulting for `task_run`.
///
/// Only while the outcome is still open and the TaskRun has recorded its pod.
pub fn pod_to_inspect(task_run: &TaskRun) -> Option<&str> {
    let status = task_run.status.as_ref()?;
    let settled = status
        .succeeded_condition()
        .is_some_and(|c| c.status == "True" || c.status == "False");
    if settled {
        return None;
    }
    status.pod_name.as_deref()
}

/// Derive the job state from the observed TaskRun and pod
pub fn derive<K: ManagedResource>(task_run: Option<&TaskRun>, pod: Option<&Pod>) -> Derived {
    let status = task_run.and_then(|tr| tr.status.as_ref());

    if let Some(condition) = status.and_then(|s| s.succeeded_condition()) {
        match condition.status.as_str() {
            "True" => return Derived::state(JobState::Succeeded),
            "False" => {
                return Derived::failed(condition.reason.clone(), condition.message.clone())
            }
            _ => {}
        }
    }

    let Some(pod_status) = pod.and_then(|p| p.status.as_ref()) else {
        return Derived::state(JobState::Scheduling);
    };

    if pod_status.reason.as_deref() == Some(EVICTED_REASON) {
        return Derived::failed(Some(EVICTED_REASON.to_string()), pod_status.message.clone());
    }

    match pod_status.phase.as_deref() {
        Some("Running") => Derived::state(running_state::<K>(task_run)),
        _ => Derived::state(JobState::Scheduling),
    }
}

fn running_state<K: ManagedResource>(task_run: Option<&TaskRun>) -> JobState {
    let Some(status) = task_run.and_then(|tr| tr.status.as_ref()) else {
        return JobState::Running;
    };

    if let Some(setup) = K::SETUP_STATE {
        if status.step_active(SETUP_STEP) {
            return setup;
        }
    }
    if let Some(capture) = K::CAPTURE_STATE {
        if status.step_terminated(MAIN_STEP) && status.step_active(RESULT_STEP) {
            return capture;
        }
    }
    JobState::Running
}

/// Status to store after a pass.
///
/// Reason and message always come from the derivation, so a recovered job
/// drops a stale failure message. Results are attached only on success.
pub fn next_status(
    current: &JobStatus,
    derived: Derived,
    results: BTreeMap<String, String>,
    task_run_name: Option<String>,
    pod_name: Option<String>,
) -> JobStatus {
    let results = if derived.state == JobState::Succeeded {
        results
            .into_iter()
            .map(|(name, value)| ResultEntry { name, value })
            .collect()
    } else {
        current.results.clone()
    };
    JobStatus {
        state: derived.state,
        message: derived.message,
        reason: derived.reason,
        results,
        task_run_name: task_run_name.or_else(|| current.task_run_name.clone()),
        pod_name: pod_name.or_else(|| current.pod_name.clone()),
    }
}
