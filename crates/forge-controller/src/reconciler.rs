//! Generic reconciler for managed job kinds
//!
//! One pass: read the job, stop if it is gone or settled, make sure the
//! results holder exists, converge the children while the job is new,
//! derive status from what the cluster reports and write it back if it
//! changed. Status writes use the resourceVersion from the read, so a
//! concurrent writer turns into a Conflict and the whole pass runs again
//! from a fresh read.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use forge_common::config::PipelineConfig;
use forge_common::crd::JobState;
use forge_common::{Error, Result, OPERATOR_NAME};
use forge_pipeline::{Connections, TaskRun};

use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::managed::ManagedResource;
use crate::queue::ObjectKey;
use crate::status;
use crate::store::{
    ConfigMapResultsSink, ConnectionResolver, KubeConnectionResolver, KubeStore, ObjectStore,
    ResultsSink, StatusStore,
};
use crate::sync::{sync_child, SyncOutcome};

/// Passes re-run after a status write conflict before giving up to the queue
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Everything a reconciler for `K` talks to
pub struct Context<K: ManagedResource> {
    pub resources: Arc<dyn ObjectStore<K>>,
    pub statuses: Arc<dyn StatusStore<K>>,
    /// Looked up in `config.integration_namespace`
    pub integrations: Arc<dyn ObjectStore<K::Integration>>,
    pub task_runs: Arc<dyn ObjectStore<TaskRun>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub connections: Arc<dyn ConnectionResolver>,
    pub results: Arc<dyn ResultsSink>,
    pub events: Arc<dyn EventPublisher>,
    pub config: Arc<PipelineConfig>,
}

impl<K: ManagedResource> Context<K> {
    /// Wire every dependency to the API server behind `client`
    pub fn from_client(client: Client, config: Arc<PipelineConfig>) -> Self {
        let store = Arc::new(KubeStore::<K>::new(client.clone()));
        Self {
            resources: store.clone(),
            statuses: store,
            integrations: Arc::new(KubeStore::new(client.clone())),
            task_runs: Arc::new(KubeStore::new(client.clone())),
            secrets: Arc::new(KubeStore::new(client.clone())),
            pods: Arc::new(KubeStore::new(client.clone())),
            connections: Arc::new(KubeConnectionResolver::new(
                client.clone(),
                &config.integration_namespace,
            )),
            results: Arc::new(ConfigMapResultsSink::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, OPERATOR_NAME)),
            config,
        }
    }
}

/// Reconciles the object behind a queue key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()>;
}

/// Reconciler for one managed kind
pub struct Reconciler<K: ManagedResource> {
    ctx: Context<K>,
}

#[async_trait]
impl<K: ManagedResource> Reconcile for Reconciler<K> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let mut retries = 0;
        loop {
            match self.reconcile_pass(&key.namespace, &key.name).await {
                Err(e) if e.is_conflict() && retries < MAX_CONFLICT_RETRIES => {
                    retries += 1;
                    debug!(key = %key, retries, "status write conflicted, re-running pass");
                }
                other => return other,
            }
        }
    }
}

impl<K: ManagedResource> Reconciler<K> {
    pub fn new(ctx: Context<K>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(kind = K::KIND.as_kind()))]
    async fn reconcile_pass(&self, namespace: &str, name: &str) -> Result<()> {
        let ctx = &self.ctx;

        let Some(resource) = ctx.resources.get(namespace, name).await? else {
            debug!("resource is gone");
            return Ok(());
        };

        let current = resource.job_status().cloned().unwrap_or_default();
        if current.state.is_terminal() {
            debug!(state = %current.state, "resource is settled");
            return Ok(());
        }

        let owner = resource.controller_owner_ref(&()).ok_or_else(|| {
            Error::internal_with_context(format!("{} '{name}' has no uid", K::KIND), "reconcile")
        })?;
        ctx.results.ensure(namespace, name, owner).await?;

        let task_run = if current.state == JobState::Unknown {
            match self.converge_children(&resource).await {
                Ok(task_run) => Some(task_run),
                Err(e) => {
                    self.record_failure(&resource, &e).await?;
                    return Err(e);
                }
            }
        } else {
            let task_run_name = current.task_run_name.as_deref().unwrap_or(name);
            ctx.task_runs.get(namespace, task_run_name).await?
        };

        let pod = match task_run.as_ref().and_then(status::pod_to_inspect) {
            Some(pod_name) => match ctx.pods.get(namespace, pod_name).await {
                Ok(pod) => pod,
                Err(e) => {
                    warn!(pod = pod_name, error = %e, "failed to read pod, deriving without it");
                    None
                }
            },
            None => None,
        };

        let derived = status::derive::<K>(task_run.as_ref(), pod.as_ref());
        let results = if derived.state == JobState::Succeeded {
            ctx.results.read(namespace, name).await?
        } else {
            BTreeMap::new()
        };
        let task_run_name = task_run.as_ref().map(|tr| tr.name_any());
        let pod_name = task_run
            .as_ref()
            .and_then(|tr| tr.status.as_ref())
            .and_then(|s| s.pod_name.clone());

        let next = status::next_status(&current, derived, results, task_run_name, pod_name);
        if next == current {
            debug!(state = %current.state, "status unchanged");
            return Ok(());
        }

        let mut updated = resource.clone();
        *updated.job_status_mut() = next.clone();
        ctx.statuses.replace_status(&updated).await?;

        if next.state != current.state {
            info!(from = %current.state, to = %next.state, "state changed");
            let note = match &next.message {
                Some(message) => format!("{} -> {}: {message}", current.state, next.state),
                None => format!("{} -> {}", current.state, next.state),
            };
            let type_ = if next.state == JobState::Failed {
                EventType::Warning
            } else {
                EventType::Normal
            };
            ctx.events
                .publish(
                    &resource.object_ref(&()),
                    type_,
                    reasons::STATE_CHANGED,
                    actions::RECONCILE,
                    Some(note),
                )
                .await;
        }
        Ok(())
    }

    /// Build the plan and converge the descriptor Secret and the TaskRun
    async fn converge_children(&self, resource: &K) -> Result<TaskRun> {
        let ctx = &self.ctx;
        let integration_name = resource.integration_name();
        let integration = ctx
            .integrations
            .get(&ctx.config.integration_namespace, integration_name)
            .await?
            .ok_or_else(|| {
                Error::not_found(<K::Integration as Resource>::kind(&()), integration_name)
            })?;

        let mut connections = Connections::new();
        for name in resource.connection_names(&ctx.config) {
            let spec = ctx.connections.resolve(&name).await?;
            connections.insert(name, spec);
        }

        let plan = resource.build_plan(&integration, &connections, &ctx.config)?;

        // Secret first: the TaskRun mounts it
        let secret = sync_child(ctx.secrets.as_ref(), plan.descriptor).await?;
        let task_run = sync_child(ctx.task_runs.as_ref(), plan.task_run).await?;

        if secret.outcome != SyncOutcome::Unchanged || task_run.outcome != SyncOutcome::Unchanged
        {
            ctx.events
                .publish(
                    &resource.object_ref(&()),
                    EventType::Normal,
                    reasons::CHILDREN_SYNCED,
                    actions::SYNC,
                    Some(format!(
                        "descriptor {:?}, task run {:?}",
                        secret.outcome, task_run.outcome
                    )),
                )
                .await;
        }

        Ok(task_run.object)
    }

    /// Put `err` on the status so users see it; the state is left alone
    async fn record_failure(&self, resource: &K, err: &Error) -> Result<()> {
        let message = err.to_string();
        let reason = err.reason();
        warn!(error = %message, reason, retryable = err.is_retryable(), "pass failed");

        let current = resource.job_status().cloned().unwrap_or_default();
        if current.message.as_deref() == Some(message.as_str())
            && current.reason.as_deref() == Some(reason)
        {
            return Ok(());
        }

        let mut updated = resource.clone();
        let status = updated.job_status_mut();
        status.message = Some(message.clone());
        status.reason = Some(reason.to_string());
        self.ctx.statuses.replace_status(&updated).await?;

        self.ctx
            .events
            .publish(
                &resource.object_ref(&()),
                EventType::Warning,
                reasons::RECONCILE_FAILED,
                actions::RECONCILE,
                Some(message),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ResourceKind;
    use crate::testing::FakeCluster;
    use forge_common::crd::{
        ConnectionSpec, IntegrationSpec, JobStatus, ModelPackaging, ModelPackagingSpec,
        ModelTraining, ModelTrainingSpec, PackagingIntegration, PackagingIntegrationSpec, Target,
        ToolchainIntegration, ToolchainIntegrationSpec,
    };
    use forge_common::hash::stored_hash;
    use forge_pipeline::{
        StepState, StepTerminated, TaskRunCondition, TaskRunStatus, MAIN_STEP, RESULT_STEP,
        SETUP_STEP,
    };
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;

    const NS: &str = "team-a";

    fn meta(name: &str, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        }
    }

    fn integration(image: &str) -> IntegrationSpec {
        IntegrationSpec {
            entrypoint: "/opt/run".to_string(),
            default_image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn git() -> ConnectionSpec {
        ConnectionSpec {
            type_: "git".to_string(),
            uri: "git@github.com:org/repo.git".to_string(),
            ..Default::default()
        }
    }

    fn training_spec(toolchain: &str) -> ModelTrainingSpec {
        ModelTrainingSpec {
            toolchain: toolchain.to_string(),
            entrypoint: None,
            args: vec![],
            hyperparameters: BTreeMap::new(),
            image: None,
            vcs_name: "git-conn".to_string(),
            reference: None,
            work_dir: None,
            data: vec![],
            envs: vec![],
            resources: None,
        }
    }

    /// Cluster with toolchain `ti-1` (default image img:1.0), connection
    /// `git-conn` and a fresh training job `wine`
    fn training_cluster() -> FakeCluster {
        let cluster = FakeCluster::new();
        let mut ti = ToolchainIntegration::new(
            "ti-1",
            ToolchainIntegrationSpec {
                integration: integration("img:1.0"),
            },
        );
        ti.metadata = meta("ti-1", &cluster.config.integration_namespace);
        cluster.toolchains.insert(ti);
        cluster.connections.insert("git-conn", git());

        let mut mt = ModelTraining::new("wine", training_spec("ti-1"));
        mt.metadata = meta("wine", NS);
        cluster.trainings.insert(mt);
        cluster
    }

    fn training_key() -> ObjectKey {
        ObjectKey::new(ResourceKind::Training, NS, "wine")
    }

    fn training_reconciler(cluster: &FakeCluster) -> Reconciler<ModelTraining> {
        Reconciler::new(cluster.training_context())
    }

    fn training_status(cluster: &FakeCluster) -> JobStatus {
        cluster
            .trainings
            .peek(NS, "wine")
            .and_then(|mt| mt.status)
            .unwrap_or_default()
    }

    /// Tekton reporting progress on the TaskRun
    fn report(cluster: &FakeCluster, condition: &str, steps: Vec<StepState>) {
        cluster.task_runs.update(NS, "wine", |tr| {
            tr.status = Some(TaskRunStatus {
                conditions: vec![TaskRunCondition {
                    type_: "Succeeded".to_string(),
                    status: condition.to_string(),
                    reason: None,
                    message: None,
                }],
                pod_name: Some("wine-pod".to_string()),
                steps,
                ..Default::default()
            });
        });
    }

    fn step(name: &str, done: bool) -> StepState {
        StepState {
            name: name.to_string(),
            terminated: done.then(StepTerminated::default),
            ..Default::default()
        }
    }

    fn pod(phase: &str, reason: Option<&str>) -> Pod {
        Pod {
            metadata: meta("wine-pod", NS),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                reason: reason.map(str::to_string),
                message: reason.map(|r| format!("pod {r}")),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[tokio::test]
    async fn happy_path_training_job() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);

        // First pass: children created, job scheduling
        reconciler.reconcile(&training_key()).await.unwrap();
        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Scheduling);
        assert_eq!(status.task_run_name.as_deref(), Some("wine"));

        let tr = cluster.task_runs.peek(NS, "wine").unwrap();
        let steps = &tr.spec.task_spec.steps;
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].image.as_deref(), Some("img:1.0"));
        assert!(stored_hash(&tr).is_some());
        assert!(cluster.secrets.peek(NS, "wine-descriptor").is_some());
        assert!(cluster.results.exists(NS, "wine"));

        // Pod running, setup still fetching code
        report(&cluster, "Unknown", vec![step(SETUP_STEP, false)]);
        cluster.pods.insert(pod("Running", None));
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(training_status(&cluster).state, JobState::FetchingCode);

        // Main step running
        report(
            &cluster,
            "Unknown",
            vec![step(SETUP_STEP, true), step(MAIN_STEP, false)],
        );
        reconciler.reconcile(&training_key()).await.unwrap();
        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.pod_name.as_deref(), Some("wine-pod"));

        // Result step wrote into the sink, TaskRun succeeded
        cluster
            .results
            .persist(
                NS,
                "wine",
                &BTreeMap::from([
                    ("run_id".to_string(), "42".to_string()),
                    ("commit_id".to_string(), "abc123".to_string()),
                ]),
            )
            .await
            .unwrap();
        report(&cluster, "True", vec![]);
        reconciler.reconcile(&training_key()).await.unwrap();

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.result("run_id"), Some("42"));
        assert_eq!(status.result("commit_id"), Some("abc123"));
        assert!(cluster
            .events
            .reasons()
            .iter()
            .any(|r| r == reasons::STATE_CHANGED));
    }

    #[tokio::test]
    async fn missing_integration_leaves_state_and_children_untouched() {
        let cluster = training_cluster();
        cluster
            .trainings
            .update(NS, "wine", |mt| mt.spec.toolchain = "missing".to_string());
        let reconciler = training_reconciler(&cluster);

        let err = reconciler.reconcile(&training_key()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { ref name, .. } if name == "missing"));
        assert!(err.is_retryable());

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Unknown);
        assert_eq!(status.reason.as_deref(), Some("NotFound"));
        assert!(status.message.unwrap().contains("'missing' not found"));
        assert_eq!(cluster.task_runs.len(), 0);
        assert_eq!(cluster.secrets.len(), 0);
        assert_eq!(cluster.events.warnings(), 1);

        // Same failure again does not rewrite the status
        let writes = cluster.trainings.status_writes();
        reconciler.reconcile(&training_key()).await.unwrap_err();
        assert_eq!(cluster.trainings.status_writes(), writes);
    }

    #[tokio::test]
    async fn fixed_reference_clears_recorded_failure() {
        let cluster = training_cluster();
        cluster
            .trainings
            .update(NS, "wine", |mt| mt.spec.toolchain = "missing".to_string());
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap_err();

        cluster
            .trainings
            .update(NS, "wine", |mt| mt.spec.toolchain = "ti-1".to_string());
        reconciler.reconcile(&training_key()).await.unwrap();

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Scheduling);
        assert!(status.message.is_none());
        assert!(status.reason.is_none());
    }

    #[tokio::test]
    async fn conflicting_status_write_reruns_the_pass() {
        let cluster = training_cluster();
        cluster.trainings.inject_conflicts(2);
        let reconciler = training_reconciler(&cluster);

        reconciler.reconcile(&training_key()).await.unwrap();

        assert_eq!(training_status(&cluster).state, JobState::Scheduling);
        assert_eq!(cluster.trainings.status_writes(), 1);
        // Children converged on the first pass, reruns found them in place
        assert_eq!(cluster.task_runs.creates(), 1);
        assert_eq!(cluster.task_runs.deletes(), 0);
    }

    #[tokio::test]
    async fn persistent_conflict_is_surfaced_after_bounded_retries() {
        let cluster = training_cluster();
        cluster.trainings.inject_conflicts(MAX_CONFLICT_RETRIES + 1);
        let reconciler = training_reconciler(&cluster);

        let err = reconciler.reconcile(&training_key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(training_status(&cluster).state, JobState::Unknown);

        // The queue's retry finds a quiet object and succeeds
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(training_status(&cluster).state, JobState::Scheduling);
    }

    #[tokio::test]
    async fn forbidden_connection_is_recorded_and_not_retryable() {
        let cluster = training_cluster();
        cluster.connections.forbid("git-conn");
        let reconciler = training_reconciler(&cluster);

        let err = reconciler.reconcile(&training_key()).await.unwrap_err();
        assert!(!err.is_retryable());

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Unknown);
        assert_eq!(status.reason.as_deref(), Some("Forbidden"));
        assert!(status.message.unwrap().contains("decrypt token mismatch"));
        assert_eq!(cluster.task_runs.len(), 0);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[tokio::test]
    async fn second_pass_without_changes_writes_nothing() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        let writes = cluster.writes();
        let hash = stored_hash(&cluster.task_runs.peek(NS, "wine").unwrap()).map(str::to_string);

        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(cluster.writes(), writes);
        assert_eq!(
            stored_hash(&cluster.task_runs.peek(NS, "wine").unwrap()).map(str::to_string),
            hash
        );
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_touched() {
        for state in [JobState::Succeeded, JobState::Failed] {
            let cluster = training_cluster();
            cluster.trainings.update(NS, "wine", |mt| {
                mt.status = Some(JobStatus {
                    state,
                    ..Default::default()
                })
            });
            let reconciler = training_reconciler(&cluster);

            for _ in 0..3 {
                reconciler.reconcile(&training_key()).await.unwrap();
            }
            assert_eq!(cluster.writes(), 0, "{state}");
            assert_eq!(cluster.task_runs.len(), 0);
            assert_eq!(training_status(&cluster).state, state);
        }
    }

    #[tokio::test]
    async fn stale_child_is_replaced_exactly_once() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        // Status lost (e.g. restored from backup) and integration image bumped
        cluster.trainings.update(NS, "wine", |mt| mt.status = None);
        cluster.toolchains.update(
            &cluster.config.integration_namespace,
            "ti-1",
            |ti| ti.spec.integration.default_image = Some("img:2.0".to_string()),
        );
        reconciler.reconcile(&training_key()).await.unwrap();

        assert_eq!(cluster.task_runs.deletes(), 1);
        assert_eq!(cluster.task_runs.creates(), 2);
        let tr = cluster.task_runs.peek(NS, "wine").unwrap();
        assert_eq!(tr.spec.task_spec.steps[1].image.as_deref(), Some("img:2.0"));

        // Rendered spec unchanged: no further replace
        cluster.trainings.update(NS, "wine", |mt| mt.status = None);
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(cluster.task_runs.deletes(), 1);
        assert_eq!(cluster.task_runs.creates(), 2);
    }

    #[tokio::test]
    async fn evicted_pod_fails_the_job() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        report(&cluster, "Unknown", vec![step(SETUP_STEP, true)]);
        cluster.pods.insert(pod("Running", Some(status::EVICTED_REASON)));
        reconciler.reconcile(&training_key()).await.unwrap();

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.reason.as_deref(), Some(status::EVICTED_REASON));
        assert_eq!(status.message.as_deref(), Some("pod Evicted"));
    }

    #[tokio::test]
    async fn unreadable_results_keep_job_open() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        report(&cluster, "True", vec![]);
        cluster.results.fail_reads(true);
        let err = reconciler.reconcile(&training_key()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(training_status(&cluster).state, JobState::Scheduling);

        cluster.results.fail_reads(false);
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(training_status(&cluster).state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn terminating_child_defers_replace_until_it_is_gone() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        cluster.trainings.update(NS, "wine", |mt| mt.status = None);
        cluster.toolchains.update(
            &cluster.config.integration_namespace,
            "ti-1",
            |ti| ti.spec.integration.default_image = Some("img:2.0".to_string()),
        );
        // Old TaskRun held by a finalizer
        cluster.task_runs.linger_deletes(true);
        let err = reconciler.reconcile(&training_key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Unknown);
        let tr = cluster.task_runs.peek(NS, "wine").unwrap();
        assert_eq!(tr.spec.task_spec.steps[1].image.as_deref(), Some("img:1.0"));

        cluster.task_runs.linger_deletes(false);
        reconciler.reconcile(&training_key()).await.unwrap();
        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Scheduling);
        assert_eq!(status.message, None);
        let tr = cluster.task_runs.peek(NS, "wine").unwrap();
        assert_eq!(tr.spec.task_spec.steps[1].image.as_deref(), Some("img:2.0"));
    }

    #[tokio::test]
    async fn unreadable_pod_derives_scheduling() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        report(
            &cluster,
            "Unknown",
            vec![step(SETUP_STEP, true), step(MAIN_STEP, false)],
        );
        cluster.pods.insert(pod("Running", None));
        cluster.pods.fail_reads(true);
        reconciler.reconcile(&training_key()).await.unwrap();
        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Scheduling);
        assert_eq!(status.pod_name.as_deref(), Some("wine-pod"));

        cluster.pods.fail_reads(false);
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(training_status(&cluster).state, JobState::Running);
    }

    #[tokio::test]
    async fn missing_task_run_after_start_derives_scheduling() {
        let cluster = training_cluster();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();

        report(
            &cluster,
            "Unknown",
            vec![step(SETUP_STEP, true), step(MAIN_STEP, false)],
        );
        cluster.pods.insert(pod("Running", None));
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(training_status(&cluster).state, JobState::Running);

        cluster.task_runs.delete(NS, "wine").await.unwrap();
        reconciler.reconcile(&training_key()).await.unwrap();

        let status = training_status(&cluster);
        assert_eq!(status.state, JobState::Scheduling);
        assert_eq!(status.task_run_name.as_deref(), Some("wine"));
        // Children are only converged before the job starts
        assert!(cluster.task_runs.peek(NS, "wine").is_none());
    }

    #[tokio::test]
    async fn deleted_resource_is_a_no_op() {
        let cluster = FakeCluster::new();
        let reconciler = training_reconciler(&cluster);
        reconciler.reconcile(&training_key()).await.unwrap();
        assert_eq!(cluster.writes(), 0);
    }

    #[tokio::test]
    async fn packaging_job_reports_capturing_and_runs_privileged() {
        let cluster = FakeCluster::new();
        let mut pi = PackagingIntegration::new(
            "docker-rest",
            PackagingIntegrationSpec {
                integration: integration("packager:1.0"),
                privileged: true,
            },
        );
        pi.metadata = meta("docker-rest", &cluster.config.integration_namespace);
        cluster.packagers.insert(pi);
        cluster.connections.insert(
            "registry",
            ConnectionSpec {
                type_: "docker".to_string(),
                uri: "registry.example.com/models".to_string(),
                ..Default::default()
            },
        );
        let mut mp = ModelPackaging::new(
            "wine-pack",
            ModelPackagingSpec {
                integration_name: "docker-rest".to_string(),
                artifact_name: "wine-1.0.zip".to_string(),
                image: None,
                arguments: BTreeMap::new(),
                targets: vec![Target {
                    name: "docker-push".to_string(),
                    connection_name: "registry".to_string(),
                }],
                resources: None,
            },
        );
        mp.metadata = meta("wine-pack", NS);
        cluster.packagings.insert(mp);

        let reconciler = Reconciler::new(cluster.packaging_context());
        let key = ObjectKey::new(ResourceKind::Packaging, NS, "wine-pack");
        reconciler.reconcile(&key).await.unwrap();

        let tr = cluster.task_runs.peek(NS, "wine-pack").unwrap();
        let main = &tr.spec.task_spec.steps[1];
        assert_eq!(
            main.security_context.as_ref().and_then(|s| s.privileged),
            Some(true)
        );

        cluster.task_runs.update(NS, "wine-pack", |tr| {
            tr.status = Some(TaskRunStatus {
                pod_name: Some("wine-pack-pod".to_string()),
                steps: vec![
                    step(SETUP_STEP, true),
                    step(MAIN_STEP, true),
                    step(RESULT_STEP, false),
                ],
                ..Default::default()
            });
        });
        let mut running = pod("Running", None);
        running.metadata = meta("wine-pack-pod", NS);
        cluster.pods.insert(running);

        reconciler.reconcile(&key).await.unwrap();
        let status = cluster
            .packagings
            .peek(NS, "wine-pack")
            .and_then(|mp| mp.status)
            .unwrap();
        assert_eq!(status.state, JobState::Capturing);
    }
}
