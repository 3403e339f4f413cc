//! Watch multiplexer
//!
//! Change notifications for managed kinds and their children are pulled
//! from a single [`EventSource`] and turned into queue keys. A child event
//! is routed to its controlling owner; the child itself is never queued.
//! The event payload is dropped after routing since every pass re-reads
//! current state.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use forge_common::crd::{ModelPackaging, ModelTraining};
use forge_common::{Error, Result, MANAGED_BY_SELECTOR};
use forge_pipeline::TaskRun;

use crate::queue::{ObjectKey, ResourceKind, WorkQueue};

/// Watcher timeout (seconds), kept below the client read timeout so idle
/// watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Identity of an object that changed
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub owner_references: Vec<OwnerReference>,
}

impl ChangeEvent {
    pub fn from_resource<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: obj.namespace(),
            name: obj.name_any(),
            owner_references: obj.owner_references().to_vec(),
        }
    }
}

/// Queue key for the managed resource an event concerns, if any
pub fn route(event: &ChangeEvent) -> Option<ObjectKey> {
    let namespace = event.namespace.as_deref()?;
    if let Some(kind) = ResourceKind::from_api(&event.api_version, &event.kind) {
        return Some(ObjectKey::new(kind, namespace, event.name.as_str()));
    }
    event
        .owner_references
        .iter()
        .filter(|owner| owner.controller == Some(true))
        .find_map(|owner| {
            ResourceKind::from_api(&owner.api_version, &owner.kind)
                .map(|kind| ObjectKey::new(kind, namespace, owner.name.as_str()))
        })
}

/// Pull-style stream of change events
#[async_trait]
pub trait EventSource: Send {
    /// `None` once the source is exhausted
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>>;
}

/// Merged kube watchers over the managed kinds and their children
pub struct KubeEventSource {
    events: BoxStream<'static, Result<ChangeEvent>>,
}

impl KubeEventSource {
    /// Watch the enabled managed kinds cluster-wide, plus TaskRuns and
    /// Secrets carrying the managed-by label
    pub fn new(client: Client, training: bool, packaging: bool) -> Self {
        let parents = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let children = parents.clone().labels(MANAGED_BY_SELECTOR);

        let mut streams = Vec::new();
        if training {
            streams.push(watch(Api::<ModelTraining>::all(client.clone()), parents.clone()));
        }
        if packaging {
            streams.push(watch(Api::<ModelPackaging>::all(client.clone()), parents));
        }
        streams.push(watch(Api::<TaskRun>::all(client.clone()), children.clone()));
        streams.push(watch(Api::<Secret>::all(client), children));

        Self {
            events: stream::select_all(streams).boxed(),
        }
    }
}

fn watch<K>(api: Api<K>, config: watcher::Config) -> BoxStream<'static, Result<ChangeEvent>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let kind = K::kind(&()).into_owned();
    watcher(api, config)
        .default_backoff()
        .touched_objects()
        .map(move |res| {
            res.map(|obj| ChangeEvent::from_resource(&obj))
                .map_err(|e| Error::internal_with_context(format!("{kind}: {e}"), "watcher"))
        })
        .boxed()
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>> {
        self.events.next().await
    }
}

/// Feed routed keys from `source` into `queue` until the source ends
pub async fn pump<S: EventSource>(mut source: S, queue: Arc<WorkQueue>) {
    while let Some(event) = source.next_event().await {
        match event {
            Ok(event) => match route(&event) {
                Some(key) => {
                    trace!(key = %key, from = %event.kind, "enqueue");
                    queue.add(key);
                }
                None => trace!(kind = %event.kind, name = %event.name, "no managed owner"),
            },
            // Watchers back off and resume on their own
            Err(e) => warn!(error = %e, "watch stream error"),
        }
    }
    debug!("event source closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use forge_common::retry::RetryConfig;

    fn training_event(name: &str) -> ChangeEvent {
        ChangeEvent {
            api_version: "forge.dev/v1alpha1".to_string(),
            kind: "ModelTraining".to_string(),
            namespace: Some("ns".to_string()),
            name: name.to_string(),
            owner_references: vec![],
        }
    }

    fn child_event(kind: &str, owners: Vec<OwnerReference>) -> ChangeEvent {
        ChangeEvent {
            api_version: "tekton.dev/v1beta1".to_string(),
            kind: kind.to_string(),
            namespace: Some("ns".to_string()),
            name: "child".to_string(),
            owner_references: owners,
        }
    }

    fn owner(api_version: &str, kind: &str, name: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("{name}-uid"),
            controller: Some(controller),
            block_owner_deletion: None,
        }
    }

    #[test]
    fn managed_resource_routes_to_itself() {
        assert_eq!(
            route(&training_event("wine")),
            Some(ObjectKey::new(ResourceKind::Training, "ns", "wine"))
        );
    }

    #[test]
    fn child_routes_to_its_controller() {
        let event = child_event(
            "TaskRun",
            vec![
                owner("forge.dev/v1alpha1", "ModelTraining", "not-controller", false),
                owner("forge.dev/v1alpha1", "ModelPackaging", "pack", true),
            ],
        );
        assert_eq!(
            route(&event),
            Some(ObjectKey::new(ResourceKind::Packaging, "ns", "pack"))
        );
    }

    #[test]
    fn foreign_children_are_ignored() {
        let foreign = child_event(
            "TaskRun",
            vec![owner("tekton.dev/v1beta1", "PipelineRun", "pr", true)],
        );
        assert_eq!(route(&foreign), None);
        assert_eq!(route(&child_event("Secret", vec![])), None);

        let mut cluster_scoped = training_event("wine");
        cluster_scoped.namespace = None;
        assert_eq!(route(&cluster_scoped), None);
    }

    #[test]
    fn event_identity_comes_from_the_resource() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("wine-descriptor".to_string());
        secret.metadata.namespace = Some("ns".to_string());
        secret.metadata.owner_references =
            Some(vec![owner("forge.dev/v1alpha1", "ModelTraining", "wine", true)]);

        let event = ChangeEvent::from_resource(&secret);
        assert_eq!(event.api_version, "v1");
        assert_eq!(event.kind, "Secret");
        assert_eq!(
            route(&event),
            Some(ObjectKey::new(ResourceKind::Training, "ns", "wine"))
        );
    }

    #[tokio::test]
    async fn pump_collapses_bursts_and_survives_errors() {
        let queue = Arc::new(WorkQueue::new(RetryConfig::requeue()));
        let child = child_event(
            "TaskRun",
            vec![owner("forge.dev/v1alpha1", "ModelTraining", "wine", true)],
        );
        let source = ScriptedSource::new([
            Ok(training_event("wine")),
            Err(Error::internal_with_context("stream reset", "watcher")),
            Ok(child.clone()),
            Ok(child),
            Ok(training_event("other")),
        ]);

        pump(source, Arc::clone(&queue)).await;

        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.get().await,
            Some(ObjectKey::new(ResourceKind::Training, "ns", "wine"))
        );
        assert_eq!(
            queue.get().await,
            Some(ObjectKey::new(ResourceKind::Training, "ns", "other"))
        );
    }
}
