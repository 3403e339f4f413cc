//! API server access behind traits
//!
//! The reconciler talks to the cluster only through these traits. The kube
//! implementations below are what the operator wires up; tests use the
//! in-memory fake in `testing` or mockall mocks.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use forge_common::crd::{Connection, ConnectionSpec};
use forge_common::{Error, Result, MANAGED_BY_LABEL, OPERATOR_NAME};

/// Namespaced Kubernetes object the generic stores can handle
pub trait KubeObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> KubeObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Read, create and delete objects of one kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// `Ok(None)` when the object does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Fails with `Error::AlreadyExists` when the name is taken
    async fn create(&self, obj: &K) -> Result<K>;

    /// Fails with `Error::NotFound` when there is nothing to delete
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Write the status subresource under optimistic concurrency
#[async_trait]
pub trait StatusStore<K>: Send + Sync {
    /// Fails with `Error::Conflict` when `obj` carries a stale resourceVersion
    async fn replace_status(&self, obj: &K) -> Result<K>;
}

/// Look up connection specs by name
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// `Error::NotFound` for unknown names, `Error::Forbidden` when access is denied
    async fn resolve(&self, name: &str) -> Result<ConnectionSpec>;
}

/// Side channel the result step writes job results into
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResultsSink: Send + Sync {
    /// Create the holder for `job` if it does not exist yet
    async fn ensure(&self, namespace: &str, job: &str, owner: OwnerReference) -> Result<()>;

    /// Current results; empty when nothing was written
    async fn read(&self, namespace: &str, job: &str) -> Result<BTreeMap<String, String>>;

    /// Merge `results` into the holder
    async fn persist(
        &self,
        namespace: &str,
        job: &str,
        results: &BTreeMap<String, String>,
    ) -> Result<()>;
}

// =============================================================================
// Kubernetes implementations
// =============================================================================

/// Generic store backed by `Api<K>`
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: KubeObject> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn identity<K: KubeObject>(obj: &K) -> Result<(&str, &str)> {
    let meta = obj.meta();
    let kind = K::kind(&());
    let name = meta
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context(format!("{kind} without name"), "store"))?;
    let namespace = meta.namespace.as_deref().ok_or_else(|| {
        Error::internal_with_context(format!("{kind} '{name}' without namespace"), "store")
    })?;
    Ok((namespace, name))
}

#[async_trait]
impl<K: KubeObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, &K::kind(&()), name))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let params = PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        };
        self.api(namespace)
            .create(&params, obj)
            .await
            .map_err(|e| Error::from_kube(e, &K::kind(&()), name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &K::kind(&()), name))
    }
}

#[async_trait]
impl<K: KubeObject> StatusStore<K> for KubeStore<K> {
    async fn replace_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let data = serde_json::to_vec(obj)?;
        self.api(namespace)
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| Error::from_kube(e, &K::kind(&()), name))
    }
}

/// Resolves connections from `Connection` resources in one namespace
pub struct KubeConnectionResolver {
    api: Api<Connection>,
}

impl KubeConnectionResolver {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ConnectionResolver for KubeConnectionResolver {
    async fn resolve(&self, name: &str) -> Result<ConnectionSpec> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "Connection", name))?
            .map(|c| c.spec)
            .ok_or_else(|| Error::not_found("Connection", name))
    }
}

/// Results holder stored as a ConfigMap named `<job>-result`
pub struct ConfigMapResultsSink {
    client: Client,
}

impl ConfigMapResultsSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResultsSink for ConfigMapResultsSink {
    async fn ensure(&self, namespace: &str, job: &str, owner: OwnerReference) -> Result<()> {
        let name = forge_pipeline::results_name(job);
        let api = self.api(namespace);
        if api
            .get_opt(&name)
            .await
            .map_err(|e| Error::from_kube(e, "ConfigMap", &name))?
            .is_some()
        {
            return Ok(());
        }

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    OPERATOR_NAME.to_string(),
                )])),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => {
                debug!(configmap = %name, "created results holder");
                Ok(())
            }
            Err(e) => match Error::from_kube(e, "ConfigMap", &name) {
                Error::AlreadyExists { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn read(&self, namespace: &str, job: &str) -> Result<BTreeMap<String, String>> {
        let name = forge_pipeline::results_name(job);
        Ok(self
            .api(namespace)
            .get_opt(&name)
            .await
            .map_err(|e| Error::from_kube(e, "ConfigMap", &name))?
            .and_then(|cm| cm.data)
            .unwrap_or_default())
    }

    async fn persist(
        &self,
        namespace: &str,
        job: &str,
        results: &BTreeMap<String, String>,
    ) -> Result<()> {
        let name = forge_pipeline::results_name(job);
        let patch = json!({ "data": results });
        self.api(namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, "ConfigMap", &name))
    }
}
