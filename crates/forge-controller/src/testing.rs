//! In-memory fake cluster for reconciler tests
//!
//! Emulates the API server behaviour the engine depends on: resourceVersion
//! optimistic concurrency on status writes, AlreadyExists on create and
//! NotFound on delete. Every write is counted so tests can assert exact
//! write patterns.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::events::EventType;
use kube::Resource;

use forge_common::config::PipelineConfig;
use forge_common::crd::{
    ConnectionSpec, ModelPackaging, ModelTraining, PackagingIntegration, ToolchainIntegration,
};
use forge_common::{Error, Result};
use forge_pipeline::TaskRun;

use crate::events::EventPublisher;
use crate::managed::ManagedResource;
use crate::reconciler::Context;
use crate::store::{ConnectionResolver, KubeObject, ObjectStore, ResultsSink, StatusStore};
use crate::watch::{ChangeEvent, EventSource};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

struct StoreState<K> {
    objects: BTreeMap<(String, String), K>,
    version: u64,
    gets: usize,
    creates: usize,
    deletes: usize,
    status_writes: usize,
    pending_conflicts: u32,
    hide_next_get: bool,
    lose_next_delete: bool,
    linger_deletes: bool,
    fail_reads: bool,
}

/// Object store for one kind
pub struct MemoryStore<K> {
    state: Mutex<StoreState<K>>,
}

impl<K: KubeObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                objects: BTreeMap::new(),
                version: 0,
                gets: 0,
                creates: 0,
                deletes: 0,
                status_writes: 0,
                pending_conflicts: 0,
                hide_next_get: false,
                lose_next_delete: false,
                linger_deletes: false,
                fail_reads: false,
            }),
        }
    }

    fn key(obj: &K) -> (String, String) {
        let meta = obj.meta();
        (
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    fn stamp(state: &mut StoreState<K>, obj: &mut K) {
        state.version += 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(state.version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", state.version));
        }
    }

    /// Seed an object without counting a write
    pub fn insert(&self, mut obj: K) {
        let mut state = lock(&self.state);
        Self::stamp(&mut state, &mut obj);
        state.objects.insert(Self::key(&obj), obj);
    }

    /// Modify a stored object the way another writer would
    pub fn update(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) {
        let mut state = lock(&self.state);
        let key = (namespace.to_string(), name.to_string());
        if let Some(mut obj) = state.objects.remove(&key) {
            f(&mut obj);
            Self::stamp(&mut state, &mut obj);
            state.objects.insert(key, obj);
        }
    }

    /// Current object, without counting a read
    pub fn peek(&self, namespace: &str, name: &str) -> Option<K> {
        lock(&self.state)
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).objects.len()
    }

    pub fn creates(&self) -> usize {
        lock(&self.state).creates
    }

    pub fn deletes(&self) -> usize {
        lock(&self.state).deletes
    }

    pub fn status_writes(&self) -> usize {
        lock(&self.state).status_writes
    }

    /// Every mutating call that reached the store
    pub fn writes(&self) -> usize {
        let state = lock(&self.state);
        state.creates + state.deletes + state.status_writes
    }

    /// Make the next `n` status writes lose a race with another writer
    pub fn inject_conflicts(&self, n: u32) {
        lock(&self.state).pending_conflicts = n;
    }

    /// Next `get` misses, as if the object appeared right after the read
    pub fn hide_next_get(&self) {
        lock(&self.state).hide_next_get = true;
    }

    /// Next `delete` finds the object already removed by someone else
    pub fn fail_next_delete_with_not_found(&self) {
        lock(&self.state).lose_next_delete = true;
    }

    /// Accepted deletes leave the object in place, like a child held by a
    /// finalizer
    pub fn linger_deletes(&self, linger: bool) {
        lock(&self.state).linger_deletes = linger;
    }

    /// Make every `get` fail until switched off
    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }
}

#[async_trait]
impl<K: KubeObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let mut state = lock(&self.state);
        state.gets += 1;
        if state.fail_reads {
            return Err(Error::internal_with_context(
                format!("{} '{name}' unreadable", K::kind(&())),
                "memory store",
            ));
        }
        if std::mem::take(&mut state.hide_next_get) {
            return Ok(None);
        }
        Ok(state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let mut state = lock(&self.state);
        let key = Self::key(obj);
        if state.objects.contains_key(&key) {
            return Err(Error::already_exists(K::kind(&()), key.1));
        }
        let mut created = obj.clone();
        Self::stamp(&mut state, &mut created);
        state.creates += 1;
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let key = (namespace.to_string(), name.to_string());
        if std::mem::take(&mut state.lose_next_delete) {
            state.objects.remove(&key);
            return Err(Error::not_found(K::kind(&()), name));
        }
        if state.linger_deletes && state.objects.contains_key(&key) {
            state.deletes += 1;
            return Ok(());
        }
        match state.objects.remove(&key) {
            Some(_) => {
                state.deletes += 1;
                Ok(())
            }
            None => Err(Error::not_found(K::kind(&()), name)),
        }
    }
}

#[async_trait]
impl<K: KubeObject> StatusStore<K> for MemoryStore<K> {
    async fn replace_status(&self, obj: &K) -> Result<K> {
        let mut state = lock(&self.state);
        let key = Self::key(obj);
        let kind = K::kind(&());

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            if let Some(mut stored) = state.objects.remove(&key) {
                Self::stamp(&mut state, &mut stored);
                state.objects.insert(key.clone(), stored);
            }
            return Err(Error::conflict(kind, key.1));
        }

        let Some(stored) = state.objects.get(&key) else {
            return Err(Error::not_found(kind, key.1));
        };
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(Error::conflict(kind, key.1));
        }

        // Spec and status are not separated; callers only change status
        let mut written = obj.clone();
        Self::stamp(&mut state, &mut written);
        state.status_writes += 1;
        state.objects.insert(key, written.clone());
        Ok(written)
    }
}

/// Results holders keyed by (namespace, job)
#[derive(Default)]
pub struct MemoryResultsSink {
    holders: Mutex<BTreeMap<(String, String), BTreeMap<String, String>>>,
    creates: Mutex<usize>,
    fail_reads: Mutex<bool>,
}

impl MemoryResultsSink {
    pub fn creates(&self) -> usize {
        *lock(&self.creates)
    }

    pub fn exists(&self, namespace: &str, job: &str) -> bool {
        lock(&self.holders).contains_key(&(namespace.to_string(), job.to_string()))
    }

    pub fn fail_reads(&self, fail: bool) {
        *lock(&self.fail_reads) = fail;
    }
}

#[async_trait]
impl ResultsSink for MemoryResultsSink {
    async fn ensure(&self, namespace: &str, job: &str, _owner: OwnerReference) -> Result<()> {
        let mut holders = lock(&self.holders);
        let key = (namespace.to_string(), job.to_string());
        if !holders.contains_key(&key) {
            holders.insert(key, BTreeMap::new());
            *lock(&self.creates) += 1;
        }
        Ok(())
    }

    async fn read(&self, namespace: &str, job: &str) -> Result<BTreeMap<String, String>> {
        if *lock(&self.fail_reads) {
            return Err(Error::internal_with_context("results holder unreadable", "test"));
        }
        Ok(lock(&self.holders)
            .get(&(namespace.to_string(), job.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn persist(
        &self,
        namespace: &str,
        job: &str,
        results: &BTreeMap<String, String>,
    ) -> Result<()> {
        lock(&self.holders)
            .entry((namespace.to_string(), job.to_string()))
            .or_default()
            .extend(results.clone());
        Ok(())
    }
}

/// Connection lookup with optional access denial per name
#[derive(Default)]
pub struct MemoryConnections {
    specs: Mutex<BTreeMap<String, ConnectionSpec>>,
    forbidden: Mutex<Vec<String>>,
}

impl MemoryConnections {
    pub fn insert(&self, name: &str, spec: ConnectionSpec) {
        lock(&self.specs).insert(name.to_string(), spec);
    }

    pub fn forbid(&self, name: &str) {
        lock(&self.forbidden).push(name.to_string());
    }
}

#[async_trait]
impl ConnectionResolver for MemoryConnections {
    async fn resolve(&self, name: &str) -> Result<ConnectionSpec> {
        if lock(&self.forbidden).iter().any(|n| n == name) {
            return Err(Error::forbidden(format!(
                "access to connection '{name}' denied: decrypt token mismatch"
            )));
        }
        lock(&self.specs)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Connection", name))
    }
}

/// Keeps every published event as (type, reason)
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        lock(&self.events).iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn warnings(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|(t, _)| matches!(t, EventType::Warning))
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        lock(&self.events).push((type_, reason.to_string()));
    }
}

/// Every store a reconciler touches, shared between contexts
pub struct FakeCluster {
    pub trainings: Arc<MemoryStore<ModelTraining>>,
    pub packagings: Arc<MemoryStore<ModelPackaging>>,
    pub toolchains: Arc<MemoryStore<ToolchainIntegration>>,
    pub packagers: Arc<MemoryStore<PackagingIntegration>>,
    pub task_runs: Arc<MemoryStore<TaskRun>>,
    pub secrets: Arc<MemoryStore<Secret>>,
    pub pods: Arc<MemoryStore<Pod>>,
    pub connections: Arc<MemoryConnections>,
    pub results: Arc<MemoryResultsSink>,
    pub events: Arc<RecordingEvents>,
    pub config: Arc<PipelineConfig>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            trainings: Arc::new(MemoryStore::new()),
            packagings: Arc::new(MemoryStore::new()),
            toolchains: Arc::new(MemoryStore::new()),
            packagers: Arc::new(MemoryStore::new()),
            task_runs: Arc::new(MemoryStore::new()),
            secrets: Arc::new(MemoryStore::new()),
            pods: Arc::new(MemoryStore::new()),
            connections: Arc::new(MemoryConnections::default()),
            results: Arc::new(MemoryResultsSink::default()),
            events: Arc::new(RecordingEvents::default()),
            config: Arc::new(PipelineConfig::default()),
        }
    }

    fn context<K: ManagedResource>(
        &self,
        store: Arc<MemoryStore<K>>,
        integrations: Arc<MemoryStore<K::Integration>>,
    ) -> Context<K> {
        Context {
            resources: store.clone(),
            statuses: store,
            integrations,
            task_runs: self.task_runs.clone(),
            secrets: self.secrets.clone(),
            pods: self.pods.clone(),
            connections: self.connections.clone(),
            results: self.results.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
        }
    }

    pub fn training_context(&self) -> Context<ModelTraining> {
        self.context(self.trainings.clone(), self.toolchains.clone())
    }

    pub fn packaging_context(&self) -> Context<ModelPackaging> {
        self.context(self.packagings.clone(), self.packagers.clone())
    }

    /// Writes across every store and the results sink
    pub fn writes(&self) -> usize {
        self.trainings.writes()
            + self.packagings.writes()
            + self.task_runs.writes()
            + self.secrets.writes()
            + self.results.creates()
    }
}

/// Replays a fixed list of events, then ends
pub struct ScriptedSource {
    events: VecDeque<Result<ChangeEvent>>,
}

impl ScriptedSource {
    pub fn new(events: impl IntoIterator<Item = Result<ChangeEvent>>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>> {
        self.events.pop_front()
    }
}
