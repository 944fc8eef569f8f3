//! In-memory stand-ins for the managed cluster, shared by unit and scenario tests.

use crate::applied_set::AppliedSetTracker;
use crate::backoff::default_controller_rate_limiter;
use crate::config::AgentConfig;
use crate::controller::{Controller, applied_work_resource, process_key};
use crate::discovery::KindResolver;
use crate::error::ControllerError;
use crate::keys::{ObjectKey, ResourceKindKey};
use crate::projector::StatusProjector;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::registry::{ActiveWatch, ObjectLister, WatchFactory, WatchRegistry};
use async_trait::async_trait;
use crds::{AppliedResource, ManifestWork, ManifestWorkSpec};
use hub_client::MockHubClient;
use kube::api::{ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::ResourceExt;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const CLUSTER: &str = "cluster1";

pub fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

pub fn dynamic_object(resource: &ApiResource, namespace: &str, name: &str, uid: &str, resource_version: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, resource).data(json!({}));
    if !namespace.is_empty() {
        obj = obj.within(namespace);
    }
    obj.metadata.uid = Some(uid.to_string());
    obj.metadata.resource_version = Some(resource_version.to_string());
    obj
}

pub fn with_status(mut obj: DynamicObject, status: Value) -> DynamicObject {
    let mut data = obj.data.as_object().cloned().unwrap_or_default();
    data.insert("status".to_string(), status);
    obj.data = Value::Object(data);
    obj
}

pub fn with_labels(mut obj: DynamicObject, labels: &[(&str, &str)]) -> DynamicObject {
    obj.labels_mut()
        .extend(labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));
    obj
}

pub fn applied_resource(resource: &ApiResource, namespace: &str, name: &str, uid: &str) -> AppliedResource {
    AppliedResource {
        group: resource.group.clone(),
        version: resource.version.clone(),
        resource: resource.plural.clone(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
    }
}

/// AppliedManifestWork as the dynamic watch would deliver it.
pub fn applied_work(name: &str, manifest_work: &str, resources: &[AppliedResource]) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &applied_work_resource()).data(json!({
        "spec": {"hubHash": "hash", "agentID": "agent", "manifestWorkName": manifest_work},
        "status": {"appliedResources": resources},
    }));
    obj.metadata.uid = Some(format!("{}-uid", name));
    obj
}

/// ManifestWork labelled the way the transport layer labels its records.
pub fn managed_manifest_work(namespace: &str, name: &str, uid: &str) -> ManifestWork {
    let mut work = ManifestWork::new(name, ManifestWorkSpec::default());
    work.metadata.namespace = Some(namespace.to_string());
    work.metadata.uid = Some(uid.to_string());
    work.metadata.labels = Some(BTreeMap::from([(
        "transport.kubestellar.io/originOwnerReferenceBindingKey".to_string(),
        "binding-1".to_string(),
    )]));
    work
}

/// Cache backed by a map.
#[derive(Debug, Default)]
pub struct MemoryLister {
    objects: Mutex<HashMap<(String, String), Arc<DynamicObject>>>,
}

impl MemoryLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, obj: DynamicObject) {
        let id = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects.lock().unwrap().insert(id, Arc::new(obj));
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.objects.lock().unwrap().remove(&(namespace.to_string(), name.to_string()));
    }
}

impl ObjectLister for MemoryLister {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<DynamicObject>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

struct FakeWatch {
    kind: ResourceKindKey,
    cancel: CancellationToken,
    lister: Arc<MemoryLister>,
}

/// Watch factory that hands out empty in-memory caches and records starts.
#[derive(Default)]
pub struct FakeWatchFactory {
    watches: Mutex<Vec<FakeWatch>>,
}

impl FakeWatchFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self, kind: &ResourceKindKey) -> usize {
        self.watches.lock().unwrap().iter().filter(|w| &w.kind == kind).count()
    }

    /// Whether the most recent watch for `kind` has been stopped.
    pub fn is_stopped(&self, kind: &ResourceKindKey) -> bool {
        self.watches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|w| &w.kind == kind)
            .is_some_and(|w| w.cancel.is_cancelled())
    }

    /// Cache of the most recent watch for `kind`.
    pub fn lister(&self, kind: &ResourceKindKey) -> Option<Arc<MemoryLister>> {
        self.watches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|w| &w.kind == kind)
            .map(|w| Arc::clone(&w.lister))
    }
}

impl WatchFactory for FakeWatchFactory {
    fn start(&self, resource: &ApiResource) -> ActiveWatch {
        let lister = Arc::new(MemoryLister::new());
        let cancel = CancellationToken::new();
        self.watches.lock().unwrap().push(FakeWatch {
            kind: ResourceKindKey::from_api_resource(resource),
            cancel: cancel.clone(),
            lister: Arc::clone(&lister),
        });
        let (_, synced) = watch::channel(true);
        ActiveWatch {
            lister,
            cancel,
            task: None,
            synced,
        }
    }
}

/// Resolver over a fixed list of API resources.
#[derive(Debug, Default)]
pub struct StaticResolver {
    resources: Vec<ApiResource>,
}

impl StaticResolver {
    pub fn new(resources: Vec<ApiResource>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl KindResolver for StaticResolver {
    async fn resource_for_gvr(&self, group: &str, version: &str, resource: &str) -> Result<ApiResource, ControllerError> {
        self.resources
            .iter()
            .find(|ar| ar.group == group && ar.version == version && ar.plural == resource)
            .cloned()
            .ok_or_else(|| ControllerError::Discovery(format!("{}/{}, Resource={}", group, version, resource)))
    }

    async fn resource_for_gvk(&self, kind: &ResourceKindKey) -> Result<ApiResource, ControllerError> {
        self.resources
            .iter()
            .find(|ar| ResourceKindKey::from_api_resource(ar) == *kind)
            .cloned()
            .ok_or_else(|| ControllerError::Discovery(kind.to_string()))
    }
}

/// Reconciler wired to fakes, with helpers that play the part of the watches.
pub struct Harness {
    pub reconciler: Arc<Reconciler>,
    pub registry: Arc<WatchRegistry>,
    pub tracker: Arc<AppliedSetTracker>,
    pub factory: Arc<FakeWatchFactory>,
    pub hub: MockHubClient,
    pub queue: WorkQueue<ObjectKey>,
    pub works: Arc<MemoryLister>,
    never_synced: watch::Sender<bool>,
}

impl Harness {
    /// `resources` are the kinds discovery knows about. The hub holds one
    /// managed ManifestWork per name used by the tests (`work1`, `work2`).
    pub fn new(resources: Vec<ApiResource>) -> Self {
        let hub = MockHubClient::new();
        hub.add_manifest_work(managed_manifest_work(CLUSTER, "work1", "mw-uid-1"));
        hub.add_manifest_work(managed_manifest_work(CLUSTER, "work2", "mw-uid-2"));

        let resolver: Arc<dyn KindResolver> = Arc::new(StaticResolver::new(resources));
        let factory = Arc::new(FakeWatchFactory::new());
        let registry = Arc::new(WatchRegistry::new(factory.clone()));
        let tracker = Arc::new(AppliedSetTracker::new());
        let queue = WorkQueue::new(default_controller_rate_limiter());
        let works = Arc::new(MemoryLister::new());
        let projector = StatusProjector::new(
            Arc::new(hub.clone()),
            Arc::clone(&resolver),
            CLUSTER.to_string(),
            Duration::from_secs(5),
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            resolver,
            projector,
            queue.clone(),
            Self::work_kind(),
            works.clone(),
        ));
        let (never_synced, _) = watch::channel(false);

        Self {
            reconciler,
            registry,
            tracker,
            factory,
            hub,
            queue,
            works,
            never_synced,
        }
    }

    pub fn work_kind() -> ResourceKindKey {
        ResourceKindKey::from_api_resource(&applied_work_resource())
    }

    pub fn work_key(name: &str) -> ObjectKey {
        ObjectKey::new(Self::work_kind(), "", name)
    }

    fn config(workers: usize, cache_sync_timeout: Duration) -> AgentConfig {
        AgentConfig {
            hub_kubeconfig: "/dev/null".to_string(),
            cluster_name: CLUSTER.to_string(),
            addon_name: "status".to_string(),
            workers,
            hub_request_timeout: Duration::from_secs(5),
            cache_sync_timeout,
        }
    }

    /// Controller over this harness with a synced deployment-record cache.
    pub fn controller(&self, workers: usize) -> Controller {
        let (_, synced) = watch::channel(true);
        self.controller_with(workers, Duration::from_secs(5), synced)
    }

    /// Controller whose deployment-record cache never syncs.
    pub fn unsynced_controller(&self, cache_sync_timeout: Duration) -> Controller {
        self.controller_with(1, cache_sync_timeout, self.never_synced.subscribe())
    }

    fn controller_with(&self, workers: usize, cache_sync_timeout: Duration, synced: watch::Receiver<bool>) -> Controller {
        let work_watch = ActiveWatch {
            lister: self.works.clone(),
            cancel: CancellationToken::new(),
            task: None,
            synced,
        };
        Controller::from_parts(
            Self::config(workers, cache_sync_timeout),
            self.queue.clone(),
            Arc::clone(&self.reconciler),
            Arc::clone(&self.registry),
            work_watch,
        )
    }

    /// Deployment record created or updated.
    pub fn apply_work(&self, work: DynamicObject) {
        let key = Self::work_key(&work.name_any());
        self.works.insert(work);
        self.queue.add(key);
    }

    /// Deployment record deleted.
    pub fn delete_work(&self, name: &str) {
        self.works.remove("", name);
        self.queue.add(Self::work_key(name).into_deleted());
    }

    /// Object of a watched kind created or updated.
    pub fn apply_object(&self, kind: &ResourceKindKey, obj: DynamicObject) {
        let key = ObjectKey::for_object(kind, &obj);
        self.factory
            .lister(kind)
            .unwrap_or_else(|| panic!("no watch for {}", kind))
            .insert(obj);
        self.queue.add(key);
    }

    /// Object of a watched kind deleted.
    pub fn delete_object(&self, kind: &ResourceKindKey, namespace: &str, name: &str) {
        if let Some(lister) = self.factory.lister(kind) {
            lister.remove(namespace, name);
        }
        self.queue.add(ObjectKey::new(kind.clone(), namespace, name).into_deleted());
    }

    /// Processes queued keys until none are immediately available.
    pub async fn run_until_idle(&self) {
        while !self.queue.is_empty() {
            if let Some(key) = self.queue.get().await {
                process_key(&self.queue, &self.reconciler, &key).await;
            }
        }
    }
}
