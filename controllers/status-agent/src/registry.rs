//! Reference-counted dynamic watches.
//!
//! A watch for a kind runs while at least one tracked object of that kind
//! exists. The registry counts the tracked UIDs per kind: the first
//! `acquire` starts a fresh watch through the [`WatchFactory`], the last
//! `release` cancels it and drops its lister. A stopped watch is never
//! restarted in place; re-acquiring the kind builds a new one.

use crate::keys::ResourceKindKey;
use kube::api::{ApiResource, DynamicObject};
use kube_runtime::reflector::{ObjectRef, Store};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Kinds that never get a watch: (group, kind).
pub const EXCLUDED_KINDS: &[(&str, &str)] = &[
    ("rbac.authorization.k8s.io", "ClusterRoleBinding"),
    ("rbac.authorization.k8s.io", "ClusterRole"),
    ("rbac.authorization.k8s.io", "Role"),
    ("rbac.authorization.k8s.io", "RoleBinding"),
    ("", "Secret"),
    ("", "ConfigMap"),
    ("", "Namespace"),
    ("", "ServiceAccount"),
    ("", "Service"),
];

pub fn is_excluded(group: &str, kind: &str) -> bool {
    EXCLUDED_KINDS.iter().any(|(g, k)| *g == group && *k == kind)
}

/// Read access to a watch's local cache.
pub trait ObjectLister: Send + Sync {
    /// Cached object by namespace and name (empty namespace for
    /// cluster-scoped kinds).
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<DynamicObject>>;
}

/// Lister over a reflector store.
#[derive(Clone)]
pub struct StoreLister {
    store: Store<DynamicObject>,
    resource: ApiResource,
}

impl std::fmt::Debug for StoreLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLister")
            .field("kind", &self.resource.kind)
            .field("cached", &self.store.len())
            .finish()
    }
}

impl StoreLister {
    pub fn new(store: Store<DynamicObject>, resource: ApiResource) -> Self {
        Self { store, resource }
    }
}

impl ObjectLister for StoreLister {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<DynamicObject>> {
        let mut obj_ref = ObjectRef::new_with(name, self.resource.clone());
        if !namespace.is_empty() {
            obj_ref = obj_ref.within(namespace);
        }
        self.store.get(&obj_ref)
    }
}

/// A running watch: its cache, its stop signal and its sync state.
pub struct ActiveWatch {
    pub lister: Arc<dyn ObjectLister>,
    pub cancel: CancellationToken,
    pub task: Option<JoinHandle<()>>,
    /// Turns `true` once the initial list has been loaded.
    pub synced: watch::Receiver<bool>,
}

impl std::fmt::Debug for ActiveWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWatch")
            .field("stopped", &self.cancel.is_cancelled())
            .field("running", &self.task.as_ref().is_some_and(|t| !t.is_finished()))
            .field("synced", &*self.synced.borrow())
            .finish()
    }
}

impl ActiveWatch {
    /// Signals the watch task to stop. The cache goes away with the last
    /// lister handle.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Starts watches; the registry decides when.
pub trait WatchFactory: Send + Sync {
    fn start(&self, resource: &ApiResource) -> ActiveWatch;
}

struct RegistryEntry {
    uids: HashSet<String>,
    watch: ActiveWatch,
}

/// Kind → running watch, alive while any tracked UID of that kind needs it.
pub struct WatchRegistry {
    factory: Arc<dyn WatchFactory>,
    entries: Mutex<HashMap<ResourceKindKey, RegistryEntry>>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("active_kinds", &self.active_kinds())
            .finish()
    }
}

impl WatchRegistry {
    pub fn new(factory: Arc<dyn WatchFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceKindKey, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts `uid` against the kind of `resource`, starting a watch if this
    /// is the first reference. Returns `true` when a watch was started.
    /// Excluded kinds are ignored.
    pub fn acquire(&self, resource: &ApiResource, uid: &str) -> bool {
        if is_excluded(&resource.group, &resource.kind) {
            debug!("Not watching excluded kind {}/{}", resource.group, resource.kind);
            return false;
        }

        let key = ResourceKindKey::from_api_resource(resource);
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&key) {
            entry.uids.insert(uid.to_string());
            return false;
        }

        info!("Starting watch for {}", key);
        let watch = self.factory.start(resource);
        entries.insert(
            key,
            RegistryEntry {
                uids: HashSet::from([uid.to_string()]),
                watch,
            },
        );
        true
    }

    /// Drops `uid`'s reference to `kind`, stopping the watch when none are
    /// left. Returns `true` when a watch was stopped. Releasing a UID the
    /// kind does not hold does nothing.
    pub fn release(&self, kind: &ResourceKindKey, uid: &str) -> bool {
        let stopped = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(kind) else {
                return false;
            };
            if !entry.uids.remove(uid) || !entry.uids.is_empty() {
                return false;
            }
            entries.remove(kind)
        };

        match stopped {
            Some(entry) => {
                info!("Stopping watch for {}", kind);
                entry.watch.stop();
                true
            }
            None => false,
        }
    }

    pub fn lister(&self, kind: &ResourceKindKey) -> Option<Arc<dyn ObjectLister>> {
        self.lock().get(kind).map(|e| Arc::clone(&e.watch.lister))
    }

    /// Number of tracked UIDs holding the watch for `kind`.
    pub fn ref_count(&self, kind: &ResourceKindKey) -> usize {
        self.lock().get(kind).map_or(0, |e| e.uids.len())
    }

    pub fn is_active(&self, kind: &ResourceKindKey) -> bool {
        self.lock().contains_key(kind)
    }

    pub fn active_kinds(&self) -> Vec<ResourceKindKey> {
        let mut kinds: Vec<_> = self.lock().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Stops every watch.
    pub fn shutdown(&self) {
        let entries: Vec<_> = self.lock().drain().collect();
        for (kind, entry) in entries {
            debug!("Stopping watch for {} on shutdown", kind);
            entry.watch.stop();
        }
    }
}
