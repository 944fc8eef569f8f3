//! Reconciliation logic.
//!
//! A dequeued key resolves to a live object from its kind's lister or to
//! the deletion snapshot it carries. Deployment records drive the applied-set
//! diff and, through it, watch acquire/release. Every other object is
//! projected to the hub if a deployment record tracks it.

use crate::applied_set::{AppliedSet, AppliedSetTracker};
use crate::discovery::KindResolver;
use crate::error::ControllerError;
use crate::keys::{DeletedSnapshot, ObjectKey, ResourceKindKey};
use crate::object;
use crate::projector::StatusProjector;
use crate::queue::WorkQueue;
use crate::registry::{ObjectLister, WatchRegistry};
use kube::ResourceExt;
use kube::api::DynamicObject;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing more to do for this key
    Done,
    /// A precondition has not materialized yet; try again with backoff
    Requeue,
}

enum Resolved<'a> {
    Live(Arc<DynamicObject>),
    Deleted(&'a DeletedSnapshot),
}

/// Reconciler for work queue keys.
pub struct Reconciler {
    registry: Arc<WatchRegistry>,
    tracker: Arc<AppliedSetTracker>,
    resolver: Arc<dyn KindResolver>,
    projector: StatusProjector,
    queue: WorkQueue<ObjectKey>,
    /// Kind of the deployment records
    work_kind: ResourceKindKey,
    work_lister: Arc<dyn ObjectLister>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("work_kind", &self.work_kind)
            .field("tracked", &self.tracker.tracked_count())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        registry: Arc<WatchRegistry>,
        tracker: Arc<AppliedSetTracker>,
        resolver: Arc<dyn KindResolver>,
        projector: StatusProjector,
        queue: WorkQueue<ObjectKey>,
        work_kind: ResourceKindKey,
        work_lister: Arc<dyn ObjectLister>,
    ) -> Self {
        Self {
            registry,
            tracker,
            resolver,
            projector,
            queue,
            work_kind,
            work_lister,
        }
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ControllerError> {
        if key.name.is_empty() {
            return Err(ControllerError::InvalidKey(format!("{} key without a name", key.kind)));
        }

        let Some(resolved) = self.resolve(key)? else {
            debug!("{} no longer exists, dropping stale event", key);
            return Ok(Action::Done);
        };

        if key.kind == self.work_kind {
            return match resolved {
                Resolved::Live(work) => self.reconcile_applied_work(&work).await,
                Resolved::Deleted(snapshot) => {
                    self.applied_work_deleted(&snapshot.name).await;
                    Ok(Action::Done)
                }
            };
        }

        match resolved {
            Resolved::Deleted(snapshot) => {
                debug!("Reconciling deleted {}", key);
                self.projector
                    .delete(&snapshot.kind, &snapshot.namespace, &snapshot.name)
                    .await?;
            }
            Resolved::Live(obj) => {
                let uid = obj.uid().unwrap_or_default();
                match self.tracker.owner_of(&uid) {
                    Some(owner) => {
                        debug!("Reconciling {} (owned by {})", key, owner.applied_work);
                        self.projector.sync(&obj, &key.kind, &owner).await?;
                    }
                    None if key.is_deleted() => {
                        // Still exists but no longer tracked
                        debug!("{} is no longer tracked, removing its status", key);
                        self.projector.delete(&key.kind.kind, &key.namespace, &key.name).await?;
                    }
                    None => debug!("{} is not tracked, ignoring", key),
                }
            }
        }
        Ok(Action::Done)
    }

    /// Prefers the live object; falls back to the key's snapshot.
    fn resolve<'a>(&self, key: &'a ObjectKey) -> Result<Option<Resolved<'a>>, ControllerError> {
        let lister = if key.kind == self.work_kind {
            Some(Arc::clone(&self.work_lister))
        } else {
            self.registry.lister(&key.kind)
        };

        match (lister, key.deleted.as_ref()) {
            (Some(lister), snapshot) => Ok(match lister.get(&key.namespace, &key.name) {
                Some(obj) => Some(Resolved::Live(obj)),
                None => snapshot.map(Resolved::Deleted),
            }),
            (None, Some(snapshot)) => Ok(Some(Resolved::Deleted(snapshot))),
            (None, None) => Err(ControllerError::ListerNotFound(key.kind.to_string())),
        }
    }

    async fn reconcile_applied_work(&self, obj: &DynamicObject) -> Result<Action, ControllerError> {
        let name = obj.name_any();
        let work = object::to_applied_manifest_work(obj)
            .map_err(|e| ControllerError::Malformed(format!("AppliedManifestWork {}: {}", name, e)))?;

        let applied = AppliedSet::from_resources(work.applied_resources());
        if applied.is_empty() && !object::is_being_deleted(obj) {
            debug!("AppliedManifestWork {} has no applied resources yet, requeueing", name);
            return Ok(Action::Requeue);
        }

        let changes = self.tracker.replace(&name, &work.spec.manifest_work_name, applied);
        if changes.is_empty() {
            debug!("AppliedManifestWork {} unchanged", name);
            return Ok(Action::Done);
        }

        info!(
            "Reconciling AppliedManifestWork {}: {} added, {} removed",
            name,
            changes.added.len(),
            changes.removed.len()
        );
        self.start_tracking(&changes.added).await;
        self.stop_tracking(&changes.removed).await;
        Ok(Action::Done)
    }

    async fn applied_work_deleted(&self, name: &str) {
        match self.tracker.remove(name) {
            Some(applied) => {
                info!("AppliedManifestWork {} deleted, releasing {} objects", name, applied.len());
                self.stop_tracking(&applied).await;
            }
            None => debug!("AppliedManifestWork {} deleted, nothing tracked", name),
        }
    }

    async fn start_tracking(&self, added: &AppliedSet) {
        for entry in added.entries() {
            let resource = match self
                .resolver
                .resource_for_gvr(&entry.group, &entry.version, &entry.resource)
                .await
            {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("Cannot watch {}/{}: {}", entry.namespace, entry.name, e);
                    continue;
                }
            };

            self.registry.acquire(&resource, &entry.uid);
            // An already-running watch will not report the object again
            self.queue.add(ObjectKey::new(
                ResourceKindKey::from_api_resource(&resource),
                &entry.namespace,
                &entry.name,
            ));
        }
    }

    async fn stop_tracking(&self, removed: &AppliedSet) {
        for entry in removed.entries() {
            let resource = match self
                .resolver
                .resource_for_gvr(&entry.group, &entry.version, &entry.resource)
                .await
            {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("Cannot release watch for {}/{}: {}", entry.namespace, entry.name, e);
                    continue;
                }
            };

            let kind = ResourceKindKey::from_api_resource(&resource);
            self.registry.release(&kind, &entry.uid);
            self.queue
                .add(ObjectKey::new(kind, &entry.namespace, &entry.name).into_deleted());
        }
    }
}
