//! Watch event ingestion.
//!
//! Every watch (the pinned deployment-record watch and each dynamic per-kind
//! watch) feeds its events through an [`EventIngest`], which keeps the
//! watch's local cache and turns changes into queue keys:
//!
//! - applied objects are queued only when their resourceVersion moved
//! - deleted objects are queued; the key picks up a snapshot because the
//!   cache no longer holds them
//! - during a (re)list, keys are held back until the list completes, and
//!   objects that vanished across the relist are queued as deletions

use crate::keys::{ObjectKey, ResourceKindKey};
use crate::queue::WorkQueue;
use crate::registry::{ActiveWatch, ObjectLister, StoreLister, WatchFactory};
use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject};
use kube::{Api, Client, ResourceExt};
use kube_runtime::reflector::store::Writer;
use kube_runtime::{WatchStreamExt, watcher};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Relist {
    previous: HashSet<(String, String)>,
    pending: Vec<ObjectKey>,
}

/// Cache and queue feeder for one watch.
pub struct EventIngest {
    kind: ResourceKindKey,
    queue: WorkQueue<ObjectKey>,
    writer: Writer<DynamicObject>,
    lister: StoreLister,
    relist: Option<Relist>,
    synced: watch::Sender<bool>,
}

impl std::fmt::Debug for EventIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIngest")
            .field("kind", &self.kind)
            .field("relisting", &self.relist.is_some())
            .finish_non_exhaustive()
    }
}

fn object_id(obj: &DynamicObject) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

impl EventIngest {
    pub fn new(resource: &ApiResource, queue: WorkQueue<ObjectKey>) -> Self {
        let writer = Writer::new(resource.clone());
        let lister = StoreLister::new(writer.as_reader(), resource.clone());
        let (synced, _) = watch::channel(false);
        Self {
            kind: ResourceKindKey::from_api_resource(resource),
            queue,
            writer,
            lister,
            relist: None,
            synced,
        }
    }

    /// Lister over this ingest's cache.
    pub fn lister(&self) -> StoreLister {
        self.lister.clone()
    }

    /// Receiver that turns `true` after the first complete list.
    pub fn subscribe_synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    fn version_changed(&self, obj: &DynamicObject) -> bool {
        let (namespace, name) = object_id(obj);
        match self.lister.get(&namespace, &name) {
            Some(cached) => cached.resource_version() != obj.resource_version(),
            None => true,
        }
    }

    /// Queues `key`. If the cache no longer has the object, the key carries
    /// a deletion snapshot.
    fn enqueue(&self, key: ObjectKey) {
        let key = if self.lister.get(&key.namespace, &key.name).is_none() {
            key.into_deleted()
        } else {
            key
        };
        debug!("Enqueuing {}", key);
        self.queue.add(key);
    }

    pub fn handle(&mut self, event: watcher::Event<DynamicObject>) {
        match &event {
            watcher::Event::Apply(obj) => {
                let changed = self.version_changed(obj);
                self.writer.apply_watcher_event(&event);
                if changed {
                    self.enqueue(ObjectKey::for_object(&self.kind, obj));
                } else {
                    debug!(
                        "{} {} unchanged (resourceVersion {:?}), skipping",
                        self.kind.kind,
                        obj.name_any(),
                        obj.resource_version()
                    );
                }
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.enqueue(ObjectKey::for_object(&self.kind, obj));
            }
            watcher::Event::Init => {
                debug!("Listing {}", self.kind);
                let previous = self
                    .writer
                    .as_reader()
                    .state()
                    .iter()
                    .map(|obj| object_id(obj))
                    .collect();
                self.relist = Some(Relist {
                    previous,
                    pending: Vec::new(),
                });
                self.writer.apply_watcher_event(&event);
            }
            watcher::Event::InitApply(obj) => {
                // The cache still shows the pre-list state until InitDone
                let changed = self.version_changed(obj);
                self.writer.apply_watcher_event(&event);
                let key = ObjectKey::for_object(&self.kind, obj);
                if let Some(relist) = self.relist.as_mut() {
                    relist.previous.remove(&object_id(obj));
                    if changed {
                        relist.pending.push(key);
                    }
                } else if changed {
                    self.enqueue(key);
                }
            }
            watcher::Event::InitDone => {
                self.writer.apply_watcher_event(&event);
                if let Some(relist) = self.relist.take() {
                    debug!(
                        "Listed {}: {} changed, {} gone",
                        self.kind,
                        relist.pending.len(),
                        relist.previous.len()
                    );
                    for key in relist.pending {
                        self.enqueue(key);
                    }
                    for (namespace, name) in relist.previous {
                        self.enqueue(ObjectKey::new(self.kind.clone(), &namespace, &name));
                    }
                }
                if !*self.synced.borrow() {
                    info!("Cache synced for {}", self.kind);
                }
                self.synced.send_replace(true);
            }
        }
    }
}

/// Starts list+watch streams against the managed cluster.
#[derive(Clone)]
pub struct DynamicWatchFactory {
    client: Client,
    queue: WorkQueue<ObjectKey>,
}

impl std::fmt::Debug for DynamicWatchFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicWatchFactory").finish_non_exhaustive()
    }
}

impl DynamicWatchFactory {
    pub fn new(client: Client, queue: WorkQueue<ObjectKey>) -> Self {
        Self { client, queue }
    }
}

impl WatchFactory for DynamicWatchFactory {
    fn start(&self, resource: &ApiResource) -> ActiveWatch {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let mut ingest = EventIngest::new(resource, self.queue.clone());
        let lister: Arc<dyn ObjectLister> = Arc::new(ingest.lister());
        let synced = ingest.subscribe_synced();
        let cancel = CancellationToken::new();
        let kind = ResourceKindKey::from_api_resource(resource);

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            info!("Starting {} watcher", kind);
            let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => ingest.handle(event),
                        Some(Err(e)) => warn!("Watcher stream error for {}: {}", kind, e),
                        None => break,
                    },
                }
            }
            info!("{} watcher stopped", kind);
        });

        ActiveWatch {
            lister,
            cancel,
            task: Some(task),
            synced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::default_controller_rate_limiter;
    use crate::test_utils::{api_resource, dynamic_object};

    fn setup() -> (EventIngest, WorkQueue<ObjectKey>, ApiResource) {
        let resource = api_resource("example.io", "v1", "ConfigThing", "configthings");
        let queue = WorkQueue::new(default_controller_rate_limiter());
        (EventIngest::new(&resource, queue.clone()), queue, resource)
    }

    async fn drain(queue: &WorkQueue<ObjectKey>) -> Vec<ObjectKey> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            if let Some(key) = queue.get().await {
                queue.done(&key);
                keys.push(key);
            }
        }
        keys
    }

    #[tokio::test]
    async fn test_unchanged_resource_version_is_not_enqueued() {
        let (mut ingest, queue, resource) = setup();
        let obj = dynamic_object(&resource, "ns", "cfg", "u1", "1");

        ingest.handle(watcher::Event::Apply(obj.clone()));
        assert_eq!(drain(&queue).await.len(), 1);

        ingest.handle(watcher::Event::Apply(obj));
        assert!(queue.is_empty());

        ingest.handle(watcher::Event::Apply(dynamic_object(&resource, "ns", "cfg", "u1", "2")));
        let keys = drain(&queue).await;
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].is_deleted());
    }

    #[tokio::test]
    async fn test_delete_carries_snapshot() {
        let (mut ingest, queue, resource) = setup();
        let obj = dynamic_object(&resource, "ns", "cfg", "u1", "1");
        ingest.handle(watcher::Event::Apply(obj.clone()));
        drain(&queue).await;

        ingest.handle(watcher::Event::Delete(obj));

        let keys = drain(&queue).await;
        assert_eq!(keys.len(), 1);
        let snapshot = keys[0].deleted.as_ref().unwrap();
        assert_eq!(snapshot.kind, "ConfigThing");
        assert_eq!(snapshot.api_version, "example.io/v1");
        assert_eq!((snapshot.namespace.as_str(), snapshot.name.as_str()), ("ns", "cfg"));
        assert!(ingest.lister().get("ns", "cfg").is_none());
    }

    #[tokio::test]
    async fn test_initial_list_enqueues_after_done() {
        let (mut ingest, queue, resource) = setup();
        let synced = ingest.subscribe_synced();

        ingest.handle(watcher::Event::Init);
        ingest.handle(watcher::Event::InitApply(dynamic_object(&resource, "ns", "a", "u1", "1")));
        ingest.handle(watcher::Event::InitApply(dynamic_object(&resource, "ns", "b", "u2", "1")));
        assert!(queue.is_empty());
        assert!(!*synced.borrow());

        ingest.handle(watcher::Event::InitDone);

        let keys = drain(&queue).await;
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| !k.is_deleted()));
        assert!(*synced.borrow());
        assert!(ingest.lister().get("ns", "a").is_some());
    }

    #[tokio::test]
    async fn test_relist_reports_vanished_objects_as_deleted() {
        let (mut ingest, queue, resource) = setup();
        ingest.handle(watcher::Event::Init);
        ingest.handle(watcher::Event::InitApply(dynamic_object(&resource, "ns", "a", "u1", "1")));
        ingest.handle(watcher::Event::InitApply(dynamic_object(&resource, "ns", "b", "u2", "1")));
        ingest.handle(watcher::Event::InitDone);
        drain(&queue).await;

        // Relist: a unchanged, b gone, c new
        ingest.handle(watcher::Event::Init);
        ingest.handle(watcher::Event::InitApply(dynamic_object(&resource, "ns", "a", "u1", "1")));
        ingest.handle(watcher::Event::InitApply(dynamic_object(&resource, "ns", "c", "u3", "4")));
        ingest.handle(watcher::Event::InitDone);

        let mut keys = drain(&queue).await;
        keys.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "b");
        assert!(keys[0].is_deleted());
        assert_eq!(keys[1].name, "c");
        assert!(!keys[1].is_deleted());
    }

    #[tokio::test]
    async fn test_cluster_scoped_objects() {
        let resource = api_resource("example.io", "v1", "GlobalThing", "globalthings");
        let queue = WorkQueue::new(default_controller_rate_limiter());
        let mut ingest = EventIngest::new(&resource, queue.clone());

        ingest.handle(watcher::Event::Apply(dynamic_object(&resource, "", "g", "u1", "1")));

        let keys = drain(&queue).await;
        assert_eq!(keys[0].namespace, "");
        assert!(!keys[0].is_deleted());
        assert!(ingest.lister().get("", "g").is_some());
    }
}
