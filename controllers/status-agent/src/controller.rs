//! Main controller implementation.
//!
//! Wires the managed-cluster watches, the work queue, the reconciler and
//! the hub client together, and runs the worker pool until shutdown.

use crate::applied_set::AppliedSetTracker;
use crate::backoff::default_controller_rate_limiter;
use crate::config::AgentConfig;
use crate::discovery::DiscoveryResolver;
use crate::error::ControllerError;
use crate::keys::{ObjectKey, ResourceKindKey};
use crate::projector::StatusProjector;
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};
use crate::registry::{ActiveWatch, WatchFactory, WatchRegistry};
use crate::watcher::DynamicWatchFactory;
use crds::AppliedManifestWork;
use hub_client::HubClient;
use kube::Client;
use kube::api::ApiResource;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// API resource of the deployment records, watched for the agent's lifetime.
pub fn applied_work_resource() -> ApiResource {
    ApiResource::erase::<AppliedManifestWork>(&())
}

/// Main controller for the status agent.
pub struct Controller {
    config: AgentConfig,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<Reconciler>,
    registry: Arc<WatchRegistry>,
    work_watch: ActiveWatch,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: AgentConfig) -> Result<Self, ControllerError> {
        info!("Initializing status agent for cluster {}", config.cluster_name);

        let kube_client = Client::try_default().await?;
        let hub = HubClient::from_kubeconfig(&config.hub_kubeconfig).await?;

        let resolver = Arc::new(DiscoveryResolver::new(kube_client.clone()));
        resolver.refresh().await?;

        let queue = WorkQueue::new(default_controller_rate_limiter());
        let factory = DynamicWatchFactory::new(kube_client, queue.clone());

        // Started once, never handed to the registry
        let work_resource = applied_work_resource();
        let work_watch = factory.start(&work_resource);

        let registry = Arc::new(WatchRegistry::new(Arc::new(factory)));
        let projector = StatusProjector::new(
            Arc::new(hub),
            resolver.clone(),
            config.cluster_name.clone(),
            config.hub_request_timeout,
        );
        let reconciler = Reconciler::new(
            Arc::clone(&registry),
            Arc::new(AppliedSetTracker::new()),
            resolver,
            projector,
            queue.clone(),
            ResourceKindKey::from_api_resource(&work_resource),
            Arc::clone(&work_watch.lister),
        );

        Ok(Self::from_parts(config, queue, Arc::new(reconciler), registry, work_watch))
    }

    /// Assembles a controller from already-built components.
    pub fn from_parts(
        config: AgentConfig,
        queue: WorkQueue<ObjectKey>,
        reconciler: Arc<Reconciler>,
        registry: Arc<WatchRegistry>,
        work_watch: ActiveWatch,
    ) -> Self {
        Self {
            config,
            queue,
            reconciler,
            registry,
            work_watch,
        }
    }

    /// Runs the controller until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let mut synced = self.work_watch.synced.clone();
        info!("Waiting for AppliedManifestWork cache to sync");
        let waited = tokio::time::timeout(self.config.cache_sync_timeout, synced.wait_for(|s| *s))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => info!("AppliedManifestWork cache synced"),
            Ok(Err(_)) => {
                return Err(ControllerError::CacheSync("AppliedManifestWork watch ended before syncing".to_string()));
            }
            Err(_) => {
                self.work_watch.stop();
                return Err(ControllerError::CacheSync(format!(
                    "AppliedManifestWork cache not synced after {:?}",
                    self.config.cache_sync_timeout
                )));
            }
        }

        info!("Starting {} workers", self.config.workers);
        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                let queue = self.queue.clone();
                let reconciler = Arc::clone(&self.reconciler);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_worker(id, queue, reconciler, shutdown).await })
            })
            .collect();

        info!("Status agent running");
        shutdown.cancelled().await;

        info!("Shutting down status agent");
        self.queue.shut_down();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker panicked: {}", e);
            }
        }
        self.registry.shutdown();
        self.work_watch.stop();
        Ok(())
    }
}

/// Pulls keys off the queue until shutdown.
pub async fn run_worker(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<Reconciler>,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", id);
    loop {
        let key = tokio::select! {
            () = shutdown.cancelled() => break,
            key = queue.get() => match key {
                Some(key) => key,
                None => break,
            },
        };

        tokio::select! {
            () = shutdown.cancelled() => {
                queue.done(&key);
                break;
            }
            () = process_key(&queue, &reconciler, &key) => {}
        }
    }
    debug!("Worker {} stopped", id);
}

/// Reconciles one key and settles it in the queue.
pub async fn process_key(queue: &WorkQueue<ObjectKey>, reconciler: &Reconciler, key: &ObjectKey) {
    match reconciler.reconcile(key).await {
        Ok(Action::Done) => queue.forget(key),
        Ok(Action::Requeue) => {
            debug!("Requeueing {}", key);
            queue.add_rate_limited(key.clone());
        }
        Err(e) if e.is_retryable() => {
            error!("Reconciliation failed for {} (retry {}): {}", key, queue.num_requeues(key), e);
            queue.add_rate_limited(key.clone());
        }
        Err(e) => {
            warn!("Dropping {}: {}", key, e);
            queue.forget(key);
        }
    }
    queue.done(key);
}
