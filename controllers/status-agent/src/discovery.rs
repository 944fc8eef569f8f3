//! Kind ↔ resource mapping for the managed cluster.
//!
//! Deployment records name their objects by (group, version, resource);
//! watches and status records need the kind. Both directions go through a
//! cached API discovery document, refreshed once on a miss so kinds from
//! CRDs installed after startup are found.

use crate::error::ControllerError;
use crate::keys::ResourceKindKey;
use async_trait::async_trait;
use kube::Client;
use kube::api::ApiResource;
use kube::discovery::Discovery;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Resolves API resources by resource name or by kind.
#[async_trait]
pub trait KindResolver: Send + Sync {
    /// Looks up (group, version, plural resource).
    async fn resource_for_gvr(&self, group: &str, version: &str, resource: &str) -> Result<ApiResource, ControllerError>;

    /// Looks up (group, version, kind).
    async fn resource_for_gvk(&self, kind: &ResourceKindKey) -> Result<ApiResource, ControllerError>;
}

/// [`KindResolver`] backed by the API server's discovery endpoints.
pub struct DiscoveryResolver {
    client: Client,
    cache: RwLock<Option<Arc<Discovery>>>,
}

impl std::fmt::Debug for DiscoveryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryResolver").finish_non_exhaustive()
    }
}

impl DiscoveryResolver {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(None),
        }
    }

    /// Runs discovery and replaces the cached document.
    pub async fn refresh(&self) -> Result<Arc<Discovery>, ControllerError> {
        debug!("Running API discovery");
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| ControllerError::Discovery(format!("API discovery failed: {}", e)))?;
        let discovery = Arc::new(discovery);
        *self.cache.write().await = Some(Arc::clone(&discovery));
        info!("API discovery found {} groups", discovery.groups().count());
        Ok(discovery)
    }

    async fn cached(&self) -> Result<Arc<Discovery>, ControllerError> {
        if let Some(discovery) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(discovery));
        }
        self.refresh().await
    }

    /// Tries the cached document, then a fresh one.
    async fn find<F>(&self, what: &str, matches: F) -> Result<ApiResource, ControllerError>
    where
        F: Fn(&Discovery) -> Option<ApiResource> + Send + Sync,
    {
        if let Some(ar) = matches(&*self.cached().await?) {
            return Ok(ar);
        }
        debug!("{} not in cached discovery, refreshing", what);
        matches(&*self.refresh().await?)
            .ok_or_else(|| ControllerError::Discovery(format!("no API resource for {}", what)))
    }
}

fn find_by_resource(discovery: &Discovery, group: &str, version: &str, resource: &str) -> Option<ApiResource> {
    discovery
        .get(group)?
        .versioned_resources(version)
        .into_iter()
        .map(|(ar, _)| ar)
        .find(|ar| ar.plural == resource)
}

fn find_by_kind(discovery: &Discovery, kind: &ResourceKindKey) -> Option<ApiResource> {
    discovery
        .get(&kind.group)?
        .versioned_resources(&kind.version)
        .into_iter()
        .map(|(ar, _)| ar)
        .find(|ar| ar.kind == kind.kind)
}

#[async_trait]
impl KindResolver for DiscoveryResolver {
    async fn resource_for_gvr(&self, group: &str, version: &str, resource: &str) -> Result<ApiResource, ControllerError> {
        let what = format!("{}/{}, Resource={}", group, version, resource);
        self.find(&what, |d| find_by_resource(d, group, version, resource)).await
    }

    async fn resource_for_gvk(&self, kind: &ResourceKindKey) -> Result<ApiResource, ControllerError> {
        self.find(&kind.to_string(), |d| find_by_kind(d, kind)).await
    }
}
