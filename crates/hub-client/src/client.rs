//! Hub client backed by a `kube::Client`.

use crate::error::HubError;
use crate::hub_trait::HubClientTrait;
use crds::{ManifestWork, WorkStatus};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use tracing::debug;

/// Client for the hub cluster
#[derive(Clone)]
pub struct HubClient {
    client: Client,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient").finish_non_exhaustive()
    }
}

impl HubClient {
    /// Wraps an existing Kubernetes client pointed at the hub.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from a kubeconfig file, using its current context.
    pub async fn from_kubeconfig(path: &str) -> Result<Self, HubError> {
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| HubError::Config(format!("failed to read {}: {}", path, e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| HubError::Config(format!("failed to load {}: {}", path, e)))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn work_statuses(&self, namespace: &str) -> Api<WorkStatus> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn manifest_works(&self, namespace: &str) -> Api<ManifestWork> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn record_name(work_status: &WorkStatus) -> Result<&str, HubError> {
    work_status
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| HubError::InvalidRequest("WorkStatus has no name".to_string()))
}

#[async_trait::async_trait]
impl HubClientTrait for HubClient {
    async fn get_manifest_work(&self, namespace: &str, name: &str) -> Result<ManifestWork, HubError> {
        self.manifest_works(namespace)
            .get(name)
            .await
            .map_err(|e| HubError::from_kube(e, format!("ManifestWork {}/{}", namespace, name)))
    }

    async fn get_work_status(&self, namespace: &str, name: &str) -> Result<WorkStatus, HubError> {
        self.work_statuses(namespace)
            .get(name)
            .await
            .map_err(|e| HubError::from_kube(e, format!("WorkStatus {}/{}", namespace, name)))
    }

    async fn create_work_status(&self, namespace: &str, work_status: &WorkStatus) -> Result<WorkStatus, HubError> {
        let name = record_name(work_status)?;
        debug!("Creating WorkStatus {}/{}", namespace, name);
        Ok(self
            .work_statuses(namespace)
            .create(&PostParams::default(), work_status)
            .await?)
    }

    async fn delete_work_status(&self, namespace: &str, name: &str) -> Result<(), HubError> {
        debug!("Deleting WorkStatus {}/{}", namespace, name);
        self.work_statuses(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| HubError::from_kube(e, format!("WorkStatus {}/{}", namespace, name)))
    }

    async fn patch_work_status_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<WorkStatus, HubError> {
        let patch = serde_json::json!({
            "metadata": {
                "labels": labels
            }
        });
        self.work_statuses(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| HubError::from_kube(e, format!("WorkStatus {}/{}", namespace, name)))
    }

    async fn update_work_status_status(&self, namespace: &str, work_status: &WorkStatus) -> Result<WorkStatus, HubError> {
        let name = record_name(work_status)?;
        let data = serde_json::to_vec(work_status)?;
        self.work_statuses(namespace)
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| HubError::from_kube(e, format!("WorkStatus {}/{}", namespace, name)))
    }
}
