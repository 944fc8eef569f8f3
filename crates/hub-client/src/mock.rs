//! Mock HubClient for unit testing
//!
//! Stores records in memory so agent tests can run without a hub cluster.
//! Resource versions are bumped on every write and checked on status
//! updates, like the API server does.

use crate::error::HubError;
use crate::hub_trait::HubClientTrait;
use crds::{ManifestWork, WorkStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type RecordKey = (String, String);

/// Mock HubClient for testing
#[derive(Clone, Default)]
pub struct MockHubClient {
    manifest_works: Arc<Mutex<HashMap<RecordKey, ManifestWork>>>,
    work_statuses: Arc<Mutex<HashMap<RecordKey, WorkStatus>>>,
    next_version: Arc<AtomicU64>,
    fail_writes: Arc<AtomicBool>,
    write_delay_ms: Arc<AtomicU64>,
    status_updates: Arc<AtomicUsize>,
    label_patches: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHubClient").finish_non_exhaustive()
    }
}

fn key(namespace: &str, name: &str) -> RecordKey {
    (namespace.to_string(), name.to_string())
}

impl MockHubClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ManifestWork to the mock store (for test setup)
    pub fn add_manifest_work(&self, work: ManifestWork) {
        let namespace = work.metadata.namespace.clone().unwrap_or_default();
        let name = work.metadata.name.clone().unwrap_or_default();
        self.manifest_works.lock().unwrap().insert(key(&namespace, &name), work);
    }

    /// Add a WorkStatus to the mock store (for test setup)
    pub fn add_work_status(&self, mut work_status: WorkStatus) {
        let namespace = work_status.metadata.namespace.clone().unwrap_or_default();
        let name = work_status.metadata.name.clone().unwrap_or_default();
        work_status.metadata.resource_version = Some(self.bump_version());
        self.work_statuses.lock().unwrap().insert(key(&namespace, &name), work_status);
    }

    /// Snapshot of a stored WorkStatus
    pub fn work_status(&self, namespace: &str, name: &str) -> Option<WorkStatus> {
        self.work_statuses.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// All stored WorkStatus records in a namespace
    pub fn work_statuses(&self, namespace: &str) -> Vec<WorkStatus> {
        self.work_statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, ws)| ws.clone())
            .collect()
    }

    /// Make every write fail with a server error until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every write wait this long before it is applied, like a slow or
    /// hung API server
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of successful status subresource updates
    pub fn status_update_count(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }

    /// Number of successful label patches
    pub fn label_patch_count(&self) -> usize {
        self.label_patches.load(Ordering::SeqCst)
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    async fn before_write(&self) -> Result<(), HubError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HubError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HubClientTrait for MockHubClient {
    async fn get_manifest_work(&self, namespace: &str, name: &str) -> Result<ManifestWork, HubError> {
        self.manifest_works
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| HubError::NotFound(format!("ManifestWork {}/{}", namespace, name)))
    }

    async fn get_work_status(&self, namespace: &str, name: &str) -> Result<WorkStatus, HubError> {
        self.work_status(namespace, name)
            .ok_or_else(|| HubError::NotFound(format!("WorkStatus {}/{}", namespace, name)))
    }

    async fn create_work_status(&self, namespace: &str, work_status: &WorkStatus) -> Result<WorkStatus, HubError> {
        self.before_write().await?;
        let name = work_status.metadata.name.clone().unwrap_or_default();
        let mut stored = work_status.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.bump_version());

        let mut records = self.work_statuses.lock().unwrap();
        if records.contains_key(&key(namespace, &name)) {
            return Err(HubError::Conflict(format!("WorkStatus {}/{} already exists", namespace, name)));
        }
        records.insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn delete_work_status(&self, namespace: &str, name: &str) -> Result<(), HubError> {
        self.before_write().await?;
        self.work_statuses
            .lock()
            .unwrap()
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| HubError::NotFound(format!("WorkStatus {}/{}", namespace, name)))
    }

    async fn patch_work_status_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<WorkStatus, HubError> {
        self.before_write().await?;
        let version = self.bump_version();
        let mut records = self.work_statuses.lock().unwrap();
        let record = records
            .get_mut(&key(namespace, name))
            .ok_or_else(|| HubError::NotFound(format!("WorkStatus {}/{}", namespace, name)))?;
        record
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        record.metadata.resource_version = Some(version);
        self.label_patches.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    async fn update_work_status_status(&self, namespace: &str, work_status: &WorkStatus) -> Result<WorkStatus, HubError> {
        self.before_write().await?;
        let name = work_status.metadata.name.clone().unwrap_or_default();
        let version = self.bump_version();
        let mut records = self.work_statuses.lock().unwrap();
        let record = records
            .get_mut(&key(namespace, &name))
            .ok_or_else(|| HubError::NotFound(format!("WorkStatus {}/{}", namespace, name)))?;
        if work_status.metadata.resource_version.is_some()
            && work_status.metadata.resource_version != record.metadata.resource_version
        {
            return Err(HubError::Conflict(format!("WorkStatus {}/{} has been modified", namespace, name)));
        }
        // Only the status subresource is written.
        record.status = work_status.status.clone();
        record.metadata.resource_version = Some(version);
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }
}
