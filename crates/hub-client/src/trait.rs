//! HubClient trait for mocking
//!
//! The concrete `HubClient` implements this trait; tests use `MockHubClient`.

use crate::error::HubError;
use crds::{ManifestWork, WorkStatus};
use std::collections::BTreeMap;

/// Trait for hub operations used by the status agent
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait HubClientTrait: Send + Sync {
    // ManifestWork (read-only)
    async fn get_manifest_work(&self, namespace: &str, name: &str) -> Result<ManifestWork, HubError>;

    // WorkStatus
    async fn get_work_status(&self, namespace: &str, name: &str) -> Result<WorkStatus, HubError>;
    async fn create_work_status(&self, namespace: &str, work_status: &WorkStatus) -> Result<WorkStatus, HubError>;
    async fn delete_work_status(&self, namespace: &str, name: &str) -> Result<(), HubError>;

    /// Merge-patches only the given labels, leaving every other label untouched.
    async fn patch_work_status_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<WorkStatus, HubError>;

    /// Replaces the status subresource. The record's resource version is sent
    /// along, so a concurrent modification surfaces as a conflict.
    async fn update_work_status_status(&self, namespace: &str, work_status: &WorkStatus) -> Result<WorkStatus, HubError>;
}
