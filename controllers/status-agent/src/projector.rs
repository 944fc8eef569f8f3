//! Writes WorkStatus records on the hub.
//!
//! One record per tracked object, named by [`status_record_name`]. Creation
//! copies ownership and labels from the hub ManifestWork; afterwards only
//! the individual-status label (merge patch) and the status subresource are
//! written, so edits others make to the record are left alone.

use crate::applied_set::TrackedOwner;
use crate::discovery::KindResolver;
use crate::error::ControllerError;
use crate::keys::ResourceKindKey;
use crate::object;
use crds::{SINGLETON_STATUS_LABEL, SourceRef, WorkStatus, is_managed, status_record_name};
use hub_client::{HubClientTrait, HubError};
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct StatusProjector {
    hub: Arc<dyn HubClientTrait>,
    resolver: Arc<dyn KindResolver>,
    /// Hub namespace for this cluster's records
    cluster_name: String,
    timeout: Duration,
}

impl std::fmt::Debug for StatusProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusProjector")
            .field("cluster_name", &self.cluster_name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StatusProjector {
    pub fn new(
        hub: Arc<dyn HubClientTrait>,
        resolver: Arc<dyn KindResolver>,
        cluster_name: String,
        timeout: Duration,
    ) -> Self {
        Self {
            hub,
            resolver,
            cluster_name,
            timeout,
        }
    }

    async fn call<T, F>(&self, what: String, fut: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, HubError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ControllerError::HubTimeout(what)),
        }
    }

    async fn get_record(&self, name: &str) -> Result<Option<WorkStatus>, ControllerError> {
        let result = self
            .call(
                format!("get WorkStatus {}/{}", self.cluster_name, name),
                self.hub.get_work_status(&self.cluster_name, name),
            )
            .await;
        match result {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deletes the record for an object. A missing record is fine.
    pub async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let record_name = status_record_name(kind, namespace, name);
        if self.get_record(&record_name).await?.is_none() {
            debug!("No WorkStatus {} for deleted {} {}/{}", record_name, kind, namespace, name);
            return Ok(());
        }

        let result = self
            .call(
                format!("delete WorkStatus {}/{}", self.cluster_name, record_name),
                self.hub.delete_work_status(&self.cluster_name, &record_name),
            )
            .await;
        match result {
            Ok(()) => {
                info!("Deleted WorkStatus {}/{}", self.cluster_name, record_name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Brings the record for a live tracked object up to date, creating it
    /// first if needed.
    pub async fn sync(
        &self,
        obj: &DynamicObject,
        kind: &ResourceKindKey,
        owner: &TrackedOwner,
    ) -> Result<(), ControllerError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let record_name = status_record_name(&kind.kind, &namespace, &name);

        let record = match self.get_record(&record_name).await? {
            Some(record) => record,
            None => match self.create(obj, kind, owner, &record_name).await? {
                Some(record) => record,
                None => return Ok(()),
            },
        };

        let record = self.sync_singleton_label(obj, record).await?;
        self.sync_status(obj, record).await
    }

    /// Creates the record. Returns `None` when the owning ManifestWork is not
    /// managed by this system.
    async fn create(
        &self,
        obj: &DynamicObject,
        kind: &ResourceKindKey,
        owner: &TrackedOwner,
        record_name: &str,
    ) -> Result<Option<WorkStatus>, ControllerError> {
        let manifest_work = self
            .call(
                format!("get ManifestWork {}/{}", self.cluster_name, owner.manifest_work),
                self.hub.get_manifest_work(&self.cluster_name, &owner.manifest_work),
            )
            .await?;

        let mut labels = manifest_work.labels().clone();
        if !is_managed(&labels) {
            debug!(
                "ManifestWork {} is not managed, skipping {} {}",
                owner.manifest_work,
                kind.kind,
                obj.name_any()
            );
            return Ok(None);
        }
        if let Some(value) = object::label(obj, SINGLETON_STATUS_LABEL) {
            labels.insert(SINGLETON_STATUS_LABEL.to_string(), value.to_string());
        }

        let resource = self.resolver.resource_for_gvk(kind).await?;

        let mut record = WorkStatus::new(record_name, &self.cluster_name);
        record.metadata.labels = Some(labels);
        record.metadata.owner_references = manifest_work.controller_owner_ref(&()).map(|r| vec![r]);
        record.spec.source_ref = SourceRef {
            group: kind.group.clone(),
            version: kind.version.clone(),
            resource: resource.plural,
            kind: kind.kind.clone(),
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
        };

        let created = self
            .call(
                format!("create WorkStatus {}/{}", self.cluster_name, record_name),
                self.hub.create_work_status(&self.cluster_name, &record),
            )
            .await?;
        info!("Created WorkStatus {}/{}", self.cluster_name, record_name);
        Ok(Some(created))
    }

    async fn sync_singleton_label(&self, obj: &DynamicObject, record: WorkStatus) -> Result<WorkStatus, ControllerError> {
        let Some(value) = object::label(obj, SINGLETON_STATUS_LABEL) else {
            return Ok(record);
        };
        if record.labels().get(SINGLETON_STATUS_LABEL).map(String::as_str) == Some(value) {
            return Ok(record);
        }

        let record_name = record.name_any();
        let patch = BTreeMap::from([(SINGLETON_STATUS_LABEL.to_string(), value.to_string())]);
        debug!("Patching {} label on WorkStatus {}", SINGLETON_STATUS_LABEL, record_name);
        self.call(
            format!("patch WorkStatus {}/{}", self.cluster_name, record_name),
            self.hub.patch_work_status_labels(&self.cluster_name, &record_name, &patch),
        )
        .await
    }

    async fn sync_status(&self, obj: &DynamicObject, mut record: WorkStatus) -> Result<(), ControllerError> {
        let Some(status) = object::status(obj) else {
            debug!("{} has no status yet", obj.name_any());
            return Ok(());
        };
        if record.status.as_ref() == Some(status) {
            debug!("WorkStatus {} already up to date", record.name_any());
            return Ok(());
        }

        let record_name = record.name_any();
        record.status = Some(status.clone());
        self.call(
            format!("update WorkStatus {}/{} status", self.cluster_name, record_name),
            self.hub.update_work_status_status(&self.cluster_name, &record),
        )
        .await?;
        debug!("Updated status of WorkStatus {}/{}", self.cluster_name, record_name);
        Ok(())
    }
}
