//! AppliedManifestWork
//!
//! Written by the work agent on the managed cluster. Lists every object
//! applied on behalf of one hub `ManifestWork`, including the object UIDs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by `ManifestWork` and `AppliedManifestWork`.
pub const WORK_GROUP: &str = "work.open-cluster-management.io";

/// API version shared by `ManifestWork` and `AppliedManifestWork`.
pub const WORK_VERSION: &str = "v1";

/// Plural resource name of `AppliedManifestWork`.
pub const APPLIED_MANIFEST_WORK_RESOURCE: &str = "appliedmanifestworks";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "AppliedManifestWork",
    status = "AppliedManifestWorkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AppliedManifestWorkSpec {
    /// Hash of the hub the work came from
    #[serde(default)]
    pub hub_hash: String,

    /// Identity of the work agent that applied the work
    #[serde(default, rename = "agentID")]
    pub agent_id: String,

    /// Name of the `ManifestWork` on the hub
    #[serde(default)]
    pub manifest_work_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedManifestWorkStatus {
    /// Objects currently applied on the managed cluster
    #[serde(default)]
    pub applied_resources: Vec<AppliedResource>,
}

/// One applied object, identified by resource coordinates and UID.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResource {
    /// API group (empty for the core group)
    #[serde(default)]
    pub group: String,

    /// API version
    #[serde(default)]
    pub version: String,

    /// Plural resource name
    #[serde(default)]
    pub resource: String,

    /// Namespace (empty for cluster-scoped objects)
    #[serde(default)]
    pub namespace: String,

    /// Object name
    #[serde(default)]
    pub name: String,

    /// Object UID on the managed cluster
    #[serde(default)]
    pub uid: String,
}

impl AppliedManifestWork {
    /// Applied resources reported in status, empty when status is not yet set.
    pub fn applied_resources(&self) -> &[AppliedResource] {
        self.status
            .as_ref()
            .map(|s| s.applied_resources.as_slice())
            .unwrap_or_default()
    }
}
