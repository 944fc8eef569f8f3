//! ManifestWork
//!
//! The hub-side deployment record. The status agent only reads its metadata:
//! labels decide whether an object is managed, and the record becomes the
//! controller owner of every `WorkStatus` it produces.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Workload manifests, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<serde_json::Value>,

    /// Delete options, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<serde_json::Value>,
}
