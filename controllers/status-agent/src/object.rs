//! Accessors for schema-less objects.
//!
//! Watched objects arrive as `DynamicObject`s. Metadata goes through
//! `kube::ResourceExt`; the helpers here cover the rest.

use crds::AppliedManifestWork;
use kube::api::DynamicObject;
use serde_json::Value;

/// The object's `status` sub-document, if it has one.
pub fn status(obj: &DynamicObject) -> Option<&Value> {
    obj.data.get("status").filter(|v| !v.is_null())
}

pub fn is_being_deleted(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

/// Value of `key` in the object's labels.
pub fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata.labels.as_ref()?.get(key).map(String::as_str)
}

/// Reads a deployment record out of a dynamic object.
pub fn to_applied_manifest_work(obj: &DynamicObject) -> Result<AppliedManifestWork, serde_json::Error> {
    let value = serde_json::to_value(obj)?;
    serde_json::from_value(value)
}
