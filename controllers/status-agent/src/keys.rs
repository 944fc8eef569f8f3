//! Identity model for watched kinds and queued objects.

use kube::api::{ApiResource, DynamicObject};
use std::fmt;

/// Identity of a watchable resource type: (group, version, kind).
///
/// Displayed as `group/version, Kind=Kind` (core group: `/v1, Kind=Secret`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKindKey {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKindKey {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn from_api_resource(resource: &ApiResource) -> Self {
        Self::new(&resource.group, &resource.version, &resource.kind)
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceKindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Identity of an object whose deletion was observed, kept because the live
/// copy is gone by the time the key is processed. No spec, no status.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeletedSnapshot {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Work queue key: which object of which kind needs reconciling.
///
/// `deleted` is set only when the enqueue-time lookup found the object gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ResourceKindKey,
    pub namespace: String,
    pub name: String,
    pub deleted: Option<DeletedSnapshot>,
}

impl ObjectKey {
    pub fn new(kind: ResourceKindKey, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            deleted: None,
        }
    }

    /// Key for an object delivered by the watch of `kind`.
    pub fn for_object(kind: &ResourceKindKey, obj: &DynamicObject) -> Self {
        Self::new(
            kind.clone(),
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            obj.metadata.name.as_deref().unwrap_or_default(),
        )
    }

    /// Attaches a deletion snapshot built from the key itself.
    pub fn into_deleted(mut self) -> Self {
        self.deleted = Some(DeletedSnapshot {
            api_version: self.kind.api_version(),
            kind: self.kind.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        });
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind.kind, self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_key_display() {
        assert_eq!(ResourceKindKey::new("", "v1", "Secret").to_string(), "/v1, Kind=Secret");
        assert_eq!(
            ResourceKindKey::new("apps", "v1", "Deployment").to_string(),
            "apps/v1, Kind=Deployment"
        );
    }

    #[test]
    fn test_api_version() {
        assert_eq!(ResourceKindKey::new("", "v1", "Pod").api_version(), "v1");
        assert_eq!(ResourceKindKey::new("apps", "v1", "Deployment").api_version(), "apps/v1");
    }

    #[test]
    fn test_deleted_snapshot_is_identity_only() {
        let key = ObjectKey::new(ResourceKindKey::new("apps", "v1", "Deployment"), "web", "nginx").into_deleted();
        assert_eq!(
            key.deleted,
            Some(DeletedSnapshot {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                namespace: "web".to_string(),
                name: "nginx".to_string(),
            })
        );
    }

    #[test]
    fn test_snapshot_changes_key_identity() {
        let live = ObjectKey::new(ResourceKindKey::new("", "v1", "Pod"), "ns", "p");
        let deleted = live.clone().into_deleted();
        assert_ne!(live, deleted);
        assert!(deleted.is_deleted());
    }

    #[test]
    fn test_key_display() {
        let kind = ResourceKindKey::new("example.io", "v1", "Global");
        assert_eq!(ObjectKey::new(kind.clone(), "", "g").to_string(), "Global g");
        assert_eq!(ObjectKey::new(kind, "ns", "g").to_string(), "Global ns/g");
    }
}
