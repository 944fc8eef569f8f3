//! WorkStatus
//!
//! One record per tracked object on the managed cluster, kept in the hub
//! namespace named after the cluster. It carries a reference to the source
//! object and an opaque copy of the object's `status`.
//!
//! `statusDetails` sits next to `status` at the top level, which the
//! `CustomResource` derive cannot express, so `kube::Resource` is implemented
//! by hand.

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube::core::TypeMeta;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// API group of `WorkStatus`.
pub const WORK_STATUS_GROUP: &str = "control.kubestellar.io";

/// API version of `WorkStatus`.
pub const WORK_STATUS_VERSION: &str = "v1alpha1";

/// Kind of `WorkStatus`.
pub const WORK_STATUS_KIND: &str = "WorkStatus";

/// Plural resource name of `WorkStatus`.
pub const WORK_STATUS_RESOURCE: &str = "workstatuses";

const MAX_NAME_LENGTH: usize = 253;
const HASH_SUFFIX_LENGTH: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    #[serde(flatten)]
    pub types: Option<TypeMeta>,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: WorkStatusSpec,

    /// Opaque copy of the source object's `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,

    #[serde(default)]
    pub status_details: StatusDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatusSpec {
    pub source_ref: SourceRef,
}

/// Reference to the object whose status is mirrored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Generation-currency bookkeeping. Not yet driven by the agent beyond its
/// initial values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    /// Last source generation that propagated to the cluster, 0 for none
    pub last_generation: i64,

    /// Whether `last_generation` has been applied
    pub last_generation_is_applied: bool,

    /// Time of the last change to either field above, the Unix epoch before any
    pub last_currency_update_time: DateTime<Utc>,
}

impl Default for StatusDetails {
    fn default() -> Self {
        Self {
            last_generation: 0,
            last_generation_is_applied: false,
            last_currency_update_time: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        }
    }
}

impl WorkStatus {
    /// Creates an empty record with type information set.
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            types: Some(TypeMeta {
                api_version: format!("{}/{}", WORK_STATUS_GROUP, WORK_STATUS_VERSION),
                kind: WORK_STATUS_KIND.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: WorkStatusSpec::default(),
            status: None,
            status_details: StatusDetails::default(),
        }
    }
}

impl Resource for WorkStatus {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(WORK_STATUS_KIND)
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(WORK_STATUS_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(WORK_STATUS_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(WORK_STATUS_RESOURCE)
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Builds the status record name for an object.
///
/// The name depends only on the object's kind, namespace and name, so a
/// record can be found again after the object is gone. It is a readable
/// `kind-namespace-name` prefix (characters not valid in a DNS-1123
/// subdomain replaced with `-`, truncated to fit the 253 character limit)
/// followed by a hash of the exact (kind, namespace, name) tuple. The
/// prefix alone is ambiguous once a namespace or name contains `-`.
pub fn status_record_name(kind: &str, namespace: &str, name: &str) -> String {
    let readable = if namespace.is_empty() {
        format!("{}-{}", kind, name)
    } else {
        format!("{}-{}-{}", kind, namespace, name)
    };

    let mut prefix: String = readable
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    prefix.truncate(MAX_NAME_LENGTH - HASH_SUFFIX_LENGTH - 1);
    let prefix = prefix.trim_matches(['-', '.']);

    // NUL never appears in object names
    let hash = fnv1a(format!("{}\0{}\0{}", kind, namespace, name).as_bytes());
    if prefix.is_empty() {
        format!("{:016x}", hash)
    } else {
        format!("{}-{:016x}", prefix, hash)
    }
}

// 64-bit FNV-1a: stable across builds and platforms
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
