//! Label keys shared between the hub and the status agent.

use std::collections::BTreeMap;

/// Legacy management label prefix, still honoured for older deployment records.
pub const MANAGED_BY_LABEL_PREFIX: &str = "managed-by.kubestellar.io";

/// Label prefix set by the transport layer on deployment records it owns.
pub const TRANSPORT_LABEL_PREFIX: &str = "transport.kubestellar.io";

/// Object label requesting that its status be reported as an individual record.
pub const SINGLETON_STATUS_LABEL: &str = "managed-by.kubestellar.io/singletonstatus";

/// Returns true if any label key starts with `prefix`.
pub fn has_label_prefix(labels: &BTreeMap<String, String>, prefix: &str) -> bool {
    labels.keys().any(|key| key.starts_with(prefix))
}

/// Returns true if the labels mark a deployment record as managed by this system.
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    has_label_prefix(labels, MANAGED_BY_LABEL_PREFIX) || has_label_prefix(labels, TRANSPORT_LABEL_PREFIX)
}
