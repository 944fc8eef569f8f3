//! Hub client errors

use thiserror::Error;

/// Errors that can occur when talking to the hub
#[derive(Debug, Error)]
pub enum HubError {
    /// Kubernetes client error (transport, TLS, decoding)
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent modification or already-existing record
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Server-side failure worth retrying
    #[error("Hub unavailable: {0}")]
    Unavailable(String),

    /// The hub refused the request (bad request, forbidden, invalid object).
    /// Repeating it unchanged will fail the same way.
    #[error("Rejected by hub: {0}")]
    Rejected(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Config(String),

    /// Invalid request (e.g., missing name)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HubError {
    /// Returns true if the error means the record does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            HubError::NotFound(_) => true,
            HubError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Returns true if repeating the request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            HubError::Kube(kube::Error::Api(response)) => is_transient_status(response.code),
            HubError::Kube(_)
            | HubError::NotFound(_)
            | HubError::Conflict(_)
            | HubError::Unavailable(_) => true,
            HubError::Rejected(_)
            | HubError::Serialization(_)
            | HubError::Config(_)
            | HubError::InvalidRequest(_) => false,
        }
    }

    /// Maps API status codes onto the variants callers branch on.
    pub(crate) fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ref response) => {
                Self::from_status(response.code, &response.message, what.into())
            }
            other => HubError::Kube(other),
        }
    }

    fn from_status(code: u16, message: &str, what: String) -> Self {
        match code {
            404 => HubError::NotFound(what),
            409 => HubError::Conflict(format!("{}: {}", what, message)),
            code if is_transient_status(code) => {
                HubError::Unavailable(format!("{} ({}): {}", what, code, message))
            }
            code => HubError::Rejected(format!("{} ({}): {}", what, code, message)),
        }
    }
}

fn is_transient_status(code: u16) -> bool {
    matches!(code, 404 | 409 | 429) || code >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_map_to_variants() {
        let what = || "WorkStatus c1/x".to_string();
        assert!(matches!(HubError::from_status(404, "gone", what()), HubError::NotFound(_)));
        assert!(matches!(HubError::from_status(409, "modified", what()), HubError::Conflict(_)));
        assert!(matches!(HubError::from_status(429, "slow down", what()), HubError::Unavailable(_)));
        assert!(matches!(HubError::from_status(503, "down", what()), HubError::Unavailable(_)));
        assert!(matches!(HubError::from_status(422, "invalid label", what()), HubError::Rejected(_)));
    }

    #[test]
    fn test_rejected_requests_are_not_transient() {
        for code in [400, 403, 422] {
            let err = HubError::from_status(code, "no", "WorkStatus c1/x".to_string());
            assert!(!err.is_transient(), "{code}");
        }
        for code in [404, 409, 429, 500, 503] {
            let err = HubError::from_status(code, "retry", "WorkStatus c1/x".to_string());
            assert!(err.is_transient(), "{code}");
        }
    }
}
