//! Controller-specific error types.
//!
//! `is_retryable` is what the workers use to choose between putting a key
//! back with backoff and forgetting it.

use hub_client::HubError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the status agent.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Managed-cluster API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Hub API error
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// A hub call did not finish in time
    #[error("Hub request timed out: {0}")]
    HubTimeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No active watch (and so no lister) for a kind
    #[error("Lister not found for {0}")]
    ListerNotFound(String),

    /// Kind/resource mapping failed
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Queue key that cannot name an object
    #[error("Invalid queue key: {0}")]
    InvalidKey(String),

    /// Object that cannot be read as the expected record
    #[error("Malformed object: {0}")]
    Malformed(String),

    /// Watch cache did not sync at startup
    #[error("Cache sync failed: {0}")]
    CacheSync(String),
}

impl ControllerError {
    /// True for a hub 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Hub(err) if err.is_not_found())
    }

    /// Transient remote-call failures are retried with backoff; everything
    /// else is logged and dropped.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Kube(_) | ControllerError::HubTimeout(_) => true,
            ControllerError::Hub(err) => err.is_transient(),
            ControllerError::InvalidConfig(_)
            | ControllerError::ListerNotFound(_)
            | ControllerError::Discovery(_)
            | ControllerError::InvalidKey(_)
            | ControllerError::Malformed(_)
            | ControllerError::CacheSync(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failures_are_retryable() {
        assert!(ControllerError::HubTimeout("get workstatus".to_string()).is_retryable());
        assert!(ControllerError::Hub(HubError::NotFound("manifestwork c1/w".to_string())).is_retryable());
        assert!(ControllerError::Hub(HubError::Conflict("workstatus c1/x".to_string())).is_retryable());
        assert!(ControllerError::Hub(HubError::Unavailable("503".to_string())).is_retryable());
    }

    #[test]
    fn test_local_failures_are_dropped() {
        assert!(!ControllerError::ListerNotFound("apps/v1, Kind=Deployment".to_string()).is_retryable());
        assert!(!ControllerError::Discovery("no resource for Kind=Thing".to_string()).is_retryable());
        assert!(!ControllerError::InvalidKey("empty name".to_string()).is_retryable());
        assert!(!ControllerError::Hub(HubError::InvalidRequest("missing name".to_string())).is_retryable());
        assert!(!ControllerError::Hub(HubError::Rejected("WorkStatus c1/x (422): invalid label".to_string())).is_retryable());
    }
}
