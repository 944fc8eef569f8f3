//! Hub Client
//!
//! Typed access to the control plane ("hub") for the status agent.
//! Covers the two record kinds the agent touches:
//!
//! - **ManifestWork**: read-only, used for ownership and label propagation
//! - **WorkStatus**: full CRUD, including the status subresource and a
//!   label-only merge patch
//!
//! # Example
//!
//! ```no_run
//! use hub_client::{HubClient, HubClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HubClient::from_kubeconfig("/var/run/hub/kubeconfig").await?;
//! let work = client.get_manifest_work("cluster1", "nginx-work").await?;
//! println!("labels: {:?}", work.metadata.labels);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod hub_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::HubClient;
pub use error::HubError;
pub use hub_trait::HubClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockHubClient;
