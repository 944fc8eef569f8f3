//! Status Agent Record Definitions
//!
//! Types for the records the status agent reads and writes:
//! - `AppliedManifestWork`: what the work agent applied on the managed cluster
//! - `ManifestWork`: the hub-side deployment record (read-only here)
//! - `WorkStatus`: the per-object status record the agent maintains on the hub

pub mod applied_manifest_work;
pub mod labels;
pub mod manifest_work;
pub mod work_status;

pub use applied_manifest_work::*;
pub use labels::*;
pub use manifest_work::*;
pub use work_status::*;
