//! Snapshot and instance records
//!
//! Plain data shared by the registry, the sandbox backends and the cache
//! engine. Nothing in here talks to a backend.

pub mod metadata;
pub mod model;

pub use metadata::{Metadata, MetadataUpdate};
pub use model::{
    Endpoint, ExecOutput, InstanceInfo, InstanceStatus, ResourceSpec, Snapshot, SnapshotStatus,
};
