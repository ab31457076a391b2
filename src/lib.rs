//! Stratum - content-addressed snapshot builds
//!
//! Applies effects (shell commands, file copies, container setups,
//! verification checks) to VM snapshots and caches every result under a
//! digest chained from the parent snapshot, so repeated builds reuse
//! the snapshots they already produced.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod effect;
pub mod error;
pub mod plan;
pub mod provider;
pub mod snapshot;
pub mod ui;

pub use error::{StratumError, StratumResult};
