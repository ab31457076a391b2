//! Content-addressed snapshot build cache
//!
//! Every effect applied to a snapshot is keyed by a digest chained from the
//! parent snapshot's digest and the effect identity. A snapshot already
//! carrying that digest is reused; otherwise the effect is built once in a
//! throwaway instance and the result is captured under the digest.
//!
//! # Build sequence on a miss
//!
//! | Stage | Call | On failure |
//! |-------|------|------------|
//! | Lookup | `Registry::list_snapshots_by_digest` | no instance exists |
//! | Start | `Sandbox::start_from_snapshot` | no instance exists |
//! | Ready | `Instance::wait_until_ready` | instance stopped |
//! | Effect | `Effect::apply` | instance stopped, nothing captured |
//! | Capture | `Instance::capture_snapshot` | instance stopped |

pub mod engine;
pub mod fingerprint;

pub use engine::{ApplyOutcome, EffectCache};
pub use fingerprint::{fingerprint, short};
