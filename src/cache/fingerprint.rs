//! Chained content digests
//!
//! A snapshot built by applying an effect to a parent is keyed by
//! `sha256(parent ‖ 0x00 ‖ identity)`. Chaining the parent digest makes each
//! key cover the full history of effects that produced the snapshot.

use sha2::{Digest, Sha256};

/// Number of hex characters shown by [`short`]
const SHORT_LEN: usize = 12;

/// Compute the digest of `effect_identity` applied on top of `parent_digest`
///
/// Returns 64 lowercase hex characters. The separator byte keeps
/// `("ab", "c")` and `("a", "bc")` apart.
pub fn fingerprint(parent_digest: &str, effect_identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_digest.as_bytes());
    hasher.update([0u8]);
    hasher.update(effect_identity.as_bytes());
    hex::encode(hasher.finalize())
}

/// Abbreviated digest for display
///
/// Custom digests are arbitrary strings, so the cut is made on a char boundary.
pub fn short(digest: &str) -> &str {
    digest
        .char_indices()
        .nth(SHORT_LEN)
        .map_or(digest, |(end, _)| &digest[..end])
}
