//! Key-value metadata attached to snapshots and instances
//!
//! Backends disagree on whether a metadata write replaces or extends the
//! existing map, so every write states its mode through `MetadataUpdate`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered string map attached to snapshots and instances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert or overwrite a single key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a key, returning its old value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Copy every entry of `other` into this map; keys in `other` win
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply an update in place
    pub fn apply(&mut self, update: &MetadataUpdate) {
        match update {
            MetadataUpdate::Merge(incoming) => self.merge(incoming),
            MetadataUpdate::Replace(incoming) => *self = incoming.clone(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A metadata write together with its merge semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    /// Keep existing keys, overwrite the ones present in the update
    Merge(Metadata),
    /// Discard the existing map
    Replace(Metadata),
}

impl MetadataUpdate {
    /// The entries carried by the update
    pub fn entries(&self) -> &Metadata {
        match self {
            Self::Merge(m) | Self::Replace(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_and_preserves() {
        let mut base: Metadata = [("owner", "ci"), ("stage", "base")].into_iter().collect();
        let incoming: Metadata = [("stage", "app")].into_iter().collect();

        base.merge(&incoming);

        assert_eq!(base.get("owner"), Some("ci"));
        assert_eq!(base.get("stage"), Some("app"));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn replace_discards_existing() {
        let mut base: Metadata = [("owner", "ci")].into_iter().collect();
        let incoming: Metadata = [("stage", "app")].into_iter().collect();

        base.apply(&MetadataUpdate::Replace(incoming.clone()));

        assert_eq!(base, incoming);
        assert!(base.get("owner").is_none());
    }

    #[test]
    fn serializes_as_plain_object() {
        let metadata: Metadata = [("b", "2"), ("a", "1")].into_iter().collect();
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }
}
