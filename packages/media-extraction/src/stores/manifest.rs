//! `image_manifest.json`: every image binding, grouped by property address.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IntegrityError, StoreResult};
use crate::stores::atomic::{check_version, default_version, read_json, write_json_atomic};
use crate::types::manifest::ManifestEntry;

/// Image manifest keyed by full property address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestStore {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    properties: BTreeMap<String, Vec<ManifestEntry>>,
}

impl Default for ManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestStore {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            properties: BTreeMap::new(),
        }
    }

    /// Load from `path`; a missing file is an empty manifest.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let store: Self = read_json(path)?.unwrap_or_default();
        check_version(path, store.version)?;
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json_atomic(path, self)
    }

    /// Append an entry after checking its address/hash binding.
    pub fn add(&mut self, entry: ManifestEntry) -> Result<(), IntegrityError> {
        entry.verify_binding()?;
        self.properties
            .entry(entry.property_address.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    pub fn entries_for(&self, address: &str) -> &[ManifestEntry] {
        self.properties.get(address).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `source` already bound `content_hash` to `property_hash`.
    ///
    /// The same content found on another source is a separate binding.
    pub fn has_binding(&self, property_hash: &str, content_hash: &str, source: &str) -> bool {
        self.entries().any(|e| {
            e.property_hash == property_hash && e.content_hash == content_hash && e.source == source
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.properties.values().flatten()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Remove an entry by image id.
    pub fn remove(&mut self, image_id: &str) -> Option<ManifestEntry> {
        let mut removed = None;
        for entries in self.properties.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.image_id == image_id) {
                removed = Some(entries.remove(pos));
                break;
            }
        }
        self.properties.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Entries referencing `local_path`.
    pub fn references(&self, local_path: &str) -> usize {
        self.entries().filter(|e| e.local_path == local_path).count()
    }

    pub fn len(&self) -> usize {
        self.properties.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::manifest::fixtures::entry;
    use tempfile::TempDir;

    const ADDR: &str = "123 Main St, Phoenix, AZ 85001";

    #[test]
    fn test_add_and_query() {
        let mut store = ManifestStore::new();
        store.add(entry(ADDR, "c1", "http")).unwrap();
        store.add(entry(ADDR, "c2", "http")).unwrap();

        assert_eq!(store.entries_for(ADDR).len(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.property_count(), 1);
        assert!(store.entries_for("elsewhere").is_empty());
    }

    #[test]
    fn test_add_rejects_bad_binding() {
        let mut store = ManifestStore::new();
        let mut bad = entry(ADDR, "c1", "http");
        bad.property_hash = "ffffffff".into();
        assert!(matches!(store.add(bad), Err(IntegrityError::HashMismatch { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_has_binding() {
        let mut store = ManifestStore::new();
        let e = entry(ADDR, "c1", "http");
        let hash = e.property_hash.clone();
        store.add(e).unwrap();
        assert!(store.has_binding(&hash, "c1", "http"));
        assert!(!store.has_binding(&hash, "c2", "http"));
        assert!(!store.has_binding(&hash, "c1", "remote"));
    }

    #[test]
    fn test_remove_prunes_empty_properties() {
        let mut store = ManifestStore::new();
        let e = entry(ADDR, "c1", "http");
        let id = e.image_id.clone();
        store.add(e).unwrap();

        assert!(store.remove(&id).is_some());
        assert!(store.remove(&id).is_none());
        assert_eq!(store.property_count(), 0);
    }

    #[test]
    fn test_persist_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("image_manifest.json");
        let mut store = ManifestStore::new();
        store.add(entry(ADDR, "c1", "http")).unwrap();
        store.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert!(json["properties"][ADDR].is_array());

        assert_eq!(ManifestStore::load(&path).unwrap(), store);
    }
}
