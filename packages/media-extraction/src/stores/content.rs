//! Content-addressed image storage and `hash_index.json`.
//!
//! Files live at `processed/<property_hash>/<content_hash>.<ext>`, where the
//! property hash is that of the first property the content was seen for.
//! Identical standardized bytes are stored once; every later binding reuses
//! the recorded path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::processing::standardize::ProcessedImage;
use crate::stores::atomic::{
    check_version, default_version, read_json, write_bytes_atomic, write_json_atomic,
};

pub const PROCESSED_DIR: &str = "processed";

/// What we know about one stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashIndexEntry {
    /// Relative to the base directory
    pub local_path: String,
    pub first_property_hash: String,
    pub file_size_bytes: u64,
    pub width: u32,
    pub height: u32,
    /// Manifest bindings pointing at this file
    pub ref_count: u32,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HashIndex {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    hashes: BTreeMap<String, HashIndexEntry>,
}

impl Default for HashIndex {
    fn default() -> Self {
        Self {
            version: default_version(),
            hashes: BTreeMap::new(),
        }
    }
}

/// Result of [`ContentAddressedStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub local_path: String,
    /// False when the content was already on disk
    pub is_new: bool,
}

/// Deduplicating file store rooted at the pipeline base directory.
#[derive(Debug, Clone)]
pub struct ContentAddressedStore {
    base_dir: PathBuf,
    index: HashIndex,
}

impl ContentAddressedStore {
    /// Open the store, loading `hash_index.json` when present.
    pub fn open(base_dir: impl Into<PathBuf>, index_path: &Path) -> StoreResult<Self> {
        let index: HashIndex = read_json(index_path)?.unwrap_or_default();
        check_version(index_path, index.version)?;
        Ok(Self {
            base_dir: base_dir.into(),
            index,
        })
    }

    pub fn save_index(&self, index_path: &Path) -> StoreResult<()> {
        write_json_atomic(index_path, &self.index)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `processed/<property_hash>/<content_hash>.<ext>`
    pub fn relative_path(property_hash: &str, content_hash: &str, extension: &str) -> String {
        format!("{PROCESSED_DIR}/{property_hash}/{content_hash}.{extension}")
    }

    pub fn absolute_path(&self, local_path: &str) -> PathBuf {
        self.base_dir.join(local_path)
    }

    pub fn lookup(&self, content_hash: &str) -> Option<&HashIndexEntry> {
        self.index.hashes.get(content_hash)
    }

    /// Known content whose file is still on disk.
    pub fn contains(&self, content_hash: &str) -> bool {
        self.lookup(content_hash)
            .is_some_and(|e| self.absolute_path(&e.local_path).is_file())
    }

    /// Store `image` for `property_hash`, reusing the existing file when the
    /// content is already known.
    pub fn store(&mut self, property_hash: &str, image: &ProcessedImage) -> StoreResult<StoredImage> {
        if self.contains(&image.content_hash) {
            if let Some(entry) = self.index.hashes.get_mut(&image.content_hash) {
                entry.ref_count += 1;
                debug!(content_hash = %image.content_hash, ref_count = entry.ref_count, "Reusing stored image");
                return Ok(StoredImage {
                    local_path: entry.local_path.clone(),
                    is_new: false,
                });
            }
        }

        // Either unseen, or indexed but missing on disk: (re)write it.
        let local_path = match self.index.hashes.get(&image.content_hash) {
            Some(existing) => existing.local_path.clone(),
            None => Self::relative_path(property_hash, &image.content_hash, image.extension),
        };
        write_bytes_atomic(&self.absolute_path(&local_path), &image.bytes)?;

        let entry = self
            .index
            .hashes
            .entry(image.content_hash.clone())
            .or_insert_with(|| HashIndexEntry {
                local_path: local_path.clone(),
                first_property_hash: property_hash.to_string(),
                file_size_bytes: 0,
                width: image.width,
                height: image.height,
                ref_count: 0,
                first_seen: Utc::now(),
            });
        entry.file_size_bytes = image.bytes.len() as u64;
        entry.ref_count += 1;

        Ok(StoredImage {
            local_path,
            is_new: true,
        })
    }

    /// Drop one reference to `content_hash`. Returns the remaining count.
    pub fn release(&mut self, content_hash: &str) -> Option<u32> {
        let entry = self.index.hashes.get_mut(content_hash)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        Some(entry.ref_count)
    }

    /// Forget `content_hash` and delete its file.
    pub fn remove(&mut self, content_hash: &str) -> StoreResult<bool> {
        let Some(entry) = self.index.hashes.remove(content_hash) else {
            return Ok(false);
        };
        self.delete_file(&entry.local_path)?;
        Ok(true)
    }

    /// Delete a file by relative path, dropping any index entry pointing at it.
    pub fn delete_file(&mut self, local_path: &str) -> StoreResult<()> {
        self.index.hashes.retain(|_, e| e.local_path != local_path);
        let path = self.absolute_path(local_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Every file under `processed/`, as relative paths with `/` separators.
    pub fn stored_files(&self) -> Vec<String> {
        let root = self.base_dir.join(PROCESSED_DIR);
        if !root.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.base_dir).ok()?;
                let parts: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect()
    }

    pub fn unique_count(&self) -> usize {
        self.index.hashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::standardize::{process_image, StandardizeOptions};
    use crate::testing::sample_image_bytes;
    use tempfile::TempDir;

    fn processed(seed: u64) -> ProcessedImage {
        process_image(&sample_image_bytes(seed, 200, 200), &StandardizeOptions::default()).unwrap()
    }

    fn open(temp: &TempDir) -> ContentAddressedStore {
        ContentAddressedStore::open(temp.path(), &temp.path().join("hash_index.json")).unwrap()
    }

    #[test]
    fn test_store_new_then_reuse() {
        let temp = TempDir::new().unwrap();
        let mut store = open(&temp);
        let image = processed(1);

        let first = store.store("aaaa0000", &image).unwrap();
        assert!(first.is_new);
        assert_eq!(
            first.local_path,
            format!("processed/aaaa0000/{}.jpg", image.content_hash)
        );
        assert!(store.absolute_path(&first.local_path).is_file());

        // Different property, same bytes: shared path
        let second = store.store("bbbb0000", &image).unwrap();
        assert!(!second.is_new);
        assert_eq!(second.local_path, first.local_path);
        assert_eq!(store.lookup(&image.content_hash).unwrap().ref_count, 2);
        assert_eq!(store.unique_count(), 1);
    }

    #[test]
    fn test_missing_file_is_rewritten() {
        let temp = TempDir::new().unwrap();
        let mut store = open(&temp);
        let image = processed(2);
        let stored = store.store("aaaa0000", &image).unwrap();
        std::fs::remove_file(store.absolute_path(&stored.local_path)).unwrap();

        let again = store.store("aaaa0000", &image).unwrap();
        assert!(again.is_new);
        assert_eq!(again.local_path, stored.local_path);
        assert!(store.absolute_path(&again.local_path).is_file());
    }

    #[test]
    fn test_index_persists() {
        let temp = TempDir::new().unwrap();
        let index_path = temp.path().join("hash_index.json");
        let mut store = open(&temp);
        let image = processed(3);
        store.store("aaaa0000", &image).unwrap();
        store.save_index(&index_path).unwrap();

        let reopened = ContentAddressedStore::open(temp.path(), &index_path).unwrap();
        assert!(reopened.contains(&image.content_hash));
        assert_eq!(reopened.stored_files().len(), 1);
    }

    #[test]
    fn test_remove_and_release() {
        let temp = TempDir::new().unwrap();
        let mut store = open(&temp);
        let image = processed(4);
        let stored = store.store("aaaa0000", &image).unwrap();
        store.store("bbbb0000", &image).unwrap();

        assert_eq!(store.release(&image.content_hash), Some(1));
        assert!(store.remove(&image.content_hash).unwrap());
        assert!(!store.absolute_path(&stored.local_path).exists());
        assert!(!store.remove(&image.content_hash).unwrap());
        assert!(store.stored_files().is_empty());
    }
}
