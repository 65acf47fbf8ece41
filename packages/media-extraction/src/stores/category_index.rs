//! Two-way index between images and their `(location, subject)` categories.
//!
//! Only the forward map and per-image records are persisted; the reverse map
//! is rebuilt on load so the two can never disagree on disk.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::stores::atomic::{check_version, default_version, read_json, write_json_atomic};
use crate::types::category::{normalize_label, CategoryKey};

/// Per-image record kept alongside the category sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub property_hash: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

type Forward = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

#[derive(Serialize, Deserialize)]
struct CategoryIndexFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    categories: Forward,
    #[serde(default)]
    images: BTreeMap<String, ImageRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryIndex {
    forward: Forward,
    reverse: HashMap<String, HashSet<CategoryKey>>,
    images: BTreeMap<String, ImageRecord>,
}

impl CategoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from disk and rebuild the reverse map.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let Some(file) = read_json::<CategoryIndexFile>(path)? else {
            return Ok(Self::new());
        };
        check_version(path, file.version)?;

        let mut index = Self {
            forward: Forward::new(),
            reverse: HashMap::new(),
            images: file.images,
        };
        for (location, subjects) in file.categories {
            for (subject, ids) in subjects {
                for image_id in ids {
                    let property_hash = index
                        .images
                        .get(&image_id)
                        .map(|r| r.property_hash.clone())
                        .unwrap_or_default();
                    index.insert(&image_id, CategoryKey::new(&location, &subject, property_hash));
                }
            }
        }
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let file = CategoryIndexFile {
            version: default_version(),
            categories: self.forward.clone(),
            images: self.images.clone(),
        };
        write_json_atomic(path, &file)
    }

    /// Add `image_id` under `(location, subject)`. Labels are normalized.
    ///
    /// An image belongs to one property: re-adding it with a different
    /// `property_hash` moves every existing membership to that hash.
    pub fn add(
        &mut self,
        image_id: &str,
        property_hash: &str,
        location: &str,
        subject: &str,
        metadata: Option<BTreeMap<String, String>>,
    ) {
        let record = self
            .images
            .entry(image_id.to_string())
            .or_insert_with(|| ImageRecord {
                property_hash: property_hash.to_string(),
                metadata: BTreeMap::new(),
            });
        if let Some(metadata) = metadata {
            record.metadata.extend(metadata);
        }
        if record.property_hash != property_hash {
            record.property_hash = property_hash.to_string();
            if let Some(keys) = self.reverse.get_mut(image_id) {
                let moved: HashSet<_> = keys
                    .drain()
                    .map(|k| CategoryKey::new(k.location, k.subject, property_hash))
                    .collect();
                *keys = moved;
            }
        }
        self.insert(image_id, CategoryKey::new(location, subject, property_hash));
    }

    fn insert(&mut self, image_id: &str, key: CategoryKey) {
        self.forward
            .entry(key.location.clone())
            .or_default()
            .entry(key.subject.clone())
            .or_default()
            .insert(image_id.to_string());
        self.reverse
            .entry(image_id.to_string())
            .or_default()
            .insert(key);
    }

    /// Remove an image from every category. Returns whether it was present.
    pub fn remove(&mut self, image_id: &str) -> bool {
        self.images.remove(image_id);
        let Some(keys) = self.reverse.remove(image_id) else {
            return false;
        };
        for key in keys {
            if let Some(subjects) = self.forward.get_mut(&key.location) {
                if let Some(ids) = subjects.get_mut(&key.subject) {
                    ids.remove(image_id);
                    if ids.is_empty() {
                        subjects.remove(&key.subject);
                    }
                }
                if subjects.is_empty() {
                    self.forward.remove(&key.location);
                }
            }
        }
        true
    }

    pub fn has_image(&self, image_id: &str) -> bool {
        self.reverse.contains_key(image_id)
    }

    /// Categories of `image_id`, as an owned copy.
    pub fn get_image_categories(&self, image_id: &str) -> HashSet<CategoryKey> {
        self.reverse.get(image_id).cloned().unwrap_or_default()
    }

    pub fn images_in(&self, location: &str, subject: &str) -> BTreeSet<String> {
        self.forward
            .get(&normalize_label(location))
            .and_then(|s| s.get(&normalize_label(subject)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn images_for_property(&self, property_hash: &str) -> BTreeSet<String> {
        self.images
            .iter()
            .filter(|(_, r)| r.property_hash == property_hash)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn metadata(&self, image_id: &str) -> Option<&ImageRecord> {
        self.images.get(image_id)
    }

    /// Number of indexed images.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Forward and reverse maps describe the same memberships.
    pub fn is_consistent(&self) -> bool {
        let forward_pairs: usize = self
            .forward
            .values()
            .flat_map(|s| s.values())
            .map(BTreeSet::len)
            .sum();
        let reverse_pairs: usize = self
            .reverse
            .values()
            .map(|keys| {
                keys.iter()
                    .map(|k| (&k.location, &k.subject))
                    .collect::<HashSet<_>>()
                    .len()
            })
            .sum();
        forward_pairs == reverse_pairs
            && self.reverse.iter().all(|(id, keys)| {
                keys.iter().all(|k| {
                    self.forward
                        .get(&k.location)
                        .and_then(|s| s.get(&k.subject))
                        .is_some_and(|ids| ids.contains(id))
                })
            })
    }
}
