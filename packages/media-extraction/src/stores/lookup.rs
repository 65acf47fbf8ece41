//! `address_folder_lookup.json`: address to image folder, derived from the manifest.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::stores::atomic::{default_version, write_json_atomic};
use crate::stores::content::PROCESSED_DIR;
use crate::stores::manifest::ManifestStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMapping {
    pub folder: String,
    pub property_hash: String,
    pub image_count: usize,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressFolderLookup {
    version: u32,
    mappings: BTreeMap<String, FolderMapping>,
}

impl AddressFolderLookup {
    /// Derive the lookup from the manifest.
    pub fn rebuild(manifest: &ManifestStore) -> Self {
        let mappings = manifest
            .addresses()
            .filter_map(|address| {
                let entries = manifest.entries_for(address);
                let property_hash = entries.first()?.property_hash.clone();
                Some((
                    address.to_string(),
                    FolderMapping {
                        folder: property_hash.clone(),
                        path: format!("{PROCESSED_DIR}/{property_hash}"),
                        property_hash,
                        image_count: entries.len(),
                    },
                ))
            })
            .collect();
        Self {
            version: default_version(),
            mappings,
        }
    }

    pub fn get(&self, address: &str) -> Option<&FolderMapping> {
        self.mappings.get(address)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::manifest::fixtures::entry;

    #[test]
    fn test_rebuild_counts_entries() {
        let addr = "123 Main St, Phoenix, AZ 85001";
        let mut manifest = ManifestStore::new();
        manifest.add(entry(addr, "c1", "http")).unwrap();
        manifest.add(entry(addr, "c2", "browser")).unwrap();

        let lookup = AddressFolderLookup::rebuild(&manifest);
        let mapping = lookup.get(addr).unwrap();
        assert_eq!(mapping.image_count, 2);
        assert_eq!(mapping.folder.len(), 8);
        assert_eq!(mapping.path, format!("processed/{}", mapping.folder));
    }
}
