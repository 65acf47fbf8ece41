//! Persistent stores under the pipeline base directory.
//!
//! Every store is a versioned JSON document written atomically. Callers that
//! mutate stores shared across processes must hold the manifest lease and
//! reload before mutating (see [`StoreSet::load`]).

pub mod atomic;
pub mod category_index;
pub mod content;
pub mod lookup;
pub mod manifest;
pub mod state;
pub mod url_tracker;

use std::path::{Path, PathBuf};

pub use category_index::CategoryIndex;
pub use content::{ContentAddressedStore, HashIndexEntry, StoredImage};
pub use lookup::AddressFolderLookup;
pub use manifest::ManifestStore;
pub use state::ExtractionStateStore;
pub use url_tracker::{UrlStatus, UrlTracker, UrlTrackerEntry};

use crate::error::StoreResult;

/// File locations for one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub base_dir: PathBuf,
    pub manifest: PathBuf,
    pub url_tracker: PathBuf,
    pub state: PathBuf,
    pub hash_index: PathBuf,
    pub category_index: PathBuf,
    pub lookup: PathBuf,
    pub processed_dir: PathBuf,
    pub locks_dir: PathBuf,
}

impl StorePaths {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref();
        Self {
            base_dir: base.to_path_buf(),
            manifest: base.join("image_manifest.json"),
            url_tracker: base.join("url_tracker.json"),
            state: base.join("extraction_state.json"),
            hash_index: base.join("hash_index.json"),
            category_index: base.join("category_index.json"),
            lookup: base.join("address_folder_lookup.json"),
            processed_dir: base.join(content::PROCESSED_DIR),
            locks_dir: base.join("locks"),
        }
    }
}

/// All stores loaded together.
#[derive(Debug, Clone)]
pub struct StoreSet {
    pub manifest: ManifestStore,
    pub urls: UrlTracker,
    pub state: ExtractionStateStore,
    pub content: ContentAddressedStore,
    pub categories: CategoryIndex,
}

impl StoreSet {
    pub fn load(paths: &StorePaths) -> StoreResult<Self> {
        Ok(Self {
            manifest: ManifestStore::load(&paths.manifest)?,
            urls: UrlTracker::load(&paths.url_tracker)?,
            state: ExtractionStateStore::load(&paths.state)?,
            content: ContentAddressedStore::open(&paths.base_dir, &paths.hash_index)?,
            categories: CategoryIndex::load(&paths.category_index)?,
        })
    }

    /// Write every store, then the derived address lookup.
    pub fn save(&self, paths: &StorePaths) -> StoreResult<()> {
        self.manifest.save(&paths.manifest)?;
        self.urls.save(&paths.url_tracker)?;
        self.state.save(&paths.state)?;
        self.content.save_index(&paths.hash_index)?;
        self.categories.save(&paths.category_index)?;
        AddressFolderLookup::rebuild(&self.manifest).save(&paths.lookup)
    }
}
