//! Integrity checks run before extraction and before an image is persisted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;
use crate::stores::StoreSet;
use crate::types::manifest::ManifestEntry;
use crate::types::property::{normalize_address, property_hash, Property};
use crate::types::state::ExtractionStatus;

/// Smallest standardized file we accept, in bytes.
pub const DEFAULT_MIN_FILE_BYTES: u64 = 1024;

/// What the stores already hold for one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub address: String,
    pub property_hash: String,
    pub existing_images: usize,
    /// Manifest paths with no file on disk
    pub missing_files: Vec<String>,
    pub status: Option<ExtractionStatus>,
    pub needs_extraction: bool,
}

/// Validation thresholds.
#[derive(Debug, Clone)]
pub struct Validators {
    pub min_file_bytes: u64,
    pub min_dimension: u32,
}

impl Default for Validators {
    fn default() -> Self {
        Self::new()
    }
}

impl Validators {
    pub fn new() -> Self {
        Self {
            min_file_bytes: DEFAULT_MIN_FILE_BYTES,
            min_dimension: 100,
        }
    }

    pub fn with_min_file_bytes(mut self, bytes: u64) -> Self {
        self.min_file_bytes = bytes;
        self
    }

    pub fn with_min_dimension(mut self, px: u32) -> Self {
        self.min_dimension = px;
        self
    }

    /// Whether `property` still needs extracting given what is stored.
    ///
    /// A property needs work unless it completed and every one of its
    /// manifest files is present.
    pub fn pre_extraction(&self, property: &Property, stores: &StoreSet) -> CompletenessReport {
        let address = property.full_address();
        let hash = property.property_hash();
        let entries = stores.manifest.entries_for(&address);
        let missing_files: Vec<String> = entries
            .iter()
            .filter(|e| !stores.content.absolute_path(&e.local_path).is_file())
            .map(|e| e.local_path.clone())
            .collect();
        let status = stores.state.get(&hash).map(|s| s.status);

        CompletenessReport {
            needs_extraction: status != Some(ExtractionStatus::Completed)
                || entries.is_empty()
                || !missing_files.is_empty(),
            existing_images: entries.len(),
            missing_files,
            status,
            property_hash: hash,
            address,
        }
    }

    /// `entry` belongs to `address` and its stored hash is correct.
    pub fn validate_binding(entry: &ManifestEntry, address: &str) -> Result<(), IntegrityError> {
        let expected = property_hash(address);
        if normalize_address(&entry.property_address) != normalize_address(address)
            || entry.property_hash != expected
        {
            return Err(IntegrityError::HashMismatch {
                address: address.to_string(),
                stored: entry.property_hash.clone(),
                expected,
            });
        }
        Ok(())
    }

    /// File exists and is at least `min_bytes`. Returns its size.
    pub fn validate_file(path: &Path, min_bytes: u64) -> Result<u64, IntegrityError> {
        let size = std::fs::metadata(path)
            .map_err(|_| IntegrityError::MissingFile {
                path: path.to_path_buf(),
            })?
            .len();
        if size < min_bytes {
            return Err(IntegrityError::UndersizedFile {
                path: path.to_path_buf(),
                size,
                min: min_bytes,
            });
        }
        Ok(size)
    }

    /// Both edges meet the quality floor.
    pub fn validate_quality(width: u32, height: u32, min: u32) -> Result<(), IntegrityError> {
        if width < min || height < min {
            return Err(IntegrityError::BelowQualityFloor { width, height, min });
        }
        Ok(())
    }

    /// Every check for an entry about to be persisted.
    pub fn validate_entry(&self, entry: &ManifestEntry, base_dir: &Path) -> Result<(), IntegrityError> {
        Self::validate_binding(entry, &entry.property_address)?;
        Self::validate_quality(entry.width, entry.height, self.min_dimension)?;
        Self::validate_file(&base_dir.join(&entry.local_path), self.min_file_bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::StorePaths;
    use crate::types::manifest::fixtures::entry;
    use tempfile::TempDir;

    const ADDR: &str = "1 A St, Phoenix, AZ 85001";

    #[test]
    fn test_validate_binding() {
        let e = entry(ADDR, "c1", "http");
        assert!(Validators::validate_binding(&e, ADDR).is_ok());
        assert!(Validators::validate_binding(&e, " 1 a st, phoenix, az 85001 ").is_ok());
        assert!(matches!(
            Validators::validate_binding(&e, "2 B St, Phoenix, AZ 85001"),
            Err(IntegrityError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("img.jpg");
        assert!(matches!(
            Validators::validate_file(&path, 10),
            Err(IntegrityError::MissingFile { .. })
        ));
        std::fs::write(&path, [0u8; 5]).unwrap();
        assert!(matches!(
            Validators::validate_file(&path, 10),
            Err(IntegrityError::UndersizedFile { size: 5, .. })
        ));
        assert_eq!(Validators::validate_file(&path, 5).unwrap(), 5);
    }

    #[test]
    fn test_validate_quality() {
        assert!(Validators::validate_quality(100, 100, 100).is_ok());
        assert!(Validators::validate_quality(99, 400, 100).is_err());
    }

    #[test]
    fn test_pre_extraction() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path());
        let mut stores = StoreSet::load(&paths).unwrap();
        let property = Property::new("1 A St", "Phoenix", "AZ", "85001");
        let validators = Validators::new();

        let report = validators.pre_extraction(&property, &stores);
        assert!(report.needs_extraction);
        assert_eq!(report.existing_images, 0);

        let e = entry(ADDR, "c1", "http");
        let file = temp.path().join(&e.local_path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, [0u8; 2048]).unwrap();
        stores.manifest.add(e.clone()).unwrap();
        stores.state.mark_completed(&property, 1);

        let report = validators.pre_extraction(&property, &stores);
        assert!(!report.needs_extraction);
        assert_eq!(report.existing_images, 1);

        std::fs::remove_file(&file).unwrap();
        let report = validators.pre_extraction(&property, &stores);
        assert!(report.needs_extraction);
        assert_eq!(report.missing_files, vec![e.local_path]);
    }
}
