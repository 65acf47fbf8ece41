//! Manifest entries: one per stored image binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;
use crate::types::property::property_hash;

/// Lifecycle status of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// New content written to the store
    Processed,
    /// Bound to content that was already stored
    Duplicate,
    /// Recorded but unusable
    Failed,
}

/// A stored image bound to a property address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image_id: String,
    pub property_address: String,

    /// `sha256(normalize(property_address))[:8]`
    pub property_hash: String,

    /// Site variant the image came from
    pub source: String,
    pub source_url: String,

    /// `processed/<hash8>/<content_hash>.<ext>`, relative to the base dir
    pub local_path: String,

    pub phash: String,
    pub dhash: String,
    pub width: u32,
    pub height: u32,
    pub file_size_bytes: u64,
    pub status: ImageStatus,
    pub downloaded_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,

    /// SHA-256 of the standardized bytes
    pub content_hash: String,
    pub created_by_run_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ManifestEntry {
    /// Check the address/hash binding invariant.
    pub fn verify_binding(&self) -> Result<(), IntegrityError> {
        let expected = property_hash(&self.property_address);
        if self.property_hash != expected {
            return Err(IntegrityError::HashMismatch {
                address: self.property_address.clone(),
                stored: self.property_hash.clone(),
                expected,
            });
        }
        Ok(())
    }

    /// File extension of the stored file.
    pub fn extension(&self) -> Option<&str> {
        self.local_path.rsplit_once('.').map(|(_, ext)| ext)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::entry;
    use super::*;

    #[test]
    fn test_verify_binding_ok() {
        let e = entry("123 Main St, Phoenix, AZ 85001", "abc", "http");
        assert!(e.verify_binding().is_ok());
    }

    #[test]
    fn test_verify_binding_mismatch() {
        let mut e = entry("123 Main St, Phoenix, AZ 85001", "abc", "http");
        e.property_hash = "00000000".into();
        let err = e.verify_binding().unwrap_err();
        assert!(matches!(err, IntegrityError::HashMismatch { .. }));
    }

    #[test]
    fn test_extension() {
        let e = entry("123 Main St, Phoenix, AZ 85001", "abc", "http");
        assert_eq!(e.extension(), Some("jpg"));
    }

    #[test]
    fn test_serde_shape() {
        let e = entry("123 Main St, Phoenix, AZ 85001", "abc", "http");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["status"], "processed");
        assert!(json.get("location").is_none());
    }
}
