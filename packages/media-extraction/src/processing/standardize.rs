//! Image standardization: decode, size-check, resize, re-encode.
//!
//! Re-encoding to JPEG drops EXIF and every other metadata block, and the
//! encoder is deterministic, so identical input bytes always produce
//! identical output bytes (and therefore the same content hash).

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProcessingError;
use crate::processing::hashing::compute_hashes;

pub const STANDARD_EXTENSION: &str = "jpg";

/// Knobs for standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizeOptions {
    /// Longest edge after resizing
    pub max_dimension: u32,
    /// Images with either edge below this are rejected
    pub min_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for StandardizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            min_dimension: 100,
            jpeg_quality: 90,
        }
    }
}

/// Result of processing one image.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub phash: u64,
    pub dhash: u64,
    /// Standardized bytes
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// SHA-256 hex of `bytes`
    pub content_hash: String,
    pub extension: &'static str,
    pub original_size: usize,
}

/// Decode, validate, resize, and re-encode `bytes`.
pub fn process_image(
    bytes: &[u8],
    options: &StandardizeOptions,
) -> Result<ProcessedImage, ProcessingError> {
    if bytes.is_empty() {
        return Err(ProcessingError::Empty);
    }

    let img = image::load_from_memory(bytes).map_err(|e| ProcessingError::Decode(e.to_string()))?;
    let (width, height) = img.dimensions();
    if width < options.min_dimension || height < options.min_dimension {
        return Err(ProcessingError::TooSmall {
            width,
            height,
            min: options.min_dimension,
        });
    }

    let img = if width.max(height) > options.max_dimension {
        img.resize(options.max_dimension, options.max_dimension, FilterType::Lanczos3)
    } else {
        img
    };
    let img = DynamicImage::ImageRgb8(img.to_rgb8());
    let hashes = compute_hashes(&img);
    let (width, height) = img.dimensions();

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, options.jpeg_quality);
    img.write_with_encoder(encoder)
        .map_err(|e| ProcessingError::Encode(e.to_string()))?;
    let out = out.into_inner();

    Ok(ProcessedImage {
        phash: hashes.phash,
        dhash: hashes.dhash,
        content_hash: content_hash(&out),
        bytes: out,
        width,
        height,
        extension: STANDARD_EXTENSION,
        original_size: bytes.len(),
    })
}

/// SHA-256 hex digest of raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_image_bytes;

    #[test]
    fn test_resizes_to_max_dimension() {
        let bytes = sample_image_bytes(1, 2000, 1000);
        let processed = process_image(&bytes, &StandardizeOptions::default()).unwrap();
        assert_eq!(processed.width, 1024);
        assert_eq!(processed.height, 512);
        assert_eq!(processed.extension, "jpg");
        assert_eq!(processed.content_hash.len(), 64);
    }

    #[test]
    fn test_small_images_kept_at_size() {
        let bytes = sample_image_bytes(2, 300, 200);
        let processed = process_image(&bytes, &StandardizeOptions::default()).unwrap();
        assert_eq!((processed.width, processed.height), (300, 200));
    }

    #[test]
    fn test_identical_input_identical_output() {
        let bytes = sample_image_bytes(3, 640, 480);
        let a = process_image(&bytes, &StandardizeOptions::default()).unwrap();
        let b = process_image(&bytes, &StandardizeOptions::default()).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_rejects_below_floor() {
        let bytes = sample_image_bytes(4, 50, 400);
        let err = process_image(&bytes, &StandardizeOptions::default()).unwrap_err();
        assert!(matches!(err, ProcessingError::TooSmall { width: 50, .. }));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = process_image(b"definitely not an image", &StandardizeOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Decode(_)));
        assert!(matches!(
            process_image(&[], &StandardizeOptions::default()),
            Err(ProcessingError::Empty)
        ));
    }

    #[test]
    fn test_output_is_jpeg() {
        let bytes = sample_image_bytes(5, 200, 200);
        let processed = process_image(&bytes, &StandardizeOptions::default()).unwrap();
        assert_eq!(&processed.bytes[..2], &[0xFF, 0xD8]);
    }
}
