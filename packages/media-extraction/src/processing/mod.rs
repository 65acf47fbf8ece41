//! CPU-bound image work: hashing, standardization, and the worker pool.

pub mod hashing;
pub mod pool;
pub mod standardize;

pub use hashing::{find_near_duplicates, hamming_distance, Fingerprint, NearDuplicate};
pub use pool::ImageProcessingPool;
pub use standardize::{content_hash, process_image, ProcessedImage, StandardizeOptions};
