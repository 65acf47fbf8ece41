//! Property Media Extraction Pipeline
//!
//! Crawls listing sites for property photos, standardizes and
//! content-addresses them, and keeps resumable state on disk so an
//! interrupted batch picks up where it stopped.
//!
//! # Design Philosophy
//!
//! - Identical bytes are stored once; every property binding is its own manifest entry
//! - Every store write is atomic and happens under a file lease
//! - One bad image or property never aborts a batch
//! - Perceptual hashes inform, they never merge
//!
//! # Usage
//!
//! ```rust,ignore
//! use media_extraction::{Orchestrator, PipelineConfig, Property};
//!
//! let config = PipelineConfig::from_env()?;
//! let orchestrator = Orchestrator::from_config(config, None)?;
//!
//! let properties = vec![Property::new("4732 W Davis Rd", "Glendale", "AZ", "85306")];
//! let result = orchestrator.extract_all(&properties, true, false).await?;
//! println!("{} unique images", result.unique_images);
//!
//! let report = orchestrator.reconciler().reconcile(None)?;
//! assert!(report.is_healthy);
//! ```
//!
//! # Modules
//!
//! - [`extractors`] - Site extractors and the strategy fallback chain
//! - [`pipeline`] - Batch orchestration
//! - [`processing`] - Image standardization, perceptual hashing, worker pool
//! - [`stores`] - Manifest, URL tracker, state, content and category stores
//! - [`lease`] - Cross-process file leases
//! - [`rate_limit`] - Per-host request pacing
//! - [`retry`] - Error classification and backoff
//! - [`validation`] - Integrity checks
//! - [`reconcile`] - Store/disk audits and repair
//! - [`testing`] - Mock implementations for testing

pub mod config;
pub mod credentials;
pub mod error;
pub mod extractors;
pub mod lease;
pub mod logging;
pub mod pipeline;
pub mod processing;
pub mod rate_limit;
pub mod reconcile;
pub mod retry;
pub mod stores;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export core types at crate root
pub use config::PipelineConfig;
pub use credentials::{RemoteBrowserCredentials, SecretString};
pub use error::{
    ChainError, ConfigError, ExtractorError, IntegrityError, LockError, PipelineError, PoolError,
    ProcessingError, RateLimitError, Result, StoreError,
};
pub use types::{
    category::CategoryKey,
    manifest::{ImageStatus, ManifestEntry},
    property::{normalize_address, property_hash, Property},
    run::{
        DeduplicationStats, ExtractionResult, ExtractionRun, PipelineStatistics, SourceStats,
    },
    state::{ExtractionPhase, ExtractionStatus, FailureRecord, PropertyState},
};

// Re-export pipeline components
pub use extractors::{
    BrowserDriver, BrowserExtractor, Candidate, ExtractionStrategy, ExtractorChain,
    HttpExtractor, HttpImageFetcher, ImageFetcher, RemoteBrowserExtractor, SiteExtractor,
    SiteProfile,
};
pub use lease::{FileLock, LeaseGuard, LeaseOptions};
pub use pipeline::Orchestrator;
pub use processing::{ImageProcessingPool, NearDuplicate, ProcessedImage};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use reconcile::{Reconciler, ReconciliationReport, RepairOptions};
pub use retry::{retry_with_backoff, Classify, ErrorCategory, RetryPolicy};
pub use stores::{
    CategoryIndex, ContentAddressedStore, ExtractionStateStore, ManifestStore, StorePaths,
    StoreSet, UrlTracker,
};
pub use validation::Validators;
