//! Typed errors for the media extraction pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Every error that can reach the
//! retry layer implements [`Classify`] so backoff decisions stay in one place.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::extractors::AttemptRecord;
use crate::retry::{Classify, ErrorCategory, ErrorClassifier};

/// Errors raised by site extractors and image downloads.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Connection could not be established or was reset
    #[error("connection failed for {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Request timed out
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Listing page could not be interpreted
    #[error("failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },

    /// Browser driver failure
    #[error("browser error: {0}")]
    Browser(String),

    /// Outbound request budget exhausted
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Response failed a sanity check (size, content type)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Anything else
    #[error("extractor error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExtractorError {
    /// Map a reqwest failure onto the extractor taxonomy.
    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = error.status() {
            Self::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else if error.is_connect() || error.is_request() {
            Self::Connection {
                url: url.to_string(),
                source: Box::new(error),
            }
        } else {
            Self::Other(Box::new(error))
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for ExtractorError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpStatus { status, .. } => ErrorClassifier::classify_status(*status),
            Self::Connection { .. } | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::InvalidUrl { .. } | Self::Validation(_) => ErrorCategory::Permanent,
            Self::RateLimit(e) => e.category(),
            Self::Parse { .. } | Self::Browser(_) | Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Rate limiter refusals.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("daily request limit of {limit} reached for {host}")]
    DailyLimitExceeded { host: String, limit: u32 },

    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

impl Classify for RateLimitError {
    fn category(&self) -> ErrorCategory {
        // Retrying within the same day cannot succeed.
        ErrorCategory::Permanent
    }
}

/// Exclusive lease failures.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lease stayed held by a live owner for the whole timeout.
    #[error("could not acquire lease {path} within {waited:?}")]
    AcquisitionTimeout { path: PathBuf, waited: Duration },

    #[error("lease I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Classify for LockError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::AcquisitionTimeout { .. } => ErrorCategory::Transient,
            Self::Io { .. } => ErrorCategory::Unknown,
        }
    }
}

/// Data integrity violations.
///
/// These are never swallowed: each one aborts persistence of the single
/// image it concerns.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("property hash mismatch for '{address}': stored {stored}, expected {expected}")]
    HashMismatch {
        address: String,
        stored: String,
        expected: String,
    },

    #[error("file missing: {path}")]
    MissingFile { path: PathBuf },

    #[error("file {path} is {size} bytes, below minimum {min}")]
    UndersizedFile { path: PathBuf, size: u64, min: u64 },

    #[error("image {width}x{height} is below the {min}px quality floor")]
    BelowQualityFloor { width: u32, height: u32, min: u32 },
}

impl Classify for IntegrityError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

/// Failures while decoding or standardizing image bytes.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("empty image payload")]
    Empty,

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("could not encode image: {0}")]
    Encode(String),

    #[error("image {width}x{height} is smaller than {min}px")]
    TooSmall { width: u32, height: u32, min: u32 },

    #[error("image worker panicked")]
    WorkerPanic,
}

impl Classify for ProcessingError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::WorkerPanic => ErrorCategory::Unknown,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Image processing pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("image processing pool is stopped")]
    Stopped,

    #[error("image worker dropped the reply channel")]
    WorkerDropped,

    #[error("failed to spawn image worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl Classify for PoolError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Processing(e) => e.category(),
            _ => ErrorCategory::Unknown,
        }
    }
}

/// Persistence failures for the JSON stores and processed files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} has version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for StoreError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Unknown
    }
}

/// Extractor chain failures.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No enabled extractor is configured
    #[error("no extractors enabled")]
    NoExtractors,

    /// Every variant was tried and abandoned
    #[error("all {} extractor attempts failed for '{address}'", attempts.len())]
    Exhausted {
        address: String,
        attempts: Vec<AttemptRecord>,
    },
}

impl ChainError {
    /// Last HTTP status seen across the attempts, if any.
    pub fn last_http_status(&self) -> Option<u16> {
        match self {
            Self::NoExtractors => None,
            Self::Exhausted { attempts, .. } => {
                attempts.iter().rev().find_map(|a| a.outcome.http_status())
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("missing required setting: {0}")]
    Missing(String),
}

/// Top-level pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Classify for PipelineError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Extractor(e) => e.category(),
            Self::Lock(e) => e.category(),
            Self::Integrity(e) => e.category(),
            Self::Pool(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::RateLimit(e) => e.category(),
            Self::Chain(_) | Self::Config(_) | Self::Validation(_) => ErrorCategory::Permanent,
            Self::Task(_) => ErrorCategory::Unknown,
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for extractor operations.
pub type ExtractorResult<T> = std::result::Result<T, ExtractorError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        let err = ExtractorError::HttpStatus {
            status: 503,
            url: "https://example.com".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert_eq!(err.http_status(), Some(503));

        let err = ExtractorError::HttpStatus {
            status: 403,
            url: "https://example.com".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = ExtractorError::Timeout {
            url: "https://example.com".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_parse_error_is_unknown() {
        let err = ExtractorError::Parse {
            url: "https://example.com".into(),
            reason: "no gallery".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_integrity_is_permanent() {
        let err = IntegrityError::BelowQualityFloor {
            width: 10,
            height: 10,
            min: 100,
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(err.to_string().contains("10x10"));
    }

    #[test]
    fn test_pipeline_error_delegates_category() {
        let err: PipelineError = ExtractorError::HttpStatus {
            status: 429,
            url: "https://example.com".into(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Transient);
    }
}
