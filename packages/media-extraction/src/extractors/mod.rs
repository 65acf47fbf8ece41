//! Site extractors and the priority chain that drives them.
//!
//! A [`SiteExtractor`] turns a property into image candidates from one
//! listing site using one [`ExtractionStrategy`]. The [`ExtractorChain`]
//! tries extractors in strategy order until one returns candidates for the
//! right address.
//!
//! # Usage
//!
//! ```rust,ignore
//! use media_extraction::extractors::{ExtractorChain, HttpExtractor, SiteProfile};
//!
//! let profile = SiteProfile::new("listings", "https://listings.example/search?q={address}")
//!     .with_image_selector("div.gallery img");
//! let chain = ExtractorChain::new(vec![Arc::new(HttpExtractor::new(profile)?)]);
//! let outcome = chain.run(&property, rate_limiter).await?;
//! ```

pub mod browser;
pub mod chain;
pub mod fetcher;
pub mod http;
pub mod parse;
pub mod remote;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtractorResult;
use crate::rate_limit::RateLimiter;
use crate::retry::ErrorCategory;
use crate::types::property::Property;

pub use browser::{BrowserDriver, BrowserExtractor, RenderedPage};
pub use chain::{ChainOutcome, ExtractorChain};
pub use fetcher::{HttpImageFetcher, ImageFetcher};
pub use http::HttpExtractor;
pub use parse::{ListingParser, ParsedListing, SiteProfile};
pub use remote::RemoteBrowserExtractor;

/// How an extractor reaches a site. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Local headless browser with fingerprint hardening
    StealthBrowser,
    /// Plain HTTP client with browser-like headers
    HttpClient,
    /// Third-party rendering service
    RemoteBrowser,
}

impl ExtractionStrategy {
    pub const ALL: [ExtractionStrategy; 3] = [
        ExtractionStrategy::StealthBrowser,
        ExtractionStrategy::HttpClient,
        ExtractionStrategy::RemoteBrowser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StealthBrowser => "stealth_browser",
            Self::HttpClient => "http_client",
            Self::RemoteBrowser => "remote_browser",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that may become a stored image.
#[derive(Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Remote image to download
    Url {
        url: String,
        caption: Option<String>,
    },
    /// Image bytes captured directly (e.g. a browser screenshot)
    Screenshot { label: String, bytes: Vec<u8> },
}

impl Candidate {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            caption: None,
        }
    }

    pub fn url_with_caption(url: impl Into<String>, caption: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            caption: Some(caption.into()),
        }
    }

    /// Identifier recorded as the manifest `source_url`.
    pub fn source_url(&self, search_url: &str) -> String {
        match self {
            Self::Url { url, .. } => url.clone(),
            Self::Screenshot { label, .. } => format!("{search_url}#screenshot={label}"),
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            Self::Url { caption, .. } => caption.as_deref(),
            Self::Screenshot { label, .. } => Some(label),
        }
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url { url, caption } => f
                .debug_struct("Url")
                .field("url", url)
                .field("caption", caption)
                .finish(),
            Self::Screenshot { label, bytes } => f
                .debug_struct("Screenshot")
                .field("label", label)
                .field("bytes", &bytes.len())
                .finish(),
        }
    }
}

/// Everything an extractor needs for one property.
#[derive(Clone)]
pub struct ExtractionSession {
    pub property: Property,
    pub search_url: String,
    pub rate_limiter: Arc<RateLimiter>,
}

/// What one extractor found.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Address shown on the listing, when the page displays one
    pub listing_address: Option<String>,
    pub candidates: Vec<Candidate>,
}

impl FetchOutcome {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            listing_address: None,
            candidates,
        }
    }

    pub fn with_listing_address(mut self, address: impl Into<String>) -> Self {
        self.listing_address = Some(address.into());
        self
    }
}

/// A listing-site integration.
#[async_trait]
pub trait SiteExtractor: Send + Sync {
    fn strategy(&self) -> ExtractionStrategy;

    /// Site name recorded in the manifest and URL tracker.
    fn source(&self) -> &str;

    fn build_search_url(&self, property: &Property) -> ExtractorResult<String>;

    async fn fetch_candidates(&self, session: &ExtractionSession) -> ExtractorResult<FetchOutcome>;

    /// Confidence in `[0, 1]` that `candidate` is the same address as `target`.
    fn score_address_match(&self, target: &str, candidate: &str) -> f64 {
        address_match_score(target, candidate)
    }
}

/// Result of one extractor attempt within a chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { candidates: usize },
    NoCandidates,
    AddressMismatch { score: f64 },
    Failed {
        category: ErrorCategory,
        message: String,
        http_status: Option<u16>,
    },
}

impl AttemptOutcome {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Failed { http_status, .. } => *http_status,
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short description for the URL tracker.
    pub fn describe(&self) -> String {
        match self {
            Self::Success { candidates } => format!("{candidates} candidates"),
            Self::NoCandidates => "no candidates".to_string(),
            Self::AddressMismatch { score } => format!("address match {score:.2} below floor"),
            Self::Failed { category, message, .. } => format!("{category}: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub source: String,
    pub strategy: ExtractionStrategy,
    pub search_url: Option<String>,
    pub outcome: AttemptOutcome,
    pub at: DateTime<Utc>,
}

/// Default address similarity: exact normalized match scores 1.0, otherwise
/// the Jaccard index of the normalized token sets.
pub fn address_match_score(target: &str, candidate: &str) -> f64 {
    let a = address_tokens(target);
    let b = address_tokens(candidate);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let shared = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    shared / union
}

fn address_tokens(address: &str) -> BTreeSet<String> {
    address
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| fold_token(t).to_string())
        .collect()
}

fn fold_token(token: &str) -> &str {
    match token {
        "street" => "st",
        "avenue" => "ave",
        "road" => "rd",
        "drive" => "dr",
        "lane" => "ln",
        "boulevard" => "blvd",
        "court" => "ct",
        "place" => "pl",
        "parkway" => "pkwy",
        "circle" => "cir",
        "terrace" => "ter",
        "highway" => "hwy",
        "trail" => "trl",
        "north" => "n",
        "south" => "s",
        "east" => "e",
        "west" => "w",
        "apartment" | "apt" | "suite" | "ste" | "unit" => "unit",
        "arizona" => "az",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_priority_order() {
        let mut strategies = vec![
            ExtractionStrategy::RemoteBrowser,
            ExtractionStrategy::StealthBrowser,
            ExtractionStrategy::HttpClient,
        ];
        strategies.sort();
        assert_eq!(strategies, ExtractionStrategy::ALL.to_vec());
    }

    #[test]
    fn test_exact_match_scores_one() {
        let s = address_match_score(
            "4732 W Davis Rd, Glendale, AZ 85306",
            "4732 West Davis Road, Glendale, Arizona 85306",
        );
        assert_eq!(s, 1.0);
    }

    #[test]
    fn test_partial_match() {
        let s = address_match_score(
            "4732 W Davis Rd, Glendale, AZ 85306",
            "4732 W Davis Rd Unit 5, Glendale, AZ 85306",
        );
        assert!(s > 0.7 && s < 1.0, "{s}");
    }

    #[test]
    fn test_different_address_scores_low() {
        let s = address_match_score(
            "4732 W Davis Rd, Glendale, AZ 85306",
            "900 E Camelback Ave, Phoenix, AZ 85014",
        );
        assert!(s < 0.5, "{s}");
    }

    #[test]
    fn test_empty_scores_zero() {
        assert_eq!(address_match_score("", "123 Main St"), 0.0);
    }

    #[test]
    fn test_outcome_http_status() {
        let outcome = AttemptOutcome::Failed {
            category: ErrorCategory::Permanent,
            message: "forbidden".into(),
            http_status: Some(403),
        };
        assert_eq!(outcome.http_status(), Some(403));
        assert_eq!(AttemptOutcome::NoCandidates.http_status(), None);
    }

    #[test]
    fn test_screenshot_source_url() {
        let c = Candidate::Screenshot {
            label: "hero".into(),
            bytes: vec![1, 2, 3],
        };
        assert_eq!(c.source_url("https://s/q"), "https://s/q#screenshot=hero");
        assert!(format!("{c:?}").contains("bytes: 3"));
    }
}
