//! Priority-ordered fallback across site extractors.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::ChainError;
use crate::extractors::{
    AttemptOutcome, AttemptRecord, Candidate, ExtractionSession, ExtractionStrategy, SiteExtractor,
};
use crate::rate_limit::RateLimiter;
use crate::retry::{Classify, ErrorCategory};
use crate::types::property::Property;

pub const DEFAULT_ADDRESS_MATCH_FLOOR: f64 = 0.5;

/// Score used when a listing page shows no address to compare against.
pub const UNVERIFIED_ADDRESS_SCORE: f64 = 0.5;

/// The winning attempt of a chain run.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub source: String,
    pub strategy: ExtractionStrategy,
    pub search_url: String,
    pub listing_address: Option<String>,
    pub address_score: f64,
    pub candidates: Vec<Candidate>,
    /// Every attempt made, including the winning one
    pub attempts: Vec<AttemptRecord>,
}

/// Tries extractors best-stealth-first until one yields candidates for the
/// right address.
pub struct ExtractorChain {
    extractors: Vec<Arc<dyn SiteExtractor>>,
    address_match_floor: f64,
}

impl ExtractorChain {
    /// Extractors are ordered by strategy; ties keep their given order.
    pub fn new(mut extractors: Vec<Arc<dyn SiteExtractor>>) -> Self {
        extractors.sort_by_key(|e| e.strategy());
        Self {
            extractors,
            address_match_floor: DEFAULT_ADDRESS_MATCH_FLOOR,
        }
    }

    /// Raise the score a listing needs to win. Floors below
    /// [`DEFAULT_ADDRESS_MATCH_FLOOR`] are raised to it.
    pub fn with_address_match_floor(mut self, floor: f64) -> Self {
        self.address_match_floor = floor.clamp(DEFAULT_ADDRESS_MATCH_FLOOR, 1.0);
        self
    }

    pub fn address_match_floor(&self) -> f64 {
        self.address_match_floor
    }

    /// Keep only extractors whose source is listed. An empty list keeps all.
    pub fn retain_sources(mut self, enabled: &[String]) -> Self {
        if !enabled.is_empty() {
            self.extractors
                .retain(|e| enabled.iter().any(|s| s.eq_ignore_ascii_case(e.source())));
        }
        self
    }

    pub fn sources(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.source()).collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Run the chain for one property.
    pub async fn run(
        &self,
        property: &Property,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<ChainOutcome, ChainError> {
        if self.extractors.is_empty() {
            return Err(ChainError::NoExtractors);
        }

        let target = property.full_address();
        let mut attempts = Vec::with_capacity(self.extractors.len());

        for extractor in &self.extractors {
            let source = extractor.source().to_string();
            let strategy = extractor.strategy();
            let record = |search_url: Option<String>, outcome: AttemptOutcome| AttemptRecord {
                source: source.clone(),
                strategy,
                search_url,
                outcome,
                at: Utc::now(),
            };

            let search_url = match extractor.build_search_url(property) {
                Ok(url) => url,
                Err(e) => {
                    warn!(source = %source, error = %e, "Could not build search URL");
                    attempts.push(record(None, failed(&e, e.http_status())));
                    continue;
                }
            };

            let session = ExtractionSession {
                property: property.clone(),
                search_url: search_url.clone(),
                rate_limiter: rate_limiter.clone(),
            };

            let fetched = match extractor.fetch_candidates(&session).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    match e.category() {
                        ErrorCategory::Transient => {
                            warn!(source = %source, %strategy, error = %e, "Transient extractor failure, trying next")
                        }
                        ErrorCategory::Permanent => {
                            warn!(source = %source, %strategy, error = %e, "Permanent extractor failure, trying next")
                        }
                        ErrorCategory::Unknown => {
                            warn!(source = %source, %strategy, error = %e, category = "unknown", "Unclassified extractor failure, trying next")
                        }
                    }
                    attempts.push(record(Some(search_url), failed(&e, e.http_status())));
                    continue;
                }
            };

            if fetched.candidates.is_empty() {
                debug!(source = %source, %strategy, "No candidates");
                attempts.push(record(Some(search_url), AttemptOutcome::NoCandidates));
                continue;
            }

            let score = match fetched.listing_address.as_deref() {
                Some(shown) => extractor.score_address_match(&target, shown),
                None => UNVERIFIED_ADDRESS_SCORE,
            };
            if score < self.address_match_floor {
                info!(
                    source = %source,
                    %strategy,
                    score,
                    listing_address = ?fetched.listing_address,
                    "Listing address does not match, trying next"
                );
                attempts.push(record(Some(search_url), AttemptOutcome::AddressMismatch { score }));
                continue;
            }

            attempts.push(record(
                Some(search_url.clone()),
                AttemptOutcome::Success {
                    candidates: fetched.candidates.len(),
                },
            ));
            info!(
                source = %source,
                %strategy,
                candidates = fetched.candidates.len(),
                score,
                "Extractor succeeded"
            );
            return Ok(ChainOutcome {
                source,
                strategy,
                search_url,
                listing_address: fetched.listing_address,
                address_score: score,
                candidates: fetched.candidates,
                attempts,
            });
        }

        Err(ChainError::Exhausted {
            address: target,
            attempts,
        })
    }
}

fn failed<E: Classify + std::fmt::Display>(error: &E, http_status: Option<u16>) -> AttemptOutcome {
    AttemptOutcome::Failed {
        category: error.category(),
        message: error.to_string(),
        http_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractorError;
    use crate::rate_limit::RateLimitConfig;
    use crate::testing::MockExtractor;

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig::default().with_per_second(100)).unwrap())
    }

    fn property() -> Property {
        Property::new("4732 W Davis Rd", "Glendale", "AZ", "85306")
    }

    #[tokio::test]
    async fn test_sorted_by_priority() {
        let chain = ExtractorChain::new(vec![
            Arc::new(MockExtractor::new("remote", ExtractionStrategy::RemoteBrowser)),
            Arc::new(MockExtractor::new("http", ExtractionStrategy::HttpClient)),
            Arc::new(MockExtractor::new("stealth", ExtractionStrategy::StealthBrowser)),
        ]);
        assert_eq!(chain.sources(), vec!["stealth", "http", "remote"]);
    }

    #[tokio::test]
    async fn test_falls_back_after_transient_failure() {
        let stealth = Arc::new(
            MockExtractor::new("stealth", ExtractionStrategy::StealthBrowser).with_error(|| {
                ExtractorError::Timeout {
                    url: "https://s".into(),
                }
            }),
        );
        let http = Arc::new(
            MockExtractor::new("http", ExtractionStrategy::HttpClient)
                .with_candidates(vec![Candidate::url("https://cdn/1.jpg")]),
        );
        let chain = ExtractorChain::new(vec![stealth.clone(), http.clone()]);

        let outcome = chain.run(&property(), limiter()).await.unwrap();
        assert_eq!(outcome.source, "http");
        assert_eq!(outcome.attempts.len(), 2);
        assert!(matches!(
            outcome.attempts[0].outcome,
            AttemptOutcome::Failed { category: ErrorCategory::Transient, .. }
        ));
        assert_eq!(stealth.call_count(), 1);
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_and_mismatched_are_skipped() {
        let empty = Arc::new(MockExtractor::new("stealth", ExtractionStrategy::StealthBrowser));
        let wrong = Arc::new(
            MockExtractor::new("http", ExtractionStrategy::HttpClient)
                .with_candidates(vec![Candidate::url("https://cdn/wrong.jpg")])
                .with_listing_address("900 E Camelback Ave, Phoenix, AZ 85014"),
        );
        let right = Arc::new(
            MockExtractor::new("remote", ExtractionStrategy::RemoteBrowser)
                .with_candidates(vec![Candidate::url("https://cdn/right.jpg")])
                .with_listing_address("4732 West Davis Road, Glendale, AZ 85306"),
        );
        let chain = ExtractorChain::new(vec![empty, wrong, right]);

        let outcome = chain.run(&property(), limiter()).await.unwrap();
        assert_eq!(outcome.source, "remote");
        assert_eq!(outcome.address_score, 1.0);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::NoCandidates);
        assert!(matches!(outcome.attempts[1].outcome, AttemptOutcome::AddressMismatch { .. }));
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Arc::new(
            MockExtractor::new("a", ExtractionStrategy::HttpClient)
                .with_candidates(vec![Candidate::url("https://cdn/a.jpg")]),
        );
        let b = Arc::new(
            MockExtractor::new("b", ExtractionStrategy::HttpClient)
                .with_candidates(vec![Candidate::url("https://cdn/b.jpg")]),
        );
        let chain = ExtractorChain::new(vec![a, b.clone()]);
        let outcome = chain.run(&property(), limiter()).await.unwrap();
        assert_eq!(outcome.source, "a");
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_reports_attempts() {
        let blocked = Arc::new(
            MockExtractor::new("http", ExtractionStrategy::HttpClient).with_error(|| {
                ExtractorError::HttpStatus {
                    status: 403,
                    url: "https://s".into(),
                }
            }),
        );
        let chain = ExtractorChain::new(vec![blocked]);
        let err = chain.run(&property(), limiter()).await.unwrap_err();
        assert_eq!(err.last_http_status(), Some(403));
        match err {
            ChainError::Exhausted { attempts, .. } => assert_eq!(attempts.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_extractors() {
        let chain = ExtractorChain::new(vec![]);
        assert!(matches!(
            chain.run(&property(), limiter()).await,
            Err(ChainError::NoExtractors)
        ));
    }

    #[test]
    fn test_address_match_floor_never_drops_below_default() {
        let chain = || ExtractorChain::new(vec![]);
        assert_eq!(chain().with_address_match_floor(0.1).address_match_floor(), 0.5);
        assert_eq!(chain().with_address_match_floor(0.8).address_match_floor(), 0.8);
        assert_eq!(chain().with_address_match_floor(1.5).address_match_floor(), 1.0);
    }

    #[tokio::test]
    async fn test_low_floor_still_rejects_mismatch() {
        let wrong = Arc::new(
            MockExtractor::new("http", ExtractionStrategy::HttpClient)
                .with_candidates(vec![Candidate::url("https://cdn/wrong.jpg")])
                .with_listing_address("900 E Camelback Ave, Phoenix, AZ 85014"),
        );
        let chain = ExtractorChain::new(vec![wrong]).with_address_match_floor(0.0);

        let err = chain.run(&property(), limiter()).await.unwrap_err();
        match err {
            ChainError::Exhausted { attempts, .. } => assert!(matches!(
                attempts[0].outcome,
                AttemptOutcome::AddressMismatch { score } if score < 0.5
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_retain_sources() {
        let chain = ExtractorChain::new(vec![
            Arc::new(MockExtractor::new("zillow", ExtractionStrategy::HttpClient)),
            Arc::new(MockExtractor::new("redfin", ExtractionStrategy::HttpClient)),
        ])
        .retain_sources(&["Redfin".to_string()]);
        assert_eq!(chain.sources(), vec!["redfin"]);
    }
}
