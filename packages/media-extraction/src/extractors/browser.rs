//! Stealth browser extractor.
//!
//! The browser itself lives outside this crate behind [`BrowserDriver`]; we
//! only hand it a URL and parse what it rendered.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExtractorResult;
use crate::extractors::parse::{ListingParser, SiteProfile};
use crate::extractors::{
    Candidate, ExtractionSession, ExtractionStrategy, FetchOutcome, SiteExtractor,
};
use crate::types::property::Property;

/// A fully rendered page.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub html: String,
    /// URL after redirects and client-side navigation
    pub final_url: String,
    /// `(label, image bytes)` captured by the driver
    pub screenshots: Vec<(String, Vec<u8>)>,
}

/// Headless browser capable of rendering a page.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn render(&self, url: &str) -> ExtractorResult<RenderedPage>;
}

pub struct BrowserExtractor {
    profile: SiteProfile,
    parser: ListingParser,
    driver: Arc<dyn BrowserDriver>,
    include_screenshots: bool,
}

impl BrowserExtractor {
    pub fn new(profile: SiteProfile, driver: Arc<dyn BrowserDriver>) -> ExtractorResult<Self> {
        Ok(Self {
            parser: ListingParser::new(&profile)?,
            profile,
            driver,
            include_screenshots: true,
        })
    }

    /// Whether driver screenshots become candidates (default true).
    pub fn with_screenshots(mut self, include: bool) -> Self {
        self.include_screenshots = include;
        self
    }
}

#[async_trait]
impl SiteExtractor for BrowserExtractor {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::StealthBrowser
    }

    fn source(&self) -> &str {
        &self.profile.name
    }

    fn build_search_url(&self, property: &Property) -> ExtractorResult<String> {
        self.profile.search_url(property)
    }

    async fn fetch_candidates(&self, session: &ExtractionSession) -> ExtractorResult<FetchOutcome> {
        session
            .rate_limiter
            .acquire_for_url(&session.search_url)
            .await?;

        let page = self.driver.render(&session.search_url).await?;
        let base = if page.final_url.is_empty() {
            session.search_url.as_str()
        } else {
            page.final_url.as_str()
        };
        let parsed = self.parser.parse(&page.html, base);

        let mut candidates = parsed.candidates;
        if self.include_screenshots {
            candidates.extend(
                page.screenshots
                    .into_iter()
                    .map(|(label, bytes)| Candidate::Screenshot { label, bytes }),
            );
        }
        debug!(
            url = %base,
            candidates = candidates.len(),
            source = %self.profile.name,
            "Rendered listing page"
        );

        Ok(FetchOutcome {
            listing_address: parsed.address,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{RateLimitConfig, RateLimiter};

    struct StaticDriver;

    #[async_trait]
    impl BrowserDriver for StaticDriver {
        async fn render(&self, url: &str) -> ExtractorResult<RenderedPage> {
            Ok(RenderedPage {
                html: r#"<h1>1 A St, Phoenix, AZ 85001</h1><img src="/a.jpg" alt="Front">"#.into(),
                final_url: url.to_string(),
                screenshots: vec![("hero".into(), vec![0xFF, 0xD8])],
            })
        }
    }

    #[tokio::test]
    async fn test_render_and_parse() {
        let extractor = BrowserExtractor::new(
            SiteProfile::new("listings", "https://listings.example/s?q={address}"),
            Arc::new(StaticDriver),
        )
        .unwrap();
        let property = Property::new("1 A St", "Phoenix", "AZ", "85001");
        let session = ExtractionSession {
            search_url: extractor.build_search_url(&property).unwrap(),
            property,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::default()).unwrap()),
        };

        let outcome = extractor.fetch_candidates(&session).await.unwrap();
        assert_eq!(outcome.listing_address.as_deref(), Some("1 A St, Phoenix, AZ 85001"));
        assert_eq!(outcome.candidates.len(), 2);
        assert!(matches!(outcome.candidates[1], Candidate::Screenshot { .. }));
        assert_eq!(extractor.strategy(), ExtractionStrategy::StealthBrowser);
    }
}
