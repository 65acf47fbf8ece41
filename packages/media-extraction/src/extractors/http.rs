//! Plain HTTP extractor.
//!
//! Fetches the listing page with a browser-like header profile and parses it
//! locally. No JavaScript rendering, so sites that build their gallery
//! client-side need [`BrowserExtractor`](super::BrowserExtractor) instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::error::{ExtractorError, ExtractorResult};
use crate::extractors::parse::{ListingParser, SiteProfile};
use crate::extractors::{ExtractionSession, ExtractionStrategy, FetchOutcome, SiteExtractor};
use crate::types::property::Property;

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Headers a desktop Chrome sends on a top-level navigation.
pub(crate) fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers
}

/// Build a client carrying the browser header profile.
pub(crate) fn browser_client(timeout: Duration) -> ExtractorResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(browser_headers())
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| ExtractorError::Other(Box::new(e)))
}

/// Listing extractor over plain HTTP.
pub struct HttpExtractor {
    profile: SiteProfile,
    parser: ListingParser,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(profile: SiteProfile) -> ExtractorResult<Self> {
        Ok(Self {
            parser: ListingParser::new(&profile)?,
            client: browser_client(Duration::from_secs(30))?,
            profile,
        })
    }

    /// Use a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    // Returns the body and the final URL after redirects.
    async fn fetch_html(&self, url: &str) -> ExtractorResult<(String, String)> {
        debug!(url = %url, source = %self.profile.name, "HTTP listing fetch");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractorError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Listing fetch rejected");
            return Err(ExtractorError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractorError::from_reqwest(url, e))?;
        Ok((body, final_url))
    }
}

#[async_trait]
impl SiteExtractor for HttpExtractor {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::HttpClient
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

        let (html, final_url) = self.fetch_html(&session.search_url).await?;
        let parsed = self.parser.parse(&html, &final_url);
        debug!(
            url = %final_url,
            candidates = parsed.candidates.len(),
            listing_address = ?parsed.address,
            "Parsed listing page"
        );

        Ok(FetchOutcome {
            listing_address: parsed.address,
            candidates: parsed.candidates,
        })
    }
}
