//! Remote rendering service extractor.
//!
//! POSTs the listing URL to a hosted browser API and parses the HTML it
//! returns. One request per listing; there is no job polling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credentials::RemoteBrowserCredentials;
use crate::error::{ExtractorError, ExtractorResult};
use crate::extractors::parse::{ListingParser, SiteProfile};
use crate::extractors::{ExtractionSession, ExtractionStrategy, FetchOutcome, SiteExtractor};
use crate::types::property::Property;

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    formats: [&'static str; 1],
    #[serde(rename = "waitFor")]
    wait_for_ms: u64,
}

#[derive(Deserialize)]
struct RenderResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    data: Option<RenderData>,
}

#[derive(Deserialize)]
struct RenderData {
    html: Option<String>,
    #[serde(rename = "rawHtml")]
    raw_html: Option<String>,
    metadata: Option<RenderMetadata>,
}

#[derive(Deserialize)]
struct RenderMetadata {
    #[serde(rename = "sourceURL")]
    source_url: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
}

pub struct RemoteBrowserExtractor {
    profile: SiteProfile,
    parser: ListingParser,
    client: Client,
    credentials: RemoteBrowserCredentials,
    wait_for: Duration,
}

impl RemoteBrowserExtractor {
    pub fn new(profile: SiteProfile, credentials: RemoteBrowserCredentials) -> ExtractorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ExtractorError::Other(Box::new(e)))?;

        Ok(Self {
            parser: ListingParser::new(&profile)?,
            profile,
            client,
            credentials,
            wait_for: Duration::from_secs(2),
        })
    }

    /// How long the remote browser waits for client-side rendering.
    pub fn with_wait_for(mut self, wait_for: Duration) -> Self {
        self.wait_for = wait_for;
        self
    }

    async fn render(&self, url: &str) -> ExtractorResult<(String, String)> {
        let endpoint = &self.credentials.endpoint;
        let request = RenderRequest {
            url,
            formats: ["rawHtml"],
            wait_for_ms: self.wait_for.as_millis() as u64,
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(self.credentials.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractorError::from_reqwest(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "Remote browser API error");
            return Err(ExtractorError::HttpStatus {
                status: status.as_u16(),
                url: endpoint.clone(),
            });
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::Parse {
                url: endpoint.clone(),
                reason: e.to_string(),
            })?;

        if !body.success {
            return Err(ExtractorError::Browser(
                body.error
                    .unwrap_or_else(|| "remote render failed".to_string()),
            ));
        }
        let data = body.data.ok_or_else(|| ExtractorError::Parse {
            url: url.to_string(),
            reason: "response has no data".to_string(),
        })?;

        let (final_url, site_status) = match data.metadata {
            Some(m) => (m.source_url, m.status_code),
            None => (None, None),
        };
        // The API can succeed while the listing site itself refused us.
        if let Some(status) = site_status.filter(|s| *s >= 400) {
            return Err(ExtractorError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        let html = data.raw_html.or(data.html).ok_or_else(|| ExtractorError::Parse {
            url: url.to_string(),
            reason: "response has no HTML".to_string(),
        })?;
        Ok((html, final_url.unwrap_or_else(|| url.to_string())))
    }
}

#[async_trait]
impl SiteExtractor for RemoteBrowserExtractor {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::RemoteBrowser
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

        let (html, final_url) = self.render(&session.search_url).await?;
        let parsed = self.parser.parse(&html, &final_url);
        debug!(
            url = %final_url,
            candidates = parsed.candidates.len(),
            "Remote render parsed"
        );

        Ok(FetchOutcome {
            listing_address: parsed.address,
            candidates: parsed.candidates,
        })
    }
}
