//! Image downloads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ExtractorError, ExtractorResult};
use crate::extractors::http::BROWSER_USER_AGENT;
use crate::rate_limit::RateLimiter;

/// Largest image body accepted, in bytes.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

/// Downloads raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> ExtractorResult<Vec<u8>>;
}

/// Rate-limited reqwest downloader.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> ExtractorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| ExtractorError::Other(Box::new(e)))?;
        Ok(Self {
            client,
            rate_limiter,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> ExtractorResult<Vec<u8>> {
        url::Url::parse(url).map_err(|_| ExtractorError::InvalidUrl {
            url: url.to_string(),
        })?;
        self.rate_limiter.acquire_for_url(url).await?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "image/avif,image/webp,image/*,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| ExtractorError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.starts_with("image/") && !content_type.starts_with("application/octet-stream") {
                return Err(ExtractorError::Validation(format!(
                    "{url} served {content_type}, not an image"
                )));
            }
        }
        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(ExtractorError::Validation(format!(
                    "{url} is {len} bytes, over the {} byte limit",
                    self.max_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractorError::from_reqwest(url, e))?;
        if bytes.len() > self.max_bytes {
            return Err(ExtractorError::Validation(format!(
                "{url} is {} bytes, over the {} byte limit",
                bytes.len(),
                self.max_bytes
            )));
        }
        debug!(url = %url, size = bytes.len(), "Image downloaded");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitConfig;

    #[tokio::test]
    async fn test_invalid_url_rejected_before_request() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()).unwrap());
        let fetcher = HttpImageFetcher::new(limiter.clone()).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidUrl { .. }));
        assert_eq!(limiter.usage("unknown").requests_today, 0);
    }
}
