//! Testing utilities including mock implementations.
//!
//! Useful for exercising the pipeline without touching real listing sites:
//! canned extractors, an in-memory image fetcher, and generated images.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ExtractorError, ExtractorResult};
use crate::extractors::{
    Candidate, ExtractionSession, ExtractionStrategy, FetchOutcome, ImageFetcher, SiteExtractor,
};
use crate::types::property::Property;

type ErrorFactory = Arc<dyn Fn() -> ExtractorError + Send + Sync>;

/// A PNG of `width`x`height` whose pixels depend only on `seed`.
///
/// Different seeds give visibly different images, so their standardized
/// bytes (and content hashes) differ too.
pub fn sample_image_bytes(seed: u64, width: u32, height: u32) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let fx: u32 = rng.gen_range(1..7);
    let fy: u32 = rng.gen_range(1..7);
    let base: [u8; 3] = [rng.gen(), rng.gen(), rng.gen()];
    let block: u32 = rng.gen_range(8..32);

    let img = RgbImage::from_fn(width, height, |x, y| {
        let gx = ((x * 255 * fx) / width.max(1)) as u8;
        let gy = ((y * 255 * fy) / height.max(1)) as u8;
        let checker = if ((x / block) + (y / block)) % 2 == 0 { 0 } else { 96 };
        Rgb([
            base[0].wrapping_add(gx),
            base[1].wrapping_add(gy),
            base[2].wrapping_add(checker),
        ])
    });

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("PNG encoding to memory cannot fail");
    out.into_inner()
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("media_extraction=debug"))
        .try_init();
}

/// A scripted site extractor.
///
/// Returns canned candidates per property address (or a default set),
/// optionally fails, and records every call for assertions.
pub struct MockExtractor {
    source: String,
    strategy: ExtractionStrategy,
    default_candidates: Vec<Candidate>,
    listings: Arc<RwLock<HashMap<String, Vec<Candidate>>>>,
    listing_address: Option<String>,
    error: Option<ErrorFactory>,
    failing: Arc<RwLock<HashMap<String, ErrorFactory>>>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockExtractor {
    pub fn new(source: impl Into<String>, strategy: ExtractionStrategy) -> Self {
        Self {
            source: source.into(),
            strategy,
            default_candidates: Vec::new(),
            listings: Arc::new(RwLock::new(HashMap::new())),
            listing_address: None,
            error: None,
            failing: Arc::new(RwLock::new(HashMap::new())),
            delay: None,
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Candidates returned for any property without a specific listing.
    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.default_candidates = candidates;
        self
    }

    /// Candidates returned for one property.
    pub fn with_listing(self, property: &Property, candidates: Vec<Candidate>) -> Self {
        self.listings
            .write()
            .unwrap()
            .insert(property.full_address(), candidates);
        self
    }

    /// Address shown on every listing page.
    pub fn with_listing_address(mut self, address: impl Into<String>) -> Self {
        self.listing_address = Some(address.into());
        self
    }

    /// Fail every call with the error `make` builds.
    pub fn with_error(
        mut self,
        make: impl Fn() -> ExtractorError + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(make));
        self
    }

    /// Fail calls for one property only.
    pub fn with_error_for(
        self,
        property: &Property,
        make: impl Fn() -> ExtractorError + Send + Sync + 'static,
    ) -> Self {
        self.failing
            .write()
            .unwrap()
            .insert(property.full_address(), Arc::new(make));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Addresses requested, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl SiteExtractor for MockExtractor {
    fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn build_search_url(&self, property: &Property) -> ExtractorResult<String> {
        Ok(format!(
            "https://{}.test/search?q={}",
            self.source,
            property.property_hash()
        ))
    }

    async fn fetch_candidates(&self, session: &ExtractionSession) -> ExtractorResult<FetchOutcome> {
        let address = session.property.full_address();
        self.calls.write().unwrap().push(address.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failing.read().unwrap().get(&address).cloned();
        if let Some(make) = failure.or_else(|| self.error.clone()) {
            return Err(make());
        }

        let candidates = self
            .listings
            .read()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_else(|| self.default_candidates.clone());

        Ok(FetchOutcome {
            listing_address: self.listing_address.clone(),
            candidates,
        })
    }
}

/// In-memory image downloads keyed by URL.
///
/// Unknown URLs answer HTTP 404.
#[derive(Default, Clone)]
pub struct MockImageFetcher {
    images: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    statuses: Arc<RwLock<HashMap<String, u16>>>,
    // URL -> transient failures left before success
    flaky: Arc<RwLock<HashMap<String, u32>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.images.write().unwrap().insert(url.into(), bytes);
        self
    }

    /// Answer `url` with an HTTP error status.
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.statuses.write().unwrap().insert(url.into(), status);
        self
    }

    /// Time out `failures` times before serving `url` normally.
    pub fn with_flaky(self, url: impl Into<String>, failures: u32) -> Self {
        self.flaky.write().unwrap().insert(url.into(), failures);
        self
    }

    /// Bytes served for `url`, if any.
    pub fn image(&self, url: &str) -> Option<Vec<u8>> {
        self.images.read().unwrap().get(url).cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.read().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> ExtractorResult<Vec<u8>> {
        self.calls.write().unwrap().push(url.to_string());

        if let Some(remaining) = self.flaky.write().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ExtractorError::Timeout {
                    url: url.to_string(),
                });
            }
        }
        if let Some(status) = self.statuses.read().unwrap().get(url) {
            return Err(ExtractorError::HttpStatus {
                status: *status,
                url: url.to_string(),
            });
        }
        self.images
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractorError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_images_are_deterministic_and_distinct() {
        assert_eq!(sample_image_bytes(1, 64, 64), sample_image_bytes(1, 64, 64));
        assert_ne!(sample_image_bytes(1, 64, 64), sample_image_bytes(2, 64, 64));
        let img = image::load_from_memory(&sample_image_bytes(3, 120, 80)).unwrap();
        assert_eq!((img.width(), img.height()), (120, 80));
    }

    #[tokio::test]
    async fn test_mock_fetcher() {
        let fetcher = MockImageFetcher::new()
            .with_image("https://a/1.jpg", vec![1, 2, 3])
            .with_status("https://a/blocked.jpg", 403)
            .with_flaky("https://a/1.jpg", 1);

        assert!(matches!(
            fetcher.fetch("https://a/1.jpg").await,
            Err(ExtractorError::Timeout { .. })
        ));
        assert_eq!(fetcher.fetch("https://a/1.jpg").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(
            fetcher.fetch("https://a/blocked.jpg").await.unwrap_err().http_status(),
            Some(403)
        );
        assert_eq!(
            fetcher.fetch("https://a/missing.jpg").await.unwrap_err().http_status(),
            Some(404)
        );
        assert_eq!(fetcher.calls_for("https://a/1.jpg"), 2);
    }
}
