//! Batch extraction across many properties.
//!
//! Each property runs under its own lease: search via the extractor chain,
//! download candidates, standardize them on the image pool, then persist
//! everything in one commit. Commits reload every store under the manifest
//! lease, so concurrent runs (in this process or another) never clobber each
//! other's writes.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::PipelineConfig;
use crate::error::{ChainError, ConfigError, LockError, PipelineError, Result};
use crate::extractors::{
    AttemptOutcome, AttemptRecord, BrowserDriver, BrowserExtractor, Candidate, ChainOutcome,
    ExtractorChain, HttpExtractor, HttpImageFetcher, ImageFetcher, RemoteBrowserExtractor,
    SiteExtractor,
};
use crate::lease::FileLock;
use crate::processing::hashing::{format_hash, parse_hash};
use crate::processing::{
    find_near_duplicates, Fingerprint, ImageProcessingPool, NearDuplicate, ProcessedImage,
};
use crate::rate_limit::RateLimiter;
use crate::reconcile::Reconciler;
use crate::retry::{retry_with_backoff, Classify, ErrorCategory, ErrorClassifier};
use crate::stores::{ManifestStore, StorePaths, StoreSet, UrlStatus, UrlTracker};
use crate::types::category::categorize_caption;
use crate::types::manifest::{ImageStatus, ManifestEntry};
use crate::types::property::Property;
use crate::types::run::{
    DeduplicationStats, ExtractionResult, ExtractionRun, PipelineStatistics, PropertyStats,
};
use crate::types::state::{ExtractionPhase, ExtractionStatus, FailureRecord};
use crate::validation::Validators;

/// Build the extractor chain described by `config`.
///
/// Every site profile gets an HTTP extractor, plus a stealth browser
/// extractor when `browser` is given and a remote one when remote
/// credentials are configured.
pub fn build_chain(
    config: &PipelineConfig,
    browser: Option<Arc<dyn BrowserDriver>>,
) -> Result<ExtractorChain> {
    let mut extractors: Vec<Arc<dyn SiteExtractor>> = Vec::new();
    for profile in config.site_profiles()? {
        if let Some(driver) = &browser {
            extractors.push(Arc::new(BrowserExtractor::new(profile.clone(), driver.clone())?));
        }
        extractors.push(Arc::new(HttpExtractor::new(profile.clone())?));
        if let Some(credentials) = &config.remote_browser {
            extractors.push(Arc::new(RemoteBrowserExtractor::new(
                profile,
                credentials.clone(),
            )?));
        }
    }
    Ok(ExtractorChain::new(extractors))
}

/// How one property ended.
enum PropertyOutcome {
    Completed(PropertyStats),
    Failed(PropertyStats),
    /// Another worker holds its lease
    Skipped,
}

/// Bytes ready for standardization.
struct Fetched {
    source_url: String,
    caption: Option<String>,
    bytes: Vec<u8>,
    downloaded_at: DateTime<Utc>,
}

/// A standardized image waiting to be persisted.
struct Processed {
    source_url: String,
    caption: Option<String>,
    image: ProcessedImage,
    downloaded_at: DateTime<Utc>,
}

enum Persisted {
    /// New content written to disk
    New,
    /// Content already on disk for another binding
    Shared,
    /// This property already holds this content from the same source
    AlreadyBound,
}

/// Drives extraction for batches of properties.
pub struct Orchestrator {
    config: PipelineConfig,
    paths: StorePaths,
    chain: ExtractorChain,
    fetcher: Arc<dyn ImageFetcher>,
    pool: ImageProcessingPool,
    rate_limiter: Arc<RateLimiter>,
    validators: Validators,
    // Serializes commits within this process; the manifest lease covers other processes.
    commit_lock: Mutex<()>,
}

impl Orchestrator {
    /// Start an orchestrator with an explicit chain and image fetcher.
    ///
    /// The chain is filtered to `config.enabled_sources` and given the
    /// configured address match floor. Starts the image pool.
    pub fn new(
        config: PipelineConfig,
        chain: ExtractorChain,
        fetcher: Arc<dyn ImageFetcher>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        config.validate()?;
        let chain = chain
            .retain_sources(&config.enabled_sources)
            .with_address_match_floor(config.address_match_floor);
        let workers = config
            .worker_threads
            .unwrap_or_else(ImageProcessingPool::default_worker_count);
        let pool = ImageProcessingPool::start(workers, config.standardize_options())?;
        let validators = Validators::new().with_min_dimension(config.min_dimension);

        info!(
            base_dir = %config.base_dir.display(),
            sources = ?chain.sources(),
            max_concurrent = config.max_concurrent_properties,
            workers,
            "Orchestrator ready"
        );

        Ok(Self {
            paths: StorePaths::new(&config.base_dir),
            config,
            chain,
            fetcher,
            pool,
            rate_limiter,
            validators,
            commit_lock: Mutex::new(()),
        })
    }

    /// Start an orchestrator wired entirely from `config`.
    pub fn from_config(
        config: PipelineConfig,
        browser: Option<Arc<dyn BrowserDriver>>,
    ) -> Result<Self> {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone())?);
        let chain = build_chain(&config, browser)?;
        let fetcher = Arc::new(HttpImageFetcher::new(rate_limiter.clone())?);
        Self::new(config, chain, fetcher, rate_limiter)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Reconciler over the same base directory and manifest lease settings.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(&self.paths.base_dir).with_lease_options(self.config.manifest_lease.clone())
    }

    /// Stop the image pool. Further extraction fails per image.
    pub async fn shutdown(&self) {
        self.pool.stop().await;
    }

    /// Extract images for every property.
    ///
    /// With `resume`, stale `in_progress` entries are reset first and
    /// completed properties are skipped unless `force` is set. A failing
    /// property never aborts the run.
    pub async fn extract_all(
        &self,
        properties: &[Property],
        resume: bool,
        force: bool,
    ) -> Result<ExtractionResult> {
        let run = ExtractionRun::new(properties.len(), resume, force);
        let span = info_span!("extraction_run", run_id = %run.run_id);
        self.extract_all_inner(properties, run).instrument(span).await
    }

    async fn extract_all_inner(
        &self,
        properties: &[Property],
        run: ExtractionRun,
    ) -> Result<ExtractionResult> {
        let started = Instant::now();
        info!(
            properties = run.property_count,
            resume = run.resume,
            force = run.force,
            "Starting extraction run"
        );

        let staleness = chrono::Duration::from_std(self.config.staleness_window).map_err(|_| {
            ConfigError::Invalid {
                key: "staleness_window".into(),
                value: format!("{:?}", self.config.staleness_window),
            }
        })?;

        let (resume, force) = (run.resume, run.force);
        let batch = properties.to_vec();
        let (to_process, skipped) = self
            .commit(move |stores| {
                if resume {
                    let reset = stores.state.prepare_resume(staleness);
                    if reset > 0 {
                        info!(reset, "Reset stale in-progress properties");
                    }
                }
                let (todo, done) = stores.state.work_list(&batch, resume, force);
                Ok((
                    todo.into_iter().cloned().collect::<Vec<_>>(),
                    done.into_iter().cloned().collect::<Vec<_>>(),
                ))
            })
            .await?;

        let mut result = ExtractionResult::new(run.run_id.clone(), properties.len());
        result.skipped = skipped.len();
        for property in &skipped {
            debug!(address = %property.full_address(), "Already completed, skipping");
        }

        let outcomes: Vec<PropertyOutcome> = stream::iter(&to_process)
            .map(|property| self.extract_property(property, &run))
            .buffer_unordered(self.config.max_concurrent_properties.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            match outcome {
                PropertyOutcome::Completed(stats) => {
                    result.completed += 1;
                    result.absorb(stats);
                }
                PropertyOutcome::Failed(stats) => {
                    result.failed += 1;
                    result.absorb(stats);
                }
                PropertyOutcome::Skipped => result.skipped += 1,
            }
        }
        result.duration = started.elapsed();

        info!(
            completed = result.completed,
            failed = result.failed,
            skipped = result.skipped,
            images = result.total_images,
            unique = result.unique_images,
            duplicates = result.duplicates,
            failed_downloads = result.failed_downloads,
            duration_ms = result.duration.as_millis() as u64,
            "Extraction run finished"
        );
        Ok(result)
    }

    async fn extract_property(&self, property: &Property, run: &ExtractionRun) -> PropertyOutcome {
        let span = info_span!(
            "property",
            address = %property.full_address(),
            property_hash = %property.property_hash(),
        );
        self.extract_property_leased(property, run)
            .instrument(span)
            .await
    }

    async fn extract_property_leased(
        &self,
        property: &Property,
        run: &ExtractionRun,
    ) -> PropertyOutcome {
        let lock = FileLock::for_property(
            &self.paths.locks_dir,
            &property.property_hash(),
            self.config.property_lease.clone(),
        );
        let guard = match lock.acquire().await {
            Ok(guard) => guard,
            Err(LockError::AcquisitionTimeout { waited, .. }) => {
                warn!(?waited, "Property lease held elsewhere, skipping");
                return PropertyOutcome::Skipped;
            }
            Err(e) => return self.fail_property(property, e.into(), PropertyStats::default()).await,
        };

        let outcome = match self.run_property(property, run).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail_property(property, e, PropertyStats::default()).await,
        };

        if let Err(e) = guard.release() {
            warn!(error = %e, "Failed to release property lease");
        }
        outcome
    }

    async fn run_property(&self, property: &Property, run: &ExtractionRun) -> Result<PropertyOutcome> {
        let hash = property.property_hash();
        let (owned, run_id) = (property.clone(), run.run_id.clone());
        self.commit(move |stores| {
            stores.state.mark_in_progress(&owned, &run_id);
            Ok(())
        })
        .await?;

        let chain_outcome = match self.chain.run(property, self.rate_limiter.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let failure = chain_failure(&e);
                warn!(
                    error = %e,
                    category = %failure.category,
                    advice = %failure.message,
                    "No extractor produced images"
                );
                let attempts = match &e {
                    ChainError::Exhausted { attempts, .. } => attempts.clone(),
                    ChainError::NoExtractors => Vec::new(),
                };
                let (owned, hash, run_id) = (property.clone(), hash.clone(), run.run_id.clone());
                self.commit(move |stores| {
                    record_attempts(&mut stores.urls, &attempts, &hash, &run_id);
                    stores.state.mark_failed(&owned, failure);
                    Ok(())
                })
                .await?;
                return Ok(PropertyOutcome::Failed(PropertyStats::default()));
            }
        };

        let (attempts, phase_hash, run_id) =
            (chain_outcome.attempts.clone(), hash.clone(), run.run_id.clone());
        self.commit(move |stores| {
            record_attempts(&mut stores.urls, &attempts, &phase_hash, &run_id);
            stores.state.set_phase(&phase_hash, ExtractionPhase::Downloading);
            Ok(())
        })
        .await?;

        let mut stats = PropertyStats::default();
        let mut failures: Vec<(String, String)> = Vec::new();
        let fetched = self
            .download_candidates(&chain_outcome, &mut stats, &mut failures)
            .await;

        let phase_hash = hash.clone();
        self.commit(move |stores| {
            stores.state.set_phase(&phase_hash, ExtractionPhase::Processing);
            Ok(())
        })
        .await?;
        let processed = self
            .process_downloads(fetched, &chain_outcome.source, &mut stats, &mut failures)
            .await;

        let writer = ImageWriter {
            validators: self.validators.clone(),
            base_dir: self.paths.base_dir.clone(),
        };
        let (owned, run) = (property.clone(), run.clone());
        self.commit(move |stores| {
            Ok(writer.persist(stores, &owned, &chain_outcome, processed, failures, stats, &run))
        })
        .await
    }

    async fn download_candidates(
        &self,
        outcome: &ChainOutcome,
        stats: &mut PropertyStats,
        failures: &mut Vec<(String, String)>,
    ) -> Vec<Fetched> {
        let mut fetched = Vec::new();
        for candidate in outcome
            .candidates
            .iter()
            .take(self.config.max_images_per_property)
        {
            let source_url = candidate.source_url(&outcome.search_url);
            let bytes = match candidate {
                Candidate::Url { url, .. } => {
                    retry_with_backoff(&self.config.retry, || self.fetcher.fetch(url)).await
                }
                Candidate::Screenshot { bytes, .. } => Ok(bytes.clone()),
            };
            match bytes {
                Ok(bytes) => fetched.push(Fetched {
                    source_url,
                    caption: candidate.caption().map(str::to_string),
                    bytes,
                    downloaded_at: Utc::now(),
                }),
                Err(e) => {
                    warn!(url = %source_url, error = %e, category = %e.category(), "Download failed");
                    stats.failed_downloads += 1;
                    stats.source(&outcome.source).failed += 1;
                    failures.push((source_url, e.to_string()));
                }
            }
        }
        fetched
    }

    async fn process_downloads(
        &self,
        fetched: Vec<Fetched>,
        source: &str,
        stats: &mut PropertyStats,
        failures: &mut Vec<(String, String)>,
    ) -> Vec<Processed> {
        let results = futures::future::join_all(fetched.into_iter().map(|item| async move {
            let result = self.pool.process(item.bytes).await;
            (item.source_url, item.caption, item.downloaded_at, result)
        }))
        .await;

        let mut processed = Vec::with_capacity(results.len());
        for (source_url, caption, downloaded_at, result) in results {
            match result {
                Ok(image) => processed.push(Processed {
                    source_url,
                    caption,
                    image,
                    downloaded_at,
                }),
                Err(e) => {
                    warn!(url = %source_url, error = %e, "Image rejected");
                    stats.failed_downloads += 1;
                    stats.source(source).failed += 1;
                    failures.push((source_url, e.to_string()));
                }
            }
        }
        processed
    }

    async fn fail_property(
        &self,
        property: &Property,
        error: PipelineError,
        stats: PropertyStats,
    ) -> PropertyOutcome {
        let failure = FailureRecord::new(error.category(), error.to_string(), None);
        warn!(error = %error, category = %failure.category, "Property failed");
        let owned = property.clone();
        let recorded = self
            .commit(move |stores| {
                stores.state.mark_failed(&owned, failure);
                Ok(())
            })
            .await;
        if let Err(e) = recorded {
            error!(error = %e, "Could not record property failure");
        }
        PropertyOutcome::Failed(stats)
    }

    /// Reload every store under the manifest lease, mutate, and save.
    ///
    /// Loading, mutation and saving run on the blocking pool.
    async fn commit<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut StoreSet) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _local = self.commit_lock.lock().await;
        let lease = FileLock::for_manifest(&self.paths.locks_dir, self.config.manifest_lease.clone())
            .acquire()
            .await?;

        let paths = self.paths.clone();
        let span = Span::current();
        let committed = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut stores = StoreSet::load(&paths)?;
            let value = mutate(&mut stores)?;
            stores.save(&paths)?;
            Ok::<_, PipelineError>(value)
        })
        .await;

        if let Err(e) = lease.release() {
            warn!(error = %e, "Failed to release manifest lease");
        }
        committed?
    }

    /// Manifest entries for `property`.
    pub fn get_property_images(&self, property: &Property) -> Result<Vec<ManifestEntry>> {
        let manifest = ManifestStore::load(&self.paths.manifest)?;
        Ok(manifest.entries_for(&property.full_address()).to_vec())
    }

    /// Aggregate statistics over the persisted stores.
    pub fn get_statistics(&self) -> Result<PipelineStatistics> {
        let stores = StoreSet::load(&self.paths)?;

        let mut images_by_source = BTreeMap::new();
        for entry in stores.manifest.entries() {
            *images_by_source.entry(entry.source.clone()).or_insert(0) += 1;
        }

        let total_entries = stores.manifest.len();
        let unique_files = stores.content.unique_count();
        let near_duplicate_pairs = find_near_duplicates(
            &fingerprints(stores.manifest.entries()),
            self.config.deduplication_threshold,
        )
        .len();

        Ok(PipelineStatistics {
            total_properties: stores.state.len().max(stores.manifest.property_count()),
            total_images: total_entries,
            completed: stores.state.count(ExtractionStatus::Completed),
            failed: stores.state.count(ExtractionStatus::Failed),
            images_by_source,
            deduplication_stats: DeduplicationStats {
                unique_files,
                total_entries,
                duplicate_entries: total_entries.saturating_sub(unique_files),
                near_duplicate_pairs,
            },
            last_updated: stores.state.last_updated(),
        })
    }

    /// Visually similar but byte-distinct images of `property`.
    ///
    /// Advisory only; nothing is merged.
    pub fn near_duplicates(&self, property: &Property) -> Result<Vec<NearDuplicate>> {
        let entries = self.get_property_images(property)?;
        Ok(find_near_duplicates(
            &fingerprints(entries.iter()),
            self.config.deduplication_threshold,
        ))
    }
}

/// Writes processed images into the stores inside a commit.
struct ImageWriter {
    validators: Validators,
    base_dir: PathBuf,
}

impl ImageWriter {
    /// Write every processed image and settle the property's state.
    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        stores: &mut StoreSet,
        property: &Property,
        outcome: &ChainOutcome,
        processed: Vec<Processed>,
        failures: Vec<(String, String)>,
        mut stats: PropertyStats,
        run: &ExtractionRun,
    ) -> PropertyOutcome {
        let address = property.full_address();
        let hash = property.property_hash();
        stores.state.set_phase(&hash, ExtractionPhase::Persisting);

        for (url, error) in failures {
            stores
                .urls
                .record(&url, &hash, &outcome.source, &run.run_id)
                .mark_failed(error);
        }

        for item in &processed {
            match self.persist_image(stores, &address, &hash, outcome, item, run) {
                Ok(Persisted::New) => {
                    stats.total_images += 1;
                    stats.unique_images += 1;
                    let source = stats.source(&outcome.source);
                    source.images += 1;
                    source.unique += 1;
                }
                Ok(Persisted::Shared) => {
                    stats.total_images += 1;
                    stats.duplicates += 1;
                    let source = stats.source(&outcome.source);
                    source.images += 1;
                    source.duplicates += 1;
                }
                Ok(Persisted::AlreadyBound) => {
                    stats.duplicates += 1;
                    stats.source(&outcome.source).duplicates += 1;
                }
                Err(e) => {
                    warn!(url = %item.source_url, error = %e, "Image not persisted");
                    stats.failed_downloads += 1;
                    stats.source(&outcome.source).failed += 1;
                    stores
                        .urls
                        .record(&item.source_url, &hash, &outcome.source, &run.run_id)
                        .mark_failed(e.to_string());
                }
            }
        }

        let image_count = stores.manifest.entries_for(&address).len();
        if image_count > 0 {
            stores.state.mark_completed(property, image_count);
            info!(
                source = %outcome.source,
                new = stats.unique_images,
                shared = stats.total_images - stats.unique_images,
                failed = stats.failed_downloads,
                image_count,
                "Property completed"
            );
            PropertyOutcome::Completed(stats)
        } else {
            let failure = FailureRecord::new(
                ErrorCategory::Permanent,
                format!(
                    "no usable images from {} ({} candidates, {} failed)",
                    outcome.source,
                    outcome.candidates.len(),
                    stats.failed_downloads
                ),
                None,
            );
            warn!(reason = %failure.message, "Property failed");
            stores.state.mark_failed(property, failure);
            PropertyOutcome::Failed(stats)
        }
    }

    fn persist_image(
        &self,
        stores: &mut StoreSet,
        address: &str,
        hash: &str,
        outcome: &ChainOutcome,
        item: &Processed,
        run: &ExtractionRun,
    ) -> Result<Persisted> {
        let image = &item.image;
        if stores
            .manifest
            .has_binding(hash, &image.content_hash, &outcome.source)
        {
            debug!(url = %item.source_url, content_hash = %image.content_hash, "Already bound to this property");
            stores
                .urls
                .record(&item.source_url, hash, &outcome.source, &run.run_id)
                .mark_duplicate(&image.content_hash, None);
            return Ok(Persisted::AlreadyBound);
        }

        let stored = stores.content.store(hash, image)?;
        let (location, subject) = categorize_caption(item.caption.as_deref());
        let entry = ManifestEntry {
            image_id: uuid::Uuid::new_v4().to_string(),
            property_address: address.to_string(),
            property_hash: hash.to_string(),
            source: outcome.source.clone(),
            source_url: item.source_url.clone(),
            local_path: stored.local_path.clone(),
            phash: format_hash(image.phash),
            dhash: format_hash(image.dhash),
            width: image.width,
            height: image.height,
            file_size_bytes: image.bytes.len() as u64,
            status: if stored.is_new {
                ImageStatus::Processed
            } else {
                ImageStatus::Duplicate
            },
            downloaded_at: item.downloaded_at,
            processed_at: Utc::now(),
            content_hash: image.content_hash.clone(),
            created_by_run_id: run.run_id.clone(),
            location: Some(location.clone()),
            subject: Some(subject.clone()),
        };
        let image_id = entry.image_id.clone();

        let checked = self
            .validators
            .validate_entry(&entry, &self.base_dir)
            .and_then(|_| stores.manifest.add(entry));
        if let Err(e) = checked {
            if stored.is_new {
                stores.content.remove(&image.content_hash)?;
            } else {
                stores.content.release(&image.content_hash);
            }
            return Err(e.into());
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), outcome.source.clone());
        metadata.insert("source_url".to_string(), item.source_url.clone());
        if let Some(caption) = &item.caption {
            metadata.insert("caption".to_string(), caption.clone());
        }
        stores
            .categories
            .add(&image_id, hash, &location, &subject, Some(metadata));

        let tracked = stores
            .urls
            .record(&item.source_url, hash, &outcome.source, &run.run_id);
        if stored.is_new {
            tracked.mark_downloaded(&image.content_hash, &image_id);
            debug!(url = %item.source_url, path = %stored.local_path, "Stored new image");
            Ok(Persisted::New)
        } else {
            tracked.mark_duplicate(&image.content_hash, Some(&image_id));
            debug!(url = %item.source_url, path = %stored.local_path, "Bound existing image");
            Ok(Persisted::Shared)
        }
    }
}

/// One fingerprint per distinct content hash.
fn fingerprints<'a>(entries: impl Iterator<Item = &'a ManifestEntry>) -> Vec<Fingerprint> {
    let mut seen = HashSet::new();
    entries
        .filter(|e| seen.insert(e.content_hash.clone()))
        .filter_map(|e| {
            Some(Fingerprint {
                id: e.image_id.clone(),
                content_hash: e.content_hash.clone(),
                phash: parse_hash(&e.phash)?,
                dhash: parse_hash(&e.dhash)?,
            })
        })
        .collect()
}

fn chain_failure(error: &ChainError) -> FailureRecord {
    let status = error.last_http_status();
    let category = match error {
        ChainError::Exhausted { attempts, .. } => attempts
            .iter()
            .rev()
            .find_map(|a| match &a.outcome {
                AttemptOutcome::Failed { category, .. } => Some(*category),
                _ => None,
            })
            .unwrap_or(ErrorCategory::Permanent),
        ChainError::NoExtractors => ErrorCategory::Permanent,
    };
    FailureRecord::new(
        category,
        ErrorClassifier::actionable_message(status, &error.to_string()),
        status,
    )
}

/// Record each attempt's search URL and how it went.
fn record_attempts(urls: &mut UrlTracker, attempts: &[AttemptRecord], property_hash: &str, run_id: &str) {
    for attempt in attempts {
        let Some(search_url) = &attempt.search_url else {
            continue;
        };
        let entry = urls.record(search_url, property_hash, &attempt.source, run_id);
        match &attempt.outcome {
            AttemptOutcome::Success { .. } => {
                entry.status = UrlStatus::Downloaded;
                entry.error = None;
            }
            AttemptOutcome::Failed { message, .. } => entry.mark_failed(message.clone()),
            other => entry.mark_skipped(other.describe()),
        }
    }
}
