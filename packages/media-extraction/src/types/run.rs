//! Run bookkeeping and summary statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One invocation of the pipeline. Lives only as long as the run.
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    /// 8 lowercase hex characters
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub property_count: usize,
    pub resume: bool,
    pub force: bool,
}

impl ExtractionRun {
    pub fn new(property_count: usize, resume: bool, force: bool) -> Self {
        Self {
            run_id: new_run_id(),
            started_at: Utc::now(),
            property_count,
            resume,
            force,
        }
    }
}

/// Random 8-hex-character run identifier.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Per-source image counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub images: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl SourceStats {
    fn merge(&mut self, other: &SourceStats) {
        self.images += other.images;
        self.unique += other.unique;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }
}

/// Summary returned by `Orchestrator::extract_all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub run_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_images: usize,
    pub unique_images: usize,
    pub duplicates: usize,
    pub failed_downloads: usize,
    pub duration: Duration,
    pub by_source: BTreeMap<String, SourceStats>,
}

impl ExtractionResult {
    pub fn new(run_id: impl Into<String>, total: usize) -> Self {
        Self {
            run_id: run_id.into(),
            total,
            ..Default::default()
        }
    }

    /// Fold one property's image counters into the run totals.
    pub fn absorb(&mut self, stats: &PropertyStats) {
        self.total_images += stats.total_images;
        self.unique_images += stats.unique_images;
        self.duplicates += stats.duplicates;
        self.failed_downloads += stats.failed_downloads;
        for (source, s) in &stats.by_source {
            self.by_source.entry(source.clone()).or_default().merge(s);
        }
    }

    /// True when no property failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Image counters for a single property.
#[derive(Debug, Clone, Default)]
pub struct PropertyStats {
    pub total_images: usize,
    pub unique_images: usize,
    pub duplicates: usize,
    pub failed_downloads: usize,
    pub by_source: BTreeMap<String, SourceStats>,
}

impl PropertyStats {
    pub(crate) fn source(&mut self, source: &str) -> &mut SourceStats {
        self.by_source.entry(source.to_string()).or_default()
    }
}

/// Deduplication counters across the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationStats {
    /// Distinct content hashes on record
    pub unique_files: usize,
    pub total_entries: usize,
    /// Entries whose content was already bound elsewhere
    pub duplicate_entries: usize,
    /// Advisory perceptual near-duplicate pairs
    pub near_duplicate_pairs: usize,
}

/// Snapshot returned by `Orchestrator::get_statistics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStatistics {
    pub total_properties: usize,
    pub total_images: usize,
    pub completed: usize,
    pub failed: usize,
    pub images_by_source: BTreeMap<String, usize>,
    pub deduplication_stats: DeduplicationStats,
    pub last_updated: Option<DateTime<Utc>>,
}
