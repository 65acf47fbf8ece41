//! `url_tracker.json`: every URL the pipeline has touched and what happened.
//!
//! Entries are only ever appended or updated. The one way to drop them is an
//! explicit [`UrlTracker::garbage_collect`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::stores::atomic::{check_version, default_version, read_json, write_json_atomic};

/// Outcome of the latest attempt on a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Pending,
    Downloaded,
    Duplicate,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlTrackerEntry {
    pub url: String,
    pub property_hash: String,
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: UrlStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Runs that touched this URL, oldest first, no repeats
    #[serde(default)]
    pub run_ids: IndexSet<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl UrlTrackerEntry {
    pub fn mark_downloaded(&mut self, content_hash: &str, image_id: &str) {
        self.status = UrlStatus::Downloaded;
        self.content_hash = Some(content_hash.to_string());
        self.image_id = Some(image_id.to_string());
        self.error = None;
    }

    pub fn mark_duplicate(&mut self, content_hash: &str, image_id: Option<&str>) {
        self.status = UrlStatus::Duplicate;
        self.content_hash = Some(content_hash.to_string());
        self.image_id = image_id.map(str::to_string);
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = UrlStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = UrlStatus::Skipped;
        self.error = Some(reason.into());
    }
}

/// URL history keyed by URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlTracker {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    urls: BTreeMap<String, UrlTrackerEntry>,
}

impl Default for UrlTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlTracker {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            urls: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let tracker: Self = read_json(path)?.unwrap_or_default();
        check_version(path, tracker.version)?;
        Ok(tracker)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json_atomic(path, self)
    }

    /// Record an attempt on `url` and return its entry for the outcome.
    ///
    /// New URLs start `pending`; existing ones keep their history and gain
    /// the run id and an attempt.
    pub fn record(
        &mut self,
        url: &str,
        property_hash: &str,
        source: &str,
        run_id: &str,
    ) -> &mut UrlTrackerEntry {
        let now = Utc::now();
        let entry = self
            .urls
            .entry(url.to_string())
            .or_insert_with(|| UrlTrackerEntry {
                url: url.to_string(),
                property_hash: property_hash.to_string(),
                source: source.to_string(),
                first_seen: now,
                last_seen: now,
                status: UrlStatus::Pending,
                content_hash: None,
                image_id: None,
                error: None,
                run_ids: IndexSet::new(),
                attempts: 0,
            });
        entry.last_seen = now;
        entry.attempts += 1;
        entry.run_ids.insert(run_id.to_string());
        entry
    }

    pub fn get(&self, url: &str) -> Option<&UrlTrackerEntry> {
        self.urls.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains_key(url)
    }

    pub fn urls_for_property(&self, property_hash: &str) -> Vec<&UrlTrackerEntry> {
        self.urls
            .values()
            .filter(|e| e.property_hash == property_hash)
            .collect()
    }

    /// Drop entries last seen before `older_than`. Returns how many.
    pub fn garbage_collect(&mut self, older_than: DateTime<Utc>) -> usize {
        let before = self.urls.len();
        self.urls.retain(|_, e| e.last_seen >= older_than);
        before - self.urls.len()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
