//! Audits the persisted stores against the files on disk.
//!
//! A reconciliation pass is read-only and scores the data on three axes:
//! accuracy (address/hash bindings), completeness (manifest entries whose
//! file exists), and consistency (files on disk that something references).
//! [`Reconciler::repair`] applies fixes under the manifest lease.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::lease::{FileLock, LeaseOptions};
use crate::stores::content::PROCESSED_DIR;
use crate::stores::{StorePaths, StoreSet};
use crate::types::property::property_hash;

const ACCURACY_WEIGHT: f64 = 0.4;
const COMPLETENESS_WEIGHT: f64 = 0.35;
const CONSISTENCY_WEIGHT: f64 = 0.25;
pub const HEALTHY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostEntry {
    pub image_id: String,
    pub address: String,
    pub local_path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashMismatch {
    pub image_id: String,
    pub address: String,
    pub stored: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Property the report is scoped to, if any
    pub address: Option<String>,
    pub total_entries: usize,
    pub disk_count: usize,
    /// Entries whose file is missing
    pub ghost_entries: Vec<GhostEntry>,
    /// Files no entry references
    pub orphan_files: Vec<String>,
    pub hash_mismatches: Vec<HashMismatch>,
    /// Manifest source URLs the tracker has never seen (informational)
    pub untracked_urls: Vec<String>,
    pub accuracy: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub overall_quality: f64,
    pub is_healthy: bool,
}

impl ReconciliationReport {
    fn score(mut self) -> Self {
        self.accuracy = ratio_score(self.hash_mismatches.len(), self.total_entries);
        self.completeness = ratio_score(self.ghost_entries.len(), self.total_entries);
        self.consistency = ratio_score(self.orphan_files.len(), self.disk_count);
        self.overall_quality = ACCURACY_WEIGHT * self.accuracy
            + COMPLETENESS_WEIGHT * self.completeness
            + CONSISTENCY_WEIGHT * self.consistency;
        self.is_healthy = self.overall_quality >= HEALTHY_THRESHOLD;
        self
    }

    pub fn ghost_count(&self) -> usize {
        self.ghost_entries.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphan_files.len()
    }

    pub fn mismatch_count(&self) -> usize {
        self.hash_mismatches.len()
    }
}

// 1 - bad/total, or 1.0 when there is nothing to judge.
fn ratio_score(bad: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        (1.0 - bad as f64 / total as f64).max(0.0)
    }
}

/// Which fixes [`Reconciler::repair`] may apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOptions {
    pub drop_ghosts: bool,
    pub delete_orphans: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub ghosts_dropped: usize,
    pub orphans_deleted: usize,
}

pub struct Reconciler {
    paths: StorePaths,
    lease: LeaseOptions,
}

impl Reconciler {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: StorePaths::new(base_dir.into()),
            lease: LeaseOptions::manifest(),
        }
    }

    pub fn with_lease_options(mut self, lease: LeaseOptions) -> Self {
        self.lease = lease;
        self
    }

    /// Audit everything, or one property when `address` is given.
    pub fn reconcile(&self, address: Option<&str>) -> Result<ReconciliationReport> {
        let stores = StoreSet::load(&self.paths)?;
        let scope_hash = address.map(property_hash);

        let entries: Vec<_> = match address {
            Some(addr) => stores.manifest.entries_for(addr).iter().collect(),
            None => stores.manifest.entries().collect(),
        };

        let mut ghost_entries = Vec::new();
        let mut hash_mismatches = Vec::new();
        let mut untracked_urls = Vec::new();
        for entry in &entries {
            if !stores.content.absolute_path(&entry.local_path).is_file() {
                ghost_entries.push(GhostEntry {
                    image_id: entry.image_id.clone(),
                    address: entry.property_address.clone(),
                    local_path: entry.local_path.clone(),
                    content_hash: entry.content_hash.clone(),
                });
            }
            let expected = property_hash(&entry.property_address);
            if entry.property_hash != expected {
                hash_mismatches.push(HashMismatch {
                    image_id: entry.image_id.clone(),
                    address: entry.property_address.clone(),
                    stored: entry.property_hash.clone(),
                    expected,
                });
            }
            if !stores.urls.contains(&entry.source_url) {
                untracked_urls.push(entry.source_url.clone());
            }
        }

        // Orphans are judged against every entry, since content is shared
        // across properties.
        let referenced: HashSet<&str> = stores
            .manifest
            .entries()
            .map(|e| e.local_path.as_str())
            .collect();
        let folder_prefix = scope_hash
            .as_ref()
            .map(|h| format!("{PROCESSED_DIR}/{h}/"));
        let disk_files: Vec<String> = stores
            .content
            .stored_files()
            .into_iter()
            .filter(|f| folder_prefix.as_ref().map_or(true, |p| f.starts_with(p)))
            .collect();
        let orphan_files: Vec<String> = disk_files
            .iter()
            .filter(|f| !referenced.contains(f.as_str()))
            .cloned()
            .collect();

        let report = ReconciliationReport {
            address: address.map(str::to_string),
            total_entries: entries.len(),
            disk_count: disk_files.len(),
            ghost_entries,
            orphan_files,
            hash_mismatches,
            untracked_urls,
            accuracy: 0.0,
            completeness: 0.0,
            consistency: 0.0,
            overall_quality: 0.0,
            is_healthy: false,
        }
        .score();

        let log_healthy = report.is_healthy;
        if log_healthy {
            info!(
                entries = report.total_entries,
                files = report.disk_count,
                quality = report.overall_quality,
                "Reconciliation passed"
            );
        } else {
            warn!(
                entries = report.total_entries,
                files = report.disk_count,
                ghosts = report.ghost_count(),
                orphans = report.orphan_count(),
                mismatches = report.mismatch_count(),
                quality = report.overall_quality,
                "Reconciliation found problems"
            );
        }
        Ok(report)
    }

    /// Apply fixes from `report` under the manifest lease.
    ///
    /// Stores are reloaded first, so entries or files that changed since the
    /// report was produced are re-checked rather than trusted.
    pub async fn repair(
        &self,
        report: &ReconciliationReport,
        options: RepairOptions,
    ) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();
        if !options.drop_ghosts && !options.delete_orphans {
            return Ok(summary);
        }

        let _lease = FileLock::for_manifest(&self.paths.locks_dir, self.lease.clone())
            .acquire()
            .await?;
        let mut stores = StoreSet::load(&self.paths)?;

        if options.drop_ghosts {
            for ghost in &report.ghost_entries {
                if stores.content.absolute_path(&ghost.local_path).is_file() {
                    continue;
                }
                if stores.manifest.remove(&ghost.image_id).is_some() {
                    stores.categories.remove(&ghost.image_id);
                    if stores.content.release(&ghost.content_hash) == Some(0) {
                        stores.content.remove(&ghost.content_hash)?;
                    }
                    summary.ghosts_dropped += 1;
                }
            }
        }

        if options.delete_orphans {
            for orphan in &report.orphan_files {
                if stores.manifest.references(orphan) == 0 {
                    stores.content.delete_file(orphan)?;
                    summary.orphans_deleted += 1;
                }
            }
        }

        stores.save(&self.paths)?;
        info!(
            ghosts_dropped = summary.ghosts_dropped,
            orphans_deleted = summary.orphans_deleted,
            "Repair applied"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::manifest::fixtures::entry;
    use tempfile::TempDir;

    const ADDR: &str = "1 A St, Phoenix, AZ 85001";

    fn seed(temp: &TempDir, files: usize) -> StorePaths {
        let paths = StorePaths::new(temp.path());
        let mut stores = StoreSet::load(&paths).unwrap();
        for i in 0..files {
            let e = entry(ADDR, &format!("c{i}"), "http");
            let file = temp.path().join(&e.local_path);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, [0u8; 2048]).unwrap();
            stores
                .urls
                .record(&e.source_url, &e.property_hash, "http", "run1");
            stores.manifest.add(e).unwrap();
        }
        stores.save(&paths).unwrap();
        paths
    }

    #[test]
    fn test_clean_store_is_healthy() {
        let temp = TempDir::new().unwrap();
        seed(&temp, 3);
        let report = Reconciler::new(temp.path()).reconcile(None).unwrap();
        assert_eq!(report.total_entries, 3);
        assert_eq!(report.disk_count, 3);
        assert_eq!(report.overall_quality, 1.0);
        assert!(report.is_healthy);
        assert!(report.untracked_urls.is_empty());
    }

    #[test]
    fn test_empty_store_is_healthy() {
        let temp = TempDir::new().unwrap();
        let report = Reconciler::new(temp.path()).reconcile(None).unwrap();
        assert_eq!(report.overall_quality, 1.0);
    }

    #[test]
    fn test_counts_ghosts_and_orphans() {
        let temp = TempDir::new().unwrap();
        seed(&temp, 4);
        let hash = property_hash(ADDR);
        std::fs::remove_file(temp.path().join(format!("processed/{hash}/c0.jpg"))).unwrap();
        std::fs::write(temp.path().join(format!("processed/{hash}/stray.jpg")), b"x").unwrap();

        let report = Reconciler::new(temp.path()).reconcile(None).unwrap();
        assert_eq!(report.ghost_count(), 1);
        assert_eq!(report.orphan_count(), 1);
        assert_eq!(report.mismatch_count(), 0);
        assert_eq!(report.completeness, 0.75);
        assert_eq!(report.consistency, 0.75);
        let expected = 0.4 + 0.35 * 0.75 + 0.25 * 0.75;
        assert!((report.overall_quality - expected).abs() < 1e-9);
    }

    #[test]
    fn test_quality_is_monotonic_in_damage() {
        let temp = TempDir::new().unwrap();
        seed(&temp, 5);
        let hash = property_hash(ADDR);
        let reconciler = Reconciler::new(temp.path());

        let mut last = reconciler.reconcile(None).unwrap().overall_quality;
        for i in 0..5 {
            std::fs::remove_file(temp.path().join(format!("processed/{hash}/c{i}.jpg"))).unwrap();
            let quality = reconciler.reconcile(None).unwrap().overall_quality;
            assert!(quality < last, "{quality} !< {last}");
            last = quality;
        }
    }

    /// Overwrite the stored property hash of entry `index`, bypassing
    /// `ManifestStore::add` and its binding check.
    fn tamper_hash(paths: &StorePaths, index: usize) {
        let raw = std::fs::read_to_string(&paths.manifest).unwrap();
        let mut doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        doc["properties"][ADDR][index]["property_hash"] = serde_json::json!("ffffffff");
        std::fs::write(&paths.manifest, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    }

    #[test]
    fn test_detects_tampered_property_hash() {
        let temp = TempDir::new().unwrap();
        let paths = seed(&temp, 4);
        tamper_hash(&paths, 2);

        let report = Reconciler::new(temp.path()).reconcile(None).unwrap();
        assert_eq!(report.mismatch_count(), 1);
        assert_eq!(report.ghost_count(), 0);
        assert_eq!(report.orphan_count(), 0);
        let mismatch = &report.hash_mismatches[0];
        assert_eq!(mismatch.stored, "ffffffff");
        assert_eq!(mismatch.expected, property_hash(ADDR));
        assert!(report.accuracy < 1.0);
        assert_eq!(report.accuracy, 0.75);
        assert!(report.overall_quality < 1.0);
    }

    #[test]
    fn test_quality_is_monotonic_in_mismatches() {
        let temp = TempDir::new().unwrap();
        let paths = seed(&temp, 5);
        let reconciler = Reconciler::new(temp.path());

        let mut last = reconciler.reconcile(None).unwrap().overall_quality;
        for i in 0..5 {
            tamper_hash(&paths, i);
            let report = reconciler.reconcile(None).unwrap();
            assert_eq!(report.mismatch_count(), i + 1);
            assert!(report.overall_quality < last, "{} !< {last}", report.overall_quality);
            last = report.overall_quality;
        }
    }

    #[test]
    fn test_quality_is_monotonic_in_orphans() {
        let temp = TempDir::new().unwrap();
        seed(&temp, 3);
        let hash = property_hash(ADDR);
        let reconciler = Reconciler::new(temp.path());

        let mut last = reconciler.reconcile(None).unwrap().overall_quality;
        for i in 0..5 {
            std::fs::write(temp.path().join(format!("processed/{hash}/stray{i}.jpg")), b"x").unwrap();
            let report = reconciler.reconcile(None).unwrap();
            assert_eq!(report.orphan_count(), i + 1);
            assert!(report.overall_quality < last, "{} !< {last}", report.overall_quality);
            last = report.overall_quality;
        }
    }

    #[test]
    fn test_scoped_to_address() {
        let temp = TempDir::new().unwrap();
        seed(&temp, 2);
        let report = Reconciler::new(temp.path())
            .reconcile(Some("9 Other St, Phoenix, AZ 85001"))
            .unwrap();
        assert_eq!(report.total_entries, 0);
        assert_eq!(report.disk_count, 0);
    }

    #[tokio::test]
    async fn test_repair_drops_ghosts_and_orphans() {
        let temp = TempDir::new().unwrap();
        seed(&temp, 2);
        let hash = property_hash(ADDR);
        std::fs::remove_file(temp.path().join(format!("processed/{hash}/c0.jpg"))).unwrap();
        std::fs::write(temp.path().join(format!("processed/{hash}/stray.jpg")), b"x").unwrap();

        let reconciler = Reconciler::new(temp.path());
        let report = reconciler.reconcile(None).unwrap();
        let summary = reconciler
            .repair(
                &report,
                RepairOptions {
                    drop_ghosts: true,
                    delete_orphans: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(summary, RepairSummary { ghosts_dropped: 1, orphans_deleted: 1 });

        let after = reconciler.reconcile(None).unwrap();
        assert_eq!(after.total_entries, 1);
        assert!(after.is_healthy);
        assert_eq!(after.overall_quality, 1.0);
    }
}
