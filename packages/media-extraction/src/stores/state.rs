//! `extraction_state.json`: per-property checkpoints that make runs resumable.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreResult;
use crate::stores::atomic::{check_version, default_version, read_json, write_json_atomic};
use crate::types::property::Property;
use crate::types::state::{ExtractionPhase, ExtractionStatus, FailureRecord, PropertyState};

/// Extraction state keyed by property hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStateStore {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    properties: BTreeMap<String, PropertyState>,
}

impl Default for ExtractionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStateStore {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            properties: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let store: Self = read_json(path)?.unwrap_or_default();
        check_version(path, store.version)?;
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, property_hash: &str) -> Option<&PropertyState> {
        self.properties.get(property_hash)
    }

    pub fn states(&self) -> impl Iterator<Item = &PropertyState> {
        self.properties.values()
    }

    fn entry(&mut self, property: &Property) -> &mut PropertyState {
        let hash = property.property_hash();
        self.properties
            .entry(hash.clone())
            .or_insert_with(|| PropertyState::pending(property.full_address(), hash))
    }

    pub fn mark_in_progress(&mut self, property: &Property, run_id: &str) {
        let now = Utc::now();
        let state = self.entry(property);
        state.status = ExtractionStatus::InProgress;
        state.phase = ExtractionPhase::Searching;
        state.started_at = Some(now);
        state.updated_at = now;
        state.completed_at = None;
        state.last_run_id = Some(run_id.to_string());
    }

    /// Advance the phase of an in-progress property. Unknown hashes are ignored.
    pub fn set_phase(&mut self, property_hash: &str, phase: ExtractionPhase) {
        if let Some(state) = self.properties.get_mut(property_hash) {
            state.phase = phase;
            state.updated_at = Utc::now();
        }
    }

    pub fn mark_completed(&mut self, property: &Property, image_count: usize) {
        let now = Utc::now();
        let state = self.entry(property);
        state.status = ExtractionStatus::Completed;
        state.phase = ExtractionPhase::Done;
        state.updated_at = now;
        state.completed_at = Some(now);
        state.image_count = image_count;
        state.last_error = None;
    }

    pub fn mark_failed(&mut self, property: &Property, failure: FailureRecord) {
        let state = self.entry(property);
        state.status = ExtractionStatus::Failed;
        state.updated_at = failure.at;
        state.retry_count += 1;
        state.last_error = Some(failure);
    }

    /// Reset abandoned `in_progress` entries to `pending`.
    ///
    /// An entry is abandoned when it has not been updated within `staleness`.
    /// Returns the number of entries reset.
    pub fn prepare_resume(&mut self, staleness: Duration) -> usize {
        self.prepare_resume_at(staleness, Utc::now())
    }

    pub(crate) fn prepare_resume_at(&mut self, staleness: Duration, now: DateTime<Utc>) -> usize {
        let mut reset = 0;
        for state in self.properties.values_mut() {
            if state.is_stale(staleness, now) {
                info!(
                    address = %state.address,
                    property_hash = %state.property_hash,
                    last_update = %state.updated_at,
                    "Resetting stale in-progress property"
                );
                state.status = ExtractionStatus::Pending;
                state.phase = ExtractionPhase::Queued;
                state.stale_reset_at = Some(now);
                state.updated_at = now;
                reset += 1;
            }
        }
        reset
    }

    /// Split `properties` into those to process and those to skip.
    ///
    /// Completed properties are skipped only when resuming without force.
    pub fn work_list<'a>(
        &self,
        properties: &'a [Property],
        resume: bool,
        force: bool,
    ) -> (Vec<&'a Property>, Vec<&'a Property>) {
        properties.iter().partition(|p| {
            let done = self
                .get(&p.property_hash())
                .is_some_and(PropertyState::is_completed);
            !(resume && done && !force)
        })
    }

    pub fn count(&self, status: ExtractionStatus) -> usize {
        self.properties.values().filter(|s| s.status == status).count()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.properties.values().map(|s| s.updated_at).max()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
