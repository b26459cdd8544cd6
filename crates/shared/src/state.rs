use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Change-detection record for one source file, keyed by absolute path in
/// the fingerprint cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub fingerprint: String,
    pub source_modified: DateTime<Utc>,
    pub converted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub forms_discovered: u64,
    pub forms_converted: u64,
    pub forms_skipped: u64,
    pub forms_failed: u64,
    pub controls_converted: u64,
    pub files_written: u64,
}

/// Checkpoint payload for one conversion run.
///
/// Owned and mutated exclusively by the pipeline orchestrator; the
/// checkpoint store only serializes it. The completed / in-progress /
/// failed sets stay disjoint through the `mark_*` transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionState {
    pub run_id: Uuid,
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: BTreeSet<PathBuf>,
    #[serde(default)]
    pub in_progress: BTreeSet<PathBuf>,
    #[serde(default)]
    pub failed: BTreeMap<PathBuf, String>,
    #[serde(default)]
    pub fingerprints: BTreeMap<PathBuf, FingerprintEntry>,
    #[serde(default)]
    pub generated_files: Vec<PathBuf>,
    #[serde(default)]
    pub stats: ConversionStats,
}

impl ConversionState {
    pub fn new(source_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_root: source_root.into(),
            output_root: output_root.into(),
            started_at: Utc::now(),
            completed: BTreeSet::new(),
            in_progress: BTreeSet::new(),
            failed: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
            generated_files: Vec::new(),
            stats: ConversionStats::default(),
        }
    }

    pub fn mark_in_progress(&mut self, path: &Path) {
        self.completed.remove(path);
        self.failed.remove(path);
        self.in_progress.insert(path.to_path_buf());
    }

    pub fn mark_completed(&mut self, path: &Path) {
        self.in_progress.remove(path);
        self.failed.remove(path);
        self.completed.insert(path.to_path_buf());
    }

    pub fn mark_failed(&mut self, path: &Path, reason: impl Into<String>) {
        self.in_progress.remove(path);
        self.completed.remove(path);
        self.failed.insert(path.to_path_buf(), reason.into());
    }

    pub fn is_completed(&self, path: &Path) -> bool {
        self.completed.contains(path)
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
