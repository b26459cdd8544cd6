//! Persisted run state: the fingerprint cache that answers "has this input
//! changed since last run", and the checkpoint store that lets an
//! interrupted run resume.
//!
//! Both documents live under a dot-directory keyed to the working
//! directory and are deliberately tolerant of absence and corruption: a
//! cache that cannot be read is treated as empty, a checkpoint that cannot
//! be read as missing. Writes are not atomic; a torn write is recovered by
//! that same fallback on the next load.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use shared::state::{ConversionState, FingerprintEntry};
use tracing::{debug, warn};

/// Directory under the working root holding all persisted run state.
pub const STATE_DIR: &str = ".formport";

const FINGERPRINT_FILE: &str = "fingerprints.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Content-fingerprint map for incremental conversion.
pub struct FingerprintTracker {
    cache_path: PathBuf,
    entries: BTreeMap<PathBuf, FingerprintEntry>,
}

impl FingerprintTracker {
    pub fn new(workdir: &Path) -> Self {
        Self {
            cache_path: workdir.join(STATE_DIR).join(FINGERPRINT_FILE),
            entries: BTreeMap::new(),
        }
    }

    /// Replaces the in-memory map with the persisted cache. A missing or
    /// corrupt cache yields an empty map and never fails the caller.
    pub fn load(&mut self) {
        self.entries.clear();
        let raw = match fs::read_to_string(&self.cache_path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        match serde_json::from_str::<BTreeMap<PathBuf, FingerprintEntry>>(&raw) {
            Ok(entries) => {
                debug!(
                    "loaded {} fingerprint entries from {}",
                    entries.len(),
                    self.cache_path.display()
                );
                self.entries = entries;
            }
            Err(err) => {
                warn!(
                    "discarding corrupt fingerprint cache {}: {err}",
                    self.cache_path.display()
                );
            }
        }
    }

    /// Deterministic sha256 digest of the file's current bytes.
    pub fn fingerprint(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read '{}' for fingerprinting", path.display()))?;
        Ok(hex_digest(&bytes))
    }

    /// True when the path has never been seen or its content fingerprint
    /// differs from the stored one.
    pub fn has_changed(&self, path: &Path) -> Result<bool> {
        let Some(entry) = self.entries.get(path) else {
            return Ok(true);
        };
        Ok(self.fingerprint(path)? != entry.fingerprint)
    }

    /// Recomputes and stores the entry for a successfully processed file.
    pub fn update(&mut self, path: &Path) -> Result<()> {
        let fingerprint = self.fingerprint(path)?;
        let source_modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        self.entries.insert(
            path.to_path_buf(),
            FingerprintEntry {
                fingerprint,
                source_modified,
                converted_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Persists the whole map. Not atomic; the load-time fallback tolerates
    /// a crash mid-write.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory '{}'", parent.display())
            })?;
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.cache_path, raw).with_context(|| {
            format!(
                "failed to write fingerprint cache '{}'",
                self.cache_path.display()
            )
        })
    }

    pub fn entry(&self, path: &Path) -> Option<&FingerprintEntry> {
        self.entries.get(path)
    }

    pub fn snapshot(&self) -> &BTreeMap<PathBuf, FingerprintEntry> {
        &self.entries
    }
}

/// Persisted snapshot of run progress. Last write wins; cadence is the
/// orchestrator's decision.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(workdir: &Path) -> Self {
        Self {
            path: workdir.join(STATE_DIR).join(CHECKPOINT_FILE),
        }
    }

    pub fn save(&self, state: &ConversionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory '{}'", parent.display())
            })?;
        }
        let raw = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write checkpoint '{}'", self.path.display()))
    }

    /// The last persisted state, or `None` when absent or corrupt. Corrupt
    /// payloads are logged and treated as absence, never raised.
    pub fn load(&self) -> Option<ConversionState> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(
                    "discarding corrupt checkpoint {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove checkpoint '{}'", self.path.display())
            }),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
