//! Transactional tracking of file creations and modifications.
//!
//! A [`FileGuard`] moves through Idle → Open → (commit | rollback) → Idle.
//! While a transaction is open, every file the caller is about to write
//! must be tracked first: creations so rollback can delete them,
//! modifications so the pre-transaction content is backed up and can be
//! copied back. Untracked side effects are not covered.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use shared::error::GuardError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Tracked mutations for one open transaction. Exists only between
/// `begin()` and `commit()`/`rollback()`.
#[derive(Debug, Default)]
struct RollbackManifest {
    created: Vec<PathBuf>,
    backups: BTreeMap<PathBuf, PathBuf>,
}

struct OpenTransaction {
    backup_dir: PathBuf,
    manifest: RollbackManifest,
}

/// Accumulated per-path failures from a rollback. Rollback never
/// short-circuits: a single stuck file cannot block restoration of the
/// rest.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub failures: Vec<(PathBuf, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct FileGuard {
    backup_root: PathBuf,
    open: Option<OpenTransaction>,
}

impl FileGuard {
    /// `backup_root` is where per-transaction backup directories are
    /// created; it does not need to exist yet.
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn begin(&mut self) -> Result<(), GuardError> {
        if self.open.is_some() {
            return Err(GuardError::AlreadyOpen);
        }
        let backup_dir = self.backup_root.join(format!("tx-{}", Uuid::new_v4()));
        fs::create_dir_all(&backup_dir).map_err(|source| GuardError::Io {
            path: backup_dir.clone(),
            source,
        })?;
        debug!("file transaction opened, backups in {}", backup_dir.display());
        self.open = Some(OpenTransaction {
            backup_dir,
            manifest: RollbackManifest::default(),
        });
        Ok(())
    }

    /// Records a path the caller is about to create; rollback deletes it.
    pub fn track_create(&mut self, path: &Path) -> Result<(), GuardError> {
        let tx = self.open.as_mut().ok_or(GuardError::NotOpen)?;
        tx.manifest.created.push(path.to_path_buf());
        Ok(())
    }

    /// Records a path the caller is about to overwrite. The current
    /// on-disk content, if any, is copied to a unique backup location; at
    /// most one backup is taken per path per transaction.
    pub fn track_modify(&mut self, path: &Path) -> Result<(), GuardError> {
        let tx = self.open.as_mut().ok_or(GuardError::NotOpen)?;
        if !path.exists() || tx.manifest.backups.contains_key(path) {
            return Ok(());
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let backup = tx
            .backup_dir
            .join(format!("{}-{file_name}", Uuid::new_v4()));
        fs::copy(path, &backup).map_err(|source| GuardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tx.manifest.backups.insert(path.to_path_buf(), backup);
        Ok(())
    }

    /// Keeps all tracked writes and discards the backups. Backup deletion
    /// is best-effort; a failed delete is logged, not escalated.
    pub fn commit(&mut self) -> Result<(), GuardError> {
        let tx = self.open.take().ok_or(GuardError::NotOpen)?;
        for backup in tx.manifest.backups.values() {
            if let Err(err) = fs::remove_file(backup) {
                warn!("failed to remove backup {}: {err}", backup.display());
            }
        }
        remove_dir_quietly(&tx.backup_dir);
        debug!(
            "file transaction committed: {} creations, {} backups discarded",
            tx.manifest.created.len(),
            tx.manifest.backups.len()
        );
        Ok(())
    }

    /// Undoes every tracked mutation: tracked creations are deleted,
    /// backed-up originals are restored. Individual failures are collected
    /// into the report and logged.
    pub fn rollback(&mut self) -> Result<RollbackReport, GuardError> {
        let tx = self.open.take().ok_or(GuardError::NotOpen)?;
        let mut report = RollbackReport::default();

        for created in &tx.manifest.created {
            match fs::remove_file(created) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!("rollback failed to delete {}: {err}", created.display());
                    report
                        .failures
                        .push((created.clone(), format!("delete failed: {err}")));
                }
            }
        }

        for (original, backup) in &tx.manifest.backups {
            if let Err(err) = fs::copy(backup, original) {
                warn!(
                    "rollback failed to restore {} from {}: {err}",
                    original.display(),
                    backup.display()
                );
                report
                    .failures
                    .push((original.clone(), format!("restore failed: {err}")));
                continue;
            }
            if let Err(err) = fs::remove_file(backup) {
                warn!("failed to remove backup {}: {err}", backup.display());
            }
        }

        remove_dir_quietly(&tx.backup_dir);
        debug!(
            "file transaction rolled back: {} creations removed, {} originals restored, {} failures",
            tx.manifest.created.len(),
            tx.manifest.backups.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

fn remove_dir_quietly(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove backup directory {}: {err}", dir.display());
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
