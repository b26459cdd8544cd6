//! The conversion pipeline: drives parse → analyze → generate per form,
//! then project files, optional documentation, and commit, with
//! cooperative cancellation and transactional rollback of everything
//! written along the way.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cache::{CheckpointStore, FingerprintTracker, STATE_DIR};
use chrono::Utc;
use futures::{stream, StreamExt};
use guard::FileGuard;
use layout::LayoutOptions;
use shared::state::{ConversionState, ConversionStats};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod cancel;
pub mod config;
pub mod emitter;
pub mod parser;
pub mod progress;
pub mod vcs;

pub use cancel::{cancellation_pair, CancellationSource, CancellationToken};
pub use config::{load_settings, Settings};
pub use emitter::{Artifact, ArtifactEmitter, MarkupEmitter, NamingContext};
pub use parser::{FormParser, JsonFormParser, FORM_FILE_SUFFIX};
pub use progress::{NullObserver, Phase, ProgressObserver, ProgressSnapshot};
pub use vcs::VersionControl;

/// A checkpoint write this many completed forms bounds the work replayed
/// after an interrupted run.
const CHECKPOINT_EVERY: usize = 5;

const PROJECT_INDEX_FILE: &str = "formport-project.json";
const MIGRATION_GUIDE_FILE: &str = "MIGRATION.md";

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Skip forms whose content fingerprint is unchanged since last run.
    pub incremental: bool,
    /// Reprocess everything, ignoring fingerprints and checkpoints.
    pub force: bool,
    /// Bounded parallel degree; `None` processes forms serially.
    pub parallel: Option<usize>,
    /// Run every phase but write nothing.
    pub dry_run: bool,
    /// Write a markdown migration guide during the documentation phase.
    pub migration_guide: bool,
    pub layout: LayoutOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct ConversionOutcome {
    pub status: RunStatus,
    pub stats: ConversionStats,
    pub failed: BTreeMap<PathBuf, String>,
    pub generated_files: Vec<PathBuf>,
}

/// Aggregate state shared between per-form units of work. Everything that
/// must stay consistent across parallel units lives behind one lock:
/// statistics, the state sets, the guard manifest, the fingerprint map and
/// the progress reporter.
struct RunShared {
    state: ConversionState,
    tracker: FingerprintTracker,
    guard: FileGuard,
    checkpoints: CheckpointStore,
    reporter: progress::ProgressReporter,
    /// Dry runs must leave the disk untouched, including the state
    /// directory, so checkpoint writes become no-ops.
    dry_run: bool,
    completed_since_checkpoint: usize,
    /// Forms completed inside this run's transaction, with their control
    /// counts. A rollback demotes exactly these so the checkpoint never
    /// claims work whose artifacts were undone.
    completed_this_run: Vec<(PathBuf, u64)>,
}

impl RunShared {
    fn report(&mut self, phase: Phase, current_form: Option<&str>) {
        let stats = self.state.stats.clone();
        self.reporter.report(phase, current_form, &stats);
    }

    fn checkpoint_now(&mut self) {
        self.completed_since_checkpoint = 0;
        if self.dry_run {
            return;
        }
        self.state.fingerprints = self.tracker.snapshot().clone();
        if let Err(err) = self.checkpoints.save(&self.state) {
            warn!("checkpoint write failed: {err:#}");
        }
    }

    fn checkpoint_if_due(&mut self) {
        self.completed_since_checkpoint += 1;
        if self.completed_since_checkpoint >= CHECKPOINT_EVERY {
            self.checkpoint_now();
        }
    }

    /// Brings the state back in line with the output tree after a
    /// rollback: completions from this run are withdrawn and only files
    /// that survived on disk stay in the generated list.
    fn demote_rolled_back_work(&mut self) {
        for (path, controls) in std::mem::take(&mut self.completed_this_run) {
            self.state.completed.remove(&path);
            self.state.stats.forms_converted =
                self.state.stats.forms_converted.saturating_sub(1);
            self.state.stats.controls_converted =
                self.state.stats.controls_converted.saturating_sub(controls);
        }
        self.state.generated_files.retain(|path| path.exists());
        self.state.stats.files_written = self.state.generated_files.len() as u64;
    }

    fn track_write(&mut self, target: &Path) -> Result<()> {
        if target.exists() {
            self.guard.track_modify(target)?;
        } else {
            self.guard.track_create(target)?;
        }
        Ok(())
    }

    /// Guard-tracked write of one artifact; the path lands in the
    /// generated-file list and the written counter.
    fn write_tracked(&mut self, target: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create output directory '{}'", parent.display())
            })?;
        }
        self.track_write(target)?;
        fs::write(target, contents)
            .with_context(|| format!("failed to write artifact '{}'", target.display()))?;
        self.state.stats.files_written += 1;
        if !self.state.generated_files.contains(&target.to_path_buf()) {
            self.state.generated_files.push(target.to_path_buf());
        }
        Ok(())
    }
}

pub struct ConversionPipeline {
    parser: Arc<dyn FormParser>,
    emitter: Arc<dyn ArtifactEmitter>,
    observer: Arc<dyn ProgressObserver>,
    version_control: Option<Arc<dyn VersionControl>>,
    options: PipelineOptions,
}

impl ConversionPipeline {
    pub fn new(
        parser: Arc<dyn FormParser>,
        emitter: Arc<dyn ArtifactEmitter>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            parser,
            emitter,
            observer: Arc::new(NullObserver),
            version_control: None,
            options,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_version_control(mut self, version_control: Arc<dyn VersionControl>) -> Self {
        self.version_control = Some(version_control);
        self
    }

    /// Runs the whole conversion. Per-form failures are recorded and
    /// skipped; a fatal failure or a cancellation rolls back every tracked
    /// write before returning.
    pub async fn run(
        &self,
        source_root: &Path,
        output_root: &Path,
        cancel: CancellationToken,
    ) -> Result<ConversionOutcome> {
        if !source_root.exists() {
            bail!("source path '{}' does not exist", source_root.display());
        }
        fs::create_dir_all(output_root).with_context(|| {
            format!(
                "failed to create output directory '{}'",
                output_root.display()
            )
        })?;

        let mut tracker = FingerprintTracker::new(output_root);
        tracker.load();
        let checkpoints = CheckpointStore::new(output_root);
        let state = self.initial_state(&checkpoints, source_root, output_root);

        // The transaction spans the entire run: it must be open before the
        // first write so cancellation and fatal failure can both restore
        // the output directory exactly as found. Dry runs never write, so
        // no transaction is opened for them.
        let mut file_guard = FileGuard::new(output_root.join(STATE_DIR).join("backups"));
        if !self.options.dry_run {
            file_guard.begin()?;
        }

        let shared = Mutex::new(RunShared {
            state,
            tracker,
            guard: file_guard,
            checkpoints,
            reporter: progress::ProgressReporter::new(Arc::clone(&self.observer)),
            dry_run: self.options.dry_run,
            completed_since_checkpoint: 0,
            completed_this_run: Vec::new(),
        });

        match self.run_inner(source_root, output_root, &shared, &cancel).await {
            Ok(status) => {
                let sh = shared.lock().await;
                Ok(ConversionOutcome {
                    status,
                    stats: sh.state.stats.clone(),
                    failed: sh.state.failed.clone(),
                    generated_files: sh.state.generated_files.clone(),
                })
            }
            Err(err) => {
                let mut sh = shared.lock().await;
                if sh.guard.is_open() {
                    match sh.guard.rollback() {
                        Ok(report) => {
                            for (path, reason) in &report.failures {
                                warn!("rollback failure on {}: {reason}", path.display());
                            }
                        }
                        Err(rollback_err) => {
                            warn!("rollback after fatal failure also failed: {rollback_err}");
                        }
                    }
                    sh.demote_rolled_back_work();
                    sh.checkpoint_now();
                    sh.report(Phase::RolledBack, None);
                }
                Err(err)
            }
        }
    }

    fn initial_state(
        &self,
        checkpoints: &CheckpointStore,
        source_root: &Path,
        output_root: &Path,
    ) -> ConversionState {
        if !self.options.force {
            if let Some(mut previous) = checkpoints.load() {
                if previous.source_root == source_root && previous.output_root == output_root {
                    info!(
                        "resuming run {}: {} forms already completed",
                        previous.run_id,
                        previous.completed.len()
                    );
                    // Units caught mid-flight by the interruption run again.
                    previous.in_progress.clear();
                    return previous;
                }
            }
        }
        ConversionState::new(source_root, output_root)
    }

    async fn run_inner(
        &self,
        source_root: &Path,
        output_root: &Path,
        shared: &Mutex<RunShared>,
        cancel: &CancellationToken,
    ) -> Result<RunStatus> {
        {
            let mut sh = shared.lock().await;
            sh.report(Phase::Init, None);
            sh.report(Phase::Parse, None);
        }

        let discovered = self.parser.discover(source_root)?;
        info!(
            "discovered {} form files under {}",
            discovered.len(),
            source_root.display()
        );
        let pending: Vec<PathBuf> = {
            let mut sh = shared.lock().await;
            sh.state.stats.forms_discovered = discovered.len() as u64;
            sh.checkpoint_now();
            discovered
                .into_iter()
                .filter(|path| !sh.state.is_completed(path))
                .collect()
        };

        match self.options.parallel {
            Some(degree) if degree > 1 => {
                stream::iter(
                    pending
                        .iter()
                        .map(|path| self.process_form(path, shared, cancel)),
                )
                .buffer_unordered(degree)
                .for_each(|()| async {})
                .await;
            }
            _ => {
                for path in &pending {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.process_form(path, shared, cancel).await;
                }
            }
        }

        if cancel.is_cancelled() {
            let mut sh = shared.lock().await;
            sh.report(Phase::Cancelling, None);
            if sh.guard.is_open() {
                let report = sh.guard.rollback()?;
                for (path, reason) in &report.failures {
                    warn!("rollback failure on {}: {reason}", path.display());
                }
            }
            // The checkpoint survives a cancelled run so it can resume.
            sh.demote_rolled_back_work();
            sh.checkpoint_now();
            sh.report(Phase::RolledBack, None);
            info!("conversion cancelled, output directory restored");
            return Ok(RunStatus::Cancelled);
        }

        self.write_project_files(output_root, shared).await?;
        if self.options.migration_guide {
            self.write_migration_guide(output_root, shared).await?;
        }

        let mut sh = shared.lock().await;
        sh.report(Phase::Commit, None);
        if let Some(vcs) = &self.version_control {
            let files = sh.state.generated_files.clone();
            vcs.stage(&files)
                .await
                .context("version control staging failed")?;
        }
        if sh.guard.is_open() {
            sh.guard.commit()?;
        }
        if !self.options.dry_run {
            sh.tracker.save()?;
            sh.checkpoints.clear()?;
        }
        sh.report(Phase::Complete, None);
        info!(
            "conversion complete: {} converted, {} skipped, {} failed, {} files written",
            sh.state.stats.forms_converted,
            sh.state.stats.forms_skipped,
            sh.state.stats.forms_failed,
            sh.state.stats.files_written
        );
        Ok(RunStatus::Completed)
    }

    /// One unit of work. Failures are recorded against the form and the
    /// run carries on; only infrastructure errors inside the shared lock
    /// escalate, and those surface as per-form failures too.
    async fn process_form(
        &self,
        source: &Path,
        shared: &Mutex<RunShared>,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        let form_label = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());

        if self.options.incremental && !self.options.force {
            let changed = {
                let sh = shared.lock().await;
                sh.tracker.has_changed(source).unwrap_or(true)
            };
            if !changed {
                let mut sh = shared.lock().await;
                sh.state.stats.forms_skipped += 1;
                sh.state.mark_completed(source);
                sh.report(Phase::Parse, Some(&form_label));
                info!("unchanged since last run, skipping {}", source.display());
                return;
            }
        }

        let relative_source = {
            let mut sh = shared.lock().await;
            sh.state.mark_in_progress(source);
            sh.report(Phase::Parse, Some(&form_label));
            source
                .strip_prefix(&sh.state.source_root)
                .unwrap_or(source)
                .to_path_buf()
        };

        let tree = match self.parser.parse(source).await {
            Ok(tree) => tree,
            Err(err) => {
                warn!("parse failed for {}: {err:#}", source.display());
                let mut sh = shared.lock().await;
                sh.state.stats.forms_failed += 1;
                sh.state.mark_failed(source, format!("parse failed: {err:#}"));
                return;
            }
        };

        {
            let mut sh = shared.lock().await;
            sh.report(Phase::Analyze, Some(&form_label));
        }
        let layout_result = layout::analyze(&tree, &self.options.layout);

        {
            let mut sh = shared.lock().await;
            sh.report(Phase::Generate, Some(&form_label));
        }
        let naming = NamingContext {
            form_name: tree.name.clone(),
            source_path: source.to_path_buf(),
            relative_source,
        };
        let artifacts = match self.emitter.emit(&tree, &layout_result, &naming).await {
            Ok(artifacts) => artifacts,
            Err(err) => {
                warn!("generation failed for {}: {err:#}", source.display());
                let mut sh = shared.lock().await;
                sh.state.stats.forms_failed += 1;
                sh.state
                    .mark_failed(source, format!("generation failed: {err:#}"));
                return;
            }
        };

        let mut sh = shared.lock().await;
        if !self.options.dry_run {
            for artifact in &artifacts {
                let target = sh.state.output_root.join(&artifact.relative_path);
                if let Err(err) = sh.write_tracked(&target, &artifact.contents) {
                    warn!("write failed for {}: {err:#}", source.display());
                    sh.state.stats.forms_failed += 1;
                    sh.state.mark_failed(source, format!("write failed: {err:#}"));
                    return;
                }
            }
            if let Err(err) = sh.tracker.update(source) {
                warn!(
                    "fingerprint update failed for {}: {err:#}",
                    source.display()
                );
            }
        }
        let controls = tree.subtree_size() as u64;
        sh.state.stats.forms_converted += 1;
        sh.state.stats.controls_converted += controls;
        sh.state.mark_completed(source);
        sh.completed_this_run.push((source.to_path_buf(), controls));
        sh.checkpoint_if_due();
    }

    async fn write_project_files(
        &self,
        output_root: &Path,
        shared: &Mutex<RunShared>,
    ) -> Result<()> {
        let mut sh = shared.lock().await;
        sh.report(Phase::ProjectFiles, None);
        if self.options.dry_run {
            return Ok(());
        }
        let index = serde_json::json!({
            "run_id": sh.state.run_id,
            "source_root": sh.state.source_root,
            "generated_at": Utc::now(),
            "stats": sh.state.stats,
            "generated_files": sh.state.generated_files,
        });
        let target = output_root.join(PROJECT_INDEX_FILE);
        sh.write_tracked(&target, &serde_json::to_string_pretty(&index)?)?;
        sh.checkpoint_now();
        Ok(())
    }

    async fn write_migration_guide(
        &self,
        output_root: &Path,
        shared: &Mutex<RunShared>,
    ) -> Result<()> {
        let mut sh = shared.lock().await;
        sh.report(Phase::Documentation, None);
        if self.options.dry_run {
            return Ok(());
        }
        let guide = render_migration_guide(&sh.state);
        let target = output_root.join(MIGRATION_GUIDE_FILE);
        sh.write_tracked(&target, &guide)?;
        sh.checkpoint_now();
        Ok(())
    }
}

fn render_migration_guide(state: &ConversionState) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(out, "# Migration guide");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Converted from `{}` on {}.",
        state.source_root.display(),
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Metric | Count |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Forms discovered | {} |", state.stats.forms_discovered);
    let _ = writeln!(out, "| Forms converted | {} |", state.stats.forms_converted);
    let _ = writeln!(out, "| Forms skipped | {} |", state.stats.forms_skipped);
    let _ = writeln!(out, "| Forms failed | {} |", state.stats.forms_failed);
    let _ = writeln!(out, "| Controls converted | {} |", state.stats.controls_converted);
    let _ = writeln!(out, "| Files written | {} |", state.stats.files_written);

    if !state.failed.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Failed forms");
        let _ = writeln!(out);
        for (path, reason) in &state.failed {
            let _ = writeln!(out, "- `{}`: {reason}", path.display());
        }
    }

    if !state.generated_files.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Generated files");
        let _ = writeln!(out);
        for path in &state.generated_files {
            let _ = writeln!(out, "- `{}`", path.display());
        }
    }
    out
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
