use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::progress::ProgressReporter;

const STACKED_FORM: &str = r#"{
  "kind": "form",
  "name": "__NAME__",
  "properties": { "text": "Example" },
  "events": { "load": "on_load" },
  "children": [
    { "kind": "label",  "name": "title", "properties": { "location": "20, 10", "text": "Title" } },
    { "kind": "label",  "name": "body",  "properties": { "location": "20, 14" } },
    { "kind": "button", "name": "ok",    "properties": { "location": "20, 60", "text": "OK" },
      "events": { "click": "on_ok" } }
  ]
}"#;

fn write_form(dir: &Path, file_stem: &str, form_name: &str) -> PathBuf {
    let path = dir.join(format!("{file_stem}.form.json"));
    fs::write(&path, STACKED_FORM.replace("__NAME__", form_name)).expect("write form");
    path
}

fn test_pipeline(options: PipelineOptions) -> ConversionPipeline {
    ConversionPipeline::new(Arc::new(JsonFormParser), Arc::new(MarkupEmitter), options)
}

#[derive(Default)]
struct RecordingObserver {
    phases: StdMutex<Vec<Phase>>,
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.phases.lock().expect("phases lock").push(snapshot.phase);
    }
}

#[derive(Default)]
struct RecordingVcs {
    staged: StdMutex<Vec<PathBuf>>,
}

#[async_trait]
impl VersionControl for RecordingVcs {
    async fn stage(&self, paths: &[PathBuf]) -> anyhow::Result<()> {
        self.staged
            .lock()
            .expect("staged lock")
            .extend(paths.iter().cloned());
        Ok(())
    }
}

/// Delegates to the real emitter but trips the cancellation signal on the
/// first form, simulating an interrupt that lands mid-run.
struct CancelAfterFirstEmitter {
    inner: MarkupEmitter,
    cancel: Arc<CancellationSource>,
}

#[async_trait]
impl ArtifactEmitter for CancelAfterFirstEmitter {
    async fn emit(
        &self,
        tree: &shared::domain::ControlNode,
        layout: &shared::layout::LayoutAnalysisResult,
        naming: &NamingContext,
    ) -> anyhow::Result<Vec<Artifact>> {
        self.cancel.cancel();
        self.inner.emit(tree, layout, naming).await
    }
}

#[tokio::test]
async fn converts_every_discovered_form() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");
    write_form(source.path(), "settings", "SettingsForm");

    let converter = test_pipeline(PipelineOptions::default());
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.forms_discovered, 2);
    assert_eq!(outcome.stats.forms_converted, 2);
    assert_eq!(outcome.stats.forms_failed, 0);

    let markup = fs::read_to_string(output.path().join("main.layout.xml")).expect("markup");
    assert!(markup.contains("layout=\"linear-stack\""));
    assert!(markup.contains("name=\"ok\""));
    let handlers = fs::read_to_string(output.path().join("main.handlers.txt")).expect("handlers");
    assert!(handlers.contains("ok.click -> on_ok"));
    assert!(output.path().join("formport-project.json").exists());

    // A completed run clears its checkpoint and persists fingerprints.
    assert!(!CheckpointStore::new(output.path()).exists());
    assert!(output
        .path()
        .join(STATE_DIR)
        .join("fingerprints.json")
        .exists());
}

#[tokio::test]
async fn dry_run_writes_no_artifacts() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");

    let converter = test_pipeline(PipelineOptions {
        dry_run: true,
        ..PipelineOptions::default()
    });
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.forms_converted, 1);
    assert_eq!(outcome.stats.files_written, 0);
    assert!(!output.path().join("main.layout.xml").exists());
    assert!(!output.path().join("formport-project.json").exists());
    // No checkpoint, fingerprint cache, or backup directory either.
    assert!(!output.path().join(STATE_DIR).exists());
}

#[tokio::test]
async fn cancelled_dry_run_leaves_no_state_directory() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");

    let converter = test_pipeline(PipelineOptions {
        dry_run: true,
        ..PipelineOptions::default()
    });
    let (cancel_source, token) = cancellation_pair();
    cancel_source.cancel();

    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(!output.path().join(STATE_DIR).exists());
}

#[tokio::test]
async fn dry_run_preserves_an_earlier_resume_checkpoint() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    let done = write_form(source.path(), "done", "DoneForm");
    write_form(source.path(), "todo", "TodoForm");

    let mut previous = shared::state::ConversionState::new(source.path(), output.path());
    previous.mark_completed(&done);
    let store = CheckpointStore::new(output.path());
    store.save(&previous).expect("seed checkpoint");

    let converter = test_pipeline(PipelineOptions {
        dry_run: true,
        ..PipelineOptions::default()
    });
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    // The real run's checkpoint is still there for a later real resume.
    let kept = store.load().expect("checkpoint kept");
    assert_eq!(kept.run_id, previous.run_id);
}

#[tokio::test]
async fn per_form_parse_failure_does_not_abort_the_run() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "good", "GoodForm");
    let broken = source.path().join("broken.form.json");
    fs::write(&broken, b"{ not json").expect("write broken form");

    let converter = test_pipeline(PipelineOptions::default());
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.forms_converted, 1);
    assert_eq!(outcome.stats.forms_failed, 1);
    let reason = outcome.failed.get(&broken).expect("failure recorded");
    assert!(reason.contains("parse failed"));
    assert!(output.path().join("good.layout.xml").exists());
}

#[tokio::test]
async fn forms_sharing_a_display_name_get_distinct_artifacts() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "billing", "EditForm");
    write_form(source.path(), "shipping", "EditForm");

    let converter = test_pipeline(PipelineOptions::default());
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.stats.forms_converted, 2);
    assert_eq!(outcome.stats.forms_failed, 0);
    assert!(output.path().join("billing.layout.xml").exists());
    assert!(output.path().join("shipping.layout.xml").exists());
}

#[tokio::test]
async fn cancellation_before_work_rolls_back_and_keeps_checkpoint() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");

    let observer = Arc::new(RecordingObserver::default());
    let sink: Arc<dyn ProgressObserver> = observer.clone();
    let converter = test_pipeline(PipelineOptions::default()).with_observer(sink);
    let (cancel_source, token) = cancellation_pair();
    cancel_source.cancel();

    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.stats.forms_converted, 0);
    assert!(!output.path().join("main.layout.xml").exists());
    // The checkpoint stays behind so a later run can resume.
    assert!(CheckpointStore::new(output.path()).exists());

    let phases = observer.phases.lock().expect("phases lock");
    assert!(phases.contains(&Phase::Cancelling));
    assert!(phases.contains(&Phase::RolledBack));
}

#[tokio::test]
async fn mid_run_cancellation_removes_already_written_artifacts() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "first", "FirstForm");
    write_form(source.path(), "second", "SecondForm");

    let (cancel_source, token) = cancellation_pair();
    let emitter = CancelAfterFirstEmitter {
        inner: MarkupEmitter,
        cancel: Arc::new(cancel_source),
    };
    let converter = ConversionPipeline::new(
        Arc::new(JsonFormParser),
        Arc::new(emitter),
        PipelineOptions::default(),
    );

    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Cancelled);
    // The first form finished before the signal was observed, then its
    // tracked writes were rolled back and its completion withdrawn so a
    // resumed run redoes it.
    assert_eq!(outcome.stats.forms_converted, 0);
    assert_eq!(outcome.stats.files_written, 0);
    assert!(!output.path().join("first.layout.xml").exists());
    assert!(!output.path().join("second.layout.xml").exists());

    let resumed = CheckpointStore::new(output.path())
        .load()
        .expect("checkpoint kept");
    assert!(resumed.completed.is_empty());
}

#[tokio::test]
async fn incremental_rerun_skips_unchanged_forms() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");
    let other = write_form(source.path(), "settings", "SettingsForm");

    let options = PipelineOptions {
        incremental: true,
        ..PipelineOptions::default()
    };
    let (_cancel_source, token) = cancellation_pair();
    let first = test_pipeline(options.clone())
        .run(source.path(), output.path(), token)
        .await
        .expect("first run");
    assert_eq!(first.stats.forms_converted, 2);

    // Second run: nothing changed, everything skips.
    let (_cancel_source, token) = cancellation_pair();
    let second = test_pipeline(options.clone())
        .run(source.path(), output.path(), token)
        .await
        .expect("second run");
    assert_eq!(second.stats.forms_converted, 0);
    assert_eq!(second.stats.forms_skipped, 2);

    // Editing one source file makes only that form reprocess.
    fs::write(&other, STACKED_FORM.replace("__NAME__", "RenamedForm")).expect("edit form");
    let (_cancel_source, token) = cancellation_pair();
    let third = test_pipeline(options)
        .run(source.path(), output.path(), token)
        .await
        .expect("third run");
    assert_eq!(third.stats.forms_converted, 1);
    assert_eq!(third.stats.forms_skipped, 1);
}

#[tokio::test]
async fn resume_skips_forms_the_checkpoint_marks_completed() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    let done = write_form(source.path(), "done", "DoneForm");
    write_form(source.path(), "todo", "TodoForm");

    let mut previous = shared::state::ConversionState::new(source.path(), output.path());
    previous.mark_completed(&done);
    previous.stats.forms_converted = 1;
    CheckpointStore::new(output.path())
        .save(&previous)
        .expect("seed checkpoint");

    let converter = test_pipeline(PipelineOptions::default());
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.status, RunStatus::Completed);
    // One carried over from the checkpoint, one converted now.
    assert_eq!(outcome.stats.forms_converted, 2);
    assert!(output.path().join("todo.layout.xml").exists());
    assert!(!output.path().join("done.layout.xml").exists());
}

#[tokio::test]
async fn parallel_mode_converts_all_forms() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    for i in 0..6 {
        write_form(source.path(), &format!("form{i}"), &format!("Form{i}"));
    }

    let converter = test_pipeline(PipelineOptions {
        parallel: Some(4),
        ..PipelineOptions::default()
    });
    let (_cancel_source, token) = cancellation_pair();
    let outcome = converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    assert_eq!(outcome.stats.forms_converted, 6);
    for i in 0..6 {
        assert!(output.path().join(format!("form{i}.layout.xml")).exists());
    }
}

#[tokio::test]
async fn missing_source_path_is_fatal() {
    let output = TempDir::new().expect("output dir");
    let converter = test_pipeline(PipelineOptions::default());
    let (_cancel_source, token) = cancellation_pair();
    let err = converter
        .run(Path::new("/nonexistent/forms"), output.path(), token)
        .await
        .expect_err("missing source");
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn migration_guide_flag_writes_the_guide() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");
    let broken = source.path().join("broken.form.json");
    fs::write(&broken, b"!!").expect("write broken form");

    let converter = test_pipeline(PipelineOptions {
        migration_guide: true,
        ..PipelineOptions::default()
    });
    let (_cancel_source, token) = cancellation_pair();
    converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    let guide = fs::read_to_string(output.path().join("MIGRATION.md")).expect("guide");
    assert!(guide.contains("# Migration guide"));
    assert!(guide.contains("| Forms converted | 1 |"));
    assert!(guide.contains("broken.form.json"));
}

#[tokio::test]
async fn version_control_receives_generated_paths() {
    let source = TempDir::new().expect("source dir");
    let output = TempDir::new().expect("output dir");
    write_form(source.path(), "main", "MainForm");

    let vcs = Arc::new(RecordingVcs::default());
    let staging: Arc<dyn VersionControl> = vcs.clone();
    let converter = test_pipeline(PipelineOptions::default()).with_version_control(staging);
    let (_cancel_source, token) = cancellation_pair();
    converter
        .run(source.path(), output.path(), token)
        .await
        .expect("run");

    let staged = vcs.staged.lock().expect("staged lock");
    assert!(staged.contains(&output.path().join("main.layout.xml")));
    assert!(staged.contains(&output.path().join("formport-project.json")));
}

#[test]
fn reporter_throttles_within_a_phase_but_never_drops_transitions() {
    let observer = Arc::new(RecordingObserver::default());
    let sink: Arc<dyn ProgressObserver> = observer.clone();
    let mut reporter = ProgressReporter::with_interval(sink, Duration::from_secs(600));
    let stats = ConversionStats::default();

    reporter.report(Phase::Parse, Some("a.form.json"), &stats);
    reporter.report(Phase::Parse, Some("b.form.json"), &stats);
    reporter.report(Phase::Parse, Some("c.form.json"), &stats);
    reporter.report(Phase::Analyze, Some("c.form.json"), &stats);
    reporter.report(Phase::Analyze, Some("d.form.json"), &stats);
    reporter.report(Phase::Complete, None, &stats);

    let phases = observer.phases.lock().expect("phases lock");
    assert_eq!(*phases, vec![Phase::Parse, Phase::Analyze, Phase::Complete]);
}
