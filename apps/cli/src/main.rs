use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use layout::LayoutOptions;
use pipeline::{
    cancellation_pair, load_settings, ConversionPipeline, JsonFormParser, MarkupEmitter,
    PipelineOptions, ProgressObserver, ProgressSnapshot, RunStatus,
};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "formport", about = "Convert legacy desktop forms into layout-aware markup")]
struct Args {
    /// Directory containing the legacy form sources.
    #[arg(long)]
    source: PathBuf,
    /// Directory to write generated artifacts into.
    #[arg(long)]
    output: PathBuf,
    /// Only reprocess forms whose content changed since the last run.
    #[arg(long)]
    incremental: bool,
    /// Reprocess everything, ignoring fingerprints and checkpoints.
    #[arg(long)]
    force: bool,
    /// Process up to N forms concurrently; 0 selects the machine's
    /// available parallelism.
    #[arg(long)]
    parallel: Option<usize>,
    /// Run every phase but write nothing.
    #[arg(long)]
    dry_run: bool,
    /// Also write a markdown migration guide.
    #[arg(long)]
    migration_guide: bool,
    /// Alignment tolerance in source coordinate units.
    #[arg(long)]
    tolerance: Option<i32>,
    /// Layout confidence threshold percentage.
    #[arg(long)]
    threshold: Option<u8>,
}

struct ConsoleObserver;

impl ProgressObserver for ConsoleObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let form = snapshot.current_form.as_deref().unwrap_or("-");
        println!(
            "[{}] form={} converted={} skipped={} failed={} files={} elapsed={}ms",
            snapshot.phase,
            form,
            snapshot.stats.forms_converted,
            snapshot.stats.forms_skipped,
            snapshot.stats.forms_failed,
            snapshot.stats.files_written,
            snapshot.elapsed_ms
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = load_settings();

    let parallel = match args.parallel.or(settings.parallel) {
        Some(0) => Some(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        ),
        other => other,
    };
    let options = PipelineOptions {
        incremental: args.incremental,
        force: args.force,
        parallel,
        dry_run: args.dry_run,
        migration_guide: args.migration_guide,
        layout: LayoutOptions {
            tolerance: args.tolerance.unwrap_or(settings.tolerance),
            confidence_threshold: args.threshold.unwrap_or(settings.confidence_threshold),
            force_free: false,
        },
    };

    let (cancel_source, cancel_token) = cancellation_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling and rolling back");
            cancel_source.cancel();
        }
    });

    let converter = ConversionPipeline::new(
        Arc::new(JsonFormParser),
        Arc::new(MarkupEmitter),
        options,
    )
    .with_observer(Arc::new(ConsoleObserver));

    let outcome = converter
        .run(&args.source, &args.output, cancel_token)
        .await?;

    match outcome.status {
        RunStatus::Cancelled => {
            println!("cancelled: output directory restored, checkpoint kept for resume");
        }
        RunStatus::Completed => {
            println!(
                "done: {} of {} forms converted, {} skipped, {} failed, {} files written",
                outcome.stats.forms_converted,
                outcome.stats.forms_discovered,
                outcome.stats.forms_skipped,
                outcome.stats.forms_failed,
                outcome.stats.files_written
            );
            for (path, reason) in &outcome.failed {
                println!("  failed {}: {reason}", path.display());
            }
        }
    }
    Ok(())
}
