use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use shared::state::ConversionStats;

/// Discrete phases of a conversion run. `Cancelling` and `RolledBack` form
/// the abort path and are reachable from any other phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Parse,
    Analyze,
    Generate,
    ProjectFiles,
    Documentation,
    Commit,
    Cancelling,
    RolledBack,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Parse => "parse",
            Phase::Analyze => "analyze",
            Phase::Generate => "generate",
            Phase::ProjectFiles => "project-files",
            Phase::Documentation => "documentation",
            Phase::Commit => "commit",
            Phase::Cancelling => "cancelling",
            Phase::RolledBack => "rolled-back",
            Phase::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub current_form: Option<String>,
    pub stats: ConversionStats,
    pub elapsed_ms: u64,
}

/// Injected progress sink. Implementations must tolerate being called from
/// whichever task finishes a unit of work; snapshots are always consistent
/// because the reporter runs under the pipeline's state lock.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

/// Throttles snapshot delivery to one per interval, except that a phase
/// transition is always delivered so discrete milestones are never
/// silently dropped.
pub(crate) struct ProgressReporter {
    observer: Arc<dyn ProgressObserver>,
    started: Instant,
    min_interval: Duration,
    last_emit: Option<Instant>,
    last_phase: Option<Phase>,
}

impl ProgressReporter {
    pub(crate) fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            observer,
            started: Instant::now(),
            min_interval: Duration::from_millis(100),
            last_emit: None,
            last_phase: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_interval(observer: Arc<dyn ProgressObserver>, interval: Duration) -> Self {
        Self {
            min_interval: interval,
            ..Self::new(observer)
        }
    }

    pub(crate) fn report(
        &mut self,
        phase: Phase,
        current_form: Option<&str>,
        stats: &ConversionStats,
    ) {
        let now = Instant::now();
        let phase_changed = self.last_phase != Some(phase);
        if !phase_changed {
            if let Some(last) = self.last_emit {
                if now.duration_since(last) < self.min_interval {
                    return;
                }
            }
        }
        self.last_phase = Some(phase);
        self.last_emit = Some(now);

        let snapshot = ProgressSnapshot {
            phase,
            current_form: current_form.map(str::to_string),
            stats: stats.clone(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        self.observer.on_progress(&snapshot);
    }
}
