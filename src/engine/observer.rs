use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Stage;

/// Events emitted by [`super::ReconEngine`] while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconEvent {
    RunStarted,
    StageStarted {
        stage: Stage,
        input: String,
    },
    StageFinished {
        stage: Stage,
        input: String,
        rows: usize,
        elapsed: Duration,
    },
    /// An unrecognized aggregation or comparator kind was replaced by its fallback.
    FallbackApplied {
        /// Where the kind was configured, e.g. `aggregate.A.amount`.
        location: String,
        fallback: &'static str,
    },
    LevelFinished {
        label: String,
        rows: usize,
        matched: usize,
    },
    RunFinished {
        elapsed: Duration,
        metrics: EngineMetricsSnapshot,
    },
}

/// Observer hook for engine events.
pub trait ReconObserver: Send + Sync {
    fn on_event(&self, event: &ReconEvent);
}

/// Forwards engine events to `tracing`.
///
/// Fallbacks are logged at WARN, stage boundaries at DEBUG, everything else at INFO.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ReconObserver for TracingObserver {
    fn on_event(&self, event: &ReconEvent) {
        match event {
            ReconEvent::RunStarted => tracing::info!("reconciliation started"),
            ReconEvent::StageStarted { stage, input } => {
                tracing::debug!(%stage, input = %input, "stage started");
            }
            ReconEvent::StageFinished {
                stage,
                input,
                rows,
                elapsed,
            } => {
                tracing::debug!(%stage, input = %input, rows, ?elapsed, "stage finished");
            }
            ReconEvent::FallbackApplied { location, fallback } => {
                tracing::warn!(
                    location = %location,
                    fallback,
                    "unrecognized kind, falling back"
                );
            }
            ReconEvent::LevelFinished {
                label,
                rows,
                matched,
            } => {
                tracing::info!(level = %label, rows, matched, "drilldown level reconciled");
            }
            ReconEvent::RunFinished { elapsed, metrics } => {
                tracing::info!(?elapsed, %metrics, "reconciliation finished");
            }
        }
    }
}

/// Counters for the current run. Snapshot them at any time.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    runs: AtomicU64,
    stages_finished: AtomicU64,
    rows_produced: AtomicU64,
    fallbacks: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_run(&self) {
        let _ = self.runs.fetch_add(1, Ordering::SeqCst);
        self.stages_finished.store(0, Ordering::SeqCst);
        self.rows_produced.store(0, Ordering::SeqCst);
        self.fallbacks.store(0, Ordering::SeqCst);
    }

    pub(crate) fn on_stage_finished(&self, rows: usize) {
        let _ = self.stages_finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.rows_produced.fetch_add(rows as u64, Ordering::SeqCst);
    }

    pub(crate) fn on_fallback(&self) {
        let _ = self.fallbacks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            run_id: self.runs.load(Ordering::SeqCst),
            stages_finished: self.stages_finished.load(Ordering::SeqCst),
            rows_produced: self.rows_produced.load(Ordering::SeqCst),
            fallbacks: self.fallbacks.load(Ordering::SeqCst),
        }
    }
}

/// Immutable snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineMetricsSnapshot {
    pub run_id: u64,
    pub stages_finished: u64,
    /// Sum of output rows over all finished stages.
    pub rows_produced: u64,
    pub fallbacks: u64,
}

impl fmt::Display for EngineMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, stages={}, rows_produced={}, fallbacks={}",
            self.run_id, self.stages_finished, self.rows_produced, self.fallbacks
        )
    }
}
