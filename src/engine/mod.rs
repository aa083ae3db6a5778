//! Reconciliation engine: aggregate → join → reconcile, then drilldown levels.
//!
//! This module sits "above" [`crate::processing`] and provides:
//!
//! - the keyed [`join`] with coverage flags
//! - tolerance-based [`reconcile`] comparisons
//! - [`drilldown`] levels computed on the engine's thread pool
//! - observer hooks and run metrics via [`ReconObserver`]

pub mod drilldown;
pub mod join;
mod observer;
pub mod reconcile;

use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;

use crate::error::{ReconError, ReconResult, Stage, StageContext};
use crate::processing::aggregate::{aggregate, AggregateSpec};
use crate::processing::reduce::AggKind;
use crate::types::{DataSet, Value};

use drilldown::{run_drilldown, DrilldownSpec, LevelResult};
use join::JoinSpec;
use reconcile::{Comparator, ReconcileRule, MATCH_FLAG};

pub use observer::{EngineMetrics, EngineMetricsSnapshot, ReconEvent, ReconObserver, TracingObserver};

/// Fully resolved input to [`ReconEngine::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconSpec {
    pub aggregate_a: Option<AggregateSpec>,
    pub aggregate_b: Option<AggregateSpec>,
    pub join: JoinSpec,
    pub rules: Vec<ReconcileRule>,
    /// Columns the top-level report is sliced to. Empty means all columns.
    pub select: Vec<String>,
    pub drilldown: Option<DrilldownSpec>,
}

impl ReconSpec {
    /// Every configured kind that is not recognized, with where it was configured and the
    /// kind it falls back to.
    pub fn unrecognized_kinds(&self) -> Vec<(String, &'static str)> {
        let mut out = Vec::new();
        for (side, spec) in [("A", &self.aggregate_a), ("B", &self.aggregate_b)] {
            for metric in spec.iter().flat_map(|s| s.metrics.iter()) {
                if metric.kind == AggKind::Unrecognized {
                    out.push((format!("aggregate.{side}.{}", metric.column), "sum"));
                }
            }
        }
        for rule in &self.rules {
            if rule.comparator == Comparator::Unrecognized {
                out.push((format!("reconcile.numeric.{}", rule.column), "exact"));
            }
        }
        out
    }
}

/// Top-level reconciled table and the columns to report from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub table: DataSet,
    pub select_columns: Vec<String>,
}

/// Everything one [`ReconEngine::run`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconOutcome {
    pub top: Reconciled,
    /// Drilldown results in level order. Empty when drilldown is not configured.
    pub levels: Vec<LevelResult>,
}

/// Configuration for the [`ReconEngine`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Number of worker threads used by the engine.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
}

/// Runs reconciliations on a dedicated rayon pool.
pub struct ReconEngine {
    pool: ThreadPool,
    observer: Option<Arc<dyn ReconObserver>>,
    metrics: Arc<EngineMetrics>,
}

impl ReconEngine {
    /// Create a new engine with the given options.
    pub fn new(opts: ExecutionOptions) -> ReconResult<Self> {
        if opts.num_threads == Some(0) {
            return Err(ReconError::config("num_threads must be > 0 when set"));
        }
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("recon-worker-{i}"))
            .build()
            .map_err(|e| ReconError::config(format!("failed to build thread pool: {e}")))?;

        Ok(Self {
            pool,
            observer: None,
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    /// Attach an observer for engine events.
    pub fn with_observer(mut self, observer: Arc<dyn ReconObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to the run metrics.
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of worker threads in the engine's pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Reconcile two prepared tables.
    ///
    /// `a` and `b` must already be sanitized and filtered; they are only read.
    pub fn run(&self, a: &DataSet, b: &DataSet, spec: &ReconSpec) -> ReconResult<ReconOutcome> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ReconEvent::RunStarted);

        for (location, fallback) in spec.unrecognized_kinds() {
            self.metrics.on_fallback();
            self.emit(ReconEvent::FallbackApplied { location, fallback });
        }

        let (a_agg, b_agg) = self.pool.join(
            || self.stage(Stage::Aggregate, "A", || aggregate(a, spec.aggregate_a.as_ref())),
            || self.stage(Stage::Aggregate, "B", || aggregate(b, spec.aggregate_b.as_ref())),
        );
        let (a_agg, b_agg) = (a_agg?, b_agg?);

        let joined = self.stage(Stage::Join, "A+B", || join::join(&a_agg, &b_agg, &spec.join))?;
        let table = self.stage(Stage::Reconcile, "A+B", || {
            reconcile::reconcile(&joined, &spec.rules, &spec.join.suffixes)
        })?;

        let levels = match &spec.drilldown {
            Some(drill) if !drill.levels.is_empty() => {
                let levels = self.stage_levels(a, b, spec, drill)?;
                for level in &levels {
                    self.emit(ReconEvent::LevelFinished {
                        label: level.label.clone(),
                        rows: level.table.row_count(),
                        matched: count_matched(&level.table),
                    });
                }
                levels
            }
            _ => Vec::new(),
        };

        let elapsed = start.elapsed();
        self.emit(ReconEvent::RunFinished {
            elapsed,
            metrics: self.metrics.snapshot(),
        });

        Ok(ReconOutcome {
            top: Reconciled {
                table,
                select_columns: spec.select.clone(),
            },
            levels,
        })
    }

    fn stage_levels(
        &self,
        a: &DataSet,
        b: &DataSet,
        spec: &ReconSpec,
        drill: &DrilldownSpec,
    ) -> ReconResult<Vec<LevelResult>> {
        let input = format!("{} levels", drill.levels.len());
        self.emit(ReconEvent::StageStarted {
            stage: Stage::Drilldown,
            input: input.clone(),
        });
        let t0 = Instant::now();
        // Level errors already carry their label as stage context.
        let levels = run_drilldown(a, b, spec, drill, &self.pool)?;
        let rows = levels.iter().map(|l| l.table.row_count()).sum();
        self.metrics.on_stage_finished(rows);
        self.emit(ReconEvent::StageFinished {
            stage: Stage::Drilldown,
            input,
            rows,
            elapsed: t0.elapsed(),
        });
        Ok(levels)
    }

    fn stage<F>(&self, stage: Stage, input: &str, f: F) -> ReconResult<DataSet>
    where
        F: FnOnce() -> ReconResult<DataSet>,
    {
        self.emit(ReconEvent::StageStarted {
            stage,
            input: input.to_string(),
        });
        let t0 = Instant::now();
        let out = f().in_stage(stage, input)?;
        self.metrics.on_stage_finished(out.row_count());
        self.emit(ReconEvent::StageFinished {
            stage,
            input: input.to_string(),
            rows: out.row_count(),
            elapsed: t0.elapsed(),
        });
        Ok(out)
    }

    fn emit(&self, event: ReconEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Rows whose `match_flag` is true. A table without the flag has none.
pub fn count_matched(table: &DataSet) -> usize {
    match table.schema.index_of(MATCH_FLAG) {
        Some(idx) => table
            .rows
            .iter()
            .filter(|row| row[idx] == Value::Bool(true))
            .count(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::engine::drilldown::{DrillLevel, Strategy};
    use crate::engine::join::{JoinHow, IN_BOTH, ONLY_IN_B};
    use crate::processing::aggregate::Metric;
    use crate::types::{DataType, Field, Schema};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ReconEvent>>,
    }

    impl ReconObserver for Recorder {
        fn on_event(&self, event: &ReconEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn amounts(rows: &[(i64, f64)]) -> DataSet {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("amt", DataType::Float64),
        ]);
        let rows = rows
            .iter()
            .map(|(id, amt)| vec![Value::Int64(*id), Value::Float64(*amt)])
            .collect();
        DataSet::new(schema, rows)
    }

    fn outer_on_id(rules: Vec<ReconcileRule>) -> ReconSpec {
        ReconSpec {
            aggregate_a: None,
            aggregate_b: None,
            join: JoinSpec::new(vec!["id".into()], JoinHow::Outer),
            rules,
            select: vec![],
            drilldown: None,
        }
    }

    fn engine() -> ReconEngine {
        ReconEngine::new(ExecutionOptions {
            num_threads: Some(2),
        })
        .unwrap()
    }

    #[test]
    fn zero_threads_is_rejected() {
        let res = ReconEngine::new(ExecutionOptions {
            num_threads: Some(0),
        });
        assert!(matches!(res, Err(ReconError::Configuration { .. })));
    }

    #[test]
    fn end_to_end_outer_join_with_absolute_rule() {
        let a = amounts(&[(1, 100.0)]);
        let b = amounts(&[(1, 101.0), (2, 50.0)]);
        let spec = outer_on_id(vec![
            ReconcileRule::new("amt", Comparator::Absolute).with_tol_abs(0.5),
        ]);
        let out = engine().run(&a, &b, &spec).unwrap();
        let t = &out.top.table;

        assert_eq!(t.row_count(), 2);
        assert_eq!(t.value(0, IN_BOTH), Some(&Value::Bool(true)));
        assert_eq!(t.value(0, "delta_amt"), Some(&Value::Float64(1.0)));
        assert_eq!(t.value(0, "match_amt"), Some(&Value::Bool(false)));

        assert_eq!(t.value(1, ONLY_IN_B), Some(&Value::Bool(true)));
        assert_eq!(t.value(1, "amt_A"), Some(&Value::Float64(0.0)));
        assert_eq!(t.value(1, "match_amt"), Some(&Value::Bool(false)));

        assert_eq!(count_matched(t), 0);
        assert!(out.levels.is_empty());
    }

    #[test]
    fn aggregates_before_joining() {
        let a = amounts(&[(1, 60.0), (1, 40.0)]);
        let b = amounts(&[(1, 100.0)]);
        let agg = AggregateSpec::new(vec!["id".into()], vec![Metric::new("amt", AggKind::Sum)]);
        let mut spec = outer_on_id(vec![ReconcileRule::new("amt", Comparator::Exact)]);
        spec.aggregate_a = Some(agg.clone());
        spec.aggregate_b = Some(agg);

        let out = engine().run(&a, &b, &spec).unwrap();
        assert_eq!(out.top.table.row_count(), 1);
        assert_eq!(count_matched(&out.top.table), 1);
    }

    #[test]
    fn stage_failure_is_wrapped_with_stage_and_input() {
        let a = amounts(&[(1, 1.0)]);
        let mut spec = outer_on_id(vec![]);
        spec.aggregate_b = Some(AggregateSpec::new(vec!["region".into()], vec![]));

        let err = engine().run(&a, &a, &spec).unwrap_err();
        match &err {
            ReconError::Stage { stage, input, .. } => {
                assert_eq!(*stage, Stage::Aggregate);
                assert_eq!(input, "B");
            }
            other => panic!("expected stage error, got {other:?}"),
        }
        assert!(matches!(err.root(), ReconError::Schema { .. }));
    }

    #[test]
    fn observer_sees_fallbacks_stages_and_levels() {
        let a = amounts(&[(1, 1.0)]);
        let mut spec = outer_on_id(vec![ReconcileRule::new("amt", Comparator::Unrecognized)]);
        spec.drilldown = Some(DrilldownSpec {
            strategy: Strategy::Add,
            levels: vec![DrillLevel::default()],
        });

        let recorder = Arc::new(Recorder::default());
        let obs: Arc<dyn ReconObserver> = recorder.clone();
        let engine = engine().with_observer(obs);
        let out = engine.run(&a, &a, &spec).unwrap();
        assert_eq!(out.levels.len(), 1);
        // unrecognized comparator falls back to exact
        assert_eq!(count_matched(&out.top.table), 1);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.first(), Some(&ReconEvent::RunStarted));
        assert!(events.contains(&ReconEvent::FallbackApplied {
            location: "reconcile.numeric.amt".into(),
            fallback: "exact",
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            ReconEvent::LevelFinished { label, rows: 1, matched: 1 } if label == "level_01"
        )));
        let finished = events
            .iter()
            .filter(|e| matches!(e, ReconEvent::StageFinished { .. }))
            .count();
        // aggregate A, aggregate B, join, reconcile, drilldown
        assert_eq!(finished, 5);
        assert!(matches!(events.last(), Some(ReconEvent::RunFinished { .. })));

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.stages_finished, 5);
    }
}
