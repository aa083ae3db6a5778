//! End-to-end job runner: config → load → prepare → reconcile → reports → audit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::audit::write_audit;
use crate::config::{self, InputConfig};
use crate::engine::{ExecutionOptions, ReconEngine, ReconObserver, TracingObserver};
use crate::error::{ReconResult, Stage, StageContext};
use crate::ingestion::ingest_csv_from_path;
use crate::processing::{apply_filters, sanitize, FilterPredicate};
use crate::report::{emit_reports, ReportMetrics};
use crate::types::DataSet;

/// Knobs for [`run_job`] that do not belong in the job file.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Engine worker threads; `None` uses the available parallelism.
    pub num_threads: Option<usize>,
    /// Engine observer. Defaults to [`TracingObserver`].
    pub observer: Option<Arc<dyn ReconObserver>>,
}

/// Report counts for one drilldown level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary {
    pub label: String,
    pub dir: PathBuf,
    pub metrics: ReportMetrics,
}

/// What a run produced and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub job: String,
    pub report_dir: PathBuf,
    pub audit_path: PathBuf,
    pub metrics: ReportMetrics,
    pub levels: Vec<LevelSummary>,
}

/// Run the job described by `config_path`.
///
/// Reports go to the job's `report.outputs.dir`; a relative one is taken relative to `out_dir`.
/// `audit.json` goes to `out_dir`. Drilldown reports go to `<report dir>/drilldown/level_NN`.
pub fn run_job(
    config_path: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    opts: &RunOptions,
) -> ReconResult<RunSummary> {
    let start = Instant::now();
    let out_dir = out_dir.as_ref();
    let loaded = config::load(config_path)?;
    let cfg = &loaded.config;
    cfg.validate()?;
    let spec = cfg.to_spec();
    let (a_cfg, b_cfg) = cfg.inputs()?;
    tracing::info!(job = %cfg.job.name, config = %loaded.path.display(), "job started");

    let a = load_and_prepare("A", a_cfg, &cfg.filters.a)?;
    let b = load_and_prepare("B", b_cfg, &cfg.filters.b)?;

    let observer = opts
        .observer
        .clone()
        .unwrap_or_else(|| Arc::new(TracingObserver) as Arc<dyn ReconObserver>);
    let engine = ReconEngine::new(ExecutionOptions {
        num_threads: opts.num_threads,
    })?
    .with_observer(observer);
    let outcome = engine.run(&a, &b, &spec)?;

    let report_dir = if cfg.report.outputs.dir.is_absolute() {
        cfg.report.outputs.dir.clone()
    } else {
        out_dir.join(&cfg.report.outputs.dir)
    };
    let metrics = emit_reports(
        &outcome.top.table,
        &outcome.top.select_columns,
        &cfg.report,
        &report_dir,
    )
    .in_stage(Stage::Report, "top")?;

    let audit_path =
        write_audit(out_dir, &loaded.text).in_stage(Stage::Audit, out_dir.display().to_string())?;

    let mut levels = Vec::with_capacity(outcome.levels.len());
    for level in &outcome.levels {
        let dir = report_dir.join("drilldown").join(&level.label);
        let metrics = emit_reports(&level.table, &level.select_columns, &cfg.report, &dir)
            .in_stage(Stage::Report, level.label.clone())?;
        levels.push(LevelSummary {
            label: level.label.clone(),
            dir,
            metrics,
        });
    }

    tracing::info!(
        job = %cfg.job.name,
        total = metrics.total,
        matched = metrics.matched,
        levels = levels.len(),
        elapsed = ?start.elapsed(),
        "job finished"
    );

    Ok(RunSummary {
        job: cfg.job.name.clone(),
        report_dir,
        audit_path,
        metrics,
        levels,
    })
}

/// Read one input, then sanitize and filter it.
pub fn load_and_prepare(
    side: &str,
    input: &InputConfig,
    extra_filters: &[FilterPredicate],
) -> ReconResult<DataSet> {
    let label = format!("{side} ({})", input.read.path.display());
    let raw = ingest_csv_from_path(&input.read).in_stage(Stage::Load, label.clone())?;
    let sanitized = sanitize(&raw, input.sanitize.as_ref()).in_stage(Stage::Prepare, label)?;
    let prepared = apply_filters(&sanitized, &input.predicates(extra_filters));
    tracing::info!(
        side,
        rows_read = raw.row_count(),
        rows_prepared = prepared.row_count(),
        "input prepared"
    );
    Ok(prepared)
}
