use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rust_recon::audit::{sha256_hex, AuditRecord, AUDIT_FILE};
use rust_recon::engine::{ReconEvent, ReconObserver};
use rust_recon::pipeline::{run_job, RunOptions};
use rust_recon::report::{ReportMetrics, METRICS_FILE};
use rust_recon::{ReconError, Stage};

const JOB: &str = "tests/fixtures/job.yaml";

fn read_metrics(dir: &Path) -> ReportMetrics {
    serde_json::from_str(&fs::read_to_string(dir.join(METRICS_FILE)).unwrap()).unwrap()
}

fn csv_rows(path: &Path) -> Vec<Vec<String>> {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    rdr.records()
        .map(|r| r.unwrap().iter().map(str::to_owned).collect())
        .collect()
}

fn single_thread() -> RunOptions {
    RunOptions {
        num_threads: Some(1),
        ..Default::default()
    }
}

#[test]
fn fixture_job_writes_reports_audit_and_drilldown() {
    let out = tempfile::tempdir().unwrap();
    let summary = run_job(JOB, out.path(), &RunOptions::default()).unwrap();

    assert_eq!(summary.job, "ledger_vs_bank");
    assert_eq!(summary.report_dir, out.path().join("reports"));
    assert_eq!(
        summary.metrics,
        ReportMetrics {
            total: 4,
            matched: 1,
            non_matched: 3
        }
    );
    assert_eq!(read_metrics(&summary.report_dir), summary.metrics);

    // labels applied to the header, selection order kept
    let mut rdr = csv::Reader::from_path(summary.report_dir.join("matched.csv")).unwrap();
    let header: Vec<String> = rdr.headers().unwrap().iter().map(str::to_owned).collect();
    assert_eq!(
        header,
        vec!["account", "ledger_amount", "bank_amount", "delta_amount", "match_flag"]
    );
    let matched = csv_rows(&summary.report_dir.join("matched.csv"));
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0][0], "1002");

    let non_matched = csv_rows(&summary.report_dir.join("non_matched.csv"));
    let accounts: Vec<&str> = non_matched.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(accounts, vec!["1001", "1004", "1005"]);

    let json: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(summary.report_dir.join("differences.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(json.as_array().map(Vec::len), Some(4));
    assert_eq!(json[3]["account"], "1005");
    assert_eq!(json[3]["ledger_amount"], 0.0);

    let audit: AuditRecord =
        serde_json::from_str(&fs::read_to_string(out.path().join(AUDIT_FILE)).unwrap()).unwrap();
    assert_eq!(audit.config_sha256, sha256_hex(&fs::read_to_string(JOB).unwrap()));
    assert_eq!(summary.audit_path, out.path().join(AUDIT_FILE));

    assert_eq!(summary.levels.len(), 1);
    let level = &summary.levels[0];
    assert_eq!(level.label, "level_01");
    assert_eq!(level.dir, out.path().join("reports/drilldown/level_01"));
    assert_eq!(
        level.metrics,
        ReportMetrics {
            total: 5,
            matched: 2,
            non_matched: 3
        }
    );
    let mut rdr = csv::Reader::from_path(level.dir.join("differences.csv")).unwrap();
    let header: Vec<String> = rdr.headers().unwrap().iter().map(str::to_owned).collect();
    assert_eq!(header[..2].to_vec(), vec!["region", "account"]);
}

#[test]
fn empty_inputs_produce_zero_metrics() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.csv"), "id,amt\n").unwrap();
    fs::write(dir.path().join("b.csv"), "id,amt\n").unwrap();
    let job = dir.path().join("job.yaml");
    fs::write(
        &job,
        "inputs:\n  A: { path: a.csv }\n  B: { path: b.csv }\njoin: { keys: [id], type: outer }\nreconcile:\n  numeric:\n    - { column: amt, comparator: exact }\nreport:\n  outputs: { dir: reports }\n",
    )
    .unwrap();

    let summary = run_job(&job, dir.path().join("out"), &single_thread()).unwrap();
    assert_eq!(summary.metrics, ReportMetrics::default());
    assert_eq!(read_metrics(&summary.report_dir), ReportMetrics::default());
    assert!(summary.report_dir.join("differences.csv").exists());
    assert!(summary.levels.is_empty());
}

#[test]
fn missing_input_file_fails_in_load_stage() {
    let dir = tempfile::tempdir().unwrap();
    let job = dir.path().join("job.yaml");
    fs::write(
        &job,
        "inputs:\n  A: { path: missing.csv }\n  B: { path: missing.csv }\njoin: { keys: [id] }\n",
    )
    .unwrap();

    let err = run_job(&job, dir.path().join("out"), &single_thread()).unwrap_err();
    match &err {
        ReconError::Stage { stage, input, .. } => {
            assert_eq!(*stage, Stage::Load);
            assert!(input.starts_with("A ("));
        }
        other => panic!("expected load stage error, got {other:?}"),
    }
    assert!(!dir.path().join("out").join(AUDIT_FILE).exists());
}

#[test]
fn strict_unknown_kinds_reject_before_reading_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let job = dir.path().join("job.yaml");
    let text = fs::read_to_string(JOB)
        .unwrap()
        .replace("name: ledger_vs_bank", "name: strict\n  unknown_kinds: error")
        .replace("{ agg: sum }", "{ agg: median }");
    fs::write(&job, text).unwrap();

    let err = run_job(&job, dir.path().join("out"), &single_thread()).unwrap_err();
    assert!(matches!(err, ReconError::Configuration { .. }));
    assert!(err.to_string().contains("aggregate.A.amount"));
}

#[derive(Default)]
struct FallbackCounter {
    fallbacks: AtomicUsize,
    levels: AtomicUsize,
}

impl ReconObserver for FallbackCounter {
    fn on_event(&self, event: &ReconEvent) {
        match event {
            ReconEvent::FallbackApplied { .. } => {
                self.fallbacks.fetch_add(1, Ordering::SeqCst);
            }
            ReconEvent::LevelFinished { .. } => {
                self.levels.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[test]
fn lenient_unknown_kinds_fall_back_and_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let job = dir.path().join("job.yaml");
    let text = fs::read_to_string(JOB)
        .unwrap()
        .replace("{ agg: sum }", "{ agg: median }")
        .replace("path: ledger.csv", &format!("path: {}", Path::new("tests/fixtures/ledger.csv").canonicalize().unwrap().display()))
        .replace("path: bank.csv", &format!("path: {}", Path::new("tests/fixtures/bank.csv").canonicalize().unwrap().display()));
    fs::write(&job, text).unwrap();

    let counter = Arc::new(FallbackCounter::default());
    let opts = RunOptions {
        num_threads: Some(2),
        observer: Some(counter.clone()),
    };
    let summary = run_job(&job, dir.path().join("out"), &opts).unwrap();

    // median falls back to sum, so the result is the same as the fixture job
    assert_eq!(summary.metrics.matched, 1);
    assert_eq!(counter.fallbacks.load(Ordering::SeqCst), 2);
    assert_eq!(counter.levels.load(Ordering::SeqCst), 1);
}
