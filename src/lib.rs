//! `rust-recon` reconciles two tabular datasets (an "A" side and a "B" side) held in memory as
//! [`types::DataSet`]s.
//!
//! A reconciliation runs Aggregate → Join → Reconcile:
//!
//! 1. each side is collapsed to one row per group-by key ([`processing::aggregate()`])
//! 2. the sides are joined on their keys, with `only_in_A` / `only_in_B` / `in_both` coverage
//!    flags and `_A` / `_B` suffixes on colliding columns ([`engine::join::join`])
//! 3. paired numeric columns are compared under a tolerance rule, producing `delta_*`,
//!    `abs_delta_*`, `pct_delta_*`, `match_*` and an overall `match_flag`
//!    ([`engine::reconcile::reconcile`])
//!
//! Optionally the same sequence is repeated at other grouping granularities ("drilldown"
//! levels), each derived from the base aggregation by adding or removing dimensions.
//!
//! ## Running a job from YAML
//!
//! Most callers should use [`pipeline::run_job`], which reads a job file ([`config`]), loads
//! both CSV inputs ([`ingestion`]), sanitizes and filters them ([`processing`]), runs the
//! [`engine::ReconEngine`] and writes reports ([`report`]) plus an audit record ([`audit`]).
//!
//! ```no_run
//! use rust_recon::pipeline::{run_job, RunOptions};
//!
//! # fn main() -> Result<(), rust_recon::ReconError> {
//! let summary = run_job("jobs/daily.yaml", "runs/today", &RunOptions::default())?;
//! println!("matched {}/{}", summary.metrics.matched, summary.metrics.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using the engine directly
//!
//! ```rust
//! use rust_recon::engine::join::{JoinHow, JoinSpec};
//! use rust_recon::engine::reconcile::{Comparator, ReconcileRule};
//! use rust_recon::engine::{ExecutionOptions, ReconEngine, ReconSpec};
//! use rust_recon::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Field::new("id", DataType::Int64),
//!     Field::new("amt", DataType::Float64),
//! ]);
//! let a = DataSet::new(schema.clone(), vec![vec![Value::Int64(1), Value::Float64(100.0)]]);
//! let b = DataSet::new(
//!     schema,
//!     vec![
//!         vec![Value::Int64(1), Value::Float64(100.2)],
//!         vec![Value::Int64(2), Value::Float64(50.0)],
//!     ],
//! );
//!
//! let spec = ReconSpec {
//!     aggregate_a: None,
//!     aggregate_b: None,
//!     join: JoinSpec::new(vec!["id".into()], JoinHow::Outer),
//!     rules: vec![ReconcileRule::new("amt", Comparator::Absolute).with_tol_abs(0.5)],
//!     select: vec![],
//!     drilldown: None,
//! };
//! let engine = ReconEngine::new(ExecutionOptions::default()).unwrap();
//! let out = engine.run(&a, &b, &spec).unwrap();
//!
//! assert_eq!(out.top.table.value(0, "match_flag"), Some(&Value::Bool(true)));
//! assert_eq!(out.top.table.value(1, "only_in_B"), Some(&Value::Bool(true)));
//! ```
//!
//! ## Modules
//!
//! - [`types`]: schema + in-memory dataset types
//! - [`ingestion`]: CSV reading with declared or inferred column types
//! - [`processing`]: sanitize, filter, aggregate
//! - [`engine`]: join, reconcile, drilldown and the [`engine::ReconEngine`] that runs them
//! - [`config`]: the YAML job format
//! - [`report`] / [`audit`]: output files
//! - [`error`]: the crate error type

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod processing;
pub mod report;
pub mod types;

pub use error::{ReconError, ReconResult, Stage};
