//! Re-running aggregate → join → reconcile at finer or coarser grouping levels.
//!
//! Each level is derived from the base specs alone and reads the prepared (pre-aggregation)
//! tables, so levels are independent of each other and of the top-level result.

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Deserialize;

use crate::error::{ReconResult, Stage, StageContext};
use crate::processing::aggregate::{aggregate, dedup_keep_order, AggregateSpec};
use crate::types::DataSet;

use super::join::{join, JoinSpec};
use super::reconcile::reconcile;
use super::ReconSpec;

/// How a level's common `add` / `remove` lists are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Drill down: `add` dimensions make groups finer. `remove` is ignored.
    #[default]
    Add,
    /// Drill up: `remove` dimensions make groups coarser. `add` is ignored.
    Remove,
}

/// Dimension changes for one level. Side-specific lists win over the common ones when
/// non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DrillLevel {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default, rename = "A_add")]
    pub a_add: Vec<String>,
    #[serde(default, rename = "B_add")]
    pub b_add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default, rename = "A_remove")]
    pub a_remove: Vec<String>,
    #[serde(default, rename = "B_remove")]
    pub b_remove: Vec<String>,
}

/// Drilldown configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DrilldownSpec {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub levels: Vec<DrillLevel>,
}

/// Per-side dimension changes once the strategy has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideDims {
    pub a_add: Vec<String>,
    pub b_add: Vec<String>,
    pub a_remove: Vec<String>,
    pub b_remove: Vec<String>,
}

impl DrillLevel {
    pub fn side_dims(&self, strategy: Strategy) -> SideDims {
        let common_add: &[String] = if strategy == Strategy::Add { &self.add } else { &[] };
        let common_remove: &[String] = if strategy == Strategy::Remove {
            &self.remove
        } else {
            &[]
        };
        let pick = |own: &[String], common: &[String]| {
            if own.is_empty() { common.to_vec() } else { own.to_vec() }
        };
        SideDims {
            a_add: pick(&self.a_add, common_add),
            b_add: pick(&self.b_add, common_add),
            a_remove: pick(&self.a_remove, common_remove),
            b_remove: pick(&self.b_remove, common_remove),
        }
    }
}

/// Everything needed to compute one level, derived from the base specs.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelPlan {
    /// 1-based level index.
    pub index: usize,
    pub dims: SideDims,
    pub aggregate_a: Option<AggregateSpec>,
    pub aggregate_b: Option<AggregateSpec>,
    /// Report columns: A-side added dimensions, then the global selection, deduplicated.
    pub select_columns: Vec<String>,
}

impl LevelPlan {
    pub fn new(spec: &ReconSpec, level: &DrillLevel, strategy: Strategy, index: usize) -> Self {
        let dims = level.side_dims(strategy);
        let aggregate_a = spec
            .aggregate_a
            .as_ref()
            .map(|s| s.adjusted(&dims.a_remove, &dims.a_add));
        let aggregate_b = spec
            .aggregate_b
            .as_ref()
            .map(|s| s.adjusted(&dims.b_remove, &dims.b_add));
        let select_columns =
            dedup_keep_order(dims.a_add.iter().chain(spec.select.iter()).cloned());
        Self {
            index,
            dims,
            aggregate_a,
            aggregate_b,
            select_columns,
        }
    }

    /// Zero-padded label, e.g. `level_01`. Reports for the level go under this name.
    pub fn label(&self) -> String {
        level_label(self.index)
    }
}

pub fn level_label(index: usize) -> String {
    format!("level_{index:02}")
}

/// Reconciled output of one drilldown level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelResult {
    pub index: usize,
    pub label: String,
    /// Join keys used at this level.
    pub join_keys: Vec<String>,
    pub table: DataSet,
    pub select_columns: Vec<String>,
}

/// Compute one level from the prepared tables.
pub fn run_level(
    a_prepared: &DataSet,
    b_prepared: &DataSet,
    spec: &ReconSpec,
    plan: &LevelPlan,
) -> ReconResult<LevelResult> {
    let label = plan.label();
    let a_agg = aggregate(a_prepared, plan.aggregate_a.as_ref())
        .in_stage(Stage::Aggregate, format!("{label} A"))?;
    let b_agg = aggregate(b_prepared, plan.aggregate_b.as_ref())
        .in_stage(Stage::Aggregate, format!("{label} B"))?;

    // An added dimension becomes a key only once both aggregated sides actually carry it.
    let common_added = plan
        .dims
        .a_add
        .iter()
        .filter(|c| plan.dims.b_add.contains(c))
        .filter(|c| a_agg.schema.contains(c) && b_agg.schema.contains(c))
        .cloned();
    let join_keys = dedup_keep_order(spec.join.keys.iter().cloned().chain(common_added));

    let join_spec = JoinSpec {
        keys: join_keys.clone(),
        how: spec.join.how,
        key_name: None,
        suffixes: spec.join.suffixes.clone(),
    };
    let joined = join(&a_agg, &b_agg, &join_spec).in_stage(Stage::Join, label.clone())?;
    let table = reconcile(&joined, &spec.rules, &spec.join.suffixes)
        .in_stage(Stage::Reconcile, label.clone())?;

    Ok(LevelResult {
        index: plan.index,
        label,
        join_keys,
        table,
        select_columns: plan.select_columns.clone(),
    })
}

/// Compute every level on `pool` and return the results in level order.
///
/// The first failing level aborts the whole drilldown.
pub fn run_drilldown(
    a_prepared: &DataSet,
    b_prepared: &DataSet,
    spec: &ReconSpec,
    drilldown: &DrilldownSpec,
    pool: &ThreadPool,
) -> ReconResult<Vec<LevelResult>> {
    let plans: Vec<LevelPlan> = drilldown
        .levels
        .iter()
        .enumerate()
        .map(|(i, level)| LevelPlan::new(spec, level, drilldown.strategy, i + 1))
        .collect();

    pool.install(|| {
        plans
            .par_iter()
            .map(|plan| {
                run_level(a_prepared, b_prepared, spec, plan)
                    .in_stage(Stage::Drilldown, plan.label())
            })
            .collect()
    })
}
