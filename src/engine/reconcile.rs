//! Tolerance-based comparison of paired numeric columns.

use serde::Deserialize;

use crate::error::{ReconError, ReconResult};
use crate::types::{DataSet, DataType, Field, Value};

use super::join::Suffixes;

/// Overall match column: AND of every `match_<col>`.
pub const MATCH_FLAG: &str = "match_flag";

/// Denominator substituted for `a == 0` in `pct_delta`, and the default `min_base`.
pub const DEFAULT_MIN_BASE: f64 = 1e-8;

/// How two values are judged equal enough.
///
/// Names outside the known set deserialize to [`Comparator::Unrecognized`], which behaves as
/// [`Comparator::Exact`] (see [`Comparator::effective`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// `|a-b| <= max(|a|, |b|, min_base) * tol_pct`
    #[default]
    Relative,
    /// `|a-b| <= tol_abs`
    Absolute,
    /// `round(a, round) == round(b, round)`
    Rounded,
    /// `a == b`
    Exact,
    #[serde(other)]
    Unrecognized,
}

impl Comparator {
    /// The comparator actually applied.
    pub fn effective(self) -> Self {
        match self {
            Self::Unrecognized => Self::Exact,
            other => other,
        }
    }
}

/// One numeric column to compare across sides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconcileRule {
    /// Base (unsuffixed) column name.
    pub column: String,
    #[serde(default)]
    pub comparator: Comparator,
    #[serde(default)]
    pub tol_pct: Option<f64>,
    #[serde(default)]
    pub tol_abs: Option<f64>,
    /// Decimals for [`Comparator::Rounded`]; defaults to 2.
    #[serde(default)]
    pub round: Option<i32>,
    #[serde(default = "default_min_base")]
    pub min_base: f64,
}

fn default_min_base() -> f64 {
    DEFAULT_MIN_BASE
}

impl ReconcileRule {
    pub fn new(column: impl Into<String>, comparator: Comparator) -> Self {
        Self {
            column: column.into(),
            comparator,
            tol_pct: None,
            tol_abs: None,
            round: None,
            min_base: DEFAULT_MIN_BASE,
        }
    }

    pub fn with_tol_pct(mut self, tol_pct: f64) -> Self {
        self.tol_pct = Some(tol_pct);
        self
    }

    pub fn with_tol_abs(mut self, tol_abs: f64) -> Self {
        self.tol_abs = Some(tol_abs);
        self
    }

    pub fn with_round(mut self, decimals: i32) -> Self {
        self.round = Some(decimals);
        self
    }

    /// Decide whether `a` and `b` match under this rule.
    pub fn matches(&self, a: f64, b: f64) -> bool {
        match self.comparator.effective() {
            Comparator::Relative => {
                let base = a.abs().max(b.abs()).max(self.min_base);
                (a - b).abs() <= base * self.tol_pct.unwrap_or(0.0)
            }
            Comparator::Absolute => (a - b).abs() <= self.tol_abs.unwrap_or(0.0),
            Comparator::Rounded => {
                let decimals = self.round.unwrap_or(2);
                round_to(a, decimals) == round_to(b, decimals)
            }
            Comparator::Exact | Comparator::Unrecognized => a == b,
        }
    }
}

/// Round half-to-even at `decimals` places, on the scaled binary value (1.005 -> 1.0 at 2).
///
/// When `10^decimals` or the scaled value leaves the `f64` range, `x` is already exact at that
/// precision and comes back unchanged; a scale that underflows to zero rounds to `0.0`.
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    if scale == 0.0 {
        return 0.0;
    }
    let scaled = x * scale;
    if !scale.is_finite() || !scaled.is_finite() {
        return x;
    }
    scaled.round_ties_even() / scale
}

/// Compare each rule's column pair and append `delta_`, `abs_delta_`, `pct_delta_`, `match_`
/// columns per rule plus [`MATCH_FLAG`].
///
/// Operands are `<col><suffix A>` / `<col><suffix B>` when present, otherwise the unsuffixed
/// `<col>` on both sides. Null operands give null deltas and a failed match. With no rules,
/// every row matches.
pub fn reconcile(
    table: &DataSet,
    rules: &[ReconcileRule],
    suffixes: &Suffixes,
) -> ReconResult<DataSet> {
    let mut out = table.clone();
    let mut match_cols = Vec::with_capacity(rules.len());

    for rule in rules {
        let col = &rule.column;
        let a_idx = operand(table, col, &suffixes.a)?;
        let b_idx = operand(table, col, &suffixes.b)?;

        let n = table.row_count();
        let mut delta = Vec::with_capacity(n);
        let mut abs_delta = Vec::with_capacity(n);
        let mut pct_delta = Vec::with_capacity(n);
        let mut matched = Vec::with_capacity(n);

        for row in &table.rows {
            match (row[a_idx].as_f64(), row[b_idx].as_f64()) {
                (Some(a), Some(b)) => {
                    let d = b - a;
                    let denom = if a == 0.0 { DEFAULT_MIN_BASE } else { a };
                    delta.push(Value::Float64(d));
                    abs_delta.push(Value::Float64(d.abs()));
                    pct_delta.push(Value::Float64(d / denom));
                    matched.push(Value::Bool(rule.matches(a, b)));
                }
                _ => {
                    delta.push(Value::Null);
                    abs_delta.push(Value::Null);
                    pct_delta.push(Value::Null);
                    matched.push(Value::Bool(false));
                }
            }
        }

        let match_col = format!("match_{col}");
        out = out
            .with_column(Field::new(format!("delta_{col}"), DataType::Float64), delta)
            .with_column(Field::new(format!("abs_delta_{col}"), DataType::Float64), abs_delta)
            .with_column(Field::new(format!("pct_delta_{col}"), DataType::Float64), pct_delta)
            .with_column(Field::new(match_col.clone(), DataType::Bool), matched);
        match_cols.push(match_col);
    }

    let idxs: Vec<usize> = match_cols
        .iter()
        .filter_map(|c| out.schema.index_of(c))
        .collect();
    let flag = out
        .rows
        .iter()
        .map(|row| Value::Bool(idxs.iter().all(|&i| row[i] == Value::Bool(true))))
        .collect();
    Ok(out.with_column(Field::new(MATCH_FLAG, DataType::Bool), flag))
}

fn operand(table: &DataSet, col: &str, suffix: &str) -> ReconResult<usize> {
    let idx = table
        .schema
        .index_of(&format!("{col}{suffix}"))
        .or_else(|| table.schema.index_of(col))
        .ok_or_else(|| {
            ReconError::schema(format!(
                "reconcile: missing column '{col}{suffix}' (or '{col}'). columns={:?}",
                table.schema.field_names().collect::<Vec<_>>()
            ))
        })?;
    let field = &table.schema.fields[idx];
    if !field.data_type.is_numeric() {
        return Err(ReconError::TypeMismatch {
            column: field.name.clone(),
            expected: "numeric".to_string(),
            found: field.data_type.to_string(),
        });
    }
    Ok(idx)
}
