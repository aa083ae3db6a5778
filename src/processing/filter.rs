//! Row filtering for [`crate::types::DataSet`] by configured predicates.

use std::cmp::Ordering;

use serde::Deserialize;

use crate::ingestion::csv::parse_datetime;
use crate::types::{DataSet, Value};

/// Comparison applied by a [`FilterPredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    IsNull,
    NotNull,
}

impl FilterOp {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "is_null" => Self::IsNull,
            "not_null" => Self::NotNull,
            _ => return None,
        })
    }
}

/// One `{col, op, value}` predicate. `value` is ignored by `is_null` / `not_null`; `in` and
/// `not_in` take a list (a scalar counts as a one-element list).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterPredicate {
    pub col: String,
    pub op: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl FilterPredicate {
    pub fn new(col: impl Into<String>, op: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            col: col.into(),
            op: op.into(),
            value,
        }
    }
}

/// Keep the rows that satisfy every predicate.
///
/// A predicate with an unknown op, or on a column the table does not have, is skipped with a
/// warning. Nulls fail `eq`, `in` and the ordering ops, and pass `ne` and `not_in`.
pub fn apply_filters(dataset: &DataSet, predicates: &[FilterPredicate]) -> DataSet {
    let mut active = Vec::with_capacity(predicates.len());
    for p in predicates {
        let Some(op) = FilterOp::parse(&p.op) else {
            tracing::warn!(column = %p.col, op = %p.op, "unknown filter op, predicate skipped");
            continue;
        };
        let Some(idx) = dataset.schema.index_of(&p.col) else {
            tracing::warn!(column = %p.col, op = %p.op, "filter column not found, predicate skipped");
            continue;
        };
        active.push((idx, op, &p.value));
    }
    if active.is_empty() {
        return dataset.clone();
    }

    let out = dataset.filter_rows(|row| {
        active
            .iter()
            .all(|&(idx, op, value)| evaluate(&row[idx], op, value))
    });
    tracing::debug!(
        rows_in = dataset.row_count(),
        rows_out = out.row_count(),
        predicates = active.len(),
        "prefilter applied"
    );
    out
}

fn evaluate(cell: &Value, op: FilterOp, value: &serde_json::Value) -> bool {
    let ord = || compare(cell, value);
    match op {
        FilterOp::Eq => ord() == Some(Ordering::Equal),
        FilterOp::Ne => ord() != Some(Ordering::Equal),
        FilterOp::Gt => ord() == Some(Ordering::Greater),
        FilterOp::Ge => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => ord() == Some(Ordering::Less),
        FilterOp::Le => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::In => is_member(cell, value),
        FilterOp::NotIn => !is_member(cell, value),
        FilterOp::IsNull => cell.is_null(),
        FilterOp::NotNull => !cell.is_null(),
    }
}

fn is_member(cell: &Value, value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .any(|v| compare(cell, v) == Some(Ordering::Equal)),
        scalar => compare(cell, scalar) == Some(Ordering::Equal),
    }
}

/// Order a cell against a literal. `None` when either side is null or the types do not compare.
fn compare(cell: &Value, literal: &serde_json::Value) -> Option<Ordering> {
    use serde_json::Value as J;
    match (cell, literal) {
        (Value::Int64(a), J::Number(n)) => match n.as_i64() {
            Some(b) => Some(a.cmp(&b)),
            None => (*a as f64).partial_cmp(&n.as_f64()?),
        },
        (Value::Float64(a), J::Number(n)) => a.partial_cmp(&n.as_f64()?),
        (Value::Utf8(a), J::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), J::Bool(b)) => Some(a.cmp(b)),
        (Value::Datetime(a), J::String(b)) => Some(a.cmp(&parse_datetime(b)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Field, Schema};
    use serde_json::json;

    fn sample_dataset() -> DataSet {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("status", DataType::Utf8),
            Field::new("amt", DataType::Float64),
        ]);

        let rows = vec![
            vec![Value::Int64(1), Value::Utf8("open".into()), Value::Float64(10.0)],
            vec![Value::Int64(2), Value::Utf8("void".into()), Value::Float64(-3.5)],
            vec![Value::Int64(3), Value::Null, Value::Null],
        ];

        DataSet::new(schema, rows)
    }

    fn ids(ds: &DataSet) -> Vec<i64> {
        ds.rows
            .iter()
            .filter_map(|r| match r[0] {
                Value::Int64(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    fn run(preds: Vec<FilterPredicate>) -> Vec<i64> {
        ids(&apply_filters(&sample_dataset(), &preds))
    }

    #[test]
    fn comparison_ops_on_numbers() {
        assert_eq!(run(vec![FilterPredicate::new("amt", "gt", json!(0))]), vec![1]);
        assert_eq!(run(vec![FilterPredicate::new("amt", "le", json!(-3.5))]), vec![2]);
        assert_eq!(run(vec![FilterPredicate::new("id", "ge", json!(2))]), vec![2, 3]);
        assert_eq!(run(vec![FilterPredicate::new("id", "lt", json!(1.5))]), vec![1]);
    }

    #[test]
    fn nulls_fail_eq_and_in_but_pass_ne_and_not_in() {
        assert_eq!(run(vec![FilterPredicate::new("status", "eq", json!("open"))]), vec![1]);
        assert_eq!(run(vec![FilterPredicate::new("status", "ne", json!("open"))]), vec![2, 3]);
        assert_eq!(
            run(vec![FilterPredicate::new("status", "in", json!(["open", "void"]))]),
            vec![1, 2]
        );
        assert_eq!(
            run(vec![FilterPredicate::new("status", "not_in", json!(["void"]))]),
            vec![1, 3]
        );
    }

    #[test]
    fn null_checks_ignore_value() {
        assert_eq!(run(vec![FilterPredicate::new("amt", "is_null", json!(null))]), vec![3]);
        assert_eq!(run(vec![FilterPredicate::new("amt", "not_null", json!(null))]), vec![1, 2]);
    }

    #[test]
    fn predicates_are_anded() {
        let preds = vec![
            FilterPredicate::new("status", "not_null", json!(null)),
            FilterPredicate::new("id", "gt", json!(1)),
        ];
        assert_eq!(run(preds), vec![2]);
    }

    #[test]
    fn unknown_op_and_missing_column_are_skipped() {
        let preds = vec![
            FilterPredicate::new("status", "like", json!("op%")),
            FilterPredicate::new("region", "eq", json!("west")),
        ];
        assert_eq!(run(preds), vec![1, 2, 3]);
    }

    #[test]
    fn mismatched_types_never_compare_equal() {
        assert!(run(vec![FilterPredicate::new("status", "eq", json!(1))]).is_empty());
        assert!(run(vec![FilterPredicate::new("status", "gt", json!(1))]).is_empty());
    }

    #[test]
    fn datetimes_compare_against_date_strings() {
        let schema = Schema::new(vec![Field::new("d", DataType::Datetime)]);
        let day = |d| {
            chrono::NaiveDate::from_ymd_opt(2024, 1, d)
                .and_then(|x| x.and_hms_opt(0, 0, 0))
                .unwrap()
        };
        let ds = DataSet::new(
            schema,
            vec![vec![Value::Datetime(day(1))], vec![Value::Datetime(day(20))]],
        );
        let out = apply_filters(&ds, &[FilterPredicate::new("d", "ge", json!("2024-01-10"))]);
        assert_eq!(out.rows, vec![vec![Value::Datetime(day(20))]]);
    }

    #[test]
    fn yaml_predicate_list() {
        let yaml = "- { col: status, op: in, value: [open, void] }\n- { col: amt, op: not_null }\n";
        let preds: Vec<FilterPredicate> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(preds[0].value, json!(["open", "void"]));
        assert_eq!(preds[1].value, serde_json::Value::Null);
    }
}
