//! Per-group reductions used by [`super::aggregate`].

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{ReconError, ReconResult};
use crate::types::{DataSet, DataType, Value};

/// Aggregation function applied to one metric column.
///
/// Names outside the known set deserialize to [`AggKind::Unrecognized`], which behaves as
/// [`AggKind::Sum`] (see [`AggKind::effective`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggKind {
    /// Sum numeric values, ignoring nulls. An all-null group sums to zero.
    #[default]
    Sum,
    /// Count non-null values.
    Count,
    /// Minimum value, ignoring nulls.
    Min,
    /// Maximum value, ignoring nulls.
    Max,
    /// First non-null value in row order.
    First,
    /// Last non-null value in row order.
    Last,
    /// Number of distinct non-null values.
    Nunique,
    /// Any other name. Falls back to `Sum`.
    #[serde(other)]
    Unrecognized,
}

impl AggKind {
    /// The function actually applied.
    pub fn effective(self) -> Self {
        match self {
            Self::Unrecognized => Self::Sum,
            other => other,
        }
    }

    /// Output column type for an input column of type `input`.
    pub fn output_type(self, input: DataType) -> DataType {
        match self.effective() {
            Self::Count | Self::Nunique => DataType::Int64,
            Self::Sum if input == DataType::Bool => DataType::Int64,
            _ => input,
        }
    }
}

/// Reduce column `idx` over the rows listed in `rows`.
///
/// `column` is only used for error messages.
pub fn reduce_rows(
    dataset: &DataSet,
    rows: &[usize],
    idx: usize,
    column: &str,
    kind: AggKind,
) -> ReconResult<Value> {
    let data_type = dataset.schema.fields[idx].data_type;
    let values = rows
        .iter()
        .map(|&r| &dataset.rows[r][idx])
        .filter(|v| !v.is_null());

    match kind.effective() {
        AggKind::Count => Ok(Value::Int64(values.count() as i64)),
        AggKind::Nunique => {
            let distinct: HashSet<_> = values.map(Value::key).collect();
            Ok(Value::Int64(distinct.len() as i64))
        }
        AggKind::First => Ok(values.cloned().next().unwrap_or(Value::Null)),
        AggKind::Last => Ok(values.cloned().last().unwrap_or(Value::Null)),
        AggKind::Min => Ok(values
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null)),
        AggKind::Max => Ok(values
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null)),
        AggKind::Sum | AggKind::Unrecognized => sum_typed(values, data_type, column),
    }
}

fn sum_typed<'a>(
    values: impl Iterator<Item = &'a Value>,
    data_type: DataType,
    column: &str,
) -> ReconResult<Value> {
    match data_type {
        DataType::Int64 => {
            let mut acc = 0i64;
            for v in values {
                if let Value::Int64(x) = v {
                    acc = acc.checked_add(*x).ok_or_else(|| ReconError::Overflow {
                        column: column.to_owned(),
                    })?;
                }
            }
            Ok(Value::Int64(acc))
        }
        DataType::Float64 => Ok(Value::Float64(values.filter_map(Value::as_f64).sum())),
        DataType::Bool => Ok(Value::Int64(
            values.filter(|v| matches!(v, Value::Bool(true))).count() as i64,
        )),
        other => Err(ReconError::TypeMismatch {
            column: column.to_owned(),
            expected: "numeric or bool column for sum".to_string(),
            found: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{reduce_rows, AggKind};
    use crate::error::ReconError;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn numeric_dataset_with_nulls() -> DataSet {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("score", DataType::Float64),
            Field::new("tag", DataType::Utf8),
        ]);

        let rows = vec![
            vec![Value::Int64(1), Value::Float64(10.0), Value::Utf8("x".into())],
            vec![Value::Int64(2), Value::Null, Value::Null],
            vec![Value::Int64(3), Value::Float64(5.5), Value::Utf8("y".into())],
            vec![Value::Int64(3), Value::Float64(5.5), Value::Utf8("x".into())],
        ];

        DataSet::new(schema, rows)
    }

    const ALL: [usize; 4] = [0, 1, 2, 3];

    #[test]
    fn sum_ignores_nulls_and_preserves_type() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(
            reduce_rows(&ds, &ALL, 1, "score", AggKind::Sum).unwrap(),
            Value::Float64(21.0)
        );
        assert_eq!(
            reduce_rows(&ds, &ALL, 0, "id", AggKind::Sum).unwrap(),
            Value::Int64(9)
        );
    }

    #[test]
    fn int_sum_overflow_is_an_error() {
        let schema = Schema::new(vec![Field::new("qty", DataType::Int64)]);
        let ds = DataSet::new(
            schema,
            vec![vec![Value::Int64(i64::MAX)], vec![Value::Int64(1)]],
        );
        let err = reduce_rows(&ds, &[0, 1], 0, "qty", AggKind::Sum).unwrap_err();
        assert!(matches!(err, ReconError::Overflow { ref column } if column == "qty"));
        assert_eq!(
            reduce_rows(&ds, &[0], 0, "qty", AggKind::Sum).unwrap(),
            Value::Int64(i64::MAX)
        );
    }

    #[test]
    fn sum_of_all_nulls_is_zero() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(
            reduce_rows(&ds, &[1], 1, "score", AggKind::Sum).unwrap(),
            Value::Float64(0.0)
        );
    }

    #[test]
    fn count_and_nunique_skip_nulls() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(
            reduce_rows(&ds, &ALL, 2, "tag", AggKind::Count).unwrap(),
            Value::Int64(3)
        );
        assert_eq!(
            reduce_rows(&ds, &ALL, 2, "tag", AggKind::Nunique).unwrap(),
            Value::Int64(2)
        );
        assert_eq!(
            reduce_rows(&ds, &ALL, 1, "score", AggKind::Nunique).unwrap(),
            Value::Int64(2)
        );
    }

    #[test]
    fn min_max_first_last_ignore_nulls() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(
            reduce_rows(&ds, &ALL, 1, "score", AggKind::Min).unwrap(),
            Value::Float64(5.5)
        );
        assert_eq!(
            reduce_rows(&ds, &ALL, 2, "tag", AggKind::Max).unwrap(),
            Value::Utf8("y".into())
        );
        assert_eq!(
            reduce_rows(&ds, &[1, 2], 2, "tag", AggKind::First).unwrap(),
            Value::Utf8("y".into())
        );
        assert_eq!(
            reduce_rows(&ds, &[0, 1], 2, "tag", AggKind::Last).unwrap(),
            Value::Utf8("x".into())
        );
        assert_eq!(
            reduce_rows(&ds, &[1], 1, "score", AggKind::Min).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn unrecognized_kind_falls_back_to_sum() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(AggKind::Unrecognized.effective(), AggKind::Sum);
        assert_eq!(
            reduce_rows(&ds, &ALL, 1, "score", AggKind::Unrecognized).unwrap(),
            reduce_rows(&ds, &ALL, 1, "score", AggKind::Sum).unwrap()
        );
    }

    #[test]
    fn unknown_name_deserializes_to_unrecognized() {
        let kind: AggKind = serde_yaml::from_str("median").unwrap();
        assert_eq!(kind, AggKind::Unrecognized);
        let kind: AggKind = serde_yaml::from_str("nunique").unwrap();
        assert_eq!(kind, AggKind::Nunique);
    }

    #[test]
    fn sum_of_strings_is_a_type_mismatch() {
        let ds = numeric_dataset_with_nulls();
        let err = reduce_rows(&ds, &ALL, 2, "tag", AggKind::Sum).unwrap_err();
        assert!(err.to_string().contains("type mismatch in column 'tag'"));
    }
}
