//! Group-by aggregation for [`crate::types::DataSet`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::{ReconError, ReconResult};
use crate::types::{DataSet, Field, KeyValue, Schema};

use super::reduce::{reduce_rows, AggKind};

/// One aggregated output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub column: String,
    pub kind: AggKind,
}

impl Metric {
    pub fn new(column: impl Into<String>, kind: AggKind) -> Self {
        Self {
            column: column.into(),
            kind,
        }
    }
}

/// How one side is collapsed before the join.
///
/// In YAML, `metrics` is a mapping `column: { agg: <kind> }`; entry order is kept and becomes
/// the output column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggregateSpec {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, deserialize_with = "metrics_in_order")]
    pub metrics: Vec<Metric>,
}

impl AggregateSpec {
    pub fn new(group_by: Vec<String>, metrics: Vec<Metric>) -> Self {
        Self { group_by, metrics }
    }

    /// Derive a new spec whose `group_by` drops every column in `remove` and then appends
    /// `add`. Duplicates are dropped keeping the first occurrence. `self` is untouched.
    pub fn adjusted(&self, remove: &[String], add: &[String]) -> Self {
        let removed: HashSet<&str> = remove.iter().map(String::as_str).collect();
        let kept = self
            .group_by
            .iter()
            .filter(|c| !removed.contains(c.as_str()))
            .chain(add.iter())
            .cloned();
        Self {
            group_by: dedup_keep_order(kept),
            metrics: self.metrics.clone(),
        }
    }
}

/// Drop repeated items, keeping first-seen order.
pub fn dedup_keep_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Collapse `dataset` to one row per distinct `group_by` tuple.
///
/// - `None` or an empty `group_by` returns the input unchanged.
/// - Nulls form their own group.
/// - Output columns are the `group_by` columns followed by the metric columns; every other
///   column is dropped.
/// - Rows come out in ascending key order (nulls last), so repeated runs are identical.
pub fn aggregate(dataset: &DataSet, spec: Option<&AggregateSpec>) -> ReconResult<DataSet> {
    let spec = match spec {
        Some(s) if !s.group_by.is_empty() => s,
        _ => return Ok(dataset.clone()),
    };

    let group_by = dedup_keep_order(spec.group_by.iter().cloned());
    let group_idxs = group_by
        .iter()
        .map(|c| dataset.require_column(c, "aggregate group_by"))
        .collect::<ReconResult<Vec<_>>>()?;

    let mut metric_idxs = Vec::with_capacity(spec.metrics.len());
    for metric in &spec.metrics {
        if group_by.contains(&metric.column) {
            return Err(ReconError::schema(format!(
                "aggregate: metric column '{}' is also a group_by column",
                metric.column
            )));
        }
        metric_idxs.push(dataset.require_column(&metric.column, "aggregate metric")?);
    }

    let mut groups: BTreeMap<Vec<KeyValue>, Vec<usize>> = BTreeMap::new();
    for (r, row) in dataset.rows.iter().enumerate() {
        let key = group_idxs.iter().map(|&i| row[i].key()).collect();
        groups.entry(key).or_default().push(r);
    }

    let mut fields: Vec<Field> = group_idxs
        .iter()
        .map(|&i| dataset.schema.fields[i].clone())
        .collect();
    for (metric, &idx) in spec.metrics.iter().zip(&metric_idxs) {
        let input = dataset.schema.fields[idx].data_type;
        fields.push(Field::new(metric.column.clone(), metric.kind.output_type(input)));
    }

    let mut rows = Vec::with_capacity(groups.len());
    for members in groups.values() {
        let first = &dataset.rows[members[0]];
        let mut out: Vec<_> = group_idxs.iter().map(|&i| first[i].clone()).collect();
        for (metric, &idx) in spec.metrics.iter().zip(&metric_idxs) {
            out.push(reduce_rows(dataset, members, idx, &metric.column, metric.kind)?);
        }
        rows.push(out);
    }

    Ok(DataSet::new(Schema::new(fields), rows))
}

fn metrics_in_order<'de, D>(deserializer: D) -> Result<Vec<Metric>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct MetricConfig {
        #[serde(default)]
        agg: AggKind,
    }

    struct MetricsVisitor;

    impl<'de> Visitor<'de> for MetricsVisitor {
        type Value = Vec<Metric>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of column name to { agg: <kind> }")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some((column, cfg)) = map.next_entry::<String, Option<MetricConfig>>()? {
                let kind = cfg.map(|c| c.agg).unwrap_or_default();
                out.push(Metric { column, kind });
            }
            Ok(out)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(MetricsVisitor)
}
