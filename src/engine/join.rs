//! Keyed equi-join of the two aggregated sides, with coverage flags.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::{ReconError, ReconResult};
use crate::types::{DataSet, DataType, Field, KeyValue, Schema, Value};

/// Coverage flag: the row has no B-side counterpart.
pub const ONLY_IN_A: &str = "only_in_A";
/// Coverage flag: the row has no A-side counterpart.
pub const ONLY_IN_B: &str = "only_in_B";
/// Coverage flag: the row exists on both sides.
pub const IN_BOTH: &str = "in_both";

/// Separator used when building a synthetic join key.
pub const KEY_SEPARATOR: &str = "|";

/// Which keys survive the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    /// Keys present on both sides.
    Inner,
    /// All A keys.
    Left,
    /// All B keys.
    Right,
    /// Union of keys.
    #[default]
    Outer,
}

/// Suffixes appended to column names that collide across sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suffixes {
    pub a: String,
    pub b: String,
}

impl Default for Suffixes {
    fn default() -> Self {
        Self {
            a: "_A".to_string(),
            b: "_B".to_string(),
        }
    }
}

/// Join configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    /// Key columns, present on both sides.
    pub keys: Vec<String>,
    pub how: JoinHow,
    /// When set, both sides get a synthetic `"|"`-joined string key with this name and the join
    /// runs on it instead of the raw key columns.
    pub key_name: Option<String>,
    pub suffixes: Suffixes,
}

impl JoinSpec {
    pub fn new(keys: Vec<String>, how: JoinHow) -> Self {
        Self {
            keys,
            how,
            key_name: None,
            suffixes: Suffixes::default(),
        }
    }

    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }
}

/// Where an output column takes its value from.
#[derive(Debug, Clone, Copy)]
enum Source {
    /// Join key, by position in the `on` list. Taken from A, or from B on B-only rows.
    Key(usize),
    A(usize),
    B(usize),
}

/// Join `a` and `b` according to `spec`.
///
/// Output columns are A's columns (raw join keys stay in place, unsuffixed), then B's non-key
/// columns, then any coalesced key columns, then the coverage flags. Non-key names present on
/// both sides get the side suffix; names present on one side keep their name.
///
/// Coverage flags are only added when both suffixes are non-empty. A row is `only_in_A` when all
/// of its B-suffixed values are null, `only_in_B` when all of its A-suffixed values are null,
/// and `in_both` otherwise; exactly one of them is true on every row (see [`coverage`]).
/// B-only rows take their key values from B, conformed to A's key type.
///
/// After the flags are set, nulls in numeric columns are replaced with `0.0`; `Int64` columns
/// that contain nulls are promoted to `Float64` first.
pub fn join(a: &DataSet, b: &DataSet, spec: &JoinSpec) -> ReconResult<DataSet> {
    if spec.keys.is_empty() {
        return Err(ReconError::config("join: keys must not be empty"));
    }

    let (a, b, on) = match &spec.key_name {
        Some(name) => (
            build_join_key(a, &spec.keys, name)?,
            build_join_key(b, &spec.keys, name)?,
            vec![name.clone()],
        ),
        None => (a.clone(), b.clone(), spec.keys.clone()),
    };

    let on_a = on
        .iter()
        .map(|k| a.require_column(k, "join keys (A)"))
        .collect::<ReconResult<Vec<_>>>()?;
    let on_b = on
        .iter()
        .map(|k| b.require_column(k, "join keys (B)"))
        .collect::<ReconResult<Vec<_>>>()?;

    let a_names: HashSet<&str> = a.schema.field_names().collect();
    let collides =
        |name: &str| !on.iter().any(|k| k == name) && a_names.contains(name) && b.schema.contains(name);

    let sfx = &spec.suffixes;
    if sfx.a == sfx.b && b.schema.field_names().any(|n| collides(n)) {
        return Err(ReconError::config(format!(
            "join: identical side suffixes '{}' cannot disambiguate colliding columns",
            sfx.a
        )));
    }

    let mut fields = Vec::new();
    let mut sources = Vec::new();
    let mut a_suffixed = Vec::new();
    let mut b_suffixed = Vec::new();
    for (i, field) in a.schema.fields.iter().enumerate() {
        if let Some(pos) = on_a.iter().position(|&k| k == i) {
            fields.push(field.clone());
            sources.push(Source::Key(pos));
        } else {
            let name = if collides(&field.name) {
                a_suffixed.push(fields.len());
                format!("{}{}", field.name, sfx.a)
            } else {
                field.name.clone()
            };
            fields.push(Field::new(name, field.data_type));
            sources.push(Source::A(i));
        }
    }
    for (i, field) in b.schema.fields.iter().enumerate() {
        if on_b.contains(&i) {
            continue;
        }
        let name = if collides(&field.name) {
            b_suffixed.push(fields.len());
            format!("{}{}", field.name, sfx.b)
        } else {
            field.name.clone()
        };
        fields.push(Field::new(name, field.data_type));
        sources.push(Source::B(i));
    }

    let pairs = match_rows(&a, &b, &on_a, &on_b, spec.how);

    let rows: Vec<Vec<Value>> = pairs
        .iter()
        .map(|&(ai, bi)| {
            sources
                .iter()
                .map(|src| cell(&a, &b, &on_a, &on_b, *src, ai, bi))
                .collect()
        })
        .collect();

    let mut out = DataSet::new(Schema::new(fields), rows);

    for (pos, (&ia, &ib)) in on_a.iter().zip(&on_b).enumerate() {
        let a_type = a.schema.fields[ia].data_type;
        if a_type == b.schema.fields[ib].data_type {
            continue;
        }
        if let Some(idx) = sources.iter().position(|s| matches!(s, Source::Key(p) if *p == pos)) {
            conform_key_column(&mut out, idx, a_type);
        }
    }

    if spec.key_name.is_some() {
        out = coalesce_keys(out, &spec.keys, sfx);
    }

    if !sfx.a.is_empty() && !sfx.b.is_empty() {
        let sides: Vec<(bool, bool)> = out
            .rows
            .iter()
            .zip(&pairs)
            .map(|(row, pair)| coverage(row, &a_suffixed, &b_suffixed, *pair))
            .collect();
        let flag = |f: fn(bool, bool) -> bool| {
            sides
                .iter()
                .map(|&(in_a, in_b)| Value::Bool(f(in_a, in_b)))
                .collect::<Vec<_>>()
        };
        out = out
            .with_column(Field::new(ONLY_IN_A, DataType::Bool), flag(|_, b| !b))
            .with_column(Field::new(ONLY_IN_B, DataType::Bool), flag(|a, _| !a))
            .with_column(Field::new(IN_BOTH, DataType::Bool), flag(|a, b| a && b));
    }

    Ok(fill_numeric_nulls(out))
}

/// Add a `key_name` column holding the `"|"`-joined text of `keys`; nulls render as `""`.
pub fn build_join_key(dataset: &DataSet, keys: &[String], key_name: &str) -> ReconResult<DataSet> {
    let idxs = keys
        .iter()
        .map(|k| dataset.require_column(k, "synthetic join key"))
        .collect::<ReconResult<Vec<_>>>()?;
    let values = dataset
        .rows
        .iter()
        .map(|row| {
            let parts: Vec<String> = idxs.iter().map(|&i| row[i].to_string()).collect();
            Value::Utf8(parts.join(KEY_SEPARATOR))
        })
        .collect();
    Ok(dataset
        .clone()
        .with_column(Field::new(key_name, DataType::Utf8), values))
}

/// Whether a joined row counts as present in A and in B.
///
/// A side is absent when every one of its suffixed columns is null. Rows with no suffixed
/// columns, or with both sides all-null, fall back to which side the row was matched from, so
/// exactly one coverage flag is set on every row.
fn coverage(
    row: &[Value],
    a_suffixed: &[usize],
    b_suffixed: &[usize],
    (ai, bi): (Option<usize>, Option<usize>),
) -> (bool, bool) {
    let all_null = |cols: &[usize]| cols.iter().all(|&i| row[i].is_null());
    let (a_null, b_null) = (all_null(a_suffixed), all_null(b_suffixed));
    if a_suffixed.is_empty() || (a_null && b_null) {
        (ai.is_some(), bi.is_some())
    } else {
        (!a_null, !b_null)
    }
}

/// Give a key column the A side's type. B-only rows carry B's key values; they are cast when
/// the cast is lossless, otherwise the column is widened (`Float64` for numeric keys, `Utf8`
/// text for anything else).
fn conform_key_column(out: &mut DataSet, idx: usize, a_type: DataType) {
    let cast: Option<Vec<Value>> = out.column(idx).map(|v| cast_key(v, a_type)).collect();
    let (data_type, values) = match cast {
        Some(values) => (a_type, values),
        None if out.column(idx).all(|v| v.is_null() || v.as_f64().is_some()) => (
            DataType::Float64,
            out.column(idx)
                .map(|v| v.as_f64().map_or(Value::Null, Value::Float64))
                .collect(),
        ),
        None => (
            DataType::Utf8,
            out.column(idx)
                .map(|v| match v {
                    Value::Null => Value::Null,
                    other => Value::Utf8(other.to_string()),
                })
                .collect(),
        ),
    };
    out.schema.fields[idx].data_type = data_type;
    for (row, v) in out.rows.iter_mut().zip(values) {
        row[idx] = v;
    }
}

fn cast_key(v: &Value, to: DataType) -> Option<Value> {
    match (v, to) {
        (Value::Null, _) => Some(Value::Null),
        (Value::Float64(f), DataType::Int64)
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
        {
            Some(Value::Int64(*f as i64))
        }
        (Value::Int64(i), DataType::Float64) => Some(Value::Float64(*i as f64)),
        _ if v.data_type() == Some(to) => Some(v.clone()),
        _ => None,
    }
}

fn row_key(row: &[Value], on: &[usize]) -> Vec<KeyValue> {
    on.iter().map(|&i| row[i].key()).collect()
}

fn index_rows(ds: &DataSet, on: &[usize]) -> HashMap<Vec<KeyValue>, Vec<usize>> {
    let mut idx: HashMap<Vec<KeyValue>, Vec<usize>> = HashMap::new();
    for (r, row) in ds.rows.iter().enumerate() {
        idx.entry(row_key(row, on)).or_default().push(r);
    }
    idx
}

/// Row pairs `(a_row, b_row)` in output order.
fn match_rows(
    a: &DataSet,
    b: &DataSet,
    on_a: &[usize],
    on_b: &[usize],
    how: JoinHow,
) -> Vec<(Option<usize>, Option<usize>)> {
    let mut pairs = Vec::new();
    if how == JoinHow::Right {
        let a_index = index_rows(a, on_a);
        for (bi, row) in b.rows.iter().enumerate() {
            match a_index.get(&row_key(row, on_b)) {
                Some(matches) => pairs.extend(matches.iter().map(|&ai| (Some(ai), Some(bi)))),
                None => pairs.push((None, Some(bi))),
            }
        }
        return pairs;
    }

    let b_index = index_rows(b, on_b);
    let mut b_matched = vec![false; b.row_count()];
    for (ai, row) in a.rows.iter().enumerate() {
        match b_index.get(&row_key(row, on_a)) {
            Some(matches) => {
                for &bi in matches {
                    b_matched[bi] = true;
                    pairs.push((Some(ai), Some(bi)));
                }
            }
            None if how != JoinHow::Inner => pairs.push((Some(ai), None)),
            None => {}
        }
    }
    if how == JoinHow::Outer {
        pairs.extend(
            b_matched
                .iter()
                .enumerate()
                .filter(|(_, matched)| !**matched)
                .map(|(bi, _)| (None, Some(bi))),
        );
    }
    pairs
}

fn cell(
    a: &DataSet,
    b: &DataSet,
    on_a: &[usize],
    on_b: &[usize],
    src: Source,
    ai: Option<usize>,
    bi: Option<usize>,
) -> Value {
    match (src, ai, bi) {
        (Source::Key(pos), Some(r), _) => a.rows[r][on_a[pos]].clone(),
        (Source::Key(pos), None, Some(r)) => b.rows[r][on_b[pos]].clone(),
        (Source::A(i), Some(r), _) => a.rows[r][i].clone(),
        (Source::B(i), _, Some(r)) => b.rows[r][i].clone(),
        _ => Value::Null,
    }
}

/// Rebuild unsuffixed key columns that only exist as `<key><suffix>` pairs, preferring the A
/// value and falling back to B when A is null.
fn coalesce_keys(mut out: DataSet, keys: &[String], sfx: &Suffixes) -> DataSet {
    for key in keys {
        if out.schema.contains(key) {
            continue;
        }
        let a_idx = out.schema.index_of(&format!("{key}{}", sfx.a));
        let b_idx = out.schema.index_of(&format!("{key}{}", sfx.b));
        let data_type = match a_idx.or(b_idx) {
            Some(i) => out.schema.fields[i].data_type,
            None => continue,
        };
        let values = out
            .rows
            .iter()
            .map(|row| {
                let from_a = a_idx.map(|i| &row[i]).filter(|v| !v.is_null());
                let from_b = b_idx.map(|i| &row[i]);
                from_a.or(from_b).cloned().unwrap_or(Value::Null)
            })
            .collect();
        out = out.with_column(Field::new(key.clone(), data_type), values);
    }
    out
}

fn fill_numeric_nulls(mut out: DataSet) -> DataSet {
    for idx in 0..out.schema.fields.len() {
        let data_type = out.schema.fields[idx].data_type;
        if !data_type.is_numeric() {
            continue;
        }
        let has_null = out.column(idx).any(Value::is_null);
        if data_type == DataType::Int64 && has_null {
            out.schema.fields[idx].data_type = DataType::Float64;
            for row in &mut out.rows {
                row[idx] = Value::Float64(row[idx].as_f64().unwrap_or(0.0));
            }
        } else if has_null {
            for row in &mut out.rows {
                if row[idx].is_null() {
                    row[idx] = Value::Float64(0.0);
                }
            }
        }
    }
    out
}
