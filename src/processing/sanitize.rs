//! Column renaming and light normalization applied to each input before filtering.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::{ReconError, ReconResult};
use crate::types::{DataSet, DataType, Value};

/// String normalization switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Normalize {
    /// Trim surrounding whitespace in every string column.
    #[serde(default)]
    pub trim_strings: bool,
    /// Upper-case these columns. Non-string values are converted to their text form first.
    #[serde(default)]
    pub upper_case: Vec<String>,
}

/// Per-input sanitize step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SanitizeSpec {
    /// Old name to new name.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    #[serde(default)]
    pub normalize: Normalize,
    /// Keep only these columns, in this order. Names that do not exist are ignored.
    #[serde(default)]
    pub select: Vec<String>,
}

/// Apply rename, then trim, then upper-case, then select.
pub fn sanitize(dataset: &DataSet, spec: Option<&SanitizeSpec>) -> ReconResult<DataSet> {
    let Some(spec) = spec else {
        return Ok(dataset.clone());
    };

    let mut out = rename(dataset, &spec.rename)?;

    if spec.normalize.trim_strings {
        let string_cols: Vec<usize> = (0..out.schema.fields.len())
            .filter(|&i| out.schema.fields[i].data_type == DataType::Utf8)
            .collect();
        out = out.map_rows(|row| {
            let mut row = row.to_vec();
            for &i in &string_cols {
                if let Value::Utf8(s) = &row[i] {
                    row[i] = Value::Utf8(s.trim().to_string());
                }
            }
            row
        });
    }

    let upper: Vec<usize> = spec
        .normalize
        .upper_case
        .iter()
        .filter_map(|c| out.schema.index_of(c))
        .collect();
    if !upper.is_empty() {
        out = out.map_rows(|row| {
            let mut row = row.to_vec();
            for &i in &upper {
                row[i] = match &row[i] {
                    Value::Null => Value::Null,
                    Value::Utf8(s) => Value::Utf8(s.to_uppercase()),
                    other => Value::Utf8(other.to_string().to_uppercase()),
                };
            }
            row
        });
        for &i in &upper {
            out.schema.fields[i].data_type = DataType::Utf8;
        }
    }

    if !spec.select.is_empty() {
        out = out.select(&spec.select);
    }
    Ok(out)
}

fn rename(dataset: &DataSet, mapping: &BTreeMap<String, String>) -> ReconResult<DataSet> {
    if mapping.is_empty() {
        return Ok(dataset.clone());
    }
    let mut out = dataset.clone();
    for field in &mut out.schema.fields {
        if let Some(new) = mapping.get(&field.name) {
            field.name = new.clone();
        }
    }
    let mut seen = HashSet::new();
    for name in out.schema.field_names() {
        if !seen.insert(name) {
            return Err(ReconError::config(format!(
                "sanitize.rename: more than one column named '{name}'"
            )));
        }
    }
    Ok(out)
}
