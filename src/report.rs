//! Report emission: matched / non_matched / differences tables and `metrics.json`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

use crate::engine::join::{IN_BOTH, ONLY_IN_A, ONLY_IN_B};
use crate::engine::reconcile::MATCH_FLAG;
use crate::error::ReconResult;
use crate::types::{DataSet, DataType, Field, Schema, Value};

pub const METRICS_FILE: &str = "metrics.json";

/// Where and how reports are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportOutputs {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
}

impl Default for ReportOutputs {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            formats: default_formats(),
        }
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_formats() -> Vec<String> {
    vec!["csv".to_string()]
}

/// Display labels for the two sides, used to rename `A_x` / `x_A` columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatasetNames {
    #[serde(rename = "A")]
    pub a: Option<String>,
    #[serde(rename = "B")]
    pub b: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportSelect {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// The `report` section of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub outputs: ReportOutputs,
    #[serde(default)]
    pub dataset_names: DatasetNames,
    #[serde(default)]
    pub select: Option<ReportSelect>,
}

impl ReportConfig {
    pub fn select_keys(&self) -> Vec<String> {
        self.select.as_ref().map(|s| s.keys.clone()).unwrap_or_default()
    }
}

/// Supported output file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Json,
    /// Written on a best-effort basis: a failed Parquet write is logged and skipped.
    Parquet,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Parquet => "parquet",
        }
    }

    /// Resolve configured names, dropping (and logging) the ones that are not supported.
    pub fn from_names(names: &[String]) -> Vec<Self> {
        let mut out = Vec::new();
        for name in names {
            let fmt = match name.to_ascii_lowercase().as_str() {
                "csv" => Self::Csv,
                "json" => Self::Json,
                "parquet" => Self::Parquet,
                other => {
                    tracing::warn!(format = %other, "unsupported report format, skipped");
                    continue;
                }
            };
            if !out.contains(&fmt) {
                out.push(fmt);
            }
        }
        out
    }
}

/// Row counts written to `metrics.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub total: usize,
    pub matched: usize,
    pub non_matched: usize,
}

/// The three report tables for one reconciled table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTables {
    pub matched: DataSet,
    pub non_matched: DataSet,
    pub differences: DataSet,
}

impl ReportTables {
    pub fn metrics(&self) -> ReportMetrics {
        ReportMetrics {
            total: self.differences.row_count(),
            matched: self.matched.row_count(),
            non_matched: self.non_matched.row_count(),
        }
    }
}

/// Rename a side-specific column to use its dataset label.
///
/// `A_x` and `x_A` become `<label A>_x` (likewise for B) when that label is configured.
/// Coverage flag columns keep their names.
pub fn relabel(name: &str, names: &DatasetNames) -> String {
    if [ONLY_IN_A, ONLY_IN_B, IN_BOTH].contains(&name) {
        return name.to_string();
    }
    for (side, label) in [("A", &names.a), ("B", &names.b)] {
        let Some(label) = label else { continue };
        if let Some(core) = name.strip_prefix(&format!("{side}_")) {
            return format!("{label}_{core}");
        }
        if let Some(core) = name.strip_suffix(&format!("_{side}")) {
            return format!("{label}_{core}");
        }
    }
    name.to_string()
}

/// Relabel, project onto `select` (all columns when empty) and split on `match_flag`.
///
/// Rows without a true `match_flag` (including tables that have no flag) are non-matched.
pub fn split_report(table: &DataSet, select: &[String], names: &DatasetNames) -> ReportTables {
    let mut labeled = table.clone();
    for field in &mut labeled.schema.fields {
        field.name = relabel(&field.name, names);
    }

    let columns: Vec<String> = if select.is_empty() {
        labeled.schema.field_names().map(str::to_owned).collect()
    } else {
        select.iter().map(|c| relabel(c, names)).collect()
    };

    let flag = labeled.schema.index_of(MATCH_FLAG);
    let is_match = |row: &[Value]| flag.is_some_and(|i| row[i] == Value::Bool(true));

    ReportTables {
        matched: labeled.filter_rows(is_match).select(&columns),
        non_matched: labeled.filter_rows(|row| !is_match(row)).select(&columns),
        differences: labeled.select(&columns),
    }
}

/// Write the three report tables in every supported format plus `metrics.json` into `dir`.
pub fn emit_reports(
    table: &DataSet,
    select: &[String],
    cfg: &ReportConfig,
    dir: &Path,
) -> ReconResult<ReportMetrics> {
    fs::create_dir_all(dir)?;
    let tables = split_report(table, select, &cfg.dataset_names);
    let formats = ReportFormat::from_names(&cfg.outputs.formats);

    for (stem, ds) in [
        ("matched", &tables.matched),
        ("non_matched", &tables.non_matched),
        ("differences", &tables.differences),
    ] {
        for &format in &formats {
            let path = dir.join(format!("{stem}.{}", format.extension()));
            match write_table(ds, &path, format) {
                Err(e) if format == ReportFormat::Parquet => {
                    tracing::warn!(path = %path.display(), error = %e, "parquet report not written");
                }
                other => other?,
            }
        }
    }

    let metrics = tables.metrics();
    write_json(&dir.join(METRICS_FILE), &metrics)?;
    tracing::info!(
        dir = %dir.display(),
        total = metrics.total,
        matched = metrics.matched,
        non_matched = metrics.non_matched,
        "reports written"
    );
    Ok(metrics)
}

/// Write one table to `path`.
pub fn write_table(ds: &DataSet, path: &Path, format: ReportFormat) -> ReconResult<()> {
    match format {
        ReportFormat::Csv => {
            let mut wtr = csv::Writer::from_path(path)?;
            wtr.write_record(ds.schema.field_names())?;
            for row in &ds.rows {
                wtr.write_record(row.iter().map(|v| v.to_string()))?;
            }
            wtr.flush()?;
        }
        ReportFormat::Json => write_json(path, &Records(ds))?,
        ReportFormat::Parquet => write_parquet(ds, path)?,
    }
    Ok(())
}

/// Optional (nullable) Parquet leaf per column. `Datetime` is stored as its report text.
fn parquet_schema(schema: &Schema) -> ReconResult<Type> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let builder = match field.data_type {
            DataType::Int64 => Type::primitive_type_builder(&field.name, PhysicalType::INT64),
            DataType::Float64 => Type::primitive_type_builder(&field.name, PhysicalType::DOUBLE),
            DataType::Bool => Type::primitive_type_builder(&field.name, PhysicalType::BOOLEAN),
            DataType::Utf8 | DataType::Datetime => {
                Type::primitive_type_builder(&field.name, PhysicalType::BYTE_ARRAY)
                    .with_converted_type(ConvertedType::UTF8)
            }
        };
        fields.push(Arc::new(
            builder.with_repetition(Repetition::OPTIONAL).build()?,
        ));
    }
    Ok(Type::group_type_builder("schema").with_fields(fields).build()?)
}

/// Split a column into its non-null values and definition levels (1 = present).
fn leveled<T>(cells: impl Iterator<Item = Option<T>>) -> (Vec<T>, Vec<i16>) {
    let mut values = Vec::new();
    let mut defs = Vec::new();
    for cell in cells {
        defs.push(i16::from(cell.is_some()));
        values.extend(cell);
    }
    (values, defs)
}

fn write_parquet(ds: &DataSet, path: &Path) -> ReconResult<()> {
    let schema = Arc::new(parquet_schema(&ds.schema)?);
    let props = Arc::new(WriterProperties::builder().build());
    let mut writer = SerializedFileWriter::new(File::create(path)?, schema, props)?;

    let mut row_group = writer.next_row_group()?;
    let mut idx = 0;
    while let Some(mut column) = row_group.next_column()? {
        let cells = ds.column(idx);
        match column.untyped() {
            ColumnWriter::Int64ColumnWriter(w) => {
                let (values, defs) = leveled(cells.map(|v| match v {
                    Value::Int64(x) => Some(*x),
                    _ => None,
                }));
                w.write_batch(&values, Some(&defs), None)?;
            }
            ColumnWriter::DoubleColumnWriter(w) => {
                let (values, defs) = leveled(cells.map(Value::as_f64));
                w.write_batch(&values, Some(&defs), None)?;
            }
            ColumnWriter::BoolColumnWriter(w) => {
                let (values, defs) = leveled(cells.map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                }));
                w.write_batch(&values, Some(&defs), None)?;
            }
            ColumnWriter::ByteArrayColumnWriter(w) => {
                let (values, defs) = leveled(cells.map(|v| {
                    (!v.is_null()).then(|| ByteArray::from(v.to_string().into_bytes()))
                }));
                w.write_batch(&values, Some(&defs), None)?;
            }
            _ => {
                return Err(ParquetError::General(format!(
                    "no writer for column '{}'",
                    ds.schema.fields[idx].name
                ))
                .into());
            }
        }
        column.close()?;
        idx += 1;
    }
    row_group.close()?;
    writer.close()?;
    Ok(())
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ReconResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// A dataset as a JSON array of records, keys in column order.
struct Records<'a>(&'a DataSet);

struct Record<'a> {
    fields: &'a [Field],
    row: &'a [Value],
}

struct Cell<'a>(&'a Value);

impl Serialize for Records<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.row_count()))?;
        for row in &self.0.rows {
            seq.serialize_element(&Record {
                fields: &self.0.schema.fields,
                row,
            })?;
        }
        seq.end()
    }
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in self.fields.iter().zip(self.row) {
            map.serialize_entry(&field.name, &Cell(value))?;
        }
        map.end()
    }
}

impl Serialize for Cell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_none(),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Float64(v) if v.is_finite() => serializer.serialize_f64(*v),
            Value::Float64(_) => serializer.serialize_none(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Utf8(s) => serializer.serialize_str(s),
            Value::Datetime(_) => serializer.serialize_str(&self.0.to_string()),
        }
    }
}
