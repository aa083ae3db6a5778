//! CSV ingestion implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::{ReconError, ReconResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// How one input file is read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadConfig {
    pub path: PathBuf,
    /// Single-byte field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Only UTF-8 is supported.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Column name to type name (`int`, `float`, `bool`, `str`, `date`, ...).
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
    /// Whether the first record is a header row. YAML also accepts `0` (header on row 0) and
    /// `null` (no header).
    #[serde(default = "default_header", deserialize_with = "header_flag")]
    pub header: bool,
}

impl ReadConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: default_delimiter(),
            encoding: default_encoding(),
            dtypes: BTreeMap::new(),
            header: true,
        }
    }

    pub fn with_dtype(mut self, column: impl Into<String>, dtype: impl Into<String>) -> Self {
        self.dtypes.insert(column.into(), dtype.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Check the options that do not depend on the file contents.
    pub fn validate(&self) -> ReconResult<()> {
        self.delimiter_byte()?;
        let enc = self.encoding.to_ascii_lowercase();
        if enc != "utf-8" && enc != "utf8" {
            return Err(ReconError::config(format!(
                "unsupported encoding '{}' for {} (only utf-8 is supported)",
                self.encoding,
                self.path.display()
            )));
        }
        for name in self.dtypes.values() {
            parse_dtype(name)?;
        }
        Ok(())
    }

    fn delimiter_byte(&self) -> ReconResult<u8> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(ReconError::config(format!(
                "delimiter must be a single byte, got '{}'",
                self.delimiter
            ))),
        }
    }
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_header() -> bool {
    true
}

fn header_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct HeaderVisitor;

    impl<'de> Visitor<'de> for HeaderVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a bool, 0, or null")
        }

        fn visit_bool<E>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            match v {
                0 => Ok(true),
                _ => Err(E::custom("only a header on row 0 is supported")),
            }
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            match v {
                0 => Ok(true),
                _ => Err(E::custom("only a header on row 0 is supported")),
            }
        }

        fn visit_unit<E>(self) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_none<E>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(HeaderVisitor)
}

/// Map a configured type name to a [`DataType`].
pub fn parse_dtype(name: &str) -> ReconResult<DataType> {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "int" | "int64" | "int32" | "integer" => Ok(DataType::Int64),
        "float" | "float64" | "float32" | "double" => Ok(DataType::Float64),
        "bool" | "boolean" => Ok(DataType::Bool),
        "str" | "string" | "object" | "utf8" => Ok(DataType::Utf8),
        s if s.starts_with("date") => Ok(DataType::Datetime),
        _ => Err(ReconError::config(format!("unknown dtype '{name}'"))),
    }
}

/// Ingest a CSV file into an in-memory [`DataSet`].
///
/// Rules:
///
/// - Columns listed in `dtypes` are parsed as that type; a bad value is a
///   [`ReconError::ParseError`], except for dates, which become null.
/// - Other columns are inferred: `Int64` if every non-empty cell is an integer, else `Float64`
///   if every one is a number, else `Bool` if every one is `true`/`false`, else `Utf8`.
/// - Empty cells are null.
/// - Without a header, columns are named `"0"`, `"1"`, ...
pub fn ingest_csv_from_path(cfg: &ReadConfig) -> ReconResult<DataSet> {
    cfg.validate()?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(cfg.header)
        .delimiter(cfg.delimiter_byte()?)
        .from_path(&cfg.path)?;
    let ds = ingest_csv_from_reader(&mut rdr, cfg)?;
    tracing::debug!(
        path = %cfg.path.display(),
        rows = ds.row_count(),
        columns = ds.schema.fields.len(),
        "csv loaded"
    );
    Ok(ds)
}

/// Ingest CSV data from an existing CSV reader.
///
/// The reader's header setting must match `cfg.header`.
pub fn ingest_csv_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    cfg: &ReadConfig,
) -> ReconResult<DataSet> {
    let headers = rdr.headers()?.clone();
    let records = rdr.records().collect::<Result<Vec<_>, _>>()?;

    let names: Vec<String> = if cfg.header {
        headers.iter().map(str::to_owned).collect()
    } else {
        (0..headers.len()).map(|i| i.to_string()).collect()
    };

    for column in cfg.dtypes.keys() {
        if !names.contains(column) {
            return Err(ReconError::schema(format!(
                "dtypes: missing column '{column}'. columns={names:?}"
            )));
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let data_type = match cfg.dtypes.get(name) {
            Some(dtype) => parse_dtype(dtype)?,
            None => infer_type(records.iter().map(|r| r.get(idx).unwrap_or(""))),
        };
        fields.push(Field::new(name.clone(), data_type));
    }

    // Report 1-based row numbers for users; +1 again when the header is row 1.
    let first_row = if cfg.header { 2 } else { 1 };
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(records.len());
    for (row_idx0, record) in records.iter().enumerate() {
        let user_row = row_idx0 + first_row;
        let mut row = Vec::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            let raw = record.get(idx).unwrap_or("");
            row.push(parse_typed_value(user_row, &field.name, field.data_type, raw)?);
        }
        rows.push(row);
    }

    Ok(DataSet::new(Schema::new(fields), rows))
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a str>) -> DataType {
    let present: Vec<&str> = cells.map(str::trim).filter(|s| !s.is_empty()).collect();
    if present.is_empty() {
        // all-null, same as an all-NaN float column
        DataType::Float64
    } else if present.iter().all(|s| s.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if present.iter().all(|s| s.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if present
        .iter()
        .all(|s| s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false"))
    {
        DataType::Bool
    } else {
        DataType::Utf8
    }
}

fn parse_typed_value(row: usize, column: &str, data_type: DataType, raw: &str) -> ReconResult<Value> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    if data_type == DataType::Utf8 {
        return Ok(Value::Utf8(raw.to_owned()));
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let parse_error = |message: String| ReconError::ParseError {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| parse_error(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| parse_error(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(parse_error),
        DataType::Datetime => Ok(parse_datetime(trimmed).map_or(Value::Null, Value::Datetime)),
        DataType::Utf8 => Ok(Value::Utf8(raw.to_owned())),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

/// Parse a date or timestamp; `None` when no known layout matches.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(data: &str, cfg: &ReadConfig) -> ReconResult<DataSet> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(cfg.header)
            .delimiter(cfg.delimiter_byte()?)
            .from_reader(data.as_bytes());
        ingest_csv_from_reader(&mut rdr, cfg)
    }

    #[test]
    fn infers_types_and_keeps_empty_cells_null() {
        let cfg = ReadConfig::new("mem.csv");
        let ds = read("id,amt,name,flag\n1,10.5,alpha,true\n2,,beta,false\n", &cfg).unwrap();

        let types: Vec<_> = ds.schema.fields.iter().map(|f| f.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Int64, DataType::Float64, DataType::Utf8, DataType::Bool]
        );
        assert_eq!(ds.rows[1][1], Value::Null);
        assert_eq!(ds.rows[0][2], Value::Utf8("alpha".into()));
    }

    #[test]
    fn declared_dtypes_override_inference() {
        let cfg = ReadConfig::new("mem.csv")
            .with_dtype("id", "str")
            .with_dtype("amt", "float64");
        let ds = read("id,amt\n007,3\n", &cfg).unwrap();
        assert_eq!(ds.rows[0], vec![Value::Utf8("007".into()), Value::Float64(3.0)]);
    }

    #[test]
    fn strings_keep_surrounding_whitespace() {
        let cfg = ReadConfig::new("mem.csv").with_dtype("name", "str");
        let ds = read("name\n  padded \n", &cfg).unwrap();
        assert_eq!(ds.rows[0][0], Value::Utf8("  padded ".into()));
    }

    #[test]
    fn bad_declared_value_reports_user_row() {
        let cfg = ReadConfig::new("mem.csv").with_dtype("amt", "int");
        let err = read("amt\n1\nabc\n", &cfg).unwrap_err();
        match err {
            ReconError::ParseError { row, column, raw, .. } => {
                assert_eq!(row, 3);
                assert_eq!(column, "amt");
                assert_eq!(raw, "abc");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_dates_become_null() {
        let cfg = ReadConfig::new("mem.csv").with_dtype("d", "datetime64[ns]");
        let ds = read("d\n2024-03-01\nnot a date\n2024-03-01T10:30:00Z\n", &cfg).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        assert_eq!(ds.rows[0][0], Value::Datetime(expected));
        assert_eq!(ds.rows[1][0], Value::Null);
        assert!(matches!(ds.rows[2][0], Value::Datetime(_)));
    }

    #[test]
    fn headerless_columns_are_numbered() {
        let mut cfg = ReadConfig::new("mem.csv").with_delimiter(";");
        cfg.header = false;
        let ds = read("a;1\nb;2\n", &cfg).unwrap();
        assert_eq!(ds.schema.field_names().collect::<Vec<_>>(), vec!["0", "1"]);
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn missing_dtype_column_is_a_schema_error() {
        let cfg = ReadConfig::new("mem.csv").with_dtype("amount", "float");
        assert!(matches!(
            read("id\n1\n", &cfg),
            Err(ReconError::Schema { .. })
        ));
    }

    #[test]
    fn unsupported_encoding_and_delimiter_are_config_errors() {
        let mut cfg = ReadConfig::new("mem.csv");
        cfg.encoding = "latin-1".into();
        assert!(matches!(cfg.validate(), Err(ReconError::Configuration { .. })));

        let cfg = ReadConfig::new("mem.csv").with_delimiter("||");
        assert!(matches!(cfg.validate(), Err(ReconError::Configuration { .. })));
    }

    #[test]
    fn header_accepts_bool_zero_and_null() {
        let parse = |y: &str| serde_yaml::from_str::<ReadConfig>(y).unwrap().header;
        assert!(parse("path: a.csv"));
        assert!(parse("path: a.csv\nheader: 0"));
        assert!(!parse("path: a.csv\nheader: null"));
        assert!(!parse("path: a.csv\nheader: false"));
    }
}
