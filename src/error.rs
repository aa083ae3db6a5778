use std::fmt;

use thiserror::Error;

/// Convenience result type for reconciliation operations.
pub type ReconResult<T> = Result<T, ReconError>;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Prepare,
    Aggregate,
    Join,
    Reconcile,
    Drilldown,
    Report,
    Audit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Prepare => "prepare",
            Self::Aggregate => "aggregate",
            Self::Join => "join",
            Self::Reconcile => "reconcile",
            Self::Drilldown => "drilldown",
            Self::Report => "report",
            Self::Audit => "audit",
        };
        f.write_str(name)
    }
}

/// Error type returned across the crate.
///
/// Engine stages return the bare variants; [`crate::engine::ReconEngine`] and
/// [`crate::pipeline::run_job`] wrap them in [`ReconError::Stage`] so the caller sees which
/// stage and which input failed.
#[derive(Debug, Error)]
pub enum ReconError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML configuration could not be deserialized.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (reports, metrics, audit).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or incomplete configuration. Fatal before any table work.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A configured column is absent from a table.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// A column has a type the operation cannot work with.
    #[error("type mismatch in column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    /// An integer aggregation left the `Int64` range.
    #[error("integer overflow while summing column '{column}'")]
    Overflow { column: String },

    /// Parquet write error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// A value could not be parsed into the declared [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// A failure with the stage and input it happened in.
    #[error("{stage} stage failed for {input}: {source}")]
    Stage {
        stage: Stage,
        input: String,
        #[source]
        source: Box<ReconError>,
    },
}

impl ReconError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Strip any [`ReconError::Stage`] wrappers and return the underlying error.
    pub fn root(&self) -> &ReconError {
        let mut cur = self;
        while let Self::Stage { source, .. } = cur {
            cur = source;
        }
        cur
    }
}

/// Attach stage context to a fallible result.
pub trait StageContext<T> {
    fn in_stage(self, stage: Stage, input: impl Into<String>) -> ReconResult<T>;
}

impl<T> StageContext<T> for ReconResult<T> {
    fn in_stage(self, stage: Stage, input: impl Into<String>) -> ReconResult<T> {
        self.map_err(|e| ReconError::Stage {
            stage,
            input: input.into(),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_context_preserves_root_and_renders_stage() {
        let res: ReconResult<()> = Err(ReconError::schema("missing column 'id'"));
        let err = res.in_stage(Stage::Join, "A+B").unwrap_err();

        assert_eq!(
            err.to_string(),
            "join stage failed for A+B: schema error: missing column 'id'"
        );
        assert!(matches!(err.root(), ReconError::Schema { .. }));
    }
}
