//! YAML job configuration.
//!
//! A job file is parsed once into [`RootConfig`], checked with [`RootConfig::validate`] and then
//! resolved into the engine's [`ReconSpec`] with [`RootConfig::to_spec`].
//!
//! ```yaml
//! job: { name: daily_gl, unknown_kinds: fallback }
//! inputs:
//!   A: { path: ledger.csv, dtypes: { amount: float } }
//!   B: { path: bank.csv, sanitize: { rename: { amt: amount } } }
//! aggregate:
//!   A: { group_by: [account], metrics: { amount: { agg: sum } } }
//! join: { keys: [account], type: outer }
//! reconcile:
//!   numeric:
//!     - { column: amount, comparator: absolute, tol_abs: 0.01 }
//! report:
//!   outputs: { dir: reports, formats: [csv, json] }
//!   dataset_names: { A: ledger, B: bank }
//! drilldown:
//!   enabled: true
//!   levels: [{ add: [region] }]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::drilldown::{DrillLevel, DrilldownSpec, Strategy};
use crate::engine::join::{JoinHow, JoinSpec};
use crate::engine::reconcile::ReconcileRule;
use crate::engine::ReconSpec;
use crate::error::{ReconError, ReconResult};
use crate::ingestion::csv::{resolve_path, ReadConfig};
use crate::processing::aggregate::AggregateSpec;
use crate::processing::filter::FilterPredicate;
use crate::processing::sanitize::SanitizeSpec;
use crate::report::ReportConfig;

/// What to do with an aggregation or comparator kind that is not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKinds {
    /// Use `sum` / `exact` and report the substitution.
    #[default]
    Fallback,
    /// Reject the configuration.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_job_name")]
    pub name: String,
    #[serde(default)]
    pub unknown_kinds: UnknownKinds,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            unknown_kinds: UnknownKinds::default(),
        }
    }
}

fn default_job_name() -> String {
    "recon".to_string()
}

/// One input: how to read it, then how to clean and filter it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputConfig {
    #[serde(flatten)]
    pub read: ReadConfig,
    #[serde(default)]
    pub sanitize: Option<SanitizeSpec>,
    #[serde(default)]
    pub prefilter: Vec<FilterPredicate>,
}

impl InputConfig {
    /// This input's `prefilter` followed by `extra` (its entry in the top-level `filters`).
    pub fn predicates(&self, extra: &[FilterPredicate]) -> Vec<FilterPredicate> {
        self.prefilter.iter().chain(extra).cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InputsConfig {
    #[serde(rename = "A")]
    pub a: Option<InputConfig>,
    #[serde(rename = "B")]
    pub b: Option<InputConfig>,
}

/// Extra per-side predicates, applied after each input's own `prefilter`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FiltersConfig {
    #[serde(default, rename = "A")]
    pub a: Vec<FilterPredicate>,
    #[serde(default, rename = "B")]
    pub b: Vec<FilterPredicate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggregateConfig {
    #[serde(default, rename = "A")]
    pub a: Option<AggregateSpec>,
    #[serde(default, rename = "B")]
    pub b: Option<AggregateSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JoinConfig {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default, rename = "type")]
    pub how: JoinHow,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub numeric: Vec<ReconcileRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DrilldownConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub levels: Vec<DrillLevel>,
}

/// The whole job file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub aggregate: Option<AggregateConfig>,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub reconcile: Option<ReconcileConfig>,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub drilldown: Option<DrilldownConfig>,
}

/// A parsed job file together with its exact text (for auditing).
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: RootConfig,
    pub text: String,
    pub path: PathBuf,
}

/// Read and parse a job file. Relative input paths are resolved against the file's directory.
pub fn load(path: impl AsRef<Path>) -> ReconResult<LoadedConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut config = RootConfig::from_yaml_str(&text)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_input_paths(base);
    tracing::debug!(path = %path.display(), job = %config.job.name, "config loaded");
    Ok(LoadedConfig {
        config,
        text,
        path: path.to_path_buf(),
    })
}

impl RootConfig {
    /// Parse a job from YAML text.
    ///
    /// Malformed YAML is a [`ReconError::Yaml`]; well-formed YAML of the wrong shape is a
    /// [`ReconError::Configuration`].
    pub fn from_yaml_str(text: &str) -> ReconResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|e| ReconError::config(format!("invalid job config: {e}")))
    }

    pub fn resolve_input_paths(&mut self, base: &Path) {
        for input in [&mut self.inputs.a, &mut self.inputs.b].into_iter().flatten() {
            input.read.path = resolve_path(base, &input.read.path);
        }
    }

    /// Both inputs, or a configuration error naming what is missing.
    pub fn inputs(&self) -> ReconResult<(&InputConfig, &InputConfig)> {
        match (&self.inputs.a, &self.inputs.b) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(ReconError::config("config must define inputs.A and inputs.B")),
        }
    }

    /// Reject configurations that cannot run, before any table is read.
    pub fn validate(&self) -> ReconResult<()> {
        let (a, b) = self.inputs()?;
        a.read.validate()?;
        b.read.validate()?;

        if self.join.keys.is_empty() {
            return Err(ReconError::config("join.keys must list at least one column"));
        }

        if self.job.unknown_kinds == UnknownKinds::Error {
            let unknown = self.to_spec().unrecognized_kinds();
            if !unknown.is_empty() {
                let locations: Vec<&str> = unknown.iter().map(|(loc, _)| loc.as_str()).collect();
                return Err(ReconError::config(format!(
                    "unrecognized aggregation/comparator kinds at: {}",
                    locations.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Resolve the engine input.
    pub fn to_spec(&self) -> ReconSpec {
        let aggregate = self.aggregate.clone().unwrap_or_default();
        let mut join = JoinSpec::new(self.join.keys.clone(), self.join.how);
        join.key_name = self.join.key_name.clone();

        let drilldown = self
            .drilldown
            .as_ref()
            .filter(|d| d.enabled && !d.levels.is_empty())
            .map(|d| DrilldownSpec {
                strategy: d.strategy,
                levels: d.levels.clone(),
            });

        ReconSpec {
            aggregate_a: aggregate.a,
            aggregate_b: aggregate.b,
            join,
            rules: self
                .reconcile
                .as_ref()
                .map(|r| r.numeric.clone())
                .unwrap_or_default(),
            select: self.report.select_keys(),
            drilldown,
        }
    }
}
