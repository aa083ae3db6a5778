//! In-memory table transformations.
//!
//! The processing layer operates on [`crate::types::DataSet`] values produced by ingestion.
//!
//! - [`sanitize()`]: rename / trim / upper-case / select columns
//! - [`apply_filters()`]: keep rows matching `{col, op, value}` predicates
//! - [`aggregate()`]: group-by with per-column reducers from [`reduce`]
//!
//! ## Example: sanitize → filter → aggregate
//!
//! ```rust
//! use rust_recon::processing::{aggregate, apply_filters, sanitize, AggregateSpec, FilterPredicate, Metric};
//! use rust_recon::processing::reduce::AggKind;
//! use rust_recon::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Field::new("account", DataType::Utf8),
//!     Field::new("amount", DataType::Float64),
//! ]);
//! let ds = DataSet::new(
//!     schema,
//!     vec![
//!         vec![Value::Utf8("a1".into()), Value::Float64(10.0)],
//!         vec![Value::Utf8("a1".into()), Value::Float64(5.0)],
//!         vec![Value::Utf8("a2".into()), Value::Float64(-1.0)],
//!     ],
//! );
//!
//! let ds = sanitize(&ds, None).unwrap();
//! let positive = apply_filters(&ds, &[FilterPredicate::new("amount", "gt", serde_json::json!(0))]);
//!
//! let spec = AggregateSpec::new(vec!["account".into()], vec![Metric::new("amount", AggKind::Sum)]);
//! let out = aggregate(&positive, Some(&spec)).unwrap();
//! assert_eq!(out.rows, vec![vec![Value::Utf8("a1".into()), Value::Float64(15.0)]]);
//! ```

pub mod aggregate;
pub mod filter;
pub mod reduce;
pub mod sanitize;

pub use aggregate::{aggregate, AggregateSpec, Metric};
pub use filter::{apply_filters, FilterPredicate};
pub use sanitize::{sanitize, Normalize, SanitizeSpec};
