//! Ingestion entrypoints.
//!
//! Inputs are delimited text files described by a [`ReadConfig`]; see [`csv`] for the typing
//! rules.

pub mod csv;

pub use csv::{ingest_csv_from_path, ingest_csv_from_reader, parse_dtype, ReadConfig};
