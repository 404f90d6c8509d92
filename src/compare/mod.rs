//! Scoring of generated SQL against golden SQL.

mod results;
mod tables;

pub use results::{compare, map_columns, ColumnMapping};
pub use tables::{compare_tables, normalize_tables, referenced_tables};
