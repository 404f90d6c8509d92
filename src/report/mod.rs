//! Aggregation, display and persistence of evaluation results.

mod aggregate;
mod console;
mod migrations;
mod store;

pub use aggregate::{
    combine_results_dir, AgentInfo, DatasetResults, RunDetails, RunResults, Totals,
};
pub use console::{write_dataset_summary, write_report};
pub use store::ReportStore;
