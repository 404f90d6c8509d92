//! Case loading, the evaluation loop and per-case outcomes.

mod artifacts;
mod case;
mod outcome;
mod runner;

pub use artifacts::{
    Artifacts, DETAILS_FILE, ERROR_FILE, MESSAGES_FILE, QUERY_FILE, TABLES_FILE,
};
pub use case::{
    sample_evenly, BrokenFixture, CaseFilter, CaseListing, CaseStore, EvalCase, MatrixEntry,
};
pub use outcome::{CaseStatus, EvalDetails, EvalResult};
pub use runner::{EvalRunner, Task};
