//! Integration tests for sqleval.

pub mod common;
pub mod eval_test;
pub mod matrix_test;
pub mod report_test;
