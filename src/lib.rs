//! sqleval - scores AI-generated SQL against golden queries by comparing
//! the result sets both produce.
//!
//! This library exposes the core modules for the binary and integration tests.

pub mod agent;
pub mod compare;
pub mod config;
pub mod db;
pub mod error;
pub mod eval;
pub mod logging;
pub mod report;
pub mod retry;
