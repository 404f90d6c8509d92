//! Error types for sqleval.
//!
//! `EvalError` covers process-level failures (configuration, I/O, the
//! reporting store). `CaseError` is the per-case taxonomy that the outcome
//! classifier turns into a status; it never aborts a run.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use thiserror::Error;

/// Main error type for sqleval operations.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, timeouts, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Agent errors (provider failures, unparseable responses, etc.)
    #[error("Agent error: {0}")]
    Agent(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reporting store errors.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Filesystem errors while reading fixtures or writing artifacts.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvalError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an agent error with the given message.
    pub fn agent(msg: impl Into<String>) -> Self {
        Self::Agent(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates an I/O error with the given message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Agent(_) => "Agent Error",
            Self::Config(_) => "Configuration Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Io(_) => "I/O Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the name of the variant, used as an exception class in artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "ConnectionError",
            Self::Query(_) => "QueryError",
            Self::Agent(_) => "AgentError",
            Self::Config(_) => "ConfigError",
            Self::Persistence(_) => "PersistenceError",
            Self::Io(_) => "IoError",
            Self::Internal(_) => "InternalError",
        }
    }
}

/// Result type alias using EvalError.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Where a case failure came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    /// Display strings of the error and its sources, outermost first.
    pub causes: Vec<String>,
    /// Stack at the point the failure was wrapped, when `RUST_BACKTRACE`
    /// enables capture.
    pub backtrace: Option<String>,
}

impl Trace {
    fn capture(err: &(dyn std::error::Error + 'static)) -> Self {
        let backtrace = Backtrace::capture();
        Self {
            causes: error_chain(err),
            backtrace: (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string()),
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.causes.join("\n"))?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n\nstack backtrace:\n{backtrace}")?;
        }
        Ok(())
    }
}

/// Failure of a single evaluation case.
///
/// Every variant carries the message of the error that caused it and a
/// `Trace`, which is persisted in the error artifact.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaseError {
    /// The agent failed to produce a query.
    #[error("{message}")]
    AgentFn { message: String, trace: Trace },

    /// The golden query failed to execute: the fixture is broken.
    #[error("{message}")]
    GetExpected { message: String, trace: Trace },

    /// The generated query failed to execute.
    #[error("{message}")]
    QueryExecution { message: String, trace: Trace },

    /// Anything else that escaped the pipeline.
    #[error("{message}")]
    Other {
        class: String,
        message: String,
        trace: Trace,
    },
}

impl CaseError {
    /// Wraps an agent failure.
    pub fn agent_fn(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::AgentFn {
            message: err.to_string(),
            trace: Trace::capture(err),
        }
    }

    /// Wraps a golden query failure.
    pub fn get_expected(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::GetExpected {
            message: err.to_string(),
            trace: Trace::capture(err),
        }
    }

    /// Wraps a generated query failure.
    pub fn query_execution(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::QueryExecution {
            message: err.to_string(),
            trace: Trace::capture(err),
        }
    }

    /// Wraps an unexpected process-level error.
    pub fn other(err: &EvalError) -> Self {
        Self::Other {
            class: err.kind().to_string(),
            message: err.to_string(),
            trace: Trace::capture(err),
        }
    }

    /// Class name used as the key of the per-dataset error histogram.
    pub fn class_name(&self) -> &str {
        match self {
            Self::AgentFn { .. } => "AgentFnError",
            Self::GetExpected { .. } => "GetExpectedError",
            Self::QueryExecution { .. } => "QueryExecutionError",
            Self::Other { class, .. } => class,
        }
    }

    /// The underlying error chain and backtrace.
    pub fn trace(&self) -> &Trace {
        match self {
            Self::AgentFn { trace, .. }
            | Self::GetExpected { trace, .. }
            | Self::QueryExecution { trace, .. }
            | Self::Other { trace, .. } => trace,
        }
    }

    /// Returns true if this failure signals a broken fixture rather than an agent defect.
    pub fn is_expected_error(&self) -> bool {
        matches!(self, Self::GetExpected { .. })
    }
}

/// Collects the display strings of an error and all its sources.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push(inner.to_string());
        source = inner.source();
    }
    chain
}
