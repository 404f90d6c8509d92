//! Case status state machine and per-case result records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::Usage;
use crate::error::{CaseError, EvalError, Result};

/// Lifecycle of one case.
///
/// `Pending -> Running -> {Pass, Fail, Error, ExpectedError}`; terminal
/// states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    Running,
    Pass,
    Fail,
    Error,
    ExpectedError,
}

impl CaseStatus {
    /// Returns true once the case has an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Pass | Self::Fail | Self::Error | Self::ExpectedError
        )
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(self, next: CaseStatus) -> Result<CaseStatus> {
        let allowed = match self {
            Self::Pending => next == Self::Running,
            Self::Running => next.is_terminal(),
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(EvalError::internal(format!(
                "invalid case transition {self} -> {next}"
            )))
        }
    }

    /// Terminal status for a scored case or a case-level failure.
    pub fn classify(verdict: &std::result::Result<bool, CaseError>) -> Self {
        match verdict {
            Ok(true) => Self::Pass,
            Ok(false) => Self::Fail,
            Err(e) if e.is_expected_error() => Self::ExpectedError,
            Err(_) => Self::Error,
        }
    }

    /// Returns the status as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::ExpectedError => "expected_error",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form details persisted with each case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalDetails {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub golden_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_tables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_tables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_traceback: Option<String>,
}

impl EvalDetails {
    /// Records a case failure.
    pub fn set_error(&mut self, error: &CaseError) {
        self.exception_class = Some(error.class_name().to_string());
        self.exception = Some(error.to_string());
        self.exception_traceback = Some(error.trace().to_string());
    }
}

/// Terminal record of one case, as stored in results documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub status: CaseStatus,
    pub dataset: String,
    pub database: String,
    pub name: String,
    pub question: String,
    /// Wall-clock seconds, rounded to milliseconds.
    pub duration: f64,
    #[serde(default)]
    pub details: EvalDetails,
}

impl EvalResult {
    /// Usage recorded for the case, zero when the agent never answered.
    pub fn usage(&self) -> Usage {
        self.details.usage.unwrap_or_default()
    }
}
