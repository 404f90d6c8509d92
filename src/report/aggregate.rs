//! Results documents and their aggregation.
//!
//! A results document holds one run's per-dataset statistics. Many documents
//! (from separate processes or time slices) merge into one by summing counts,
//! durations and usage and concatenating case lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::agent::{ContextMode, Usage};
use crate::error::{EvalError, Result};
use crate::eval::{CaseStatus, EvalResult};

/// Statistics for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetResults {
    pub passing: u64,
    pub total: u64,
    /// Sum of case durations in seconds.
    pub total_duration: f64,
    pub usage: Usage,
    pub failed: Vec<String>,
    /// Errored cases per exception class.
    pub failed_error_counts: BTreeMap<String, u64>,
    pub errored: Vec<String>,
    /// Cases whose golden query or fixture is broken; not counted in `total`.
    pub expected_errors: Vec<String>,
    pub evals: Vec<EvalResult>,
}

impl DatasetResults {
    /// Adds one terminal case.
    ///
    /// `expected_error` cases are kept in `evals` and listed apart, but do not
    /// count toward `total`, duration or usage.
    pub fn record(&mut self, result: EvalResult) -> Result<()> {
        match result.status {
            CaseStatus::ExpectedError => {
                self.expected_errors.push(result.name.clone());
                self.evals.push(result);
                return Ok(());
            }
            CaseStatus::Pass => self.passing += 1,
            CaseStatus::Fail => self.failed.push(result.name.clone()),
            CaseStatus::Error => {
                let class = result
                    .details
                    .exception_class
                    .clone()
                    .unwrap_or_else(|| "UnknownError".to_string());
                *self.failed_error_counts.entry(class).or_insert(0) += 1;
                self.errored.push(result.name.clone());
            }
            status @ (CaseStatus::Pending | CaseStatus::Running) => {
                return Err(EvalError::internal(format!(
                    "case {} recorded before finishing ({status})",
                    result.name
                )))
            }
        }

        self.total += 1;
        self.total_duration += result.duration;
        self.usage += result.usage();
        self.evals.push(result);
        Ok(())
    }

    /// Folds another dataset's statistics into this one.
    pub fn merge(&mut self, other: DatasetResults) {
        self.passing += other.passing;
        self.total += other.total;
        self.total_duration += other.total_duration;
        self.usage += other.usage;
        self.failed.extend(other.failed);
        for (class, count) in other.failed_error_counts {
            *self.failed_error_counts.entry(class).or_insert(0) += count;
        }
        self.errored.extend(other.errored);
        self.expected_errors.extend(other.expected_errors);
        self.evals.extend(other.evals);
    }

    /// Share of passing cases; 1 when no case counted.
    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.passing, self.total)
    }
}

fn pass_rate(passing: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        passing as f64 / total as f64
    }
}

/// Counters summed across datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub passing: u64,
    pub total: u64,
    pub total_duration: f64,
    pub usage: Usage,
}

impl Totals {
    /// Share of passing cases; 1 when no case counted.
    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.passing, self.total)
    }
}

/// Agent identity recorded with a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    pub name: String,
    pub version: String,
}

/// Settings a run was made with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDetails {
    pub agent: AgentInfo,
    pub provider: String,
    pub model: String,
    pub fast: bool,
    pub context_mode: ContextMode,
    pub strict: bool,
}

/// One results document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub task: String,
    #[serde(default)]
    pub details: RunDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: BTreeMap<String, DatasetResults>,
}

impl RunResults {
    /// Folds `other` into this document.
    ///
    /// Task and details are taken from `other`; the time span widens to cover both.
    pub fn merge(&mut self, other: RunResults) {
        self.task = other.task;
        self.details = other.details;
        self.started_at = earliest(self.started_at, other.started_at);
        self.finished_at = latest(self.finished_at, other.finished_at);
        for (dataset, results) in other.results {
            self.results.entry(dataset).or_default().merge(results);
        }
    }

    /// Counters across all datasets.
    pub fn totals(&self) -> Totals {
        self.results.values().fold(Totals::default(), |mut acc, r| {
            acc.passing += r.passing;
            acc.total += r.total;
            acc.total_duration += r.total_duration;
            acc.usage += r.usage;
            acc
        })
    }

    /// Loads a results document.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EvalError::io(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| EvalError::io(format!("Failed to decode {}: {e}", path.display())))
    }

    /// Writes the document as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EvalError::io(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| EvalError::internal(format!("Failed to serialize results: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| EvalError::io(format!("Failed to write {}: {e}", path.display())))
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Merges every `*.json` document in `dir`, in file-name order.
///
/// Unreadable or malformed files are logged and skipped. Returns None when
/// no document could be read.
pub fn combine_results_dir(dir: &Path) -> Result<Option<RunResults>> {
    if !dir.is_dir() {
        return Err(EvalError::io(format!(
            "No results directory found at {}. Please run the eval command first.",
            dir.display()
        )));
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| EvalError::io(format!("Failed to read {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut combined: Option<RunResults> = None;
    for path in files {
        match RunResults::load(&path) {
            Ok(run) => match combined.as_mut() {
                Some(acc) => acc.merge(run),
                None => combined = Some(run),
            },
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    Ok(combined)
}
