//! Evaluation case fixtures.
//!
//! Layout under the datasets root:
//!
//! ```text
//! <dataset>/evals/<name>/eval.json     {database, question, query, gold_tables?}
//! <dataset>/databases.json             optional list of database names
//! <dataset>/databases/<db>.sql         or <db>.part000.sql, <db>.part001.sql, ...
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{EvalError, Result};

/// File holding a case's question and golden query.
const FIXTURE_FILE: &str = "eval.json";

#[derive(Debug, Deserialize)]
struct Fixture {
    database: String,
    question: String,
    query: String,
    #[serde(default)]
    gold_tables: Option<Vec<String>>,
}

/// One question/golden-query pair bound to a target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalCase {
    pub dataset: String,
    pub database: String,
    pub name: String,
    pub question: String,
    pub golden_query: String,
    pub gold_tables: Option<Vec<String>>,
    /// Directory holding the fixture; artifacts are written next to it.
    pub dir: PathBuf,
}

impl EvalCase {
    /// Loads the case stored in `dir`.
    pub fn load(dataset: &str, dir: &Path) -> Result<Self> {
        let path = dir.join(FIXTURE_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EvalError::io(format!("Failed to read {}: {e}", path.display())))?;
        let fixture: Fixture = serde_json::from_str(&content)
            .map_err(|e| EvalError::io(format!("Invalid fixture {}: {e}", path.display())))?;

        Ok(Self {
            dataset: dataset.to_string(),
            database: fixture.database,
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            question: fixture.question,
            golden_query: fixture.query,
            gold_tables: fixture.gold_tables,
            dir: dir.to_path_buf(),
        })
    }

    /// Name of the Postgres database the case runs against.
    pub fn target_database(&self) -> String {
        format!("{}_{}", self.dataset, self.database)
    }
}

/// A case directory whose `eval.json` could not be read or decoded.
#[derive(Debug)]
pub struct BrokenFixture {
    pub dataset: String,
    pub name: String,
    pub dir: PathBuf,
    pub error: EvalError,
}

/// Cases selected from one dataset, in name order.
#[derive(Debug, Default)]
pub struct CaseListing {
    pub cases: Vec<EvalCase>,
    /// Fixtures that failed to load. They are scored as broken, not skipped.
    pub broken: Vec<BrokenFixture>,
}

impl CaseListing {
    /// Number of selected case directories, loaded or not.
    pub fn len(&self) -> usize {
        self.cases.len() + self.broken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Narrows which cases of a dataset run.
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    /// Only cases bound to this database.
    pub database: Option<String>,
    /// Only the case with this name.
    pub eval: Option<String>,
    /// Keep at most this many evenly spaced cases.
    pub sample_size: Option<usize>,
}

/// One `{dataset, database}` pair of the provisioning matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixEntry {
    pub dataset: String,
    pub database: String,
}

/// Read-only access to the datasets directory.
#[derive(Debug, Clone)]
pub struct CaseStore {
    root: PathBuf,
}

impl CaseStore {
    /// Creates a store rooted at the datasets directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// All dataset names, sorted.
    pub fn datasets(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = read_dir(&self.root)?
            .into_iter()
            .filter(|path| path.is_dir())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Returns true if the dataset has an `evals/` directory.
    pub fn has_evals(&self, dataset: &str) -> bool {
        self.root.join(dataset).join("evals").is_dir()
    }

    /// Loads the cases of a dataset, sorted by name, after filtering and sampling.
    ///
    /// A fixture that fails to load is returned in `broken` instead of failing
    /// the listing. With a database filter set it is skipped, since its
    /// database is unknown. A dataset without `evals/` yields an empty listing.
    pub fn cases(&self, dataset: &str, filter: &CaseFilter) -> Result<CaseListing> {
        let evals_dir = self.root.join(dataset).join("evals");
        if !evals_dir.is_dir() {
            return Ok(CaseListing::default());
        }
        let mut dirs: Vec<PathBuf> = read_dir(&evals_dir)?
            .into_iter()
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let mut entries = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if filter.eval.as_ref().is_some_and(|eval| *eval != name) {
                continue;
            }
            match EvalCase::load(dataset, &dir) {
                Ok(case) => {
                    if filter.database.as_ref().is_some_and(|db| *db != case.database) {
                        continue;
                    }
                    entries.push(Ok(case));
                }
                Err(error) if filter.database.is_some() => {
                    warn!("Skipping {}/{}: {}", dataset, name, error);
                }
                Err(error) => entries.push(Err(BrokenFixture {
                    dataset: dataset.to_string(),
                    name,
                    dir,
                    error,
                })),
            }
        }

        if let Some(size) = filter.sample_size {
            entries = sample_evenly(entries, size);
        }

        let mut listing = CaseListing::default();
        for entry in entries {
            match entry {
                Ok(case) => listing.cases.push(case),
                Err(broken) => listing.broken.push(broken),
            }
        }
        Ok(listing)
    }

    /// Databases of a dataset, from `databases.json` or the dump file names.
    pub fn databases(&self, dataset: &str) -> Result<Vec<String>> {
        let dataset_dir = self.root.join(dataset);
        let listing = dataset_dir.join("databases.json");
        if listing.is_file() {
            let content = std::fs::read_to_string(&listing)
                .map_err(|e| EvalError::io(format!("Failed to read {}: {e}", listing.display())))?;
            return serde_json::from_str(&content)
                .map_err(|e| EvalError::io(format!("Invalid {}: {e}", listing.display())));
        }

        let mut names: Vec<String> = read_dir(&dataset_dir.join("databases"))?
            .into_iter()
            .filter(|path| path.is_file())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .filter_map(|file| dump_database_name(&file))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Every dataset/database pair, keeping those whose `<dataset>_<database>`
    /// starts with one of the comma-separated prefixes in `filter`.
    pub fn matrix(&self, filter: Option<&str>) -> Result<Vec<MatrixEntry>> {
        let prefixes: Option<Vec<&str>> =
            filter.map(|f| f.split(',').map(str::trim).filter(|p| !p.is_empty()).collect());

        let mut entries = Vec::new();
        for dataset in self.datasets()? {
            for database in self.databases(&dataset)? {
                let key = format!("{dataset}_{database}");
                let keep = prefixes
                    .as_ref()
                    .map_or(true, |ps| ps.iter().any(|p| key.starts_with(p)));
                let entry = MatrixEntry {
                    dataset: dataset.clone(),
                    database,
                };
                if keep && !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }
}

/// Maps a dump file name to its database, skipping continuation parts.
fn dump_database_name(file: &str) -> Option<String> {
    let stem = file.strip_suffix(".sql")?;
    match stem.rsplit_once(".part") {
        Some((name, "000")) => Some(name.to_string()),
        Some(_) => None,
        None => Some(stem.to_string()),
    }
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EvalError::io(format!("Failed to read {}: {e}", dir.display())))?;
    entries
        .map(|entry| {
            entry
                .map(|e| e.path())
                .map_err(|e| EvalError::io(format!("Failed to read {}: {e}", dir.display())))
        })
        .collect()
}

/// Keeps `size` items at evenly spaced indices `round(i * (n - 1) / (size - 1))`.
///
/// Ties round to even. Inputs no longer than `size` are returned unchanged.
pub fn sample_evenly<T>(items: Vec<T>, size: usize) -> Vec<T> {
    let n = items.len();
    if n <= size {
        return items;
    }
    if size <= 1 {
        return items.into_iter().take(size).collect();
    }

    let step = (n - 1) as f64 / (size - 1) as f64;
    let picks: Vec<usize> = (0..size)
        .map(|i| ((i as f64 * step).round_ties_even() as usize).min(n - 1))
        .collect();

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    picks
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}
