//! Fixture helpers shared by the integration tests.

use serde_json::json;
use sqleval::config::Config;
use sqleval::db::{ResultSet, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A datasets directory in a temp dir.
pub struct Datasets {
    dir: TempDir,
}

impl Datasets {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `<dataset>/evals/<name>/eval.json` and returns the case directory.
    pub fn add_case(
        &self,
        dataset: &str,
        name: &str,
        database: &str,
        question: &str,
        query: &str,
    ) -> PathBuf {
        self.add_fixture(
            dataset,
            name,
            json!({"database": database, "question": question, "query": query}),
        )
    }

    pub fn add_fixture(&self, dataset: &str, name: &str, fixture: serde_json::Value) -> PathBuf {
        let dir = self.root().join(dataset).join("evals").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("eval.json"), fixture.to_string()).unwrap();
        dir
    }

    /// Creates an empty dump file under `<dataset>/databases/`.
    pub fn add_dump(&self, dataset: &str, file: &str) {
        let dir = self.root().join(dataset).join("databases");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), "").unwrap();
    }

    /// Defaults pointed at this directory, without retry bounds.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.run.datasets_dir = self.root().to_path_buf();
        config.run.results_dir = self.root().join("results");
        config
    }
}

/// Builds a result set from named columns.
pub fn result_set(columns: Vec<(&str, Vec<Value>)>) -> ResultSet {
    ResultSet::from_columns(columns).unwrap()
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Int(*v)).collect()
}

pub fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}
