//! Per-case artifacts written next to the fixture.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::agent::{format_transcript, Message};
use crate::error::{CaseError, EvalError, Result};

pub const QUERY_FILE: &str = "actual_query.sql";
pub const MESSAGES_FILE: &str = "actual_messages.txt";
pub const ERROR_FILE: &str = "error.txt";
pub const DETAILS_FILE: &str = "details.json";
pub const TABLES_FILE: &str = "actual_tables.json";

const ALL_FILES: [&str; 5] = [QUERY_FILE, MESSAGES_FILE, ERROR_FILE, DETAILS_FILE, TABLES_FILE];

/// Writer for one case directory.
#[derive(Debug, Clone)]
pub struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    /// Creates a writer for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Removes artifacts left by a previous attempt.
    pub fn clear(&self) -> Result<()> {
        for name in ALL_FILES {
            let path = self.dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(())
    }

    /// Writes the generated query and the transcript that produced it.
    pub fn write_generation(&self, query: &str, messages: &[Message]) -> Result<()> {
        self.write(QUERY_FILE, query)?;
        self.write_transcript(messages)
    }

    /// Writes the agent transcript as `role:\ncontent` blocks.
    pub fn write_transcript(&self, messages: &[Message]) -> Result<()> {
        self.write(MESSAGES_FILE, &format_transcript(messages))
    }

    /// Writes the tables named by the agent.
    pub fn write_tables(&self, tables: &[String]) -> Result<()> {
        self.write_json(TABLES_FILE, &tables)
    }

    /// Writes the class, trace and message of a case failure.
    pub fn write_error(&self, error: &CaseError) -> Result<()> {
        let content = format!(
            "{}\n\n{}\n\n{}",
            error.class_name(),
            error.trace(),
            error
        );
        self.write(ERROR_FILE, &content)
    }

    /// Writes the case's terminal record.
    pub fn write_details<T: Serialize>(&self, details: &T) -> Result<()> {
        self.write_json(DETAILS_FILE, details)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| EvalError::internal(format!("Failed to serialize {name}: {e}")))?;
        self.write(name, &json)
    }

    fn write(&self, name: &str, content: &str) -> Result<()> {
        let path = self.dir.join(name);
        std::fs::write(&path, content).map_err(|e| io_error(&path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> EvalError {
    EvalError::io(format!("Failed to write {}: {e}", path.display()))
}
