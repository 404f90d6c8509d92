//! Mock database client for testing.
//!
//! Results are canned per SQL text, so tests can script both the golden and
//! the generated query of a case without a server.

use super::{normalize, Connector, DatabaseClient, ResultSet, Schema};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Canned {
    Rows(ResultSet),
    Error(String),
}

/// A mock database client that returns predefined results.
#[derive(Debug, Clone, Default)]
pub struct MockDatabaseClient {
    schema: Schema,
    responses: HashMap<String, Canned>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockDatabaseClient {
    /// Creates a new mock database client with an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new mock database client with the given schema.
    pub fn with_schema(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Returns `result` whenever `sql` is executed.
    pub fn with_result(mut self, sql: impl Into<String>, result: ResultSet) -> Self {
        self.responses
            .insert(normalize_sql(&sql.into()), Canned::Rows(result));
        self
    }

    /// Fails with a query error whenever `sql` is executed.
    pub fn with_error(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .insert(normalize_sql(&sql.into()), Canned::Error(message.into()));
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    async fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        if let Ok(mut log) = self.executed.lock() {
            log.push(sql.to_string());
        }

        match self.responses.get(&normalize_sql(sql)) {
            Some(Canned::Rows(result)) => Ok(normalize(result.clone())),
            Some(Canned::Error(message)) => Err(EvalError::query(message.clone())),
            None => Err(EvalError::query(format!(
                "ERROR: no canned result for query: {sql}"
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Hands out mock clients keyed by database name.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    databases: HashMap<String, MockDatabaseClient>,
}

impl MockConnector {
    /// Creates a connector with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the client returned for `database`.
    pub fn with_database(
        mut self,
        database: impl Into<String>,
        client: MockDatabaseClient,
    ) -> Self {
        self.databases.insert(database.into(), client);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, database: &str) -> Result<Box<dyn DatabaseClient>> {
        match self.databases.get(database) {
            Some(client) => Ok(Box::new(client.clone())),
            None => Err(EvalError::connection(format!(
                "Database '{database}' does not exist. Has the dataset been loaded?"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ColumnInfo, Value};

    #[tokio::test]
    async fn test_canned_result_ignores_whitespace() {
        let result = ResultSet::with_data(
            vec![ColumnInfo::new("n", "INT4")],
            vec![vec![Value::Int(1)]],
        );
        let client = MockDatabaseClient::new().with_result("SELECT 1 AS n;", result.clone());

        let actual = client.execute_query("SELECT   1\nAS n").await.unwrap();
        assert_eq!(actual.rows, result.rows);
        assert_eq!(client.executed(), vec!["SELECT   1\nAS n"]);
    }

    #[tokio::test]
    async fn test_canned_error_and_unknown_query() {
        let client = MockDatabaseClient::new().with_error("SELECT x", "column x does not exist");

        let error = client.execute_query("SELECT x").await.unwrap_err();
        assert!(matches!(error, EvalError::Query(_)));
        assert!(client.execute_query("SELECT y").await.is_err());
    }

    #[tokio::test]
    async fn test_connector_unknown_database() {
        let connector = MockConnector::new().with_database("spider_a", MockDatabaseClient::new());
        assert!(connector.connect("spider_a").await.is_ok());
        assert!(matches!(
            connector.connect("spider_b").await,
            Err(EvalError::Connection(_))
        ));
    }
}
