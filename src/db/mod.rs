//! Database access for target databases.
//!
//! Agents and the evaluation loop only see the `DatabaseClient` trait, so
//! tests can swap the Postgres implementation for an in-memory one.

mod mock;
mod normalize;
mod postgres;
mod schema;
mod types;

pub use mock::{MockConnector, MockDatabaseClient};
pub use normalize::{dedupe_labels, normalize};
pub use postgres::{PostgresClient, PostgresConnector};
pub use schema::{Column, ForeignKey, Schema, Table};
pub use types::{ColumnInfo, ResultSet, Row, Value};

use crate::error::Result;
use async_trait::async_trait;

/// Trait defining the interface for database clients.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Introspects the database schema, returning table and relationship information.
    async fn introspect_schema(&self) -> Result<Schema>;

    /// Executes one SQL statement in isolation and returns its normalized result.
    ///
    /// Any writes the statement performs are discarded.
    async fn execute_query(&self, sql: &str) -> Result<ResultSet>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}

/// Opens clients for named databases on one server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `database`.
    async fn connect(&self, database: &str) -> Result<Box<dyn DatabaseClient>>;
}
