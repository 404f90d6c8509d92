//! PostgreSQL database client implementation.
//!
//! Each `PostgresClient` owns a single connection to one target database.
//! Statements run inside a transaction that sets `statement_timeout` and is
//! always rolled back, so nothing a generated query does survives the case.

use crate::config::TargetConfig;
use crate::db::{
    normalize, Column, ColumnInfo, Connector, DatabaseClient, ForeignKey, ResultSet, Row, Schema,
    Table, Value,
};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column as SqlxColumn, Connection, Executor, Row as SqlxRow, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Extra time the client waits beyond the server-side statement timeout.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Opens one connection per case against the configured Postgres server.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    target: TargetConfig,
    statement_timeout: Duration,
}

impl PostgresConnector {
    /// Creates a connector for the given server and per-statement timeout.
    pub fn new(target: TargetConfig, statement_timeout: Duration) -> Self {
        Self {
            target,
            statement_timeout,
        }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, database: &str) -> Result<Box<dyn DatabaseClient>> {
        let client = PostgresClient::connect(&self.target, database, self.statement_timeout).await?;
        Ok(Box::new(client))
    }
}

/// PostgreSQL database client bound to one database.
#[derive(Debug)]
pub struct PostgresClient {
    conn: Mutex<PgConnection>,
    statement_timeout: Duration,
}

impl PostgresClient {
    /// Connects to `database` on the target server, retrying transient failures.
    pub async fn connect(
        target: &TargetConfig,
        database: &str,
        statement_timeout: Duration,
    ) -> Result<Self> {
        let conn_str = target.connection_string(database)?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!(
                "Connection attempt {} of {} to {}",
                attempt,
                MAX_RETRY_ATTEMPTS,
                target.display_string(database)
            );

            match PgConnection::connect(&conn_str).await {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        statement_timeout,
                    });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, target, database),
            None => EvalError::connection("No connection attempt was made"),
        })
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        let mut conn = self.conn.lock().await;
        let tables = fetch_tables(&mut conn).await?;
        let foreign_keys = fetch_foreign_keys(&mut conn).await?;

        Ok(Schema {
            tables,
            foreign_keys,
        })
    }

    async fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        let mut conn = self.conn.lock().await;
        let start = Instant::now();

        let limit = self.statement_timeout + CLIENT_TIMEOUT_GRACE;
        let (columns, rows) = tokio::time::timeout(
            limit,
            run_isolated(&mut conn, sql, self.statement_timeout),
        )
        .await
        .map_err(|_| {
            EvalError::query(format!(
                "Query timed out after {} seconds",
                self.statement_timeout.as_secs()
            ))
        })??;

        let result = ResultSet::with_data(columns, rows).with_execution_time(start.elapsed());
        debug!(
            "Query returned {} rows x {} columns in {:?}",
            result.row_count(),
            result.column_count(),
            result.execution_time
        );

        Ok(normalize(result))
    }

    async fn close(&self) -> Result<()> {
        // PgConnection::close takes ownership; the socket is released on drop.
        let _conn = self.conn.lock().await;
        Ok(())
    }
}

/// Runs one statement in a throwaway transaction with a server-side timeout.
async fn run_isolated(
    conn: &mut PgConnection,
    sql: &str,
    statement_timeout: Duration,
) -> Result<(Vec<ColumnInfo>, Vec<Row>)> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| EvalError::query(format!("Failed to start transaction: {e}")))?;

    // SET does not accept bind parameters.
    let set_timeout = format!(
        "SET LOCAL statement_timeout = {}",
        statement_timeout.as_millis()
    );
    let result = match sqlx::query(&set_timeout).execute(&mut *tx).await {
        Ok(_) => fetch(&mut tx, sql).await,
        Err(e) => Err(EvalError::query(format!(
            "Failed to set statement timeout: {e}"
        ))),
    };

    if let Err(e) = tx.rollback().await {
        warn!("Failed to roll back evaluation transaction: {e}");
    }

    result
}

async fn fetch(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    sql: &str,
) -> Result<(Vec<ColumnInfo>, Vec<Row>)> {
    let rows: Vec<PgRow> = sqlx::query(sql)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| EvalError::query(format_query_error(e)))?;

    let columns = match rows.first() {
        Some(row) => column_infos(row.columns()),
        None => {
            // No rows to read labels from; ask the server to describe the statement.
            let described = (&mut **tx)
                .describe(sql)
                .await
                .map_err(|e| EvalError::query(format_query_error(e)))?;
            column_infos(described.columns())
        }
    };

    Ok((columns, rows.iter().map(convert_row).collect()))
}

fn column_infos<C: SqlxColumn>(columns: &[C]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Fetches all tables of the public schema with their comments.
async fn fetch_tables(conn: &mut PgConnection) -> Result<Vec<Table>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT c.relname::text, obj_description(c.oid, 'pg_class')
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p', 'v', 'm')
        ORDER BY c.relname
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| EvalError::query(format!("Failed to fetch tables: {e}")))?;

    let mut tables = Vec::with_capacity(rows.len());
    for (name, description) in rows {
        let columns = fetch_columns(conn, &name).await?;
        let primary_key = fetch_primary_key(conn, &name).await?;
        tables.push(Table {
            name,
            description,
            columns,
            primary_key,
        });
    }

    Ok(tables)
}

/// Fetches columns for a specific table.
async fn fetch_columns(conn: &mut PgConnection, table_name: &str) -> Result<Vec<Column>> {
    let rows: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(
        r#"
        SELECT
            a.attname::text,
            pg_catalog.format_type(a.atttypid, a.atttypmod),
            NOT a.attnotnull,
            col_description(a.attrelid, a.attnum)
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = 'public'
            AND c.relname = $1
            AND a.attnum > 0
            AND NOT a.attisdropped
        ORDER BY a.attnum
        "#,
    )
    .bind(table_name)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| EvalError::query(format!("Failed to fetch columns for {table_name}: {e}")))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, is_nullable, description)| Column {
            name,
            data_type,
            is_nullable,
            description,
        })
        .collect())
}

/// Fetches primary key columns for a specific table.
async fn fetch_primary_key(conn: &mut PgConnection, table_name: &str) -> Result<Vec<String>> {
    sqlx::query_scalar(
        r#"
        SELECT kcu.column_name::text
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        WHERE tc.table_schema = 'public'
            AND tc.table_name = $1
            AND tc.constraint_type = 'PRIMARY KEY'
        ORDER BY kcu.ordinal_position
        "#,
    )
    .bind(table_name)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| EvalError::query(format!("Failed to fetch primary key for {table_name}: {e}")))
}

/// Fetches all foreign key relationships, grouped by constraint.
async fn fetch_foreign_keys(conn: &mut PgConnection) -> Result<Vec<ForeignKey>> {
    let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
        r#"
        SELECT
            tc.constraint_name::text,
            kcu.table_name::text AS from_table,
            kcu.column_name::text AS from_column,
            ccu.table_name::text AS to_table,
            ccu.column_name::text AS to_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON tc.constraint_name = ccu.constraint_name
            AND tc.table_schema = ccu.table_schema
        WHERE tc.table_schema = 'public'
            AND tc.constraint_type = 'FOREIGN KEY'
        ORDER BY tc.constraint_name, kcu.ordinal_position
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| EvalError::query(format!("Failed to fetch foreign keys: {e}")))?;

    let mut keys: Vec<(String, ForeignKey)> = Vec::new();
    for (constraint, from_table, from_column, to_table, to_column) in rows {
        match keys.last_mut() {
            Some((name, fk)) if *name == constraint => {
                fk.from_columns.push(from_column);
                fk.to_columns.push(to_column);
            }
            _ => keys.push((
                constraint,
                ForeignKey::new(from_table, vec![from_column], to_table, vec![to_column]),
            )),
        }
    }

    Ok(keys.into_iter().map(|(_, fk)| fk).collect())
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Decodes a nullable column as `T` and maps it into a Value.
fn decode<'r, T, F>(row: &'r PgRow, index: usize, wrap: F) -> Value
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    F: FnOnce(T) -> Value,
{
    row.try_get::<Option<T>, _>(index)
        .ok()
        .flatten()
        .map(wrap)
        .unwrap_or(Value::Null)
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => decode::<bool, _>(row, index, Value::Bool),
        "INT2" | "SMALLINT" => decode::<i16, _>(row, index, |v| Value::Int(v as i64)),
        "INT4" | "INT" | "INTEGER" => decode::<i32, _>(row, index, |v| Value::Int(v as i64)),
        "INT8" | "BIGINT" => decode::<i64, _>(row, index, Value::Int),
        "FLOAT4" | "REAL" => decode::<f32, _>(row, index, |v| Value::Float(v as f64)),
        "FLOAT8" | "DOUBLE PRECISION" => decode::<f64, _>(row, index, Value::Float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => decode::<String, _>(row, index, Value::String),
        "BYTEA" => decode::<Vec<u8>, _>(row, index, Value::Bytes),
        "DATE" => decode::<NaiveDate, _>(row, index, Value::Date),
        "TIME" => decode::<NaiveTime, _>(row, index, Value::Time),
        "TIMESTAMP" => decode::<NaiveDateTime, _>(row, index, Value::Timestamp),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>, _>(row, index, Value::TimestampTz),
        "NUMERIC" => match raw_bytes(row, index) {
            Some(bytes) => decode_numeric(&bytes)
                .map(Value::Numeric)
                .unwrap_or(Value::Other {
                    type_name: "NUMERIC".to_string(),
                    bytes,
                }),
            None => Value::Null,
        },
        other => match raw_bytes(row, index) {
            Some(bytes) => Value::Other {
                type_name: other.to_string(),
                bytes,
            },
            None => Value::Null,
        },
    }
}

/// Returns the raw wire bytes of a column, or None for NULL.
fn raw_bytes(row: &PgRow, index: usize) -> Option<Vec<u8>> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return None;
    }
    raw.as_bytes().ok().map(<[u8]>::to_vec)
}

/// Decodes the binary NUMERIC wire format into canonical decimal text.
///
/// Layout: ndigits, weight, sign, dscale (all big-endian u16) followed by
/// `ndigits` base-10000 digits. Trailing fractional zeros are dropped.
fn decode_numeric(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let read = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
    let ndigits = read(0) as usize;
    let weight = read(2) as i16 as i32;
    let sign = read(4);
    if bytes.len() < 8 + ndigits * 2 {
        return None;
    }

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => return None,
    }
    if ndigits == 0 {
        return Some("0".to_string());
    }

    let mut int_part = String::new();
    let mut frac_part = String::new();
    for i in 0..ndigits {
        let digit = read(8 + i * 2);
        if weight - (i as i32) >= 0 {
            if int_part.is_empty() {
                int_part = digit.to_string();
            } else {
                int_part.push_str(&format!("{digit:04}"));
            }
        } else {
            frac_part.push_str(&format!("{digit:04}"));
        }
    }
    // Trailing zero groups of the integer part are not transmitted.
    let ndigits = ndigits as i32;
    if weight >= ndigits {
        int_part.push_str(&"0000".repeat((weight - ndigits + 1) as usize));
    }
    // Neither are leading zero groups of the fraction.
    if weight < -1 {
        frac_part.insert_str(0, &"0000".repeat((-weight - 1) as usize));
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let frac = frac_part.trim_end_matches('0');
    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    text.push_str(&int_part);
    if !frac.is_empty() {
        text.push('.');
        text.push_str(frac);
    }
    Some(text)
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Authentication and database-not-found errors are not transient
    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
        || error_str.contains("too many clients")
}

/// Maps sqlx connection errors to readable messages.
fn map_connection_error(error: sqlx::Error, target: &TargetConfig, database: &str) -> EvalError {
    let host = target.host.as_deref().unwrap_or("localhost");
    let port = target.port;
    let user = target.user.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        EvalError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("authentication failed") {
        EvalError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        EvalError::connection(format!(
            "Database '{database}' does not exist. Has the dataset been loaded?"
        ))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        EvalError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        EvalError::connection(error.to_string())
    }
}

/// Formats a query error with the Postgres detail and hint when available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
