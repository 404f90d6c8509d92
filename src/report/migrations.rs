//! Schema versioning for the reporting store.
//!
//! Forward-only: each version runs once and is recorded in `schema_versions`.

use crate::error::{EvalError, Result};
use sqlx::postgres::PgPool;
use tracing::info;

const CURRENT_VERSION: i32 = 1;

/// Runs all pending migrations on the reporting store.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        EvalError::persistence(format!("Failed to create schema_versions table: {e}"))
    })?;

    let current: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_versions")
        .fetch_one(pool)
        .await
        .map_err(|e| EvalError::persistence(format!("Failed to get schema version: {e}")))?;
    let current = current.unwrap_or(0);

    if current > CURRENT_VERSION {
        return Err(EvalError::persistence(format!(
            "Reporting schema version ({current}) is newer than supported version ({CURRENT_VERSION})."
        )));
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(pool, version).await?;
        sqlx::query("INSERT INTO schema_versions (version) VALUES ($1)")
            .bind(version)
            .execute(pool)
            .await
            .map_err(|e| EvalError::persistence(format!("Failed to record migration: {e}")))?;
        info!("Applied reporting migration v{}", version);
    }

    Ok(())
}

async fn run_migration(pool: &PgPool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        _ => Err(EvalError::persistence(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: runs and their evals.
async fn migration_v1(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id BIGSERIAL PRIMARY KEY,
            source TEXT NOT NULL,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ NOT NULL,
            task TEXT NOT NULL,
            scores JSONB NOT NULL,
            details JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| EvalError::persistence(format!("Failed to create runs table: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evals (
            id BIGSERIAL PRIMARY KEY,
            run_id BIGINT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            dataset TEXT NOT NULL,
            database TEXT NOT NULL,
            name TEXT NOT NULL,
            question TEXT NOT NULL,
            status TEXT NOT NULL,
            duration DOUBLE PRECISION NOT NULL,
            details JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| EvalError::persistence(format!("Failed to create evals table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evals_run ON evals(run_id)")
        .execute(pool)
        .await
        .map_err(|e| EvalError::persistence(format!("Failed to create evals index: {e}")))?;

    Ok(())
}
