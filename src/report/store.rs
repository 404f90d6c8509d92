//! Reporting store: one `runs` row per combined run plus one `evals` row per case.

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::info;

use crate::config::ReportConfig;
use crate::error::{EvalError, Result};
use crate::report::migrations::run_migrations;
use crate::report::RunResults;

/// Connection pool to the reporting database.
#[derive(Debug, Clone)]
pub struct ReportStore {
    pool: PgPool,
}

impl ReportStore {
    /// Connects to `dsn` and brings the schema up to date.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(dsn)
            .await
            .map_err(|e| {
                EvalError::persistence(format!("Failed to connect to reporting store: {e}"))
            })?;

        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Connects using the `[report]` settings, or returns None when no DSN is set.
    pub async fn from_config(config: &ReportConfig) -> Result<Option<Self>> {
        match config.dsn.as_deref() {
            Some(dsn) => Ok(Some(Self::connect(dsn, config.max_connections).await?)),
            None => Ok(None),
        }
    }

    /// Inserts the run and all its evals in one transaction and returns the run id.
    pub async fn save(&self, run: &RunResults, source: &str) -> Result<i64> {
        let map_err = |e: sqlx::Error| EvalError::persistence(format!("Failed to save run: {e}"));
        let now = Utc::now();
        let details = serde_json::to_value(&run.details)
            .map_err(|e| EvalError::internal(format!("Failed to serialize details: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let run_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO runs (source, start_time, end_time, task, scores, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(source)
        .bind(run.started_at.unwrap_or(now))
        .bind(run.finished_at.unwrap_or(now))
        .bind(&run.task)
        .bind(Json(scores(run)))
        .bind(Json(details))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;

        let mut count = 0;
        for eval in run.results.values().flat_map(|r| &r.evals) {
            sqlx::query(
                r#"
                INSERT INTO evals (run_id, dataset, database, name, question, status, duration, details)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(run_id)
            .bind(&eval.dataset)
            .bind(&eval.database)
            .bind(&eval.name)
            .bind(&eval.question)
            .bind(eval.status.as_str())
            .bind(eval.duration)
            .bind(Json(&eval.details))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            count += 1;
        }

        tx.commit().await.map_err(map_err)?;
        info!("Saved run {} with {} evals", run_id, count);
        Ok(run_id)
    }
}

/// `{dataset: {passing, total}}` for the runs table.
fn scores(run: &RunResults) -> JsonValue {
    run.results
        .iter()
        .map(|(dataset, r)| (dataset.clone(), json!({"passing": r.passing, "total": r.total})))
        .collect::<serde_json::Map<_, _>>()
        .into()
}
