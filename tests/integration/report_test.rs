//! Combining results documents written by separate runs.

use pretty_assertions::assert_eq;
use std::sync::Arc;

use sqleval::agent::MockAgent;
use sqleval::db::{MockConnector, MockDatabaseClient};
use sqleval::eval::{EvalRunner, Task};
use sqleval::report::{combine_results_dir, write_report, ReportStore};

use super::common::{ints, result_set, Datasets};

fn counting_database() -> MockDatabaseClient {
    MockDatabaseClient::new()
        .with_result("SELECT 1", result_set(vec![("one", ints(&[1]))]))
        .with_result("SELECT 2", result_set(vec![("two", ints(&[2]))]))
}

/// Runs `passing` matching cases and `failing` mismatching ones on `dataset`.
async fn run_slice(datasets: &Datasets, dataset: &str, passing: usize, failing: usize, file: &str) {
    for i in 0..passing + failing {
        let golden = if i < passing { "SELECT 1" } else { "SELECT 2" };
        datasets.add_case(dataset, &format!("{file}_{i:02}"), "db", "Anything", golden);
    }
    let connector =
        MockConnector::new().with_database(format!("{dataset}_db"), counting_database());
    let config = datasets.config();
    let runner = EvalRunner::new(
        &config,
        Task::TextToSql,
        Arc::new(MockAgent::new()),
        Arc::new(connector),
    );

    let run = runner.run(&[dataset.to_string()]).await.unwrap();
    run.save(&config.run.results_dir.join(format!("{file}.json")))
        .unwrap();

    // The next slice only sees its own cases.
    std::fs::remove_dir_all(datasets.root().join(dataset)).unwrap();
}

#[tokio::test]
async fn test_combine_slices() {
    let datasets = Datasets::new();
    run_slice(&datasets, "spider", 3, 2, "slice_a").await;
    run_slice(&datasets, "spider", 2, 3, "slice_b").await;
    run_slice(&datasets, "bird", 1, 0, "slice_c").await;
    std::fs::write(datasets.root().join("results").join("partial.json"), "{").unwrap();

    let combined = combine_results_dir(&datasets.root().join("results"))
        .unwrap()
        .unwrap();

    let spider = &combined.results["spider"];
    assert_eq!((spider.passing, spider.total), (5, 10));
    assert_eq!(spider.evals.len(), 10);
    assert_eq!(spider.failed.len(), 5);
    let totals = combined.totals();
    assert_eq!((totals.passing, totals.total), (6, 11));

    let mut out = Vec::new();
    write_report(&mut out, &combined).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Overall: 6/11 (0.55)\n"));
    assert!(text.contains("spider: 5/10 (0.50)"));
}

#[tokio::test]
async fn test_empty_results_dir() {
    let datasets = Datasets::new();
    std::fs::create_dir_all(datasets.root().join("results")).unwrap();

    assert!(combine_results_dir(&datasets.root().join("results"))
        .unwrap()
        .is_none());
    assert!(combine_results_dir(&datasets.root().join("missing")).is_err());
}

// Requires a running PostgreSQL database and skips without DATABASE_URL.
#[tokio::test]
async fn test_save_combined_run() {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let datasets = Datasets::new();
    // No golden query: recorded as expected_error.
    datasets.add_fixture(
        "spider",
        "slice_a_99",
        serde_json::json!({"database": "db", "question": "Anything"}),
    );
    run_slice(&datasets, "spider", 2, 1, "slice_a").await;
    let combined = combine_results_dir(&datasets.root().join("results"))
        .unwrap()
        .unwrap();
    assert_eq!(combined.results["spider"].expected_errors, vec!["slice_a_99"]);

    let store = ReportStore::connect(&url, 2).await.unwrap();
    let first = store.save(&combined, "integration").await.unwrap();
    let second = store.save(&combined, "integration").await.unwrap();
    assert!(second > first);

    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    let statuses: Vec<String> =
        sqlx::query_scalar("SELECT status FROM evals WHERE run_id = $1 ORDER BY name")
            .bind(second)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(statuses, vec!["pass", "pass", "fail", "expected_error"]);
}
