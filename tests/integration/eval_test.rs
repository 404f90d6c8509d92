//! Evaluation loop tests over mock agents and databases.

use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;

use sqleval::agent::{MockAgent, Usage};
use sqleval::config::{Config, Pricing};
use sqleval::db::{MockConnector, MockDatabaseClient};
use sqleval::eval::{
    CaseStatus, EvalRunner, Task, DETAILS_FILE, ERROR_FILE, MESSAGES_FILE, QUERY_FILE,
    TABLES_FILE,
};

use super::common::{ints, result_set, texts, Datasets};

/// Five cases on `spider_concert`, one per terminal status plus an agent failure.
fn concert_fixture(datasets: &Datasets) {
    datasets.add_case(
        "spider",
        "001_names",
        "concert",
        "List singer names",
        "SELECT name FROM singer",
    );
    datasets.add_case(
        "spider",
        "002_count",
        "concert",
        "How many concerts are there?",
        "SELECT count(*) FROM concert",
    );
    datasets.add_case(
        "spider",
        "003_broken",
        "concert",
        "Broken fixture",
        "SELECT * FROM missing",
    );
    datasets.add_case(
        "spider",
        "004_bad_sql",
        "concert",
        "Bad column",
        "SELECT name FROM singer",
    );
    datasets.add_case(
        "spider",
        "005_agent_down",
        "concert",
        "Agent explodes",
        "SELECT name FROM singer",
    );
}

fn concert_database() -> MockDatabaseClient {
    MockDatabaseClient::new()
        .with_result(
            "SELECT name FROM singer",
            result_set(vec![("name", texts(&["Joe", "Ann"]))]),
        )
        // Renamed, reordered and with an extra column.
        .with_result(
            "SELECT 1 AS extra, name AS singer FROM singer ORDER BY name",
            result_set(vec![("extra", ints(&[1, 1])), ("singer", texts(&["Ann", "Joe"]))]),
        )
        .with_result(
            "SELECT count(*) FROM concert",
            result_set(vec![("count", ints(&[3]))]),
        )
        .with_result(
            "SELECT count(*) FROM stadium",
            result_set(vec![("count", ints(&[5]))]),
        )
        .with_error(
            "SELECT * FROM missing",
            "ERROR: relation \"missing\" does not exist",
        )
        .with_error(
            "SELECT bogus FROM singer",
            "ERROR: column \"bogus\" does not exist",
        )
}

fn concert_agent() -> MockAgent {
    MockAgent::new()
        .with_answer(
            "singer names",
            "SELECT 1 AS extra, name AS singer FROM singer ORDER BY name",
        )
        .with_answer("how many concerts", "SELECT count(*) FROM stadium")
        .with_answer("bad column", "SELECT bogus FROM singer")
        .with_failure("explodes", "provider returned 500")
}

fn runner(config: &Config, task: Task, agent: MockAgent, connector: MockConnector) -> EvalRunner {
    EvalRunner::new(config, task, Arc::new(agent), Arc::new(connector))
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_statuses_and_totals() {
    let datasets = Datasets::new();
    concert_fixture(&datasets);
    let connector = MockConnector::new().with_database("spider_concert", concert_database());

    let results = runner(&datasets.config(), Task::TextToSql, concert_agent(), connector)
        .run_dataset("spider")
        .await
        .unwrap();

    // The broken fixture is listed apart and not counted.
    assert_eq!(results.total, 4);
    assert_eq!(results.expected_errors, vec!["003_broken".to_string()]);
    assert_eq!(results.passing, 1);
    assert_eq!(results.failed, vec!["002_count".to_string()]);
    assert_eq!(
        results.errored,
        vec!["004_bad_sql".to_string(), "005_agent_down".to_string()]
    );
    assert_eq!(
        results.failed_error_counts,
        BTreeMap::from([
            ("AgentFnError".to_string(), 1),
            ("QueryExecutionError".to_string(), 1),
        ])
    );

    let statuses: Vec<(&str, CaseStatus)> = results
        .evals
        .iter()
        .map(|e| (e.name.as_str(), e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("001_names", CaseStatus::Pass),
            ("002_count", CaseStatus::Fail),
            ("003_broken", CaseStatus::ExpectedError),
            ("004_bad_sql", CaseStatus::Error),
            ("005_agent_down", CaseStatus::Error),
        ]
    );
}

#[tokio::test]
async fn test_case_artifacts() {
    let datasets = Datasets::new();
    concert_fixture(&datasets);
    let connector = MockConnector::new().with_database("spider_concert", concert_database());
    let evals = datasets.root().join("spider").join("evals");

    // A stale artifact from an earlier run is cleared.
    std::fs::write(evals.join("001_names").join(ERROR_FILE), "stale").unwrap();

    runner(&datasets.config(), Task::TextToSql, concert_agent(), connector)
        .run_dataset("spider")
        .await
        .unwrap();

    let passed = evals.join("001_names");
    assert_eq!(
        std::fs::read_to_string(passed.join(QUERY_FILE)).unwrap(),
        "SELECT 1 AS extra, name AS singer FROM singer ORDER BY name"
    );
    assert!(std::fs::read_to_string(passed.join(MESSAGES_FILE))
        .unwrap()
        .starts_with("user:\nList singer names\nassistant:\n"));
    assert!(!passed.join(ERROR_FILE).exists());
    assert_eq!(read_json(&passed.join(DETAILS_FILE))["status"], "pass");

    let errored = evals.join("004_bad_sql");
    let error = std::fs::read_to_string(errored.join(ERROR_FILE)).unwrap();
    assert!(error.starts_with("QueryExecutionError\n\n"));
    assert!(error.contains("column \"bogus\" does not exist"));
    let details = read_json(&errored.join(DETAILS_FILE));
    assert_eq!(details["status"], "error");
    assert_eq!(details["details"]["exception_class"], "QueryExecutionError");

    // The agent never answered, so there is no query to keep.
    let agent_down = evals.join("005_agent_down");
    assert!(!agent_down.join(QUERY_FILE).exists());
    assert!(std::fs::read_to_string(agent_down.join(ERROR_FILE))
        .unwrap()
        .starts_with("AgentFnError\n\n"));

    let broken = evals.join("003_broken");
    assert_eq!(read_json(&broken.join(DETAILS_FILE))["status"], "expected_error");
    assert!(!broken.join(ERROR_FILE).exists());
}

#[tokio::test]
async fn test_concurrency_keeps_results_stable() {
    let datasets = Datasets::new();
    concert_fixture(&datasets);

    let mut sequential_config = datasets.config();
    sequential_config.run.concurrency = 1;
    let mut parallel_config = datasets.config();
    parallel_config.run.concurrency = 4;

    let connector = MockConnector::new().with_database("spider_concert", concert_database());
    let sequential = runner(
        &sequential_config,
        Task::TextToSql,
        concert_agent(),
        connector.clone(),
    )
    .run_dataset("spider")
    .await
    .unwrap();
    let parallel = runner(&parallel_config, Task::TextToSql, concert_agent(), connector)
        .run_dataset("spider")
        .await
        .unwrap();

    assert_eq!(sequential.passing, parallel.passing);
    assert_eq!(sequential.total, parallel.total);
    assert_eq!(sequential.failed, parallel.failed);
    assert_eq!(sequential.errored, parallel.errored);
    assert_eq!(sequential.failed_error_counts, parallel.failed_error_counts);
    assert_eq!(sequential.expected_errors, parallel.expected_errors);
}

#[tokio::test]
async fn test_malformed_fixture_does_not_abort_run() {
    let datasets = Datasets::new();
    datasets.add_case(
        "spider",
        "001_ok",
        "concert",
        "List singer names",
        "SELECT name FROM singer",
    );
    let bad = datasets.root().join("spider").join("evals").join("002_bad");
    std::fs::create_dir_all(&bad).unwrap();
    std::fs::write(bad.join("eval.json"), "{not json").unwrap();
    datasets.add_case(
        "bird",
        "001",
        "concert",
        "List singer names",
        "SELECT name FROM singer",
    );
    // A dataset directory without evals is skipped.
    std::fs::create_dir_all(datasets.root().join("notes")).unwrap();

    let connector = MockConnector::new()
        .with_database("spider_concert", concert_database())
        .with_database("bird_concert", concert_database());
    let run = runner(&datasets.config(), Task::TextToSql, concert_agent(), connector)
        .run(&["bird".to_string(), "notes".to_string(), "spider".to_string()])
        .await
        .unwrap();

    assert_eq!(run.results.keys().collect::<Vec<_>>(), vec!["bird", "spider"]);
    let spider = &run.results["spider"];
    assert_eq!((spider.passing, spider.total), (1, 1));
    assert_eq!(spider.expected_errors, vec!["002_bad".to_string()]);

    let statuses: Vec<(&str, CaseStatus)> = spider
        .evals
        .iter()
        .map(|e| (e.name.as_str(), e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("001_ok", CaseStatus::Pass),
            ("002_bad", CaseStatus::ExpectedError),
        ]
    );
    assert_eq!(
        spider.evals[1].details.exception_class.as_deref(),
        Some("GetExpectedError")
    );

    let details = read_json(&bad.join(DETAILS_FILE));
    assert_eq!(details["status"], "expected_error");
    assert!(!bad.join(ERROR_FILE).exists());
    assert_eq!(run.totals().total, 2);
}

#[tokio::test]
async fn test_missing_database_is_an_error() {
    let datasets = Datasets::new();
    datasets.add_case("bird", "001", "retail", "Anything", "SELECT 1");

    let results = runner(
        &datasets.config(),
        Task::TextToSql,
        MockAgent::new(),
        MockConnector::new(),
    )
    .run_dataset("bird")
    .await
    .unwrap();

    assert_eq!(results.total, 1);
    assert_eq!(results.errored, vec!["001".to_string()]);
    assert_eq!(
        results.failed_error_counts,
        BTreeMap::from([("ConnectionError".to_string(), 1)])
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_agent_is_retried() {
    let datasets = Datasets::new();
    datasets.add_case("spider", "001", "concert", "List singer names", "SELECT name FROM singer");
    let connector = MockConnector::new().with_database("spider_concert", concert_database());
    let agent = concert_agent().with_rate_limits(2);

    let results = runner(&datasets.config(), Task::TextToSql, agent.clone(), connector)
        .run_dataset("spider")
        .await
        .unwrap();

    assert_eq!(results.passing, 1);
    assert_eq!(agent.calls(), 3);
}

#[tokio::test]
async fn test_rate_limit_retries_are_bounded() {
    let datasets = Datasets::new();
    datasets.add_case("spider", "001", "concert", "List singer names", "SELECT name FROM singer");
    let connector = MockConnector::new().with_database("spider_concert", concert_database());
    let agent = concert_agent().with_rate_limits(1);
    let mut config = datasets.config();
    config.run.max_retries = Some(0);

    let results = runner(&config, Task::TextToSql, agent.clone(), connector)
        .run_dataset("spider")
        .await
        .unwrap();

    assert_eq!(results.passing, 0);
    assert_eq!(results.errored, vec!["001".to_string()]);
    assert_eq!(
        results.failed_error_counts,
        BTreeMap::from([("AgentFnError".to_string(), 1)])
    );
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn test_usage_is_priced_and_summed() {
    let datasets = Datasets::new();
    datasets.add_case("spider", "001", "concert", "List singer names", "SELECT name FROM singer");
    datasets.add_case("spider", "002", "concert", "Bad column", "SELECT name FROM singer");
    let connector = MockConnector::new().with_database("spider_concert", concert_database());
    let agent = concert_agent().with_usage(Usage::tokens(1_000_000, 500_000, 250_000));

    let mut config = datasets.config();
    config.pricing.insert(
        "openai:gpt-4.1-nano".to_string(),
        Pricing {
            request: 2.0,
            cached: 1.0,
            response: 4.0,
        },
    );

    let results = runner(&config, Task::TextToSql, agent, connector)
        .run_dataset("spider")
        .await
        .unwrap();

    // Errored cases still count their usage.
    assert_eq!(results.usage.request_tokens, 2_000_000);
    assert_eq!(results.usage.cached_tokens, 500_000);
    assert_eq!(results.usage.response_tokens, 1_000_000);
    assert!((results.usage.request_tokens_cost - 3.0).abs() < 1e-9);
    assert!((results.usage.cached_tokens_cost - 0.5).abs() < 1e-9);
    assert!((results.usage.response_tokens_cost - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_strict_mode_rejects_extra_columns() {
    let datasets = Datasets::new();
    datasets.add_case("spider", "001", "concert", "List singer names", "SELECT name FROM singer");
    let connector = MockConnector::new().with_database("spider_concert", concert_database());
    let mut config = datasets.config();
    config.run.strict = true;

    let results = runner(&config, Task::TextToSql, concert_agent(), connector)
        .run_dataset("spider")
        .await
        .unwrap();

    assert_eq!(results.passing, 0);
    assert_eq!(results.failed, vec!["001".to_string()]);
}

#[tokio::test]
async fn test_get_tables_task() {
    let datasets = Datasets::new();
    let golden = "SELECT s.name FROM singer s JOIN concert c ON s.id = c.singer_id";
    datasets.add_case("spider", "001_both", "concert", "Who sang where", golden);
    datasets.add_case("spider", "002_one", "concert", "Who sang at all", golden);
    datasets.add_case("spider", "003_unparsable", "concert", "Broken", "SELEC oops");

    let agent = MockAgent::new()
        .with_answer("sang where", "SELECT name FROM Singer JOIN concert ON true")
        .with_answer("sang at all", "SELECT name FROM singer");
    let connector = MockConnector::new().with_database("spider_concert", MockDatabaseClient::new());

    let results = runner(&datasets.config(), Task::GetTables, agent, connector)
        .run_dataset("spider")
        .await
        .unwrap();

    assert_eq!(results.total, 2);
    assert_eq!(results.passing, 1);
    assert_eq!(results.failed, vec!["002_one".to_string()]);

    let passed = &results.evals[0].details;
    assert_eq!(
        passed.expected_tables,
        Some(vec!["concert".to_string(), "singer".to_string()])
    );
    assert_eq!(passed.actual_tables, passed.expected_tables);

    let tables_file = datasets
        .root()
        .join("spider/evals/001_both")
        .join(TABLES_FILE);
    assert_eq!(read_json(&tables_file), serde_json::json!(["concert", "singer"]));
}

#[tokio::test]
async fn test_filters_and_fast_sampling() {
    let datasets = Datasets::new();
    for i in 0..60 {
        let database = if i % 2 == 0 { "concert" } else { "pets" };
        datasets.add_case(
            "spider",
            &format!("{i:03}"),
            database,
            "List singer names",
            "SELECT name FROM singer",
        );
    }
    let connector = MockConnector::new()
        .with_database("spider_concert", concert_database())
        .with_database("spider_pets", concert_database());

    let by_database = runner(
        &datasets.config(),
        Task::TextToSql,
        concert_agent(),
        connector.clone(),
    )
    .with_filter(Some("pets".to_string()), None)
    .run_dataset("spider")
    .await
    .unwrap();
    assert_eq!(by_database.total, 30);
    assert!(by_database.evals.iter().all(|e| e.database == "pets"));

    let single = runner(
        &datasets.config(),
        Task::TextToSql,
        concert_agent(),
        connector.clone(),
    )
    .with_filter(None, Some("007".to_string()))
    .run_dataset("spider")
    .await
    .unwrap();
    assert_eq!(single.total, 1);
    assert_eq!(single.evals[0].name, "007");

    let mut config = datasets.config();
    config.run.fast = true;
    let sampled = runner(&config, Task::TextToSql, concert_agent(), connector)
        .run_dataset("spider")
        .await
        .unwrap();
    assert_eq!(sampled.total, 50);
    assert_eq!(sampled.evals.first().unwrap().name, "000");
    assert_eq!(sampled.evals.last().unwrap().name, "059");
}

#[tokio::test]
async fn test_run_records_details() {
    let datasets = Datasets::new();
    concert_fixture(&datasets);
    datasets.add_case("bird", "001", "concert", "List singer names", "SELECT name FROM singer");
    let connector = MockConnector::new()
        .with_database("spider_concert", concert_database())
        .with_database("bird_concert", concert_database());

    let config = datasets.config();
    let runner = runner(&config, Task::TextToSql, concert_agent(), connector);
    let datasets_found = runner.store().datasets().unwrap();
    assert_eq!(datasets_found, vec!["bird".to_string(), "spider".to_string()]);

    let run = runner.run(&datasets_found).await.unwrap();

    assert_eq!(run.task, "text_to_sql");
    assert_eq!(run.details.agent.name, "mock");
    assert_eq!(run.details.provider, "openai");
    assert_eq!(run.details.model, "gpt-4.1-nano");
    assert!(run.started_at.unwrap() <= run.finished_at.unwrap());

    let totals = run.totals();
    assert_eq!(totals.passing, 2);
    assert_eq!(totals.total, 5);
}
