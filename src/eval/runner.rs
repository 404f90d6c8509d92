//! Evaluation loop.
//!
//! Cases of a dataset run on a bounded pool (`concurrency`, default 1). Each
//! case opens its own target connection and writes only its own artifacts.
//! Outcomes are reduced in case-name order once the whole dataset finished,
//! so totals do not depend on completion order.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{AgentRequest, ContextMode, Provider, SqlAgent};
use crate::compare::{compare, compare_tables, normalize_tables, referenced_tables};
use crate::config::{Config, Pricing};
use crate::db::{Connector, DatabaseClient};
use crate::error::{CaseError, EvalError, Result};
use crate::eval::{
    Artifacts, BrokenFixture, CaseFilter, CaseStatus, CaseStore, EvalCase, EvalDetails,
    EvalResult,
};
use crate::report::{
    write_dataset_summary, AgentInfo, DatasetResults, RunDetails, RunResults,
};
use crate::retry::{with_rate_limit_retry, BackoffSchedule, RetryPolicy};

/// What a case is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Result-set equivalence of generated and golden SQL.
    TextToSql,
    /// Tables named by the agent against tables read by the golden SQL.
    GetTables,
}

impl Task {
    /// Returns the task as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToSql => "text_to_sql",
            Self::GetTables => "get_tables",
        }
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text_to_sql" => Ok(Self::TextToSql),
            "get_tables" => Ok(Self::GetTables),
            _ => Err(format!("Invalid task: {s}")),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings fixed for the whole run.
#[derive(Debug, Clone)]
struct RunSettings {
    provider: Provider,
    model: String,
    context_mode: ContextMode,
    strict: bool,
    fast: bool,
    concurrency: usize,
    schedule: BackoffSchedule,
    policy: RetryPolicy,
    pricing: Pricing,
}

/// Runs cases through an agent and scores them.
pub struct EvalRunner {
    task: Task,
    agent: Arc<dyn SqlAgent>,
    connector: Arc<dyn Connector>,
    store: CaseStore,
    filter: CaseFilter,
    settings: RunSettings,
}

impl EvalRunner {
    /// Creates a runner over the configured datasets directory.
    pub fn new(
        config: &Config,
        task: Task,
        agent: Arc<dyn SqlAgent>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let run = &config.run;
        let provider = config.agent.provider;
        Self {
            task,
            agent,
            connector,
            store: CaseStore::new(&run.datasets_dir),
            filter: CaseFilter {
                sample_size: run.fast.then_some(run.sample_size),
                ..CaseFilter::default()
            },
            settings: RunSettings {
                provider,
                model: config.agent.model.clone(),
                context_mode: run.context_mode,
                strict: run.strict,
                fast: run.fast,
                concurrency: run.concurrency.max(1),
                schedule: BackoffSchedule::for_provider(provider),
                policy: RetryPolicy {
                    max_retries: run.max_retries,
                    deadline: run.retry_deadline(),
                },
                pricing: config.pricing_for(provider, &config.agent.model),
            },
        }
    }

    /// Restricts the run to one database and/or one case.
    pub fn with_filter(mut self, database: Option<String>, eval: Option<String>) -> Self {
        self.filter.database = database;
        self.filter.eval = eval;
        self
    }

    /// The case store this runner reads from.
    pub fn store(&self) -> &CaseStore {
        &self.store
    }

    fn details(&self) -> RunDetails {
        RunDetails {
            agent: AgentInfo {
                name: self.agent.name().to_string(),
                version: self.agent.version(),
            },
            provider: self.settings.provider.to_string(),
            model: self.settings.model.clone(),
            fast: self.settings.fast,
            context_mode: self.settings.context_mode,
            strict: self.settings.strict,
        }
    }

    /// Evaluates the given datasets in order.
    pub async fn run(&self, datasets: &[String]) -> Result<RunResults> {
        let mut run = RunResults {
            task: self.task.to_string(),
            details: self.details(),
            started_at: Some(Utc::now()),
            ..RunResults::default()
        };

        for dataset in datasets {
            if !self.store.has_evals(dataset) {
                warn!("Skipping {}: no evals directory", dataset);
                continue;
            }
            if !run.results.is_empty() {
                println!();
            }
            let results = self.run_dataset(dataset).await?;
            run.results.insert(dataset.clone(), results);
        }

        run.finished_at = Some(Utc::now());
        Ok(run)
    }

    /// Evaluates every selected case of one dataset.
    pub async fn run_dataset(&self, dataset: &str) -> Result<DatasetResults> {
        let listing = self.store.cases(dataset, &self.filter)?;
        println!("Evaluating {dataset} ({} evals)...", listing.len());
        info!(
            "Evaluating {} cases of {} with concurrency {}",
            listing.len(),
            dataset,
            self.settings.concurrency
        );

        let mut outcomes = Vec::with_capacity(listing.len());
        for broken in &listing.broken {
            outcomes.push(self.record_broken(broken)?);
        }
        // `buffered` yields in input order, which is case-name order.
        let scored: Vec<Result<EvalResult>> = stream::iter(&listing.cases)
            .map(|case| self.run_case(case))
            .buffered(self.settings.concurrency)
            .collect()
            .await;
        for outcome in scored {
            outcomes.push(outcome?);
        }
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut results = DatasetResults::default();
        for outcome in outcomes {
            results.record(outcome)?;
        }

        write_dataset_summary(&mut io::stdout().lock(), &results)
            .map_err(|e| EvalError::io(format!("Failed to print summary: {e}")))?;
        Ok(results)
    }

    /// Runs one case to a terminal status and persists its artifacts.
    pub async fn run_case(&self, case: &EvalCase) -> Result<EvalResult> {
        let status = CaseStatus::Pending.advance(CaseStatus::Running)?;
        debug!("{}/{} is {}", case.dataset, case.name, status);

        let artifacts = Artifacts::new(&case.dir);
        if let Err(e) = artifacts.clear() {
            warn!("{}", e);
        }

        let start = Instant::now();
        let mut details = EvalDetails {
            question: case.question.clone(),
            golden_query: Some(case.golden_query.clone()),
            ..EvalDetails::default()
        };

        let verdict = match self.connector.connect(&case.target_database()).await {
            Ok(db) => {
                let verdict = match self.task {
                    Task::TextToSql => {
                        self.score_query(db.as_ref(), case, &artifacts, &mut details)
                            .await
                    }
                    Task::GetTables => {
                        self.score_tables(db.as_ref(), case, &artifacts, &mut details)
                            .await
                    }
                };
                if let Err(e) = db.close().await {
                    warn!("Failed to close connection for {}: {}", case.name, e);
                }
                verdict
            }
            Err(e) => Err(CaseError::other(&e)),
        };

        let status = status.advance(CaseStatus::classify(&verdict))?;
        if let Err(error) = &verdict {
            details.set_error(error);
            if status == CaseStatus::Error {
                if let Err(e) = artifacts.write_error(error) {
                    warn!("{}", e);
                }
            }
        }

        let result = EvalResult {
            status,
            dataset: case.dataset.clone(),
            database: case.database.clone(),
            name: case.name.clone(),
            question: case.question.clone(),
            duration: (start.elapsed().as_secs_f64() * 1000.0).round() / 1000.0,
            details,
        };
        if let Err(e) = artifacts.write_details(&result) {
            warn!("{}", e);
        }

        match &verdict {
            Err(error) if status == CaseStatus::Error => println!(
                "  {}: {} ({}: {})",
                case.name,
                status.as_str().to_uppercase(),
                error.class_name(),
                error
            ),
            _ => println!("  {}: {}", case.name, status.as_str().to_uppercase()),
        }

        Ok(result)
    }

    /// Terminates a case whose fixture failed to load as `expected_error`.
    fn record_broken(&self, broken: &BrokenFixture) -> Result<EvalResult> {
        let status = CaseStatus::Pending.advance(CaseStatus::Running)?;
        let error = CaseError::get_expected(&broken.error);
        let status = status.advance(CaseStatus::classify(&Err(error.clone())))?;
        warn!("{}/{}: {}", broken.dataset, broken.name, broken.error);

        let mut details = EvalDetails::default();
        details.set_error(&error);
        let result = EvalResult {
            status,
            dataset: broken.dataset.clone(),
            database: String::new(),
            name: broken.name.clone(),
            question: String::new(),
            duration: 0.0,
            details,
        };

        let artifacts = Artifacts::new(&broken.dir);
        if let Err(e) = artifacts.clear().and_then(|()| artifacts.write_details(&result)) {
            warn!("{}", e);
        }
        println!("  {}: {}", broken.name, status.as_str().to_uppercase());
        Ok(result)
    }

    fn request(&self, case: &EvalCase) -> AgentRequest {
        let gold_tables = match &case.gold_tables {
            Some(tables) => tables.clone(),
            None => referenced_tables(&case.golden_query)
                .map(|tables| tables.into_iter().collect())
                .unwrap_or_default(),
        };
        AgentRequest {
            question: case.question.clone(),
            provider: self.settings.provider,
            model: self.settings.model.clone(),
            context_mode: self.settings.context_mode,
            gold_tables,
        }
    }

    async fn score_query(
        &self,
        db: &dyn DatabaseClient,
        case: &EvalCase,
        artifacts: &Artifacts,
        details: &mut EvalDetails,
    ) -> std::result::Result<bool, CaseError> {
        let request = self.request(case);
        let response = with_rate_limit_retry(self.settings.schedule, self.settings.policy, || {
            self.agent.generate_sql(db, &request)
        })
        .await
        .map_err(|e| CaseError::agent_fn(&e))?;

        details.query = Some(response.query.clone());
        details.usage = Some(response.usage.priced(&self.settings.pricing));
        artifacts
            .write_generation(&response.query, &response.messages)
            .map_err(|e| CaseError::other(&e))?;

        let expected = db
            .execute_query(&case.golden_query)
            .await
            .map_err(|e| CaseError::get_expected(&e))?;
        let actual = db
            .execute_query(&response.query)
            .await
            .map_err(|e| CaseError::query_execution(&e))?;

        Ok(compare(&actual, &expected, self.settings.strict))
    }

    async fn score_tables(
        &self,
        db: &dyn DatabaseClient,
        case: &EvalCase,
        artifacts: &Artifacts,
        details: &mut EvalDetails,
    ) -> std::result::Result<bool, CaseError> {
        let expected =
            referenced_tables(&case.golden_query).map_err(|e| CaseError::get_expected(&e))?;
        details.expected_tables = Some(expected.iter().cloned().collect());

        let request = self.request(case);
        let response = with_rate_limit_retry(self.settings.schedule, self.settings.policy, || {
            self.agent.identify_tables(db, &request)
        })
        .await
        .map_err(|e| CaseError::agent_fn(&e))?;

        let actual = normalize_tables(&response.tables);
        details.actual_tables = Some(actual.iter().cloned().collect());
        details.usage = Some(response.usage.priced(&self.settings.pricing));
        artifacts
            .write_tables(&response.tables)
            .and_then(|()| artifacts.write_transcript(&response.messages))
            .map_err(|e| CaseError::other(&e))?;

        Ok(compare_tables(&actual, &expected, self.settings.strict))
    }
}
