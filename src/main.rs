//! sqleval - scores AI-generated SQL against golden queries.

mod cli;

use cli::{Cli, Command, EvalArgs};
use serde_json::json;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info, warn};

use sqleval::agent::create_agent;
use sqleval::config::Config;
use sqleval::db::PostgresConnector;
use sqleval::error::{EvalError, Result};
use sqleval::eval::{CaseStore, EvalRunner};
use sqleval::logging::init_stderr_logging;
use sqleval::report::{combine_results_dir, write_report, ReportStore};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_stderr_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;

    // Command-line flags win over the file; the environment only fills gaps.
    if let Command::Eval(args) = &cli.command {
        args.apply_to(&mut config);
    }
    config.apply_environment();

    match &cli.command {
        Command::Eval(args) => eval(&config, args).await,
        Command::Report => report(&config).await,
        Command::Matrix { filter } => matrix(&config, filter.as_deref()),
    }
}

async fn eval(config: &Config, args: &EvalArgs) -> Result<()> {
    let agent = create_agent(config)?;
    let connector = Arc::new(PostgresConnector::new(
        config.target.clone(),
        config.run.statement_timeout(),
    ));
    info!(
        "Evaluating {} agent with {} on {}",
        agent.name(),
        config.agent.model_key(),
        config.target.display_string("<case database>")
    );

    let runner = EvalRunner::new(config, args.task, agent, connector)
        .with_filter(args.database.clone(), args.eval.clone());
    let datasets = match &args.dataset {
        Some(dataset) => vec![dataset.clone()],
        None => runner.store().datasets()?,
    };

    let results = runner.run(&datasets).await?;

    let path = config.run.results_dir.join("results.json");
    results.save(&path)?;
    info!("Results written to {}", path.display());
    Ok(())
}

async fn report(config: &Config) -> Result<()> {
    let Some(run) = combine_results_dir(&config.run.results_dir)? else {
        println!("No results found in {}", config.run.results_dir.display());
        return Ok(());
    };

    write_report(&mut io::stdout().lock(), &run)
        .map_err(|e| EvalError::io(format!("Failed to print report: {e}")))?;

    // Saving is best effort: the printed report stands on its own.
    match ReportStore::from_config(&config.report).await {
        Ok(Some(store)) => match store.save(&run, &config.report.source).await {
            Ok(id) => println!("\nSaved as run {id}"),
            Err(e) => warn!("{}: {}", e.category(), e),
        },
        Ok(None) => info!("REPORT_POSTGRES_DSN not set, skipping save"),
        Err(e) => warn!("{}: {}", e.category(), e),
    }
    Ok(())
}

fn matrix(config: &Config, filter: Option<&str>) -> Result<()> {
    let entries = CaseStore::new(&config.run.datasets_dir).matrix(filter)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", json!({ "include": entries }))
        .map_err(|e| EvalError::io(format!("Failed to print matrix: {e}")))
}
