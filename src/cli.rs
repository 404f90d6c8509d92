//! Command-line argument parsing for sqleval.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use sqleval::agent::{AgentKind, ContextMode, ModelSpec};
use sqleval::config::Config;
use sqleval::eval::Task;

/// Scores AI-generated SQL against golden queries.
#[derive(Parser, Debug)]
#[command(name = "sqleval")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate an agent against the datasets
    Eval(EvalArgs),

    /// Combine the results directory, print it and optionally persist it
    Report,

    /// Print the dataset/database matrix as JSON
    Matrix {
        /// Comma-separated `{dataset}_{database}` prefixes to keep
        #[arg(long, value_name = "PREFIXES")]
        filter: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Agent implementation: baseline, extension,
    /// or mock (a scripted dry run with no model calls)
    #[arg(value_name = "AGENT")]
    pub agent: AgentKind,

    /// Task to score (text_to_sql, get_tables)
    #[arg(value_name = "TASK")]
    pub task: Task,

    /// Model as provider:model (openai, anthropic, mistral, ollama); a bare name means openai
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<ModelSpec>,

    /// Only evaluate this dataset
    #[arg(long, value_name = "DATASET")]
    pub dataset: Option<String>,

    /// Only evaluate cases on this database
    #[arg(long, value_name = "DATABASE")]
    pub database: Option<String>,

    /// Only evaluate the case with this name
    #[arg(long, value_name = "NAME")]
    pub eval: Option<String>,

    /// Evaluate an evenly spaced sample of each dataset
    #[arg(long)]
    pub fast: bool,

    /// Give the agent the whole schema
    #[arg(long, conflicts_with = "gold_tables")]
    pub entire_schema: bool,

    /// Give the agent only the case's gold tables
    #[arg(long)]
    pub gold_tables: bool,

    /// Require exact column correspondence
    #[arg(long)]
    pub strict: bool,

    /// Number of cases evaluated at once
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Give up after this many rate-limit retries
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

impl EvalArgs {
    /// Returns the context mode selected by the flags, if any.
    pub fn context_mode(&self) -> Option<ContextMode> {
        if self.entire_schema {
            Some(ContextMode::EntireSchema)
        } else if self.gold_tables {
            Some(ContextMode::GoldTables)
        } else {
            None
        }
    }

    /// Overlays the flags on the file configuration.
    pub fn apply_to(&self, config: &mut Config) {
        config.agent.kind = self.agent;
        if let Some(spec) = &self.model {
            config.agent.provider = spec.provider;
            config.agent.model = spec.model.clone();
        }
        if let Some(mode) = self.context_mode() {
            config.run.context_mode = mode;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if self.max_retries.is_some() {
            config.run.max_retries = self.max_retries;
        }
        config.run.fast |= self.fast;
        config.run.strict |= self.strict;
    }
}
