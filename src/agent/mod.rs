//! SQL-generating agents.
//!
//! An agent turns a natural-language question into SQL for one target
//! database. Every implementation sits behind the `SqlAgent` trait and is
//! selected by `AgentKind`, so the evaluation loop never knows which one runs.

mod anthropic;
mod baseline;
mod extension;
mod http;
mod mock;
mod openai;
mod parser;
mod prompt;
mod types;

pub use anthropic::AnthropicClient;
pub use baseline::BaselineAgent;
pub use extension::ExtensionAgent;
pub use mock::MockAgent;
pub use openai::{ChatClient, ChatConfig};
pub use parser::{extract_query, extract_tables};
pub use types::{format_transcript, Message, Role, Usage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::compare::referenced_tables;
use crate::config::Config;
use crate::db::DatabaseClient;
use crate::error::{EvalError, Result};

/// Failure of an agent call.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The provider rejected the call with a rate limit (HTTP 429).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The provider failed or could not be reached.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The model answered, but no usable query could be extracted.
    #[error("Unusable response: {0}")]
    Parse(String),

    /// The agent could not read the target database.
    #[error(transparent)]
    Database(#[from] EvalError),
}

impl AgentError {
    /// Returns true if the call may succeed after waiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Which agent implementation generates SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Schema-in-prompt agent using chat completions.
    #[default]
    Baseline,
    /// Agent implemented as a SQL function installed in the target database.
    Extension,
    /// Scripted agent that needs no model provider, for dry runs and tests.
    Mock,
}

impl AgentKind {
    /// Returns the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Extension => "extension",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "extension" => Ok(Self::Extension),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown agent: {s}")),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
    Mistral,
    Ollama,
}

impl Provider {
    /// Returns the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::Ollama => None,
        }
    }

    /// Public API base URL.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "mistral" => Ok(Self::Mistral),
            "ollama" => Ok(Self::Ollama),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much schema the agent may put in its prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// The agent chooses its own context.
    #[default]
    Default,
    /// The whole schema is always included.
    EntireSchema,
    /// Only the case's gold tables are included.
    GoldTables,
}

/// A `provider:model` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = String;

    /// A bare model name is assumed to be an OpenAI model.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (provider, model) = match s.split_once(':') {
            Some((provider, model)) => (provider.parse()?, model),
            None => (Provider::OpenAi, s),
        };
        if model.trim().is_empty() {
            return Err(format!("Invalid model: {s}"));
        }
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Everything an agent is told about one case.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub question: String,
    pub provider: Provider,
    pub model: String,
    pub context_mode: ContextMode,
    /// Tables the golden query reads, when the fixture lists them.
    pub gold_tables: Vec<String>,
}

/// A generated query with the transcript that produced it.
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub query: String,
    pub messages: Vec<Message>,
    pub usage: Usage,
}

/// Tables an agent believes answer the question.
#[derive(Debug, Clone, Default)]
pub struct TablesResponse {
    pub tables: Vec<String>,
    pub messages: Vec<Message>,
    pub usage: Usage,
}

/// One model answer with its token usage.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Text content of the answer.
    pub content: String,
    /// Unpriced token counts.
    pub usage: Usage,
}

/// A chat model the baseline agent talks to.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends the conversation and returns the model's answer.
    ///
    /// With `json` set, the model is asked to answer with a JSON object.
    async fn complete(
        &self,
        messages: &[Message],
        json: bool,
    ) -> std::result::Result<Completion, AgentError>;
}

/// Capability shared by all agents.
///
/// Calls must be safe to repeat: the retry controller re-issues them after a
/// rate limit.
#[async_trait]
pub trait SqlAgent: Send + Sync {
    /// Agent name recorded in results documents.
    fn name(&self) -> &str;

    /// Agent version recorded in results documents.
    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Generates SQL answering `request.question` against `db`.
    async fn generate_sql(
        &self,
        db: &dyn DatabaseClient,
        request: &AgentRequest,
    ) -> std::result::Result<AgentResponse, AgentError>;

    /// Names the tables needed to answer `request.question`.
    ///
    /// Defaults to the tables referenced by the generated query.
    async fn identify_tables(
        &self,
        db: &dyn DatabaseClient,
        request: &AgentRequest,
    ) -> std::result::Result<TablesResponse, AgentError> {
        let response = self.generate_sql(db, request).await?;
        let tables = referenced_tables(&response.query)
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        Ok(TablesResponse {
            tables: tables.into_iter().collect(),
            messages: response.messages,
            usage: response.usage,
        })
    }
}

/// Creates the agent selected by the configuration.
pub fn create_agent(config: &Config) -> Result<Arc<dyn SqlAgent>> {
    let agent = &config.agent;
    match agent.kind {
        AgentKind::Baseline => {
            let chat = ChatConfig::new(agent.provider, agent.model.clone())
                .with_api_key(agent.api_key.clone())
                .with_base_url(agent.base_url.clone())
                .with_timeout(agent.request_timeout_secs);
            let config_error = |e: AgentError| EvalError::config(e.to_string());
            let model: Arc<dyn ChatModel> = match agent.provider {
                Provider::Anthropic => {
                    Arc::new(AnthropicClient::new(chat).map_err(config_error)?)
                }
                _ => Arc::new(ChatClient::new(chat).map_err(config_error)?),
            };
            Ok(Arc::new(BaselineAgent::new(model)))
        }
        AgentKind::Extension => Ok(Arc::new(ExtensionAgent::new(&agent.extension_function)?)),
        AgentKind::Mock => Ok(Arc::new(MockAgent::new())),
    }
}
