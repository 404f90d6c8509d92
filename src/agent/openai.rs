//! OpenAI-compatible chat completions client.
//!
//! OpenAI, Mistral and Ollama all expose `/chat/completions` with the same
//! request and response shape, so one client serves all three.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agent::http::send_with_retry;
use crate::agent::types::{Message, Usage};
use crate::agent::{AgentError, ChatModel, Completion, Provider};

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Provider the requests go to.
    pub provider: Provider,
    /// Model to use.
    pub model: String,
    /// API key, if the provider needs one.
    pub api_key: Option<String>,
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl ChatConfig {
    /// Creates a config pointing at the provider's public endpoint.
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            base_url: provider.default_base_url().to_string(),
            timeout_secs: 120,
        }
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Overrides the base URL.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        if let Some(url) = base_url {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Chat completions client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    config: ChatConfig,
    client: Client,
}

impl ChatClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: ChatConfig) -> Result<Self, AgentError> {
        if config.provider.api_key_var().is_some() && config.api_key.is_none() {
            return Err(AgentError::Provider(format!(
                "No API key configured for {}. Set {}.",
                config.provider,
                config.provider.api_key_var().unwrap_or_default()
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Provider(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    /// Sends the conversation and returns the first choice.
    ///
    /// With `json` set, the provider is asked for a JSON object response.
    async fn complete(&self, messages: &[Message], json: bool) -> Result<Completion, AgentError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: 0.0,
            response_format: json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let endpoint = self.endpoint();
        let body = send_with_retry(self.config.provider, &endpoint, || {
            let builder = self.client.post(&endpoint).json(&request);
            match &self.config.api_key {
                Some(key) => builder.bearer_auth(key),
                None => builder,
            }
        })
        .await?;
        parse_completion(&body)
    }
}

fn parse_completion(body: &str) -> Result<Completion, AgentError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::Parse(format!("Failed to parse response: {e}")))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AgentError::Parse("Response contained no choices".to_string()))?;

    let usage = response
        .usage
        .map(|u| {
            Usage::tokens(
                u.prompt_tokens,
                u.completion_tokens,
                u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            )
        })
        .unwrap_or_default();

    Ok(Completion { content, usage })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}
