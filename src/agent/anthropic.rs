//! Anthropic Messages API client.
//!
//! Anthropic takes the system prompt as a separate field and has no JSON
//! response mode, so a JSON request is expressed as an extra system line.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agent::http::send_with_retry;
use crate::agent::openai::ChatConfig;
use crate::agent::types::{Message, Role, Usage};
use crate::agent::{AgentError, ChatModel, Completion, Provider};

/// Anthropic API version header.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Maximum tokens to generate.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const JSON_INSTRUCTION: &str = "Respond with a single JSON object and nothing else.";

/// Anthropic client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    config: ChatConfig,
    api_key: String,
    client: Client,
}

impl AnthropicClient {
    /// Creates a client; fails without an API key.
    pub fn new(config: ChatConfig) -> Result<Self, AgentError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            AgentError::Provider(format!(
                "No API key configured for {}. Set ANTHROPIC_API_KEY.",
                Provider::Anthropic
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Provider(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.base_url)
    }

    /// Splits off the system prompt and converts the rest to Anthropic turns.
    fn convert_messages(
        messages: &[Message],
        json: bool,
    ) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system: Vec<&str> = Vec::new();
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system.push(&msg.content),
                Role::User | Role::Assistant => converted.push(AnthropicMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                }),
            }
        }
        if json {
            system.push(JSON_INSTRUCTION);
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, converted)
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    async fn complete(&self, messages: &[Message], json: bool) -> Result<Completion, AgentError> {
        let (system, messages) = Self::convert_messages(messages, json);
        let request = AnthropicRequest {
            model: &self.config.model,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            system,
            messages,
        };

        let endpoint = self.endpoint();
        let body = send_with_retry(Provider::Anthropic, &endpoint, || {
            self.client
                .post(&endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request)
        })
        .await?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Completion, AgentError> {
    let response: AnthropicResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::Parse(format!("Failed to parse response: {e}")))?;

    let content = response
        .content
        .into_iter()
        .filter(|block| block.content_type == "text")
        .map(|block| block.text)
        .collect::<String>();
    if content.is_empty() {
        return Err(AgentError::Parse("No text in Anthropic response".to_string()));
    }

    // `input_tokens` excludes cache reads and writes.
    let usage = response
        .usage
        .map(|u| {
            Usage::tokens(
                u.input_tokens + u.cache_creation_input_tokens + u.cache_read_input_tokens,
                u.output_tokens,
                u.cache_read_input_tokens,
            )
        })
        .unwrap_or_default();

    Ok(Completion { content, usage })
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}
