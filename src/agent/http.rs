//! Request loop shared by the chat clients.
//!
//! Transport failures and 5xx responses are retried here with exponential
//! backoff. Rate limiting is reported as `AgentError::RateLimited` at once and
//! left to the retry controller.

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::{AgentError, Provider};

/// Maximum number of attempts for transient transport errors.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Sends the request produced by `build` and returns the body of the first
/// successful response.
pub(crate) async fn send_with_retry<F>(
    provider: Provider,
    endpoint: &str,
    build: F,
) -> Result<String, AgentError>
where
    F: Fn() -> RequestBuilder,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut attempt = 1;

    loop {
        debug!(
            "{} request attempt {} of {}",
            provider, attempt, MAX_RETRY_ATTEMPTS
        );

        let (error, retryable) = match build().send().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| AgentError::Provider(format!("Failed to read response: {e}")))?;

                if status.is_success() {
                    return Ok(body);
                }
                parse_error(provider, status, &body)
            }
            Err(e) => {
                let retryable = e.is_timeout() || e.is_connect();
                let error = if e.is_timeout() {
                    AgentError::Provider("Request timed out.".to_string())
                } else if e.is_connect() {
                    AgentError::Provider(format!(
                        "Failed to connect to {endpoint}. Check your network."
                    ))
                } else {
                    AgentError::Provider(format!("Request failed: {e}"))
                };
                (error, retryable)
            }
        };

        if !retryable || attempt >= MAX_RETRY_ATTEMPTS {
            return Err(error);
        }

        warn!(
            "{} request failed (attempt {}), retrying in {:?}: {}",
            provider, attempt, delay, error
        );
        tokio::time::sleep(delay).await;
        delay *= 2;
        attempt += 1;
    }
}

/// Maps an error response to an agent error and whether it is worth retrying here.
///
/// 429 is not retried here: it is surfaced as `RateLimited` for the backoff controller.
/// OpenAI-compatible and Anthropic error bodies share the `{"error": {"message"}}` shape.
pub(crate) fn parse_error(
    provider: Provider,
    status: StatusCode,
    body: &str,
) -> (AgentError, bool) {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return (
            AgentError::RateLimited(format!("{provider} status 429: {detail}")),
            false,
        );
    }

    if status == StatusCode::UNAUTHORIZED {
        return (
            AgentError::Provider(format!(
                "Authentication failed for {provider}. Check your API key."
            )),
            false,
        );
    }

    (
        AgentError::Provider(format!("{provider} API error ({status}): {detail}")),
        status.is_server_error(),
    )
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
