//! Agent backed by a SQL function installed in the target database.
//!
//! The function takes the question and a `provider:model` string and returns
//! the generated SQL as text. Provider rate limits surface as database errors
//! mentioning status 429.

use async_trait::async_trait;

use crate::agent::{AgentError, AgentRequest, AgentResponse, Message, SqlAgent, Usage};
use crate::db::{DatabaseClient, Value};
use crate::error::{EvalError, Result};

/// Calls `<function>(question, model)` in the target database.
#[derive(Debug, Clone)]
pub struct ExtensionAgent {
    function: String,
}

impl ExtensionAgent {
    /// Creates an agent calling the given, optionally schema-qualified, function.
    pub fn new(function: &str) -> Result<Self> {
        let valid = !function.is_empty()
            && function.split('.').all(|part| {
                let mut chars = part.chars();
                matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if !valid {
            return Err(EvalError::config(format!(
                "Invalid extension function name: {function}"
            )));
        }
        Ok(Self {
            function: function.to_string(),
        })
    }

    fn call_sql(&self, request: &AgentRequest) -> String {
        format!(
            "SELECT {}({}, {})",
            self.function,
            quote_literal(&request.question),
            quote_literal(&format!("{}:{}", request.provider, request.model))
        )
    }
}

/// Quotes a string as a standard SQL literal.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("rate limit")
}

#[async_trait]
impl SqlAgent for ExtensionAgent {
    fn name(&self) -> &str {
        "extension"
    }

    async fn generate_sql(
        &self,
        db: &dyn DatabaseClient,
        request: &AgentRequest,
    ) -> std::result::Result<AgentResponse, AgentError> {
        let result = db.execute_query(&self.call_sql(request)).await.map_err(|e| {
            let message = e.to_string();
            if is_rate_limit_message(&message) {
                AgentError::RateLimited(message)
            } else {
                AgentError::Database(e)
            }
        })?;

        let query = match result.rows.first().and_then(|row| row.first()) {
            Some(Value::String(sql)) if !sql.trim().is_empty() => sql.trim().to_string(),
            other => {
                return Err(AgentError::Parse(format!(
                    "{} returned no SQL (got {:?})",
                    self.function, other
                )))
            }
        };

        Ok(AgentResponse {
            messages: vec![
                Message::user(request.question.clone()),
                Message::assistant(query.clone()),
            ],
            query,
            usage: Usage::default(),
        })
    }
}
