//! Mock agent for testing.
//!
//! Answers are scripted per question substring. A script can also fail, or
//! hit a rate limit a set number of times before answering.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::agent::{AgentError, AgentRequest, AgentResponse, Message, SqlAgent, Usage};
use crate::db::DatabaseClient;

/// Query returned when no script matches.
const DEFAULT_QUERY: &str = "SELECT 1";

#[derive(Debug, Clone)]
enum Script {
    Answer(String),
    Fail(String),
}

/// Mock agent that returns canned queries based on the question.
#[derive(Debug, Clone, Default)]
pub struct MockAgent {
    scripts: Vec<(String, Script)>,
    usage: Usage,
    rate_limits: u32,
    calls: Arc<AtomicU32>,
}

impl MockAgent {
    /// Creates a mock agent that answers `SELECT 1` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `query` when the question contains `pattern` (case-insensitive).
    pub fn with_answer(mut self, pattern: impl Into<String>, query: impl Into<String>) -> Self {
        self.scripts
            .push((pattern.into().to_lowercase(), Script::Answer(query.into())));
        self
    }

    /// Fails when the question contains `pattern`.
    pub fn with_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.scripts
            .push((pattern.into().to_lowercase(), Script::Fail(message.into())));
        self
    }

    /// Reports `usage` with every answer.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Rate-limits the first `count` calls.
    pub fn with_rate_limits(mut self, count: u32) -> Self {
        self.rate_limits = count;
        self
    }

    /// Number of `generate_sql` calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlAgent for MockAgent {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_sql(
        &self,
        _db: &dyn DatabaseClient,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.rate_limits {
            return Err(AgentError::RateLimited(format!("mock status 429 (call {})", call + 1)));
        }

        let question = request.question.to_lowercase();
        let script = self
            .scripts
            .iter()
            .find(|(pattern, _)| question.contains(pattern.as_str()))
            .map(|(_, script)| script.clone());

        let query = match script {
            Some(Script::Answer(query)) => query,
            Some(Script::Fail(message)) => return Err(AgentError::Provider(message)),
            None => DEFAULT_QUERY.to_string(),
        };

        Ok(AgentResponse {
            messages: vec![
                Message::user(request.question.clone()),
                Message::assistant(query.clone()),
            ],
            query,
            usage: self.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ContextMode, Provider};
    use crate::db::MockDatabaseClient;

    fn request(question: &str) -> AgentRequest {
        AgentRequest {
            question: question.to_string(),
            provider: Provider::OpenAi,
            model: "mock".to_string(),
            context_mode: ContextMode::Default,
            gold_tables: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripted_answers() {
        let agent = MockAgent::new()
            .with_answer("singers", "SELECT count(*) FROM singer")
            .with_failure("explode", "model refused");
        let db = MockDatabaseClient::new();

        let response = agent.generate_sql(&db, &request("How many SINGERS?")).await.unwrap();
        assert_eq!(response.query, "SELECT count(*) FROM singer");

        let response = agent.generate_sql(&db, &request("Anything")).await.unwrap();
        assert_eq!(response.query, DEFAULT_QUERY);

        let error = agent.generate_sql(&db, &request("explode")).await.unwrap_err();
        assert!(matches!(error, AgentError::Provider(_)));
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limits_then_answers() {
        let agent = MockAgent::new().with_rate_limits(2);
        let db = MockDatabaseClient::new();

        assert!(agent.generate_sql(&db, &request("q")).await.unwrap_err().is_rate_limited());
        assert!(agent.generate_sql(&db, &request("q")).await.unwrap_err().is_rate_limited());
        assert!(agent.generate_sql(&db, &request("q")).await.is_ok());
    }

    #[tokio::test]
    async fn test_default_identify_tables_parses_query() {
        let agent = MockAgent::new()
            .with_answer("q", "SELECT * FROM Singer JOIN concert USING (singer_id)");
        let db = MockDatabaseClient::new();

        let response = agent.identify_tables(&db, &request("q")).await.unwrap();
        assert_eq!(response.tables, vec!["concert", "singer"]);
    }
}
