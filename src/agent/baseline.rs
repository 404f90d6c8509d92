//! Baseline agent: schema in the prompt, one chat completion per step.
//!
//! In the default context mode the model first picks the relevant tables from
//! a list of names, then writes SQL against the DDL of those tables only.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::agent::parser::{extract_query, extract_tables};
use crate::agent::prompt::{sql_generation_messages, table_selection_messages};
use crate::agent::{
    AgentError, AgentRequest, AgentResponse, ChatModel, ContextMode, Message, SqlAgent,
    TablesResponse, Usage,
};
use crate::db::{DatabaseClient, Schema};

/// Chat agent with schema-in-prompt context.
#[derive(Clone)]
pub struct BaselineAgent {
    client: Arc<dyn ChatModel>,
}

impl BaselineAgent {
    /// Creates a baseline agent on top of the given chat model.
    pub fn new(client: Arc<dyn ChatModel>) -> Self {
        Self { client }
    }

    async fn pick_tables(
        &self,
        schema: &Schema,
        question: &str,
    ) -> Result<TablesResponse, AgentError> {
        let mut messages = table_selection_messages(schema, question);
        let completion = self.client.complete(&messages, true).await?;
        let tables = extract_tables(&completion.content).ok_or_else(|| {
            AgentError::Parse(format!("No table list in answer: {}", completion.content))
        })?;
        debug!("Model picked tables {:?}", tables);

        messages.push(Message::assistant(completion.content));
        Ok(TablesResponse {
            tables,
            messages,
            usage: completion.usage,
        })
    }

    /// Narrows the schema according to the context mode.
    async fn context(
        &self,
        schema: Schema,
        request: &AgentRequest,
    ) -> Result<(Schema, Usage), AgentError> {
        match request.context_mode {
            ContextMode::EntireSchema => Ok((schema, Usage::default())),
            ContextMode::GoldTables => Ok((
                schema.restrict_to(&request.gold_tables),
                Usage::default(),
            )),
            ContextMode::Default => {
                let picked = self.pick_tables(&schema, &request.question).await?;
                let narrowed = schema.restrict_to(&picked.tables);
                // Hallucinated names leave nothing to work with.
                let narrowed = if narrowed.tables.is_empty() { schema } else { narrowed };
                Ok((narrowed, picked.usage))
            }
        }
    }
}

#[async_trait]
impl SqlAgent for BaselineAgent {
    fn name(&self) -> &str {
        "baseline"
    }

    async fn generate_sql(
        &self,
        db: &dyn DatabaseClient,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentError> {
        let schema = db.introspect_schema().await?;
        let (context, mut usage) = self.context(schema, request).await?;

        let mut messages = sql_generation_messages(&context, &request.question);
        let completion = self.client.complete(&messages, true).await?;
        usage += completion.usage;

        let query = extract_query(&completion.content).ok_or_else(|| {
            AgentError::Parse(format!("No SQL in answer: {}", completion.content))
        })?;
        messages.push(Message::assistant(completion.content));

        Ok(AgentResponse {
            query,
            messages,
            usage,
        })
    }

    async fn identify_tables(
        &self,
        db: &dyn DatabaseClient,
        request: &AgentRequest,
    ) -> Result<TablesResponse, AgentError> {
        let schema = db.introspect_schema().await?;
        self.pick_tables(&schema, &request.question).await
    }
}
