//! Prompt construction for the baseline agent.

use crate::agent::types::Message;
use crate::db::Schema;

const TABLE_PICKER_PROMPT: &str = "You are an AI assistant that can pick out the most relevant SQL tables that would help answer a given question.";

const SQL_WRITER_PROMPT: &str = r#"You are a genius at generating SQL from natural language.

INSTRUCTIONS:
- Generate a single valid PostgreSQL SELECT statement
- Use only the tables and columns listed below
- Use appropriate JOINs based on foreign keys
- Do not add a LIMIT unless the question asks for one

OUTPUT FORMAT:
Respond with a JSON object of the form {"query": "<sql>"}."#;

/// Messages asking the model which tables answer `question`.
pub fn table_selection_messages(schema: &Schema, question: &str) -> Vec<Message> {
    vec![
        Message::system(TABLE_PICKER_PROMPT),
        Message::system(format!(
            "Here are the tables in the database:\n\n{}",
            schema.table_names().join("\n")
        )),
        Message::user(format!(
            "Which tables would you use to answer the following question? \
             Respond with a JSON object of the form {{\"tables\": [\"<name>\"]}}.\n\n{question}"
        )),
    ]
}

/// Messages asking the model for a query over the given schema.
pub fn sql_generation_messages(schema: &Schema, question: &str) -> Vec<Message> {
    vec![
        Message::system(SQL_WRITER_PROMPT),
        Message::system(format!(
            "Here are some tables that might help you answer the question:\n\n{}",
            schema.format_for_llm()
        )),
        Message::user(format!(
            "Generate a SQL query for PostgreSQL that answers the following question:\n\n{question}"
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::Role;
    use crate::db::{Column, Table};

    fn schema() -> Schema {
        let mut table = Table::new("singer");
        table.columns.push(Column::new("name", "text"));
        Schema {
            tables: vec![table, Table::new("concert")],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_table_selection_lists_names_only() {
        let messages = table_selection_messages(&schema(), "Who sang?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "Here are the tables in the database:\n\nsinger\nconcert");
        assert_eq!(messages[2].role, Role::User);
        assert!(messages[2].content.ends_with("Who sang?"));
    }

    #[test]
    fn test_sql_generation_includes_ddl() {
        let messages = sql_generation_messages(&schema(), "Who sang?");
        assert!(messages[1].content.contains("CREATE TABLE singer"));
        assert!(messages[0].content.contains("\"query\""));
        assert!(messages[2].content.ends_with("Who sang?"));
    }
}
