//! Extraction of structured answers from model output.
//!
//! Models are asked for JSON, but some ignore `response_format` and answer
//! with a fenced code block instead, so both shapes are accepted.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct QueryAnswer {
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TablesAnswer {
    Object { tables: Vec<String> },
    List(Vec<String>),
}

/// Extracts the SQL query from a model answer.
///
/// Accepts `{"query": "..."}` (optionally fenced as ```json), a ```sql block
/// or an unlabeled block. Returns None when no query can be found.
pub fn extract_query(content: &str) -> Option<String> {
    let content = content.trim();

    if let Some(answer) = parse_json::<QueryAnswer>(content) {
        return non_empty(answer.query);
    }

    code_block(content, "sql")
        .or_else(|| code_block(content, ""))
        .and_then(non_empty)
}

/// Extracts a list of table names from a model answer.
pub fn extract_tables(content: &str) -> Option<Vec<String>> {
    match parse_json::<TablesAnswer>(content.trim())? {
        TablesAnswer::Object { tables } | TablesAnswer::List(tables) => Some(tables),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(content: &str) -> Option<T> {
    serde_json::from_str(content).ok().or_else(|| {
        let inner = code_block(content, "json")?;
        serde_json::from_str(&inner).ok()
    })
}

fn non_empty(sql: String) -> Option<String> {
    let sql = sql.trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Returns the body of the first fenced block tagged `lang`.
///
/// An empty `lang` only matches blocks without a language tag.
fn code_block(text: &str, lang: &str) -> Option<String> {
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let newline = after_fence.find('\n')?;
        let tag = after_fence[..newline].trim();
        let body = &after_fence[newline + 1..];
        let end = body.find("```")?;

        if tag.eq_ignore_ascii_case(lang) {
            return Some(body[..end].trim().to_string());
        }
        rest = &body[end + 3..];
    }

    None
}
