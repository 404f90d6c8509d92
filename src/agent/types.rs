//! Message and usage types shared by all agents.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crate::config::Pricing;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions.
    System,
    /// User message (the question).
    User,
    /// Assistant message (model output).
    Assistant,
}

impl Role {
    /// Returns the role as a string for API requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in an agent transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: Role,
    /// The content of the message.
    pub content: String,
}

impl Message {
    /// Creates a new message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Renders a transcript as `role:\ncontent` blocks separated by newlines.
pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}:\n{}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Token counts and their derived cost in USD.
///
/// Every field is non-negative and sums field-wise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub cached_tokens_cost: f64,
    #[serde(default)]
    pub request_tokens: u64,
    #[serde(default)]
    pub request_tokens_cost: f64,
    #[serde(default)]
    pub response_tokens: u64,
    #[serde(default)]
    pub response_tokens_cost: f64,
}

impl Usage {
    /// Creates an unpriced usage record.
    pub fn tokens(request: u64, response: u64, cached: u64) -> Self {
        Self {
            request_tokens: request,
            response_tokens: response,
            cached_tokens: cached,
            ..Self::default()
        }
    }

    /// Recomputes costs from per-million-token prices.
    ///
    /// Cached tokens are part of the request count but billed at the cached
    /// rate, so only the uncached remainder is billed at the request rate.
    pub fn priced(self, pricing: &Pricing) -> Self {
        let per_token = |tokens: u64, price: f64| tokens as f64 * price / 1_000_000.0;
        let uncached = self.request_tokens.saturating_sub(self.cached_tokens);
        Self {
            cached_tokens_cost: per_token(self.cached_tokens, pricing.cached),
            request_tokens_cost: per_token(uncached, pricing.request),
            response_tokens_cost: per_token(self.response_tokens, pricing.response),
            ..self
        }
    }

    /// Total cost across token classes.
    pub fn total_cost(&self) -> f64 {
        self.cached_tokens_cost + self.request_tokens_cost + self.response_tokens_cost
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.cached_tokens += other.cached_tokens;
        self.cached_tokens_cost += other.cached_tokens_cost;
        self.request_tokens += other.request_tokens;
        self.request_tokens_cost += other.request_tokens_cost;
        self.response_tokens += other.response_tokens;
        self.response_tokens_cost += other.response_tokens_cost;
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_format() {
        let messages = vec![
            Message::system("You write SQL."),
            Message::user("How many singers?"),
        ];
        assert_eq!(
            format_transcript(&messages),
            "system:\nYou write SQL.\nuser:\nHow many singers?"
        );
        assert_eq!(format_transcript(&[]), "");
    }

    #[test]
    fn test_usage_accumulates() {
        let total: Usage = [Usage::tokens(10, 2, 1), Usage::tokens(5, 3, 0)]
            .into_iter()
            .sum();
        assert_eq!(total.request_tokens, 15);
        assert_eq!(total.response_tokens, 5);
        assert_eq!(total.cached_tokens, 1);
    }

    #[test]
    fn test_usage_pricing() {
        let pricing = Pricing {
            request: 2.0,
            cached: 0.5,
            response: 8.0,
        };
        let usage = Usage::tokens(1_000_000, 500_000, 200_000).priced(&pricing);

        assert!((usage.request_tokens_cost - 1.6).abs() < 1e-9);
        assert!((usage.cached_tokens_cost - 0.1).abs() < 1e-9);
        assert!((usage.response_tokens_cost - 4.0).abs() < 1e-9);
        assert!((usage.total_cost() - 5.7).abs() < 1e-9);
    }

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("SELECT 1")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"SELECT 1"}"#);
    }
}
