//! Streaming generation interface
//!
//! This module defines the contract between the orchestrator and a
//! text-generation service. A provider receives the bounded conversation
//! context, a system prompt and the capability manifest, and returns an
//! ordered stream of [`StreamEvent`]s: text deltas and capability-call
//! requests. The orchestrator never sees a provider's wire format.

use async_trait::async_trait;
use futures::stream::BoxStream;
use sdk::types::CapabilitySpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::record::Usage;

pub mod ollama;
pub mod retry;
pub mod scripted;

pub use ollama::OllamaProvider;
pub use retry::{RetryPolicy, RetryingProvider};
pub use scripted::ScriptedProvider;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Stream of generation events
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LLMError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::ProviderUnavailable(_)
                | LLMError::RateLimitExceeded
                | LLMError::NetworkError(_)
                | LLMError::Timeout
                | LLMError::StreamInterrupted(_)
        )
    }
}

/// Role of a context entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    User,
    Assistant,
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextRole::User => write!(f, "user"),
            ContextRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One block of a context entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// A capability call the assistant requested
    CallRequest {
        id: String,
        name: String,
        input: Value,
    },
    /// The result fed back for a call request
    CallResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

/// One role/content entry of the context sent to the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub role: ContextRole,
    pub content: Vec<ContentBlock>,
}

impl ContextEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ContextRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: ContextRole::Assistant,
            content,
        }
    }

    /// Entry carrying call results, positioned right after the assistant turn
    /// that requested them
    pub fn results(content: Vec<ContentBlock>) -> Self {
        Self {
            role: ContextRole::User,
            content,
        }
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn call_requests(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::CallRequest { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }

    pub fn call_results(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::CallResult {
                call_id,
                content,
                is_error,
            } => Some((call_id.as_str(), content.as_str(), *is_error)),
            _ => None,
        })
    }
}

/// A capability call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    /// Provider-assigned id; the orchestrator synthesizes one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl CallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Event emitted by a generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    CapabilityCall(CallRequest),
    /// Token counters, usually sent once at the end
    Usage(Usage),
}

/// Everything a provider needs for one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub context: Vec<ContextEntry>,
    pub system: Option<String>,
    pub manifest: Vec<CapabilitySpec>,
}

/// Streaming generation service
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama")
    fn name(&self) -> &str;

    /// Start a generation.
    ///
    /// Errors returned here happen before any event; errors yielded by the
    /// stream happen mid-generation. Both end the turn.
    async fn stream(&self, request: GenerationRequest) -> Result<EventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transient_errors() {
        assert!(LLMError::Timeout.is_transient());
        assert!(LLMError::NetworkError("reset".into()).is_transient());
        assert!(LLMError::RateLimitExceeded.is_transient());
        assert!(!LLMError::AuthenticationFailed("bad key".into()).is_transient());
        assert!(!LLMError::InvalidRequest("bad".into()).is_transient());
    }

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::CallRequest {
            id: "call_1".into(),
            name: "read_file".into(),
            input: json!({"path": "a"}),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "call_request");

        let block = ContentBlock::CallResult {
            call_id: "call_1".into(),
            content: "ok".into(),
            is_error: false,
        };
        assert_eq!(serde_json::to_value(&block).unwrap()["type"], "call_result");
    }

    #[test]
    fn test_entry_accessors() {
        let entry = ContextEntry::assistant(vec![
            ContentBlock::Text { text: "Let me ".into() },
            ContentBlock::Text { text: "look".into() },
            ContentBlock::CallRequest {
                id: "c".into(),
                name: "list_dir".into(),
                input: json!({}),
            },
        ]);
        assert_eq!(entry.text(), "Let me look");
        assert_eq!(entry.call_requests().count(), 1);
        assert_eq!(entry.call_results().count(), 0);
        assert_eq!(ContextEntry::user("hi").role.to_string(), "user");
    }
}
