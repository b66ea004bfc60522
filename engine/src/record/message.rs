//! Messages and their typed parts
//!
//! A message is an ordered, append-only list of parts. Parts form a closed
//! tagged union serialized with an explicit `"type"` discriminant, so stored
//! documents stay readable and every consumer matches exhaustively.

use chrono::Utc;
use sdk::errors::EngineError;
use sdk::types::CallParams;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use super::identifier::{ascending, IdPrefix};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Role of a stored message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle of a capability call: pending → running → success | error | rejected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Running,
    Success,
    Error,
    Rejected,
}

impl CallStatus {
    /// Whether the call reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Success | CallStatus::Error | CallStatus::Rejected
        )
    }

    /// Whether the result should be reported to the model as a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, CallStatus::Error | CallStatus::Rejected)
    }
}

/// Execution state of one capability call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallState {
    pub status: CallStatus,
    #[serde(default)]
    pub input: CallParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<i64>,
}

impl CallState {
    pub fn pending(input: CallParams) -> Self {
        Self {
            status: CallStatus::Pending,
            input,
            output: None,
            error: None,
            metadata: HashMap::new(),
            time_start: None,
            time_end: None,
        }
    }

    pub fn start(&mut self) {
        self.status = CallStatus::Running;
        self.time_start = Some(now_ms());
    }

    pub fn succeed(&mut self, output: impl Into<String>) {
        self.status = CallStatus::Success;
        self.output = Some(output.into());
        self.time_end = Some(now_ms());
    }

    pub fn fail(&mut self, error: impl Into<String>, output: Option<String>) {
        self.status = CallStatus::Error;
        self.error = Some(error.into());
        self.output = output.filter(|o| !o.is_empty());
        self.time_end = Some(now_ms());
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = CallStatus::Rejected;
        self.error = Some(reason.into());
        self.time_end = Some(now_ms());
    }
}

/// Text content part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPart {
    pub id: String,
    pub text: String,
    /// Generated by the engine rather than typed by the user or model
    #[serde(default)]
    pub synthetic: bool,
    /// Excluded from context
    #[serde(default)]
    pub ignored: bool,
}

/// File attachment part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilePart {
    pub id: String,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// data: URL or file path
    pub url: String,
}

/// Agent invocation part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPart {
    pub id: String,
    pub name: String,
}

/// Capability call part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallPart {
    pub id: String,
    /// Capability name
    pub tool: String,
    pub call_id: String,
    pub state: CallState,
}

impl CallPart {
    pub fn new(tool: impl Into<String>, call_id: impl Into<String>, input: CallParams) -> Self {
        Self {
            id: ascending(IdPrefix::Part),
            tool: tool.into(),
            call_id: call_id.into(),
            state: CallState::pending(input),
        }
    }
}

/// Extended thinking part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningPart {
    pub id: String,
    pub text: String,
    pub time_start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<i64>,
}

/// One part of a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text(TextPart),
    File(FilePart),
    Agent(AgentPart),
    Tool(CallPart),
    Reasoning(ReasoningPart),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart {
            id: ascending(IdPrefix::Part),
            text: text.into(),
            synthetic: false,
            ignored: false,
        })
    }

    pub fn synthetic_text(text: impl Into<String>) -> Self {
        Part::Text(TextPart {
            id: ascending(IdPrefix::Part),
            text: text.into(),
            synthetic: true,
            ignored: false,
        })
    }

    pub fn file(mime: impl Into<String>, url: impl Into<String>, filename: Option<String>) -> Self {
        Part::File(FilePart {
            id: ascending(IdPrefix::Part),
            mime: mime.into(),
            filename,
            url: url.into(),
        })
    }

    pub fn agent(name: impl Into<String>) -> Self {
        Part::Agent(AgentPart {
            id: ascending(IdPrefix::Part),
            name: name.into(),
        })
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Part::Reasoning(ReasoningPart {
            id: ascending(IdPrefix::Part),
            text: text.into(),
            time_start: now_ms(),
            time_end: None,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Part::Text(p) => &p.id,
            Part::File(p) => &p.id,
            Part::Agent(p) => &p.id,
            Part::Tool(p) => &p.id,
            Part::Reasoning(p) => &p.id,
        }
    }

    /// Discriminant as stored on disk
    pub fn kind(&self) -> &'static str {
        match self {
            Part::Text(_) => "text",
            Part::File(_) => "file",
            Part::Agent(_) => "agent",
            Part::Tool(_) => "tool",
            Part::Reasoning(_) => "reasoning",
        }
    }
}

/// Token counters reported by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Error recorded on an assistant message whose turn failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageError {
    pub kind: String,
    pub message: String,
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,

    // Assistant-specific fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,

    pub time_created: i64,
    pub time_updated: i64,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: Role) -> Self {
        let now = now_ms();
        Self {
            id: ascending(IdPrefix::Message),
            session_id: session_id.into(),
            role,
            parts: Vec::new(),
            agent: None,
            model_id: None,
            provider_id: None,
            usage: None,
            error: None,
            time_created: now,
            time_updated: now,
        }
    }

    /// A user message holding a single text part
    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::new(session_id, Role::User);
        message.parts.push(Part::text(text));
        message
    }

    pub fn assistant(session_id: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant)
    }

    /// Append a part.
    ///
    /// Capability-call parts must carry a call id that is unique within the
    /// message.
    pub fn add_part(&mut self, part: Part) -> Result<(), EngineError> {
        if let Part::Tool(call) = &part {
            if self.has_call_id(&call.call_id) {
                return Err(EngineError::DuplicateCallId(call.call_id.clone()));
            }
        }
        self.parts.push(part);
        self.time_updated = now_ms();
        Ok(())
    }

    pub fn has_call_id(&self, call_id: &str) -> bool {
        self.capability_calls().any(|c| c.call_id == call_id)
    }

    pub fn text_parts(&self) -> impl Iterator<Item = &TextPart> {
        self.parts.iter().filter_map(|p| match p {
            Part::Text(t) => Some(t),
            _ => None,
        })
    }

    pub fn capability_calls(&self) -> impl Iterator<Item = &CallPart> {
        self.parts.iter().filter_map(|p| match p {
            Part::Tool(c) => Some(c),
            _ => None,
        })
    }

    /// Combined text of all non-ignored text parts
    pub fn text_content(&self) -> String {
        self.text_parts()
            .filter(|p| !p.ignored)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn set_error(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.error = Some(MessageError {
            kind: kind.into(),
            message: message.into(),
        });
        self.time_updated = now_ms();
    }
}
