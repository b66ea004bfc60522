//! Ollama LLM Provider
//!
//! Streams `/api/chat` responses from a local Ollama server. The response body
//! is newline-delimited JSON; every line carries a partial `message` and the
//! last one has `done: true` plus token counters.
//!
//! Key features:
//! - Local execution (no API keys required)
//! - Native function calling (tools in OpenAI function format)
//! - Tool calls are buffered and emitted once the stream reports `done`

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sdk::types::CapabilitySpec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    CallRequest, ContentBlock, ContextEntry, ContextRole, EventStream, GenerationProvider,
    GenerationRequest, LLMError, Result, StreamEvent,
};
use crate::record::Usage;

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `timeout` - Whole-request timeout, including the streamed body
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert the context into Ollama chat messages
    fn convert_messages(&self, system: Option<&str>, context: &[ContextEntry]) -> Vec<OllamaMessage> {
        let mut messages = Vec::with_capacity(context.len() + 1);

        if let Some(system) = system.filter(|s| !s.is_empty()) {
            messages.push(OllamaMessage::plain("system", system));
        }

        for entry in context {
            match entry.role {
                ContextRole::Assistant => {
                    let tool_calls: Vec<OllamaToolCall> = entry
                        .call_requests()
                        .map(|(_, name, input)| OllamaToolCall {
                            id: None,
                            function: OllamaFunctionCall {
                                name: name.to_string(),
                                arguments: input.clone(),
                            },
                        })
                        .collect();
                    messages.push(OllamaMessage {
                        role: "assistant".to_string(),
                        content: entry.text(),
                        tool_calls,
                    });
                }
                ContextRole::User => {
                    for block in &entry.content {
                        if let ContentBlock::CallResult { content, .. } = block {
                            messages.push(OllamaMessage::plain("tool", content));
                        }
                    }
                    let text = entry.text();
                    if !text.is_empty() {
                        messages.push(OllamaMessage::plain("user", &text));
                    }
                }
            }
        }

        messages
    }

    fn convert_tools(manifest: &[CapabilitySpec]) -> Vec<Value> {
        manifest
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect()
    }

    fn map_send_error(&self, e: reqwest::Error) -> LLMError {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(format!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.base_url
            ))
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }
}

fn map_status(status: StatusCode, body: String) -> LLMError {
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);
    let message = format!("Ollama API error ({}): {}", status, detail);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LLMError::AuthenticationFailed(message),
        StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimitExceeded,
        s if s.is_client_error() => LLMError::InvalidRequest(message),
        _ => LLMError::ProviderUnavailable(message),
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<EventStream> {
        let messages = self.convert_messages(request.system.as_deref(), &request.context);

        debug!(
            "Ollama request: model={}, messages={}, tools={}",
            request.model,
            messages.len(),
            request.manifest.len()
        );

        let body = OllamaRequest {
            model: request.model,
            messages,
            stream: true,
            tools: Self::convert_tools(&request.manifest),
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(map_status(status, error_text));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = NdjsonDecoder::default();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LLMError::StreamInterrupted(e.to_string()));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    for event in decoder.push_line(&String::from_utf8_lossy(&line)) {
                        let failed = event.is_err();
                        yield event;
                        if failed {
                            return;
                        }
                    }
                    if decoder.is_done() {
                        return;
                    }
                }
            }

            // Last line may lack a trailing newline.
            if !buffer.is_empty() {
                for event in decoder.push_line(&String::from_utf8_lossy(&buffer)) {
                    let failed = event.is_err();
                    yield event;
                    if failed {
                        return;
                    }
                }
            }

            if !decoder.is_done() {
                yield Err(LLMError::StreamInterrupted(
                    "stream ended before completion".to_string(),
                ));
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Incremental decoder for Ollama's NDJSON chat stream
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    pending_calls: Vec<CallRequest>,
    done: bool,
}

impl NdjsonDecoder {
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one line into zero or more events
    pub(crate) fn push_line(&mut self, line: &str) -> Vec<Result<StreamEvent>> {
        let line = line.trim();
        if line.is_empty() || self.done {
            return Vec::new();
        }

        let chunk: OllamaChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping malformed Ollama stream line: {}", e);
                return Vec::new();
            }
        };

        if let Some(error) = chunk.error {
            self.done = true;
            return vec![Err(LLMError::Unknown(error))];
        }

        let mut events = Vec::new();
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                events.push(Ok(StreamEvent::TextDelta(message.content)));
            }
            for call in message.tool_calls {
                self.pending_calls.push(CallRequest {
                    id: call.id.filter(|id| !id.is_empty()),
                    name: call.function.name,
                    arguments: normalize_arguments(call.function.arguments),
                });
            }
        }

        if chunk.done {
            self.done = true;
            for call in self.pending_calls.drain(..) {
                events.push(Ok(StreamEvent::CapabilityCall(call)));
            }
            if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
                events.push(Ok(StreamEvent::Usage(Usage {
                    input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                    output_tokens: chunk.eval_count.unwrap_or(0),
                })));
            }
        }

        events
    }
}

/// Arguments arrive as an object or as a JSON-encoded string.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => json!({ "value": raw }),
        },
        Value::Null => json!({}),
        other => other,
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

impl OllamaMessage {
    fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// One line of the streamed response
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}
