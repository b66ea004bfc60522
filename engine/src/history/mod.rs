//! Message history
//!
//! Persists messages append-only and rebuilds the bounded conversation that is
//! sent to the provider. Capability calls stored on an assistant message turn
//! into call-request blocks, and their results into a paired entry placed
//! right after that assistant turn.

use std::sync::Arc;

use sdk::errors::EngineError;
use tracing::{debug, warn};

use crate::llm::{ContentBlock, ContextEntry};
use crate::record::{CallPart, CallStatus, Message, Part, Role};
use crate::storage::{key, Storage};

pub mod context;
pub mod sessions;

pub use context::ContextManager;
pub use sessions::{SessionStats, SessionStore};

/// Result fed back for a call that never finished
pub const INTERRUPTED_CALL: &str = "call interrupted before completion";

/// Manages message history for the sessions of one project
#[derive(Clone)]
pub struct MessageHistory {
    storage: Arc<dyn Storage>,
    project_id: String,
}

impl MessageHistory {
    pub fn new(storage: Arc<dyn Storage>, project_id: impl Into<String>) -> Self {
        Self {
            storage,
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn messages_prefix(&self, session_id: &str) -> Vec<String> {
        key(["sessions", self.project_id.as_str(), session_id, "messages"])
    }

    fn message_key(&self, session_id: &str, message_id: &str) -> Vec<String> {
        let mut k = self.messages_prefix(session_id);
        k.push(message_id.to_string());
        k
    }

    /// Persist a message. Saving again under the same id replaces it.
    pub async fn save(&self, session_id: &str, message: &Message) -> Result<(), EngineError> {
        let value = serde_json::to_value(message)?;
        self.storage
            .write(&self.message_key(session_id, &message.id), &value)
            .await?;
        debug!(
            "Saved {} message {} ({} parts)",
            message.role,
            message.id,
            message.parts.len()
        );
        Ok(())
    }

    /// Most recent `limit` messages in chronological order; all when `None`.
    ///
    /// Documents that fail to deserialize are skipped.
    pub async fn load(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, EngineError> {
        let mut ids = self
            .storage
            .list_keys(&self.messages_prefix(session_id))
            .await?;
        ids.sort();
        if let Some(limit) = limit {
            let skip = ids.len().saturating_sub(limit);
            ids.drain(..skip);
        }

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let value = match self.storage.read(&self.message_key(session_id, &id)).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unreadable message {}: {}", id, e);
                    continue;
                }
            };
            match serde_json::from_value::<Message>(value) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping corrupt message {}: {}", id, e),
            }
        }
        Ok(messages)
    }

    /// Conversation for the provider, built from the last `max_messages`
    /// stored messages. `exclude` drops one message by id, typically the user
    /// turn that was just persisted and is appended by the caller.
    pub async fn build_context_for_generation(
        &self,
        session_id: &str,
        max_messages: usize,
        exclude: Option<&str>,
    ) -> Result<Vec<ContextEntry>, EngineError> {
        let fetch = if exclude.is_some() {
            max_messages.saturating_add(1)
        } else {
            max_messages
        };
        let mut messages = self.load(session_id, Some(fetch)).await?;
        if let Some(exclude) = exclude {
            messages.retain(|m| m.id != exclude);
        }
        let skip = messages.len().saturating_sub(max_messages);
        Ok(to_context(&messages[skip..]))
    }

    pub async fn message_count(&self, session_id: &str) -> Result<usize, EngineError> {
        Ok(self
            .storage
            .list_keys(&self.messages_prefix(session_id))
            .await?
            .len())
    }

    pub async fn last_message(&self, session_id: &str) -> Result<Option<Message>, EngineError> {
        Ok(self.load(session_id, Some(1)).await?.pop())
    }

    /// Delete every message of a session
    pub async fn clear(&self, session_id: &str) -> Result<(), EngineError> {
        let ids = self
            .storage
            .list_keys(&self.messages_prefix(session_id))
            .await?;
        for id in &ids {
            self.storage.delete(&self.message_key(session_id, id)).await?;
        }
        debug!("Cleared {} messages from session {}", ids.len(), session_id);
        Ok(())
    }
}

/// Convert stored messages into provider context entries
pub fn to_context(messages: &[Message]) -> Vec<ContextEntry> {
    let mut entries = Vec::new();

    for message in messages {
        match message.role {
            Role::User => {
                let text = message
                    .text_parts()
                    .filter(|p| !p.ignored)
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !text.is_empty() {
                    entries.push(ContextEntry::user(text));
                }
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                let mut results = Vec::new();

                for part in &message.parts {
                    match part {
                        Part::Text(t) if !t.ignored => {
                            blocks.push(ContentBlock::Text {
                                text: t.text.clone(),
                            });
                        }
                        Part::Tool(call) => {
                            blocks.push(ContentBlock::CallRequest {
                                id: call.call_id.clone(),
                                name: call.tool.clone(),
                                input: call.state.input.as_value(),
                            });
                            results.push(call_result(call));
                        }
                        Part::Text(_) | Part::File(_) | Part::Agent(_) | Part::Reasoning(_) => {}
                    }
                }

                if !blocks.is_empty() {
                    entries.push(ContextEntry::assistant(blocks));
                }
                if !results.is_empty() {
                    entries.push(ContextEntry::results(results));
                }
            }
        }
    }

    entries
}

fn call_result(call: &CallPart) -> ContentBlock {
    let state = &call.state;
    let (content, is_error) = match state.status {
        CallStatus::Pending | CallStatus::Running => (INTERRUPTED_CALL.to_string(), true),
        status => (
            state
                .output
                .clone()
                .filter(|o| !o.is_empty())
                .or_else(|| state.error.clone())
                .unwrap_or_default(),
            status.is_failure(),
        ),
    };
    ContentBlock::CallResult {
        call_id: call.call_id.clone(),
        content,
        is_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use sdk::types::CallParams;
    use serde_json::json;

    fn history() -> (Arc<MemoryStorage>, MessageHistory) {
        let storage = Arc::new(MemoryStorage::new());
        let history = MessageHistory::new(Arc::clone(&storage) as Arc<dyn Storage>, "proj");
        (storage, history)
    }

    fn assistant_with_call(session: &str, status: CallStatus) -> Message {
        let mut message = Message::assistant(session);
        message.add_part(Part::text("checking")).unwrap();
        let mut call = CallPart::new(
            "read_file",
            "call_1",
            CallParams::new().with_param("path", json!("a.txt")),
        );
        match status {
            CallStatus::Success => call.state.succeed("contents"),
            CallStatus::Error => call.state.fail("not found", None),
            CallStatus::Rejected => call.state.reject("denied by policy"),
            CallStatus::Running => call.state.start(),
            CallStatus::Pending => {}
        }
        message.add_part(Part::Tool(call)).unwrap();
        message
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_parts() {
        let (_, history) = history();
        let mut message = Message::user("s1", "one");
        for text in ["two", "three", "four"] {
            message.add_part(Part::text(text)).unwrap();
        }
        history.save("s1", &message).await.unwrap();

        let loaded = history.load("s1", None).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let texts: Vec<_> = loaded[0].text_parts().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three", "four"]);
        assert_eq!(loaded[0], message);
    }

    #[tokio::test]
    async fn test_load_limit_returns_most_recent_in_order() {
        let (_, history) = history();
        let mut ids = Vec::new();
        for i in 0..5 {
            let message = Message::user("s1", format!("m{}", i));
            ids.push(message.id.clone());
            history.save("s1", &message).await.unwrap();
        }

        let loaded = history.load("s1", Some(2)).await.unwrap();
        let loaded_ids: Vec<_> = loaded.iter().map(|m| m.id.clone()).collect();
        assert_eq!(loaded_ids, ids[3..].to_vec());
        assert_eq!(history.message_count("s1").await.unwrap(), 5);
        assert_eq!(
            history.last_message("s1").await.unwrap().unwrap().id,
            ids[4]
        );
    }

    #[tokio::test]
    async fn test_corrupt_documents_are_skipped() {
        let (storage, history) = history();
        history.save("s1", &Message::user("s1", "ok")).await.unwrap();
        storage
            .write(
                &key(["sessions", "proj", "s1", "messages", "message_zzz"]),
                &json!({"garbage": true}),
            )
            .await
            .unwrap();

        let loaded = history.load("s1", None).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_context_pairs_calls_with_results() {
        let (_, history) = history();
        history.save("s1", &Message::user("s1", "read a")).await.unwrap();
        history
            .save("s1", &assistant_with_call("s1", CallStatus::Success))
            .await
            .unwrap();

        let context = history
            .build_context_for_generation("s1", 20, None)
            .await
            .unwrap();
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].text(), "read a");
        let requests: Vec<_> = context[1].call_requests().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "call_1");
        let results: Vec<_> = context[2].call_results().collect();
        assert_eq!(results, vec![("call_1", "contents", false)]);
    }

    #[tokio::test]
    async fn test_context_excludes_message() {
        let (_, history) = history();
        let first = Message::user("s1", "first");
        let second = Message::user("s1", "second");
        history.save("s1", &first).await.unwrap();
        history.save("s1", &second).await.unwrap();

        let context = history
            .build_context_for_generation("s1", 1, Some(&second.id))
            .await
            .unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].text(), "first");
    }

    #[test]
    fn test_failed_and_interrupted_calls_are_errors() {
        let rejected = to_context(&[assistant_with_call("s", CallStatus::Rejected)]);
        let results: Vec<_> = rejected[1].call_results().collect();
        assert_eq!(results, vec![("call_1", "denied by policy", true)]);

        let errored = to_context(&[assistant_with_call("s", CallStatus::Error)]);
        let results: Vec<_> = errored[1].call_results().collect();
        assert_eq!(results, vec![("call_1", "not found", true)]);

        let interrupted = to_context(&[assistant_with_call("s", CallStatus::Running)]);
        let results: Vec<_> = interrupted[1].call_results().collect();
        assert_eq!(results, vec![("call_1", INTERRUPTED_CALL, true)]);
    }

    #[test]
    fn test_user_text_parts_are_joined_with_spaces() {
        let mut message = Message::user("s", "fix the bug");
        message.add_part(Part::text("in parser.rs")).unwrap();
        let context = to_context(&[message]);
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].text(), "fix the bug in parser.rs");
    }

    #[test]
    fn test_reasoning_and_attachments_are_not_sent() {
        let mut message = Message::assistant("s");
        message.add_part(Part::reasoning("hmm")).unwrap();
        message.add_part(Part::agent("plan")).unwrap();
        let context = to_context(&[message]);
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let (_, history) = history();
        history.save("s1", &Message::user("s1", "a")).await.unwrap();
        history.save("s1", &Message::user("s1", "b")).await.unwrap();
        history.clear("s1").await.unwrap();
        assert_eq!(history.message_count("s1").await.unwrap(), 0);
        assert!(history.last_message("s1").await.unwrap().is_none());
    }
}
