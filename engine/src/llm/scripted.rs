//! Scripted provider
//!
//! Replays pre-recorded turns instead of calling a model. Used for dry runs
//! and tests of the orchestration loop.

use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{EventStream, GenerationProvider, GenerationRequest, LLMError, Result, StreamEvent};

/// One scripted generation: the events it yields, in order
pub type ScriptedTurn = Vec<Result<StreamEvent>>;

/// Provider that replays scripted turns
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Replayed forever once the script runs out
    fallback: Option<ScriptedTurn>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provider that yields the same turn on every call
    pub fn repeating(turn: ScriptedTurn) -> Self {
        Self {
            fallback: Some(turn),
            ..Self::new(Vec::new())
        }
    }

    /// Number of `stream` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<EventStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let next = self
            .turns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        let turn = match next.or_else(|| self.fallback.clone()) {
            Some(turn) => turn,
            None => return Err(LLMError::Unknown("script exhausted".to_string())),
        };

        Ok(Box::pin(stream::iter(turn)))
    }
}
