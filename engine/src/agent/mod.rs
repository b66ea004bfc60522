//! Agent loop
//!
//! The orchestrator drives one conversation: it streams a generation, runs the
//! requested capability calls one at a time through the repetition detector
//! and the approval gate, folds the results back into the context and repeats
//! until the model stops calling capabilities or a limit is reached.

use std::sync::Arc;

pub mod loop_detector;
pub mod profile;
pub mod runner;

pub use loop_detector::{LoopDetector, LoopPattern};
pub use profile::AgentProfile;
pub use runner::{Orchestrator, RunEvent, RunOutcome, DENIED_BY_POLICY};

use crate::approval::{ApprovalGate, ApprovalPrompter};
use crate::history::context::DEFAULT_CONTEXT_TOKENS;
use crate::history::{ContextManager, MessageHistory, SessionStore};
use crate::storage::{MemoryStorage, Storage};

/// Limits of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Generation calls allowed per run
    pub max_iterations: usize,
    /// Approve every capability call without asking
    pub auto_approve: bool,
    pub loop_detection: bool,
    /// Identical consecutive calls that count as a loop
    pub loop_threshold: usize,
    /// Log iterations and calls at info level instead of debug
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            auto_approve: false,
            loop_detection: true,
            loop_threshold: 3,
            verbose: true,
        }
    }
}

/// How much history is sent to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    /// Stored messages loaded into the context
    pub max_messages: usize,
    /// Estimated token budget before pruning
    pub max_tokens: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_tokens: DEFAULT_CONTEXT_TOKENS,
        }
    }
}

/// Shared state handed to the orchestrator and its collaborators
#[derive(Clone)]
pub struct EngineContext {
    pub storage: Arc<dyn Storage>,
    pub run: RunConfig,
    pub limits: ContextLimits,
}

impl EngineContext {
    pub fn new(storage: Arc<dyn Storage>, run: RunConfig, limits: ContextLimits) -> Self {
        Self {
            storage,
            run,
            limits,
        }
    }

    /// Context backed by memory only, with default limits
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStorage::new()),
            RunConfig::default(),
            ContextLimits::default(),
        )
    }

    pub fn with_run_config(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    pub fn history(&self, project_id: &str) -> MessageHistory {
        MessageHistory::new(Arc::clone(&self.storage), project_id)
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(Arc::clone(&self.storage))
    }

    pub fn context_manager(&self) -> ContextManager {
        ContextManager::new(self.limits.max_tokens)
    }

    pub fn detector(&self) -> LoopDetector {
        LoopDetector::new(self.run.loop_threshold, self.run.loop_detection)
    }

    pub fn gate(&self, prompter: Arc<dyn ApprovalPrompter>) -> ApprovalGate {
        ApprovalGate::new(self.run.auto_approve, prompter)
    }
}
