//! Capability trait and context types
//!
//! This module defines the `Capability` trait that every callable capability
//! must implement, and the `CapabilityContext` describing where a call happens.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};

/// Trait that all capabilities must implement
///
/// Expected failures (file not found, non-zero exit status, bad arguments) are
/// returned as `Err(ToolError)` or as a [`CapabilityResult`] carrying an error.
/// The registry turns both into a result value, so a capability never ends a
/// run on its own.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Name, description and parameter schema
    fn spec(&self) -> CapabilitySpec;

    /// Unique capability name; defaults to the name in [`Capability::spec`]
    fn name(&self) -> String {
        self.spec().name
    }

    /// Execute the capability with the given parameters
    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError>;
}

/// Context provided to capabilities during execution
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    pub session_id: String,
    pub message_id: String,
    pub agent_name: String,
    pub call_id: Option<String>,
    /// Directory relative paths are resolved against
    pub working_directory: PathBuf,
}

impl CapabilityContext {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        agent_name: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            agent_name: agent_name.into(),
            call_id: None,
            working_directory: working_directory.into(),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Resolve a path argument against the working directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            self.working_directory.join(candidate)
        }
    }
}
