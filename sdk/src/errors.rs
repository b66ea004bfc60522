//! Error types and handling
//!
//! This module provides the error types used throughout the Pilot engine.
//! All errors implement the `PilotErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Capability failures are deliberately *not* part of this enum: they travel as
//! [`crate::types::ToolError`] and are folded into a result value before they
//! reach the orchestrator.

use thiserror::Error;

/// Trait for Pilot error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait PilotErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave the current run able to continue (or the
    /// caller able to simply try again). Non-recoverable errors end the run.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Storage**: Document store read/write failures
/// - **LLM Provider**: Streaming generation failures
/// - **Tool**: Capability lookup failures
/// - **Run control**: Iteration ceiling, loop detection, cancellation
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, PilotErrorExt};
///
/// let error = EngineError::ToolNotFound("frobnicate".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::LoopDetected("read_file x3".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Record errors
    #[error("Duplicate call id in message: {0}")]
    DuplicateCallId(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    // Run control errors
    #[error("Max iterations exceeded")]
    MaxIterationsExceeded,

    #[error("Repetitive tool use detected: {0}")]
    LoopDetected(String),

    #[error("Run cancelled")]
    Cancelled,

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Storage(_) => "Session storage failed. Check the data directory permissions",
            Self::Serialization(_) => "A stored document is malformed",
            Self::SessionNotFound(_) => "Use 'pilot sessions' to list known sessions",

            Self::LLMProvider(_) => "LLM provider unavailable. Check the model settings and network",

            Self::DuplicateCallId(_) => "The model reused a tool call id",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::ToolError(_) => "Tool operation failed",

            Self::MaxIterationsExceeded => "Task too complex. Try breaking it into smaller steps",
            Self::LoopDetected(_) => "The agent kept repeating itself. Rephrase the request",
            Self::Cancelled => "The run was interrupted",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::LLMProvider(_)
            | Self::MaxIterationsExceeded
            | Self::LoopDetected(_)
            | Self::Cancelled => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
