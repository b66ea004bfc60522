//! Pilot SDK
//!
//! Shared library providing traits, types, and utilities for Pilot components.
//! This crate is used by the engine and by anything implementing capabilities.

/// Capability trait and context
pub mod capability;

/// Error types and handling
pub mod errors;

/// Capability input/output types
pub mod types;

// Re-export commonly used types
pub use capability::{Capability, CapabilityContext};
pub use errors::{EngineError, PilotErrorExt};
pub use types::{call_signature, CallParams, CapabilityResult, CapabilitySpec, ToolError};
