//! Pilot Engine Library
//!
//! This library provides the core functionality of the Pilot agent.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Conversation records: sessions, messages and parts
pub mod record;

/// Document storage module
pub mod storage;

/// Message history and context building
pub mod history;

/// Generation provider abstraction layer
pub mod llm;

/// Built-in capabilities and the capability registry
pub mod tools;

/// Risk classification and approval of capability calls
pub mod approval;

/// Agent loop: orchestrator, repetition detection, profiles
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
