//! Configuration management
//!
//! Configuration is stored in TOML format at ~/.pilot/config.toml and created
//! with defaults on first use. Every section and field has a default, so a
//! partial file is enough.
//!
//! # Configuration Sections
//!
//! - **core**: log level, data directory, project id
//! - **runtime**: iteration limit, approval and repetition detection settings,
//!   context limits
//! - **model**: provider, model id, endpoint
//! - **retry**: backoff for transient provider failures
//! - **capabilities**: enabled built-ins, shell timeout
//!
//! # Examples
//!
//! ```no_run
//! use pilot_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Model: {}", config.model.model_id);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::{ContextLimits, RunConfig};
use crate::llm::RetryPolicy;
use crate::tools::BUILTIN_CAPABILITIES;

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const VALID_PROVIDERS: &[&str] = &["ollama"];

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where sessions and messages are stored (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Project that new sessions belong to
    #[serde(default = "default_project_id")]
    pub project_id: String,
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Approve every capability call without asking
    #[serde(default)]
    pub auto_approve: bool,

    #[serde(default = "default_true")]
    pub loop_detection: bool,

    /// Identical consecutive calls that count as a loop (at least 2)
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    #[serde(default = "default_true")]
    pub verbose: bool,

    /// Stored messages loaded into each generation
    #[serde(default = "default_max_conversation_messages")]
    pub max_conversation_messages: usize,

    /// Token budget before the context is pruned
    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: usize,
}

/// Generation provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Retry settings for transient provider failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
}

/// Built-in capability settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Built-ins to register
    #[serde(default = "default_enabled_capabilities")]
    pub enabled: Vec<String>,

    /// Default timeout of `run_command` in seconds
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.pilot")
}

fn default_project_id() -> String {
    "default".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_loop_threshold() -> usize {
    3
}

fn default_max_conversation_messages() -> usize {
    20
}

fn default_context_window_tokens() -> usize {
    100_000
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model_id() -> String {
    "llama3.1:8b".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_enabled_capabilities() -> Vec<String> {
    BUILTIN_CAPABILITIES.iter().map(|s| s.to_string()).collect()
}

fn default_shell_timeout_secs() -> u64 {
    120
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            project_id: default_project_id(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            auto_approve: false,
            loop_detection: true,
            loop_threshold: default_loop_threshold(),
            verbose: true,
            max_conversation_messages: default_max_conversation_messages(),
            context_window_tokens: default_context_window_tokens(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_base: default_backoff_base(),
        }
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_capabilities(),
            shell_timeout_secs: default_shell_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.pilot/config.toml),
    /// creating it with defaults if it doesn't exist.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, creating it with defaults if missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails or
    /// validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        config.process_paths()?;

        Ok(config)
    }

    /// Write the default configuration to `path` and return it
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        let mut config = Self::default();
        config.save(path)?;
        config.process_paths()?;
        Ok(config)
    }

    /// Serialize to TOML and write to `path`
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = self.to_toml()?;
        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// The default configuration file path (~/.pilot/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".pilot").join("config.toml"))
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), EngineError> {
        if !VALID_LOG_LEVELS.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.core.project_id.trim().is_empty() {
            return Err(EngineError::Config("project_id must not be empty".to_string()));
        }

        if !VALID_PROVIDERS.contains(&self.model.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.model.provider,
                VALID_PROVIDERS.join(", ")
            )));
        }

        if self.runtime.max_iterations < 1 {
            return Err(EngineError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        if self.runtime.loop_threshold < 2 {
            return Err(EngineError::Config(
                "loop_threshold must be at least 2".to_string(),
            ));
        }

        if self.retry.max_attempts < 1 {
            return Err(EngineError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }

        if let Some(unknown) = self
            .capabilities
            .enabled
            .iter()
            .find(|name| !BUILTIN_CAPABILITIES.contains(&name.as_str()))
        {
            return Err(EngineError::Config(format!(
                "Unknown capability '{}'. Must be one of: {}",
                unknown,
                BUILTIN_CAPABILITIES.join(", ")
            )));
        }

        Ok(())
    }

    /// Expand ~ in the data directory and create it
    fn process_paths(&mut self) -> Result<(), EngineError> {
        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Directory holding stored sessions and messages
    pub fn storage_dir(&self) -> PathBuf {
        self.core.data_dir.join("storage")
    }

    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            max_iterations: self.runtime.max_iterations,
            auto_approve: self.runtime.auto_approve,
            loop_detection: self.runtime.loop_detection,
            loop_threshold: self.runtime.loop_threshold,
            verbose: self.runtime.verbose,
        }
    }

    pub fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            max_messages: self.runtime.max_conversation_messages,
            max_tokens: self.runtime.context_window_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_base: self.retry.backoff_base,
        }
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.capabilities.shell_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_secs)
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.model.provider, "ollama");
        assert_eq!(config.runtime.max_iterations, 10);
        assert_eq!(config.runtime.loop_threshold, 3);
        assert!(config.runtime.loop_detection);
        assert!(!config.runtime.auto_approve);
        assert_eq!(config.capabilities.enabled.len(), BUILTIN_CAPABILITIES.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[runtime]\nmax_iterations = 4\n").unwrap();
        assert_eq!(config.runtime.max_iterations, 4);
        assert_eq!(config.runtime.loop_threshold, 3);
        assert_eq!(config.model, ModelConfig::default());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = config.to_toml().unwrap();
        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.runtime.auto_approve = true;
        config.runtime.max_conversation_messages = 7;
        config.retry.initial_delay_ms = 10;

        let run = config.to_run_config();
        assert!(run.auto_approve);
        assert_eq!(run.max_iterations, 10);
        assert_eq!(config.context_limits().max_messages, 7);
        assert_eq!(config.retry_policy().initial_delay, Duration::from_millis(10));
        assert_eq!(config.shell_timeout(), Duration::from_secs(120));
    }
}
