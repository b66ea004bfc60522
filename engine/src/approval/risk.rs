//! Risk assessment
//!
//! Every capability call is classified into one of three levels:
//!
//! - **Low**: reads, searches, listings, read-only git
//!   - read_file, list_dir, grep, git status/diff/log/show/branch/blame
//!
//! - **Medium**: changes that are easy to review or revert
//!   - write_file, edit_file, git add/commit, non-destructive shell commands
//!
//! - **High**: destructive or hard to reverse
//!   - multi_edit, shell commands matching a destructive pattern
//!
//! Dangerous flags (--force, -rf, --delete, --hard) always escalate to High.

use sdk::types::CallParams;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tools::git::{READ_ONLY_OPERATIONS, WRITE_OPERATIONS};

/// Substrings that make a shell command destructive (matched lowercase)
const DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf", "rm -fr", "dd if=", "mkfs", "format", "> /dev/", "curl", "wget", "chmod +x", "sudo",
    "su ",
];

/// Flags that escalate any call to High
const DANGEROUS_FLAGS: &[&str] = &["--force", "-rf", "--delete", "--hard"];

/// System locations highlighted when they appear in path arguments
const SYSTEM_PATHS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/proc", "/root", "/sbin", "/sys", "/usr", "/var",
];

/// Risk level of a capability call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// One level up, saturating at High
    pub fn escalate(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium | RiskLevel::High => RiskLevel::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Whether a shell command matches a destructive pattern
pub fn is_dangerous_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    DANGEROUS_COMMAND_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Whether any argument carries a dangerous flag
pub fn has_dangerous_flags<S: AsRef<str>>(args: &[S]) -> bool {
    args.iter().any(|arg| {
        DANGEROUS_FLAGS
            .iter()
            .any(|flag| arg.as_ref().contains(flag))
    })
}

/// Whether an argument value deserves a warning when shown to the user
pub fn is_dangerous_value(key: &str, value: &str) -> bool {
    let key = key.to_lowercase();
    if key.contains("path") || key.contains("file") || key.contains("dir") {
        let value = value.to_lowercase();
        return SYSTEM_PATHS.iter().any(|p| value.starts_with(p));
    }
    if key.contains("command") || key.contains("cmd") {
        return is_dangerous_command(value);
    }
    false
}

/// Classifies capability calls by name and argument content
#[derive(Debug, Default, Clone)]
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn new() -> Self {
        Self
    }

    /// Assess the risk of calling `name` with `params`
    pub fn assess(&self, name: &str, params: &CallParams) -> RiskLevel {
        match name {
            "read_file" | "list_dir" | "grep" => RiskLevel::Low,

            "write_file" | "edit_file" => RiskLevel::Medium,

            "multi_edit" => RiskLevel::High,

            "run_command" => {
                let command = params.param_str_opt("command").unwrap_or_default();
                let tokens: Vec<&str> = command.split_whitespace().collect();
                if is_dangerous_command(command) || has_dangerous_flags(&tokens) {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                }
            }

            "git" => {
                let operation = params.param_str_opt("operation").unwrap_or_default();
                let args = params.param_str_list("args").unwrap_or_default();
                let base = if READ_ONLY_OPERATIONS.contains(&operation) {
                    RiskLevel::Low
                } else if WRITE_OPERATIONS.contains(&operation) {
                    RiskLevel::Medium
                } else {
                    RiskLevel::High
                };
                if has_dangerous_flags(&args) {
                    RiskLevel::High
                } else {
                    base
                }
            }

            _ => RiskLevel::Low,
        }
    }
}
