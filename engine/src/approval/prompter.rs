//! Interactive approval prompts
//!
//! The gate asks an [`ApprovalPrompter`] whenever no policy or memo decides a
//! call. The terminal prompter offers five choices:
//!
//! - `y` approve once, `n` deny once
//! - `a` always approve this capability, `d` always deny it
//! - `s` approve this exact call (same capability, same arguments) from now on

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::types::CallParams;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::risk::{is_dangerous_value, RiskLevel};

/// Longest argument value shown in a prompt
const MAX_VALUE_CHARS: usize = 100;

/// What the user is asked about
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub capability: String,
    pub args: CallParams,
    pub risk: RiskLevel,
    /// Canonical call signature
    pub signature: String,
}

/// How far a reply reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalScope {
    /// This call only
    Once,
    /// Every call with the same signature
    Call,
    /// Every call of the capability
    Capability,
}

/// A prompter's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalReply {
    pub approved: bool,
    pub scope: ApprovalScope,
}

impl ApprovalReply {
    pub fn allow_once() -> Self {
        Self {
            approved: true,
            scope: ApprovalScope::Once,
        }
    }

    pub fn deny_once() -> Self {
        Self {
            approved: false,
            scope: ApprovalScope::Once,
        }
    }
}

/// Asks someone whether a call may run
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    async fn ask(&self, request: &ApprovalRequest) -> Result<ApprovalReply>;
}

/// Denies every call; used when nobody can answer
#[derive(Debug, Default, Clone)]
pub struct DenyAllPrompter;

#[async_trait]
impl ApprovalPrompter for DenyAllPrompter {
    async fn ask(&self, _request: &ApprovalRequest) -> Result<ApprovalReply> {
        Ok(ApprovalReply::deny_once())
    }
}

/// Parse a terminal answer; an empty answer means `y`
pub fn parse_choice(input: &str) -> Option<ApprovalReply> {
    let (approved, scope) = match input.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => (true, ApprovalScope::Once),
        "n" | "no" => (false, ApprovalScope::Once),
        "a" | "always" => (true, ApprovalScope::Capability),
        "d" | "never" => (false, ApprovalScope::Capability),
        "s" => (true, ApprovalScope::Call),
        _ => return None,
    };
    Some(ApprovalReply { approved, scope })
}

/// Text shown for a request
pub fn render_request(request: &ApprovalRequest) -> String {
    let mut lines = vec![
        format!("Tool request: {}", request.capability),
        format!("Risk level: {}", request.risk.to_string().to_uppercase()),
        String::new(),
        "Arguments:".to_string(),
    ];

    for (key, value) in request.args.0.iter() {
        let mut shown = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if let Some((cut, _)) = shown.char_indices().nth(MAX_VALUE_CHARS) {
            shown.truncate(cut);
            shown.push_str("...");
        }
        let marker = if is_dangerous_value(key, &shown) { " (!)" } else { "" };
        lines.push(format!("  {}: {}{}", key, shown, marker));
    }

    if request.risk == RiskLevel::High {
        lines.push(String::new());
        lines.push("WARNING: This is a potentially destructive operation!".to_string());
    }

    lines.push(String::new());
    lines.push("Options:".to_string());
    lines.push("  [y] Approve once".to_string());
    lines.push("  [n] Deny once".to_string());
    lines.push("  [a] Always approve this tool".to_string());
    lines.push("  [d] Always deny this tool".to_string());
    lines.push("  [s] Approve this specific call".to_string());
    lines.join("\n")
}

/// Prompts on stderr and reads the answer from stdin
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompter;

#[async_trait]
impl ApprovalPrompter for TerminalPrompter {
    async fn ask(&self, request: &ApprovalRequest) -> Result<ApprovalReply> {
        let mut stdin = BufReader::new(tokio::io::stdin());
        eprintln!("\n{}", render_request(request));

        loop {
            eprint!("\nApprove [y/n/a/d/s] (y): ");
            std::io::stderr().flush().context("Failed to flush prompt")?;

            let mut line = String::new();
            let read = stdin
                .read_line(&mut line)
                .await
                .context("Failed to read approval answer")?;
            if read == 0 {
                anyhow::bail!("stdin closed while waiting for approval");
            }
            match parse_choice(&line) {
                Some(reply) => return Ok(reply),
                None => eprintln!("Please answer y, n, a, d or s."),
            }
        }
    }
}
