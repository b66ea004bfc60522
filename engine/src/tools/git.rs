//! Version-control capability
//!
//! Wraps a fixed set of git operations. Read-only operations get sensible
//! default flags; `add` and `commit` are the only ones that change the
//! repository.

use async_trait::async_trait;
use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::truncate_output;

/// Operations that never change the repository
pub const READ_ONLY_OPERATIONS: &[&str] = &["status", "diff", "log", "show", "branch", "blame"];

/// Operations that stage or record changes
pub const WRITE_OPERATIONS: &[&str] = &["add", "commit"];

/// Walk up from `start` looking for a `.git` entry
fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Build the git argument list for an operation
fn build_args(operation: &str, args: &[String], message: Option<&str>) -> Vec<String> {
    let mut cmd = vec![operation.to_string()];
    match operation {
        "status" => cmd.extend(["--short".to_string(), "--branch".to_string()]),
        "log" if !args.iter().any(|a| a.starts_with('-')) => {
            cmd.extend(["--oneline".to_string(), "--max-count=20".to_string()])
        }
        "diff" if args.is_empty() => cmd.push("HEAD".to_string()),
        "branch" if args.is_empty() => cmd.push("-v".to_string()),
        "commit" => {
            if let Some(message) = message {
                cmd.extend(["-m".to_string(), message.to_string()]);
            }
        }
        _ => {}
    }
    cmd.extend(args.iter().cloned());
    cmd
}

#[derive(Debug, Clone)]
pub struct GitTool {
    timeout: Duration,
}

impl Default for GitTool {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Capability for GitTool {
    fn spec(&self) -> CapabilitySpec {
        let operations: Vec<&str> = READ_ONLY_OPERATIONS
            .iter()
            .chain(WRITE_OPERATIONS.iter())
            .copied()
            .collect();
        CapabilitySpec::new(
            "git",
            "Run a git operation in the repository containing the working directory. \
             status, diff, log, show, branch and blame are read-only; add and commit \
             change the repository.",
            json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "enum": operations},
                    "args": {"type": "array", "items": {"type": "string"}, "description": "Extra arguments"},
                    "message": {"type": "string", "description": "Commit message (commit only)"},
                    "path": {"type": "string", "description": "Repository path (default: working directory)"}
                },
                "required": ["operation"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let operation = params.param_str("operation")?;
        let title = format!("Git {}", operation);
        if !READ_ONLY_OPERATIONS.contains(&operation) && !WRITE_OPERATIONS.contains(&operation) {
            return Err(ToolError::InvalidParameter(format!(
                "unsupported git operation '{}'",
                operation
            )));
        }
        let args = params.param_str_list("args")?;
        let message = params.param_str_opt("message");
        if operation == "commit" && message.is_none() && !args.iter().any(|a| a == "-m") {
            return Err(ToolError::MissingParameter("message".into()));
        }

        let start = params
            .param_str_opt("path")
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.working_directory.clone());
        if !start.exists() {
            return Ok(CapabilityResult::failure(
                title,
                format!("Path does not exist: {}", start.display()),
            ));
        }
        let Some(repo) = find_repo_root(&start) else {
            return Ok(CapabilityResult::failure(
                title,
                format!("Not a git repository: {}", start.display()),
            ));
        };

        let git_args = build_args(operation, &args, message);
        info!("Running git {} in {}", git_args.join(" "), repo.display());

        let child = Command::new("git")
            .args(&git_args)
            .current_dir(&repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ToolError::ExecutionFailed("git is not installed or not found in PATH".into())
                }
                _ => ToolError::ExecutionFailed(format!("Failed to run git: {}", e)),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout(self.timeout.as_secs()))??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let mut text = truncate_output(stdout);
        if !output.status.success() && !stderr.is_empty() {
            text.push_str(&format!("\nErrors:\n{}", stderr));
        }
        if text.trim().is_empty() {
            text = "(no output)".to_string();
        }

        let code = output.status.code();
        debug!("git {} exited with {:?}", operation, code);
        let result = if output.status.success() {
            CapabilityResult::success(title, text)
        } else {
            CapabilityResult::failure(
                title,
                format!(
                    "Git command failed with exit code {}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
                ),
            )
            .with_output(text)
        };
        Ok(result
            .with_metadata("operation", json!(operation))
            .with_metadata("exit_code", json!(code))
            .with_metadata("repo_path", json!(repo.display().to_string())))
    }
}
