//! Shell command capability
//!
//! Runs a command through `sh -c` in the call's working directory. Every call
//! has its own timeout; the child is killed when it expires or when the call
//! is dropped.

use async_trait::async_trait;
use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::truncate_output;

#[derive(Debug, Clone)]
pub struct RunCommandTool {
    default_timeout: Duration,
}

impl RunCommandTool {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl Capability for RunCommandTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "run_command",
            "Execute a shell command and return its exit code, stdout and stderr.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to run"},
                    "description": {"type": "string", "description": "What the command does, in a few words"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds"},
                    "workdir": {"type": "string", "description": "Directory to run in (default: working directory)"}
                },
                "required": ["command"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let command = params.param_str("command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidParameter("command must not be empty".into()));
        }
        let title = params
            .param_str_opt("description")
            .filter(|d| !d.is_empty())
            .unwrap_or(command)
            .to_string();
        let timeout = params
            .param_u64_opt("timeout")
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let workdir = params
            .param_str_opt("workdir")
            .map(|w| ctx.resolve(w))
            .unwrap_or_else(|| ctx.working_directory.clone());

        info!("Executing command in {}: {}", workdir.display(), command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to start command: {}", e)))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("Command timed out after {} seconds", timeout.as_secs());
                return Err(ToolError::Timeout(timeout.as_secs()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code();

        let mut text = format!(
            "Exit code: {}\n",
            code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
        );
        if !stdout.is_empty() {
            text.push_str(&format!("\nStdout:\n{}", stdout));
        }
        if !stderr.is_empty() {
            text.push_str(&format!("\nStderr:\n{}", stderr));
        }
        let text = truncate_output(text);

        let result = if output.status.success() {
            debug!("Command succeeded");
            CapabilityResult::success(title, text)
        } else {
            debug!("Command failed with status {}", output.status);
            CapabilityResult::failure(title, format!("Command failed with status: {}", output.status))
                .with_output(text)
        };
        Ok(result
            .with_metadata("exit_code", json!(code))
            .with_metadata("cwd", json!(workdir.display().to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> CapabilityContext {
        CapabilityContext::new("s", "m", "build", dir.path())
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let result = RunCommandTool::default()
            .execute(&CallParams::from_value(json!({"command": "ls"})), &ctx(&dir))
            .await
            .unwrap();
        assert!(!result.is_error());
        assert!(result.output.starts_with("Exit code: 0"));
        assert!(result.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error_with_output() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool::default()
            .execute(
                &CallParams::from_value(json!({"command": "echo oops >&2; exit 3", "description": "fail"})),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.title, "fail");
        assert!(result.output.contains("Exit code: 3"));
        assert!(result.output.contains("oops"));
        assert_eq!(result.metadata["exit_code"], json!(3));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool::default()
            .execute(
                &CallParams::from_value(json!({"command": "sleep 5", "timeout": 1})),
                &ctx(&dir),
            )
            .await;
        assert!(matches!(result, Err(ToolError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let dir = TempDir::new().unwrap();
        let result = RunCommandTool::default()
            .execute(&CallParams::from_value(json!({"command": "  "})), &ctx(&dir))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidParameter(_))));
    }
}
