//! Filesystem capabilities
//!
//! `read_file`, `write_file` and `list_dir`. Relative paths resolve against
//! the call's working directory.

use async_trait::async_trait;
use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};
use serde_json::json;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use super::truncate_output;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a file with line numbers, optionally a line range
pub struct ReadFileTool;

#[async_trait]
impl Capability for ReadFileTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "read_file",
            "Read the contents of a file. Output lines are numbered starting at 1. \
             Use offset and limit to read part of a large file.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path of the file to read"},
                    "offset": {"type": "integer", "description": "Line to start from (0-indexed)"},
                    "limit": {"type": "integer", "description": "Number of lines to read"}
                },
                "required": ["path"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let path = ctx.resolve(params.param_str("path")?);
        let offset = params.param_u64_opt("offset").unwrap_or(0) as usize;
        let limit = params.param_u64_opt("limit").map(|l| l as usize);
        let title = format!("Read {}", file_name(&path));
        info!("Reading file: {}", path.display());

        match fs::metadata(&path).await {
            Ok(meta) if !meta.is_file() => {
                return Ok(CapabilityResult::failure(
                    title,
                    format!("Path is not a file: {}", path.display()),
                ))
            }
            Ok(_) => {}
            Err(_) => {
                return Ok(CapabilityResult::failure(
                    title,
                    format!("File not found: {}", path.display()),
                ))
            }
        }

        let bytes = fs::read(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read {}: {}", path.display(), e)))?;
        let content = String::from_utf8_lossy(&bytes);

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let end = limit
            .map(|l| offset.saturating_add(l).min(total))
            .unwrap_or(total);
        let selected = if offset < end { &lines[offset..end] } else { &[][..] };

        let output = selected
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}\t{}", offset + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        debug!("Read {} of {} lines from {}", selected.len(), total, path.display());
        Ok(CapabilityResult::success(title, truncate_output(output))
            .with_metadata("path", json!(path.display().to_string()))
            .with_metadata("total_lines", json!(total))
            .with_metadata("lines_read", json!(selected.len())))
    }
}

/// Create or overwrite a file
pub struct WriteFileTool;

#[async_trait]
impl Capability for WriteFileTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "write_file",
            "Write content to a file, replacing it if it exists. \
             Parent directories are created as needed.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path of the file to write"},
                    "content": {"type": "string", "description": "Full file contents"}
                },
                "required": ["path", "content"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let path = ctx.resolve(params.param_str("path")?);
        let content = params.param_str("content")?;
        let existed = fs::try_exists(&path).await.unwrap_or(false);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!(
                    "Failed to create directories {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        info!("Writing {} bytes to: {}", content.len(), path.display());
        fs::write(&path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to write {}: {}", path.display(), e)))?;

        let verb = if existed { "Updated" } else { "Created" };
        Ok(CapabilityResult::success(
            format!("{} {}", verb, file_name(&path)),
            format!("Wrote {} bytes to {}", content.len(), path.display()),
        )
        .with_metadata("path", json!(path.display().to_string()))
        .with_metadata("created", json!(!existed)))
    }
}

/// List a directory
pub struct ListDirTool;

#[async_trait]
impl Capability for ListDirTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "list_dir",
            "List files and directories at a path. Returns entries with type, size, and name.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list (default: working directory)"}
                }
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let path = ctx.resolve(params.param_str_opt("path").unwrap_or("."));
        info!("Listing directory: {}", path.display());

        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => {
                return Ok(CapabilityResult::failure(
                    format!("List {}", path.display()),
                    format!("Failed to read directory {}: {}", path.display(), e),
                ))
            }
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut links = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                dirs.push(format!("d  {}/", name));
            } else if ft.is_symlink() {
                links.push(format!("l  {}", name));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push(format!("f  {:>8}  {}", format_size(size), name));
            }
        }

        dirs.sort();
        files.sort();
        links.sort();

        let count = dirs.len() + files.len() + links.len();
        let mut out = Vec::with_capacity(count + 1);
        out.push(format!("{}/  ({} entries)", path.display(), count));
        out.extend(dirs);
        out.extend(files);
        out.extend(links);

        Ok(
            CapabilityResult::success(format!("List {}", path.display()), out.join("\n"))
                .with_metadata("count", json!(count)),
        )
    }
}

/// Format a byte count into a human-readable size string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
