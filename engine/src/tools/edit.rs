//! Find-and-replace editing
//!
//! `edit_file` changes one file; `multi_edit` applies a batch of edits across
//! files all-or-nothing: every edit is computed in memory first, and files
//! already written are restored if a later write fails.

use async_trait::async_trait;
use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Replace `old` with `new` in `content`.
///
/// Without `replace_all`, `old` must occur exactly once. Returns the new
/// content and the number of replacements.
pub(crate) fn apply_edit(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, usize), String> {
    if old.is_empty() {
        return Err("old_string must not be empty".to_string());
    }
    if old == new {
        return Err("old_string and new_string must be different".to_string());
    }

    let occurrences = content.matches(old).count();
    match (occurrences, replace_all) {
        (0, _) => Err("old_string not found in file".to_string()),
        (1, _) | (_, true) => Ok((content.replace(old, new), occurrences)),
        (_, false) => Err(format!(
            "old_string appears {} times; use replace_all=true or include more context",
            occurrences
        )),
    }
}

fn line_delta(before: &str, after: &str) -> i64 {
    after.lines().count() as i64 - before.lines().count() as i64
}

/// Replace text in a single file
pub struct EditFileTool;

#[async_trait]
impl Capability for EditFileTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "edit_file",
            "Replace exact text in a file. old_string must match exactly once \
             unless replace_all is true.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path of the file to edit"},
                    "old_string": {"type": "string", "description": "Exact text to replace"},
                    "new_string": {"type": "string", "description": "Replacement text"},
                    "replace_all": {"type": "boolean", "description": "Replace every occurrence (default: false)"}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let path = ctx.resolve(params.param_str("path")?);
        let old = params.param_str("old_string")?;
        let new = params.param_str("new_string")?;
        let replace_all = params.param_bool_opt("replace_all").unwrap_or(false);
        let title = format!("Edit {}", path.display());

        let before = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(CapabilityResult::failure(
                    title,
                    format!("Failed to read {}: {}", path.display(), e),
                ))
            }
        };

        let (after, occurrences) = match apply_edit(&before, old, new, replace_all) {
            Ok(edited) => edited,
            Err(e) => return Ok(CapabilityResult::failure(title, e)),
        };

        info!("Editing {} ({} replacements)", path.display(), occurrences);
        fs::write(&path, &after).await?;

        Ok(CapabilityResult::success(
            format!("Edited {}", path.display()),
            format!("Replaced {} occurrence(s) in {}", occurrences, path.display()),
        )
        .with_metadata("occurrences", json!(occurrences))
        .with_metadata("line_delta", json!(line_delta(&before, &after))))
    }
}

#[derive(Debug, Deserialize)]
struct EditSpec {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

/// Apply a batch of edits across files
pub struct MultiEditTool;

#[async_trait]
impl Capability for MultiEditTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "multi_edit",
            "Apply several find-and-replace edits, possibly across files, as one \
             all-or-nothing operation. Edits to the same file apply in order.",
            json!({
                "type": "object",
                "properties": {
                    "edits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {"type": "string"},
                                "old_string": {"type": "string"},
                                "new_string": {"type": "string"},
                                "replace_all": {"type": "boolean"}
                            },
                            "required": ["path", "old_string", "new_string"]
                        }
                    },
                    "dry_run": {"type": "boolean", "description": "Check the edits without writing (default: false)"}
                },
                "required": ["edits"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let edits: Vec<EditSpec> = serde_json::from_value(
            params.get("edits").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| ToolError::InvalidParameter(format!("edits: {}", e)))?;
        if edits.is_empty() {
            return Err(ToolError::InvalidParameter("edits must not be empty".into()));
        }
        let dry_run = params.param_bool_opt("dry_run").unwrap_or(false);

        // Original and edited content per file, in path order.
        let mut files: BTreeMap<PathBuf, (String, String)> = BTreeMap::new();
        let mut total = 0;
        for (index, edit) in edits.iter().enumerate() {
            let path = ctx.resolve(&edit.path);
            if !files.contains_key(&path) {
                let content = fs::read_to_string(&path).await.map_err(|e| {
                    ToolError::ExecutionFailed(format!(
                        "edit {}: failed to read {}: {}",
                        index + 1,
                        path.display(),
                        e
                    ))
                })?;
                files.insert(path.clone(), (content.clone(), content));
            }
            let Some((_, current)) = files.get_mut(&path) else {
                continue;
            };
            let (edited, occurrences) =
                apply_edit(current, &edit.old_string, &edit.new_string, edit.replace_all).map_err(
                    |e| ToolError::ExecutionFailed(format!("edit {} ({}): {}", index + 1, path.display(), e)),
                )?;
            *current = edited;
            total += occurrences;
        }

        let mut summary: Vec<String> = files
            .iter()
            .map(|(path, (before, after))| {
                format!("{} ({:+} lines)", path.display(), line_delta(before, after))
            })
            .collect();

        if dry_run {
            summary.insert(0, format!("Dry run: {} edits would change {} file(s)", edits.len(), files.len()));
            return Ok(CapabilityResult::success("Multi-edit (dry run)", summary.join("\n"))
                .with_metadata("files", json!(files.len())));
        }

        let mut written: Vec<(&PathBuf, &String)> = Vec::new();
        for (path, (before, after)) in &files {
            if let Err(e) = fs::write(path, after).await {
                for (done, original) in &written {
                    if let Err(restore) = fs::write(done, original).await {
                        warn!("Failed to restore {}: {}", done.display(), restore);
                    }
                }
                return Err(ToolError::ExecutionFailed(format!(
                    "failed to write {}: {} (earlier files restored)",
                    path.display(),
                    e
                )));
            }
            written.push((path, before));
        }

        info!("Multi-edit applied {} edits to {} files", edits.len(), files.len());
        summary.insert(
            0,
            format!("Applied {} edits ({} replacements) to {} file(s)", edits.len(), total, files.len()),
        );
        Ok(CapabilityResult::success(
            format!("Edited {} file(s)", files.len()),
            summary.join("\n"),
        )
        .with_metadata("files", json!(files.len()))
        .with_metadata("replacements", json!(total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CapabilityContext) {
        let temp = TempDir::new().unwrap();
        let ctx = CapabilityContext::new("s", "m", "build", temp.path());
        (temp, ctx)
    }

    #[test]
    fn test_apply_edit_rules() {
        assert_eq!(apply_edit("a b a", "b", "c", false).unwrap(), ("a c a".to_string(), 1));
        assert!(apply_edit("a b a", "a", "c", false).unwrap_err().contains("2 times"));
        assert_eq!(apply_edit("a b a", "a", "c", true).unwrap(), ("c b c".to_string(), 2));
        assert!(apply_edit("abc", "x", "y", false).is_err());
        assert!(apply_edit("abc", "a", "a", false).is_err());
        assert!(apply_edit("abc", "", "y", false).is_err());
    }

    #[tokio::test]
    async fn test_edit_file() {
        let (temp, ctx) = setup();
        std::fs::write(temp.path().join("main.rs"), "fn old() {}\n").unwrap();

        let result = EditFileTool
            .execute(
                &CallParams::from_value(json!({
                    "path": "main.rs", "old_string": "old", "new_string": "new"
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("main.rs")).unwrap(),
            "fn new() {}\n"
        );

        let missing = EditFileTool
            .execute(
                &CallParams::from_value(json!({
                    "path": "main.rs", "old_string": "absent", "new_string": "x"
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(missing.error.as_deref(), Some("old_string not found in file"));
    }

    #[tokio::test]
    async fn test_multi_edit_is_all_or_nothing() {
        let (temp, ctx) = setup();
        std::fs::write(temp.path().join("a.txt"), "alpha\n").unwrap();
        std::fs::write(temp.path().join("b.txt"), "beta\n").unwrap();

        let failed = MultiEditTool
            .execute(
                &CallParams::from_value(json!({"edits": [
                    {"path": "a.txt", "old_string": "alpha", "new_string": "ALPHA"},
                    {"path": "b.txt", "old_string": "missing", "new_string": "x"}
                ]})),
                &ctx,
            )
            .await;
        assert!(failed.is_err());
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "alpha\n");

        let applied = MultiEditTool
            .execute(
                &CallParams::from_value(json!({"edits": [
                    {"path": "a.txt", "old_string": "alpha", "new_string": "ALPHA"},
                    {"path": "a.txt", "old_string": "ALPHA", "new_string": "Alpha"},
                    {"path": "b.txt", "old_string": "beta", "new_string": "BETA"}
                ]})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(applied.metadata["files"], json!(2));
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "Alpha\n");
        assert_eq!(std::fs::read_to_string(temp.path().join("b.txt")).unwrap(), "BETA\n");
    }

    #[tokio::test]
    async fn test_multi_edit_dry_run_writes_nothing() {
        let (temp, ctx) = setup();
        std::fs::write(temp.path().join("a.txt"), "alpha\n").unwrap();

        let result = MultiEditTool
            .execute(
                &CallParams::from_value(json!({
                    "dry_run": true,
                    "edits": [{"path": "a.txt", "old_string": "alpha", "new_string": "x"}]
                })),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.output.starts_with("Dry run"));
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "alpha\n");
    }
}
