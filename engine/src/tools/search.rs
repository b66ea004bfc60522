//! Content search
//!
//! `grep` walks a directory tree with `ignore::WalkBuilder` and matches lines
//! with the `regex` crate. Hidden entries, gitignored paths, common build
//! output and binary files are skipped. Symlinks are not followed.

use async_trait::async_trait;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::{Match, WalkBuilder};
use regex::{Regex, RegexBuilder};
use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec, ToolError};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__"];

/// Build a file-name filter from an `include` glob (`*.rs`, `*.{rs,toml}`, `[ab].py`)
fn include_filter(root: &Path, glob: &str) -> Result<Override, ignore::Error> {
    let mut builder = OverrideBuilder::new(root);
    builder.add(glob)?;
    builder.build()
}

struct Search {
    pattern: Regex,
    include: Option<Override>,
    max_results: usize,
    matches: Vec<String>,
    truncated: bool,
}

impl Search {
    fn walk(&mut self, root: &Path, base: &Path) {
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let name = entry.file_name().to_string_lossy();
                !(is_dir && SKIPPED_DIRS.contains(&&*name))
            })
            .build();

        for entry in walker.flatten() {
            if self.truncated {
                return;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if let Some(include) = &self.include {
                match include.matched(path, false) {
                    Match::None | Match::Ignore(..) => continue,
                    Match::Whitelist(..) => {}
                }
            }
            self.search_file(path, base);
        }
    }

    fn search_file(&mut self, path: &Path, root: &Path) {
        if std::fs::metadata(path).map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            return;
        }
        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        if bytes.contains(&0) {
            return;
        }
        let content = String::from_utf8_lossy(&bytes);
        let display = path.strip_prefix(root).unwrap_or(path).display().to_string();

        for (number, line) in content.lines().enumerate() {
            if self.pattern.is_match(line) {
                if self.matches.len() >= self.max_results {
                    self.truncated = true;
                    return;
                }
                self.matches.push(format!("{}:{}:{}", display, number + 1, line.trim_end()));
            }
        }
    }
}

/// Regex search over file contents
pub struct GrepTool;

#[async_trait]
impl Capability for GrepTool {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "grep",
            "Search file contents with a regular expression. \
             Returns matching lines as path:line:text.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression to search for"},
                    "path": {"type": "string", "description": "File or directory to search (default: working directory)"},
                    "include": {"type": "string", "description": "File name glob to include (e.g. '*.rs')"},
                    "case_insensitive": {"type": "boolean"},
                    "max_results": {"type": "integer", "description": "Maximum matches to return (default: 100)"}
                },
                "required": ["pattern"]
            }),
        )
    }

    async fn execute(
        &self,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityResult, ToolError> {
        let raw_pattern = params.param_str("pattern")?;
        let title = format!("Searched for '{}'", raw_pattern);
        let pattern = RegexBuilder::new(raw_pattern)
            .case_insensitive(params.param_bool_opt("case_insensitive").unwrap_or(false))
            .build()
            .map_err(|e| ToolError::InvalidParameter(format!("pattern: {}", e)))?;
        let root = ctx.resolve(params.param_str_opt("path").unwrap_or("."));
        if !root.exists() {
            return Ok(CapabilityResult::failure(
                title,
                format!("Path does not exist: {}", root.display()),
            ));
        }
        let base: PathBuf = if root.is_dir() {
            root.clone()
        } else {
            root.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        let include = params
            .param_str_opt("include")
            .map(|glob| include_filter(&base, glob))
            .transpose()
            .map_err(|e| ToolError::InvalidParameter(format!("include: {}", e)))?;
        let max_results = params
            .param_u64_opt("max_results")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .max(1);

        let mut search = Search {
            pattern,
            include,
            max_results,
            matches: Vec::new(),
            truncated: false,
        };
        let search = tokio::task::spawn_blocking(move || {
            search.walk(&root, &base);
            search
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("search task failed: {}", e)))?;

        debug!("grep '{}' found {} matches", raw_pattern, search.matches.len());

        let count = search.matches.len();
        let output = if count == 0 {
            "No matches found.".to_string()
        } else if search.truncated {
            format!(
                "{}\n\n... (stopped after {} matches)",
                search.matches.join("\n"),
                count
            )
        } else {
            search.matches.join("\n")
        };

        Ok(CapabilityResult::success(title, output)
            .with_metadata("matches", json!(count))
            .with_metadata("truncated", json!(search.truncated)))
    }
}
