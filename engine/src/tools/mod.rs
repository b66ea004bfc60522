pub mod edit;
pub mod filesystem;
pub mod git;
pub mod search;
pub mod terminal;
pub mod validation;

pub use edit::{EditFileTool, MultiEditTool};
pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use git::GitTool;
pub use search::GrepTool;
pub use terminal::RunCommandTool;
pub use validation::validate_params;

use sdk::capability::{Capability, CapabilityContext};
use sdk::types::{CallParams, CapabilityResult, CapabilitySpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Names of every built-in capability
pub const BUILTIN_CAPABILITIES: &[&str] = &[
    "read_file",
    "write_file",
    "edit_file",
    "multi_edit",
    "list_dir",
    "grep",
    "run_command",
    "git",
];

/// Longest output handed back to the model from a single call
pub(crate) const MAX_OUTPUT_CHARS: usize = 30_000;

/// Cut `output` to [`MAX_OUTPUT_CHARS`] characters
pub(crate) fn truncate_output(output: String) -> String {
    match output.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}\n... (output truncated)", &output[..cut]),
        None => output,
    }
}

/// Registry of callable capabilities.
///
/// Invocation never fails: unknown names, missing arguments, capability
/// errors and panics all come back as a [`CapabilityResult`] carrying an
/// error, so the model can see what went wrong and self-correct.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in capabilities.
    ///
    /// `enabled` restricts the set by name; `None` enables all of them.
    pub fn with_builtins(enabled: Option<&[String]>, shell_timeout: Duration) -> Self {
        let mut registry = Self::new();
        let all: Vec<Arc<dyn Capability>> = vec![
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
            Arc::new(EditFileTool),
            Arc::new(MultiEditTool),
            Arc::new(ListDirTool),
            Arc::new(GrepTool),
            Arc::new(RunCommandTool::new(shell_timeout)),
            Arc::new(GitTool::default()),
        ];
        for capability in all {
            let name = capability.name();
            let wanted = enabled
                .map(|names| names.iter().any(|n| *n == name))
                .unwrap_or(true);
            if wanted {
                registry.register(capability);
            }
        }
        registry
    }

    /// Register a capability, replacing any previous one with the same name
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name();
        debug!("Registering capability '{}'", name);
        self.capabilities.insert(name, capability)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Descriptions of the capabilities accepted by `filter`, sorted by name
    pub fn manifest(&self, filter: impl Fn(&str) -> bool) -> Vec<CapabilitySpec> {
        let mut specs: Vec<CapabilitySpec> = self
            .capabilities
            .iter()
            .filter(|(name, _)| filter(name.as_str()))
            .map(|(_, capability)| capability.spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Invoke a capability by name
    pub async fn invoke(
        &self,
        name: &str,
        params: &CallParams,
        ctx: &CapabilityContext,
    ) -> CapabilityResult {
        let Some(capability) = self.get(name) else {
            warn!("Unknown capability requested: {}", name);
            return CapabilityResult::failure(
                name,
                format!(
                    "Unknown capability '{}'. Available capabilities: {}",
                    name,
                    self.names().join(", ")
                ),
            );
        };

        let errors = validate_params(&capability.spec(), params);
        if !errors.is_empty() {
            debug!("Rejected parameters for '{}': {} problem(s)", name, errors.len());
            return CapabilityResult::failure(name, errors.join("\n"));
        }

        debug!("Invoking capability '{}' with args: {}", name, params.canonical_json());

        let owned_params = params.clone();
        let owned_ctx = ctx.clone();
        let handle = AbortOnDrop(tokio::spawn(async move {
            capability.execute(&owned_params, &owned_ctx).await
        }));

        let outcome = handle.join().await;
        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!("Capability '{}' failed: {}", name, e);
                CapabilityResult::failure(name, e.to_string())
            }
            Err(e) if e.is_panic() => {
                warn!("Capability '{}' panicked", name);
                CapabilityResult::failure(name, format!("capability '{}' panicked", name))
            }
            Err(e) => CapabilityResult::failure(name, format!("capability task failed: {}", e)),
        };

        if matches!(result.error.as_deref(), Some(e) if e.trim().is_empty()) {
            result.error = Some("unknown error".to_string());
        }
        if result.title.is_empty() {
            result.title = name.to_string();
        }
        result
    }
}

/// Aborts the capability task if the invocation is dropped (run cancelled)
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
