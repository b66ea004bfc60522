//! Agent profiles
//!
//! A profile names an agent, carries its system prompt and decides which
//! capabilities it may see. The capability map is an allow-list where `"*"`
//! sets the default for names not listed; without `"*"` unlisted names are
//! allowed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BUILD_PROMPT: &str = "You are a helpful coding assistant with full access to the codebase.

You can read and edit files, run shell commands, search code and inspect the
repository history.

When working on a task:
1. Understand the request
2. Read the relevant files first
3. Make targeted, precise changes
4. Verify your changes when possible
5. Explain what you did

Be careful with file changes and shell commands.";

const PLAN_PROMPT: &str = "You are a read-only code exploration and analysis assistant.

Explore the codebase, answer questions about its structure and behavior,
identify issues and plan implementation approaches. You cannot edit files,
create files or run commands that change anything. Suggest changes instead
of making them.";

/// Read-only capabilities available to the plan agent
const PLAN_CAPABILITIES: &[&str] = &["read_file", "list_dir", "grep", "git"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    pub system_prompt: String,

    /// Overrides the configured model when set
    #[serde(default)]
    pub model_id: Option<String>,

    /// Overrides the configured iteration limit when set
    #[serde(default)]
    pub max_steps: Option<usize>,

    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
}

impl AgentProfile {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            model_id: None,
            max_steps: None,
            capabilities: BTreeMap::new(),
        }
    }

    pub fn with_capability(mut self, name: impl Into<String>, allowed: bool) -> Self {
        self.capabilities.insert(name.into(), allowed);
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Full-access development agent
    pub fn build() -> Self {
        Self::new("build", "Full-access development agent", BUILD_PROMPT)
            .with_capability("*", true)
    }

    /// Read-only exploration agent
    pub fn plan() -> Self {
        PLAN_CAPABILITIES.iter().fold(
            Self::new("plan", "Read-only code exploration agent", PLAN_PROMPT)
                .with_capability("*", false),
            |profile, name| profile.with_capability(*name, true),
        )
    }

    /// Look up a built-in profile by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "build" => Some(Self::build()),
            "plan" => Some(Self::plan()),
            _ => None,
        }
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["build", "plan"]
    }

    pub fn can_use(&self, capability: &str) -> bool {
        self.capabilities
            .get(capability)
            .or_else(|| self.capabilities.get("*"))
            .copied()
            .unwrap_or(true)
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::build()
    }
}
