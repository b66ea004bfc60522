//! Capability input/output types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Arguments of a capability call, as sent by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallParams(pub Map<String, Value>);

impl CallParams {
    /// Create an empty parameter map
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build parameters from an arbitrary JSON value.
    ///
    /// Anything other than an object is wrapped as `{"value": ...}` so the
    /// capability still sees a map.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<&str, ToolError> {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional u64 parameter
    pub fn param_u64_opt(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(|v| v.as_u64())
    }

    /// Get an optional bool parameter
    pub fn param_bool_opt(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    /// Get an optional list of strings; non-string items are rejected.
    pub fn param_str_list(&self, key: &str) -> Result<Vec<String>, ToolError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(String::from).ok_or_else(|| {
                        ToolError::InvalidParameter(format!("{} must be a list of strings", key))
                    })
                })
                .collect(),
            Some(_) => Err(ToolError::InvalidParameter(format!(
                "{} must be a list of strings",
                key
            ))),
        }
    }

    /// Canonical JSON: compact, with every object's keys sorted recursively.
    pub fn canonical_json(&self) -> String {
        canonicalize(&Value::Object(self.0.clone())).to_string()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for CallParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Signature identifying "the same call": name plus canonical arguments.
///
/// Two calls with identical names and arguments produce the same signature
/// regardless of the key order the model emitted.
pub fn call_signature(name: &str, params: &CallParams) -> String {
    format!("{}:{}", name, params.canonical_json())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Description of a capability, used to build the manifest sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameter object
    pub parameters: Value,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed under the schema's `required` key
    pub fn required_params(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Output from a capability invocation
///
/// A non-empty `error` marks the invocation as failed; `output` may still carry
/// partial output (e.g. stdout of a failing command).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    /// Short description of what was done
    pub title: String,
    /// Text output fed back to the model
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl CapabilityResult {
    /// Create a successful result
    pub fn success(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Create an error result. An empty message is replaced so the error
    /// field is never blank.
    pub fn failure(title: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            title: title.into(),
            output: String::new(),
            error: Some(if error.is_empty() {
                "unknown error".to_string()
            } else {
                error
            }),
            metadata: HashMap::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Capability-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
