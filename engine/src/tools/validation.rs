//! Parameter checks run before a capability executes
//!
//! Required names come from the schema's `required` list. Each supplied
//! parameter that the schema describes under `properties` is checked against
//! that property schema with `jsonschema` (type, `enum`, `pattern`, bounds,
//! lengths). Every violation is reported, not just the first.

use jsonschema::validator_for;
use sdk::types::{CallParams, CapabilitySpec};
use serde_json::Value;
use tracing::{debug, warn};

/// Collect every problem with `params` against the spec's parameter schema
pub fn validate_params(spec: &CapabilitySpec, params: &CallParams) -> Vec<String> {
    let mut errors: Vec<String> = spec
        .required_params()
        .into_iter()
        .filter(|param| !params.contains(param))
        .map(|param| format!("missing required parameter: {}", param))
        .collect();

    let Some(properties) = spec.parameters.get("properties").and_then(Value::as_object) else {
        return errors;
    };

    for (field, value) in params.0.iter() {
        let Some(schema) = properties.get(field) else {
            debug!("Unknown parameter '{}' for capability '{}'", field, spec.name);
            continue;
        };
        let validator = match validator_for(schema) {
            Ok(validator) => validator,
            Err(e) => {
                warn!(
                    "Capability '{}' has an invalid schema for '{}': {}",
                    spec.name, field, e
                );
                continue;
            }
        };
        errors.extend(
            validator
                .iter_errors(value)
                .map(|err| format!("parameter '{}': {}", field, err)),
        );
    }

    errors
}
