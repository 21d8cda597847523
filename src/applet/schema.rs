//! JSON Schema validation for applet payloads

use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;

use super::AppletError;

pub struct CompiledSchema {
    schema: JSONSchema,
}

impl CompiledSchema {
    pub fn compile(schema: &JsonValue) -> Result<Self, AppletError> {
        JSONSchema::compile(schema)
            .map(|schema| Self { schema })
            .map_err(|e| AppletError::Validation {
                message: format!("invalid schema: {}", e),
            })
    }

    /// All violations, joined into one message
    pub fn validate(&self, instance: &JsonValue) -> Result<(), AppletError> {
        self.schema.validate(instance).map_err(|errors| {
            let message = errors
                .map(|e| match e.instance_path.to_string() {
                    path if path.is_empty() => e.to_string(),
                    path => format!("{}: {}", path, e),
                })
                .collect::<Vec<_>>()
                .join("; ");
            AppletError::Validation { message }
        })
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompiledSchema")
    }
}
