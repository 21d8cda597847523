//! Built-in applet kinds and their payload schemas

use serde_json::{json, Value as JsonValue};

use super::AppletRequest;

pub const CONFIRM: &str = "confirm";
pub const SELECT: &str = "select";

pub const BUILTIN_KINDS: [&str; 2] = [CONFIRM, SELECT];

/// Yes/no question. Answer: `{"confirmed": bool}`
pub fn confirm(message: &str) -> AppletRequest {
    AppletRequest::new(CONFIRM, json!({ "message": message }))
        .with_input_schema(json!({
            "type": "object",
            "required": ["message"],
            "properties": { "message": { "type": "string", "minLength": 1 } }
        }))
        .with_output_schema(json!({
            "type": "object",
            "required": ["confirmed"],
            "properties": { "confirmed": { "type": "boolean" } }
        }))
}

/// Pick one of `options`. Answer: `{"choice": <one of options>}`
pub fn select(message: &str, options: &[JsonValue]) -> AppletRequest {
    AppletRequest::new(SELECT, json!({ "message": message, "options": options }))
        .with_input_schema(json!({
            "type": "object",
            "required": ["options"],
            "properties": {
                "message": { "type": "string" },
                "options": { "type": "array", "minItems": 1 }
            }
        }))
        .with_output_schema(json!({
            "type": "object",
            "required": ["choice"],
            "properties": { "choice": { "enum": options } }
        }))
}
