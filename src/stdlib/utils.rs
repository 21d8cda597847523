//! `@utils/*` commands

use tracing::info;

use super::required_str;
use crate::interpreter::types::{ActionResult, ExecutionContext, Value};
use crate::registry::Arguments;

/// `@utils/set input=<expr>`: yields `input` unchanged
pub fn set(args: &Arguments) -> ActionResult {
    match args.get("input") {
        Value::Absent => ActionResult::failure("input is required"),
        value => ActionResult::ok(value.clone()),
    }
}

/// `@utils/log message=<expr>`
pub fn log(args: &Arguments) -> ActionResult {
    match args.get("message") {
        Value::Absent => ActionResult::failure("message is required"),
        message => {
            let message = message.to_string();
            info!(target: "tempo_core::user", "{}", message);
            ActionResult::empty().with_message(message)
        }
    }
}

/// `@utils/fail [message=<expr>]`: a recoverable failure
pub fn fail(args: &Arguments) -> ActionResult {
    match args.get("message") {
        Value::Absent => ActionResult::failure("failed"),
        message => ActionResult::failure(message.to_string()),
    }
}

/// `@utils/env name="VAR"`: absent when unset
pub fn env(args: &Arguments, context: &ExecutionContext) -> ActionResult {
    let name = match required_str(args, "name") {
        Ok(name) => name,
        Err(failure) => return failure,
    };
    let value = context
        .env
        .get(name)
        .map(|v| Value::from(v.as_str()))
        .unwrap_or_default();
    ActionResult::ok(value)
}
