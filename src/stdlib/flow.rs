//! `@flow/*` commands
//!
//! These never touch the context; they hand a [`Flow`] request back to the
//! interpreter.

use super::required_str;
use crate::interpreter::types::{ActionResult, Flow, Value};
use crate::registry::Arguments;

/// `@flow/label name="..."`: jump target, no-op when executed
pub fn label(args: &Arguments) -> ActionResult {
    match required_str(args, "name") {
        Ok(_) => ActionResult::empty(),
        Err(failure) => failure,
    }
}

/// `@flow/goto label="..."`
pub fn goto(args: &Arguments) -> ActionResult {
    match required_str(args, "label") {
        Ok(label) => ActionResult::flow(Flow::Goto(label.to_string())),
        Err(failure) => failure,
    }
}

/// `@flow/exit [code=<int>]`, code defaults to 0
pub fn exit(args: &Arguments) -> ActionResult {
    let code = match args.get("code") {
        Value::Absent => 0,
        Value::Num(n) if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 => {
            *n as i32
        }
        other => {
            return ActionResult::failure(format!("code must be an integer, got {}", other))
        }
    };
    ActionResult::flow(Flow::Exit(code))
}

/// `@flow/return [value=<expr>]`
pub fn ret(args: &Arguments) -> ActionResult {
    ActionResult::flow(Flow::Return(args.get("value").clone()))
}
