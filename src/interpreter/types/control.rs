//! Flow control signals

use super::values::Value;
use serde::{Deserialize, Serialize};

/// Flow control signal returned alongside the new context after each step.
///
/// Handlers request non-`Continue` flow by attaching it to their
/// `ActionResult`; the interpreter turns it into a jump or termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Flow {
    Continue,
    Goto(String),
    Exit(i32),
    Return(Value),
}

impl Flow {
    pub fn is_continue(&self) -> bool {
        matches!(self, Flow::Continue)
    }
}

/// Observable lifecycle of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextStatus {
    Running,
    WaitingHumanValidation,
    Finished,
    Error,
}
