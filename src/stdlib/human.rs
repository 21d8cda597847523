//! `@human/*` commands: suspend the program on an applet until a human
//! answers, the deadline passes, or the instance is terminated.

use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::required_str;
use crate::applet::{kinds, AppletRequest, Terminator};
use crate::interpreter::types::{
    ActionResult, ContextStatus, ExecutionContext, StatusMonitor, Value,
};
use crate::registry::Arguments;

/// `@human/confirm message="..." [timeout=<secs>]`: yields a boolean
pub async fn confirm(args: &Arguments, context: &ExecutionContext) -> ActionResult {
    let message = match required_str(args, "message") {
        Ok(message) => message,
        Err(failure) => return failure,
    };
    let request = match with_timeout(kinds::confirm(message), args) {
        Ok(request) => request,
        Err(failure) => return failure,
    };

    match checkpoint(request, context).await {
        Ok(answer) => ActionResult::ok(answer_field(answer, "confirmed")),
        Err(failure) => failure,
    }
}

/// `@human/select options=[...] [message="..."] [timeout=<secs>]`: yields
/// the chosen option
pub async fn select(args: &Arguments, context: &ExecutionContext) -> ActionResult {
    let options: Vec<JsonValue> = match args.get("options") {
        Value::Array(items) => items.iter().map(Value::to_json).collect(),
        Value::Absent => return ActionResult::failure("options is required"),
        other => {
            return ActionResult::failure(format!(
                "options must be an array, got {}",
                other.type_name()
            ))
        }
    };
    let message = match args.get("message") {
        Value::Absent => "Select an option".to_string(),
        message => message.to_string(),
    };
    let request = match with_timeout(kinds::select(&message, &options), args) {
        Ok(request) => request,
        Err(failure) => return failure,
    };

    match checkpoint(request, context).await {
        Ok(answer) => ActionResult::ok(answer_field(answer, "choice")),
        Err(failure) => failure,
    }
}

/// Launch, flag the context as waiting, await the settled outcome.
/// Launch and settle errors are recoverable failures.
async fn checkpoint(
    request: AppletRequest,
    context: &ExecutionContext,
) -> Result<JsonValue, ActionResult> {
    let Some(launcher) = &context.applet_launcher else {
        return Err(ActionResult::failure("no applet launcher available"));
    };

    let session = launcher
        .launch(request)
        .await
        .map_err(|e| ActionResult::failure(e.to_string()))?;
    info!(
        applet = session.id(),
        kind = session.kind(),
        url = %session.url(),
        deadline = %session.deadline(),
        "Waiting for human validation"
    );

    let mut waiting = Waiting::enter(context.monitor(), session.terminator());
    let outcome = session.wait().await;
    waiting.settled();

    outcome.map_err(|e| ActionResult::failure(e.to_string()))
}

/// Marks the context as waiting for as long as it lives. Dropping it puts
/// the status back to `Running`, and terminates the applet if the wait was
/// abandoned before it settled.
struct Waiting<'a> {
    monitor: &'a StatusMonitor,
    pending: Option<Terminator>,
}

impl<'a> Waiting<'a> {
    fn enter(monitor: &'a StatusMonitor, terminator: Terminator) -> Self {
        monitor.set(ContextStatus::WaitingHumanValidation);
        Self {
            monitor,
            pending: Some(terminator),
        }
    }

    fn settled(&mut self) {
        self.pending = None;
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.monitor.set(ContextStatus::Running);
        let Some(terminator) = self.pending.take() else {
            return;
        };
        warn!(applet = terminator.id(), "Checkpoint abandoned, terminating applet");
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(async move {
                terminator.terminate().await;
            });
        }
    }
}

fn with_timeout(request: AppletRequest, args: &Arguments) -> Result<AppletRequest, ActionResult> {
    let timeout = match args.get("timeout") {
        Value::Absent => return Ok(request),
        Value::Num(secs) if *secs > 0.0 => Duration::try_from_secs_f64(*secs).ok(),
        _ => None,
    };
    match timeout {
        Some(timeout) => Ok(request.with_timeout(timeout)),
        None => Err(ActionResult::failure(format!(
            "timeout must be a positive number of seconds, got {}",
            args.get("timeout")
        ))),
    }
}

fn answer_field(answer: JsonValue, field: &str) -> Value {
    match answer {
        JsonValue::Object(mut map) => map.remove(field).map(Value::from).unwrap_or_default(),
        _ => Value::Absent,
    }
}
