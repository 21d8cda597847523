//! Execution result hierarchy: ActionResult -> ActionLog -> BatchResult -> ProgramResult

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use super::control::Flow;
use super::values::Value;

/* ===================== ActionResult ===================== */

/// What a command handler hands back to the interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Set when the handler hit an error the program cannot continue past
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub cost: f64,
    /// Flow request (`goto`, `exit`, `return`); `None` means continue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Flow>,
}

impl ActionResult {
    /// Successful result with no value
    pub fn empty() -> Self {
        Self {
            success: true,
            value: None,
            fatal_error: None,
            messages: Vec::new(),
            cost: 0.0,
            flow: None,
        }
    }

    /// Successful result carrying a value (bound to `output=` if declared)
    pub fn ok(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::empty()
        }
    }

    /// Recoverable failure; the program keeps going
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            messages: vec![message.into()],
            ..Self::empty()
        }
    }

    /// Unrecoverable failure; the program halts
    pub fn fatal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            messages: vec![message.clone()],
            fatal_error: Some(message),
            ..Self::empty()
        }
    }

    /// Successful result that redirects program flow
    pub fn flow(flow: Flow) -> Self {
        Self {
            flow: Some(flow),
            ..Self::empty()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/* ===================== ActionLog ===================== */

/// History entry for one executed instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub command: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    pub cost: f64,
}

impl ActionLog {
    pub fn from_result(
        command: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        result: &ActionResult,
    ) -> Self {
        Self {
            command: command.into(),
            success: result.success,
            started_at,
            duration_ms,
            messages: result.messages.clone(),
            fatal_error: result.fatal_error.clone(),
            cost: result.cost,
        }
    }

    /// Entry for an instruction that failed before or outside its handler
    pub fn failed(
        command: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        message: impl Into<String>,
        fatal: bool,
    ) -> Self {
        let message = message.into();
        Self {
            command: command.into(),
            success: false,
            started_at,
            duration_ms,
            fatal_error: fatal.then(|| message.clone()),
            messages: vec![message],
            cost: 0.0,
        }
    }
}

/* ===================== BatchResult ===================== */

/// Aggregate over a group of ActionLogs (a loop, or a whole program)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cost: f64,
    pub duration_ms: u64,
}

impl BatchResult {
    pub fn from_logs(logs: &[ActionLog]) -> Self {
        logs.iter().fold(Self::default(), |acc, log| Self {
            total: acc.total + 1,
            succeeded: acc.succeeded + usize::from(log.success),
            failed: acc.failed + usize::from(!log.success),
            cost: acc.cost + log.cost,
            duration_ms: acc.duration_ms + log.duration_ms,
        })
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/* ===================== ProgramResult ===================== */

/// How a program run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "v")]
pub enum ProgramOutcome {
    Completed,
    Exited(i32),
    Returned(Value),
    Failed(String),
}

/// Whole-program outcome
#[derive(Debug, Clone)]
pub struct ProgramResult {
    pub outcome: ProgramOutcome,
    pub batch: BatchResult,
    pub context: ExecutionContext,
}

impl ProgramResult {
    pub fn new(outcome: ProgramOutcome, context: ExecutionContext) -> Self {
        Self {
            batch: BatchResult::from_logs(&context.meta.history),
            outcome,
            context,
        }
    }

    /// False when the program halted on a fatal error or any instruction failed
    pub fn success(&self) -> bool {
        !matches!(self.outcome, ProgramOutcome::Failed(_)) && self.batch.success()
    }

    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            ProgramOutcome::Completed | ProgramOutcome::Returned(_) => 0,
            ProgramOutcome::Exited(code) => *code,
            ProgramOutcome::Failed(_) => 1,
        }
    }

    pub fn cost(&self) -> f64 {
        self.batch.cost
    }

    pub fn return_value(&self) -> Option<&Value> {
        match &self.outcome {
            ProgramOutcome::Returned(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ProgramOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}
