//! # Interpreter
//!
//! Walks a parsed [`Program`], threading an [`ExecutionContext`] through each
//! step. Every step returns a new context plus a [`Flow`] signal; the input
//! context is never mutated.
//!
//! - Instructions resolve through the [`CommandRegistry`]; pipes through the
//!   [`PipeRegistry`]. Both are handed in at construction.
//! - `if=` and `forEach=` are normalized into `If`/`ForEach` nodes before
//!   execution.
//! - Execution is sequential. The only suspension point is a handler awaiting
//!   an asynchronous result (e.g. a human checkpoint).

pub mod exec_loop;
pub mod expressions;
pub mod statements;
pub mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use thiserror::Error;

use crate::registry::{CommandRegistry, PipeRegistry};

pub use expressions::{EvalResult, EvaluationError, Evaluator};
pub use statements::normalize;
pub use types::{
    ActionLog, ActionResult, BatchResult, ContextStatus, ExecutionContext, Expr, Flow, Program,
    ProgramOutcome, ProgramResult, ScopeChain, Stmt, Value,
};

/// Action path of the no-op label marker that `goto` jumps to
pub const LABEL_ACTION: &str = "@flow/label";

/* ===================== Errors ===================== */

/// Errors that halt a program
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("command not found: {action}")]
    CommandNotFound { action: String },

    #[error("unknown label '{label}'")]
    UnknownLabel { label: String },

    #[error("label '{label}' declared twice (line {line})")]
    DuplicateLabel { label: String, line: usize },

    #[error("{action} failed: {message}")]
    Handler { action: String, message: String },

    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: usize },
}

/// A fatal error together with the context as it stood when execution
/// stopped (including the failed instruction's history entry).
#[derive(Debug, Clone)]
pub struct Halt {
    pub error: RuntimeError,
    pub context: ExecutionContext,
}

impl Halt {
    pub fn new(error: RuntimeError, context: ExecutionContext) -> Box<Self> {
        Box::new(Self { error, context })
    }
}

pub type StepResult = Result<(ExecutionContext, Flow), Box<Halt>>;

/* ===================== Interpreter ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterOptions {
    /// Upper bound on top-level statements executed per program run
    pub max_steps: usize,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self { max_steps: 10_000 }
    }
}

pub struct Interpreter {
    commands: Arc<CommandRegistry>,
    pipes: Arc<PipeRegistry>,
    options: InterpreterOptions,
}

impl Interpreter {
    pub fn new(commands: Arc<CommandRegistry>, pipes: Arc<PipeRegistry>) -> Self {
        Self {
            commands,
            pipes,
            options: InterpreterOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InterpreterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> InterpreterOptions {
        self.options
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn pipes(&self) -> &PipeRegistry {
        &self.pipes
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.pipes)
    }
}
