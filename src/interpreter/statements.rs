//! Statement execution handlers
//!
//! Each handler takes the current context by reference and returns a fresh
//! context with its effects applied.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, warn};

use super::expressions::EvaluationError;
use super::types::{
    ActionLog, BatchResult, ExecutionContext, Expr, Flow, Instruction, Stmt, Value,
};
use super::{Halt, Interpreter, RuntimeError, StepResult};
use crate::registry::Arguments;

/* ===================== Normalization ===================== */

/// Rewrite `if=` / `forEach=` sugar into explicit nodes.
///
/// When both are present the loop wraps the condition, so the condition sees
/// the iterator binding.
pub fn normalize(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Instruction(mut instruction) => {
            let condition = instruction.condition.take();
            let for_each = instruction.for_each.take();

            let mut stmt = Stmt::Instruction(instruction);
            if let Some(test) = condition {
                stmt = Stmt::If {
                    test,
                    consequent: Box::new(stmt),
                };
            }
            if let Some(binding) = for_each {
                stmt = Stmt::ForEach {
                    iterator: binding.iterator,
                    iterable: binding.iterable,
                    body: Box::new(stmt),
                };
            }
            stmt
        }
        other => other,
    }
}

/* ===================== Statement Handlers ===================== */

impl Interpreter {
    /// Execute one statement against `ctx`, producing a new context and a
    /// flow signal.
    pub async fn execute(&self, stmt: &Stmt, ctx: &ExecutionContext) -> StepResult {
        let stmt = normalize(stmt.clone());
        self.execute_stmt(&stmt, ctx).await
    }

    /// Boxed for recursion through `If`/`ForEach` bodies.
    pub(crate) fn execute_stmt<'a>(
        &'a self,
        stmt: &'a Stmt,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'a>> {
        Box::pin(async move {
            match stmt {
                Stmt::Instruction(instruction) => self.execute_instruction(instruction, ctx).await,
                Stmt::If { test, consequent } => self.execute_if(test, consequent, ctx).await,
                Stmt::ForEach {
                    iterator,
                    iterable,
                    body,
                } => self.execute_for_each(iterator, iterable, body, ctx).await,
            }
        })
    }

    async fn execute_instruction(
        &self,
        instruction: &Instruction,
        ctx: &ExecutionContext,
    ) -> StepResult {
        let key = instruction.action.key();
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut next = ctx.clone();

        debug!(command = %key, line = instruction.line, "Executing instruction");

        let Some(handler) = self.commands.resolve(&key) else {
            let error = RuntimeError::CommandNotFound { action: key.clone() };
            warn!(command = %key, line = instruction.line, "Command not found");
            next.record(ActionLog::failed(
                &key,
                started_at,
                elapsed_ms(timer),
                error.to_string(),
                true,
            ));
            return Err(Halt::new(error, next));
        };

        // Arguments are evaluated eagerly, left to right, against the input context.
        let mut args = Arguments::new();
        for arg in &instruction.args {
            match self.evaluator().evaluate(&arg.value, ctx) {
                Ok(value) => args.insert(arg.name.clone(), value),
                Err(error) => {
                    return Ok(evaluation_failure(&key, instruction.line, ctx, error, started_at, timer))
                }
            }
        }

        let result = match handler.run(args, ctx).await {
            Ok(result) => result,
            Err(e) => {
                let error = RuntimeError::Handler {
                    action: key.clone(),
                    message: format!("{:#}", e),
                };
                warn!(command = %key, line = instruction.line, error = %error, "Command raised an error");
                next.record(ActionLog::failed(
                    &key,
                    started_at,
                    elapsed_ms(timer),
                    error.to_string(),
                    true,
                ));
                return Err(Halt::new(error, next));
            }
        };

        next.user_logs.extend(result.messages.iter().cloned());
        next.record(ActionLog::from_result(
            &key,
            started_at,
            elapsed_ms(timer),
            &result,
        ));

        if let Some(fatal) = &result.fatal_error {
            warn!(command = %key, line = instruction.line, error = %fatal, "Command reported a fatal error");
            let error = RuntimeError::Handler {
                action: key,
                message: fatal.clone(),
            };
            return Err(Halt::new(error, next));
        }

        if !result.success {
            debug!(command = %key, messages = ?result.messages, "Command failed");
        } else if let Some(output) = &instruction.output {
            next.data
                .insert(output.clone(), result.value.clone().unwrap_or_default());
        }

        Ok((next, result.flow.unwrap_or(Flow::Continue)))
    }

    async fn execute_if(&self, test: &Expr, consequent: &Stmt, ctx: &ExecutionContext) -> StepResult {
        let started_at = Utc::now();
        let timer = Instant::now();

        match self.evaluator().evaluate(test, ctx) {
            Ok(value) if value.is_truthy() => self.execute_stmt(consequent, ctx).await,
            Ok(_) => {
                debug!(line = consequent.line(), "Condition is falsy, skipping");
                Ok((ctx.clone(), Flow::Continue))
            }
            Err(error) => Ok(evaluation_failure(
                &command_key(consequent),
                consequent.line(),
                ctx,
                error,
                started_at,
                timer,
            )),
        }
    }

    async fn execute_for_each(
        &self,
        iterator: &str,
        iterable: &Expr,
        body: &Stmt,
        ctx: &ExecutionContext,
    ) -> StepResult {
        let started_at = Utc::now();
        let timer = Instant::now();

        let items = match self.evaluator().evaluate(iterable, ctx) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Absent) => Vec::new(),
            Ok(other) => {
                let error = EvaluationError::NotIterable {
                    found: other.type_name(),
                };
                return Ok(evaluation_failure(
                    &command_key(body),
                    body.line(),
                    ctx,
                    error,
                    started_at,
                    timer,
                ));
            }
            Err(error) => {
                return Ok(evaluation_failure(
                    &command_key(body),
                    body.line(),
                    ctx,
                    error,
                    started_at,
                    timer,
                ))
            }
        };

        let history_start = ctx.meta.history.len();
        let outer_scope = ctx.scope.clone();
        let mut current = ctx.clone();
        let mut flow = Flow::Continue;

        for item in items {
            let mut bindings = HashMap::with_capacity(1);
            bindings.insert(iterator.to_string(), item);
            current.scope = outer_scope.push(bindings);

            let (mut next, next_flow) = match self.execute_stmt(body, &current).await {
                Ok(step) => step,
                Err(mut halt) => {
                    halt.context.scope = outer_scope.clone();
                    return Err(halt);
                }
            };

            // Pop the iteration scope before the next element.
            next.scope = outer_scope.clone();
            current = next;

            if !next_flow.is_continue() {
                flow = next_flow;
                break;
            }
        }

        let batch = BatchResult::from_logs(&current.meta.history[history_start..]);
        debug!(
            iterator,
            total = batch.total,
            failed = batch.failed,
            cost = batch.cost,
            "forEach finished"
        );

        Ok((current, flow))
    }
}

/* ===================== Helpers ===================== */

/// Record an instruction whose arguments, condition or iterable failed to
/// evaluate. The program continues.
fn evaluation_failure(
    command: &str,
    line: usize,
    ctx: &ExecutionContext,
    error: EvaluationError,
    started_at: DateTime<Utc>,
    timer: Instant,
) -> (ExecutionContext, Flow) {
    warn!(command, line, error = %error, "Evaluation failed");

    let mut next = ctx.clone();
    next.record(ActionLog::failed(
        command,
        started_at,
        elapsed_ms(timer),
        error.to_string(),
        false,
    ));
    (next, Flow::Continue)
}

fn command_key(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Instruction(instruction) => instruction.action.key(),
        Stmt::If { consequent, .. } => command_key(consequent),
        Stmt::ForEach { body, .. } => command_key(body),
    }
}

fn elapsed_ms(timer: Instant) -> u64 {
    u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX)
}
