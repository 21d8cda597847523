//! Program execution loop
//!
//! Drives top-level statements with a program counter so that `goto` can
//! move it. Labels are indexed once, before the first statement runs.

use std::collections::HashMap;
use tracing::{info, warn};

use super::statements::normalize;
use super::types::{
    ContextStatus, ExecutionContext, Expr, Flow, Program, ProgramOutcome, ProgramResult, Stmt,
};
use super::{Halt, Interpreter, RuntimeError, LABEL_ACTION};

impl Interpreter {
    /// Run every statement of `program` in order, starting from `ctx`.
    ///
    /// Never returns an `Err`: fatal errors are folded into a
    /// [`ProgramOutcome::Failed`] result carrying the context as it stood.
    pub async fn execute_program(&self, program: &Program, ctx: ExecutionContext) -> ProgramResult {
        let statements: Vec<Stmt> = program.statements.iter().cloned().map(normalize).collect();

        let mut ctx = ctx;
        ctx.set_status(ContextStatus::Running);

        let labels = match index_labels(&statements) {
            Ok(labels) => labels,
            Err(error) => return finish_halted(Halt { error, context: ctx }),
        };

        info!(statements = statements.len(), labels = labels.len(), "Program started");

        let max_steps = self.options.max_steps;
        let mut pc = 0;
        let mut steps = 0;

        while let Some(stmt) = statements.get(pc) {
            if steps >= max_steps {
                let error = RuntimeError::StepLimitExceeded { limit: max_steps };
                return finish_halted(Halt { error, context: ctx });
            }
            steps += 1;

            let (next, flow) = match self.execute_stmt(stmt, &ctx).await {
                Ok(step) => step,
                Err(halt) => return finish_halted(*halt),
            };
            ctx = next;

            match flow {
                Flow::Continue => pc += 1,
                Flow::Goto(label) => match labels.get(&label) {
                    Some(&target) => pc = target,
                    None => {
                        let error = RuntimeError::UnknownLabel { label };
                        return finish_halted(Halt { error, context: ctx });
                    }
                },
                Flow::Exit(code) => return finish(ProgramOutcome::Exited(code), ctx),
                Flow::Return(value) => return finish(ProgramOutcome::Returned(value), ctx),
            }
        }

        finish(ProgramOutcome::Completed, ctx)
    }
}

/* ===================== Labels ===================== */

/// Map label name -> statement index for every top-level `@flow/label`
/// whose `name` is a string literal.
fn index_labels(statements: &[Stmt]) -> Result<HashMap<String, usize>, RuntimeError> {
    let mut labels = HashMap::new();

    for (idx, stmt) in statements.iter().enumerate() {
        let Some(name) = label_name(stmt) else {
            continue;
        };
        if labels.insert(name.to_string(), idx).is_some() {
            return Err(RuntimeError::DuplicateLabel {
                label: name.to_string(),
                line: stmt.line(),
            });
        }
    }

    Ok(labels)
}

fn label_name(stmt: &Stmt) -> Option<&str> {
    match stmt {
        Stmt::Instruction(instruction) if instruction.action.key() == LABEL_ACTION => {
            match instruction.arg("name") {
                Some(Expr::LitStr { v }) => Some(v),
                _ => None,
            }
        }
        Stmt::If { consequent, .. } => label_name(consequent),
        _ => None,
    }
}

/* ===================== Completion ===================== */

fn finish(outcome: ProgramOutcome, mut ctx: ExecutionContext) -> ProgramResult {
    ctx.set_status(ContextStatus::Finished);
    let result = ProgramResult::new(outcome, ctx);
    info!(
        outcome = ?result.outcome,
        instructions = result.batch.total,
        failed = result.batch.failed,
        cost = result.batch.cost,
        "Program finished"
    );
    result
}

fn finish_halted(halt: Halt) -> ProgramResult {
    let Halt { error, mut context } = halt;
    warn!(error = %error, "Program halted");
    context.set_status(ContextStatus::Error);
    ProgramResult::new(ProgramOutcome::Failed(error.to_string()), context)
}
