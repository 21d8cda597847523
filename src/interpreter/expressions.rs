//! Expression evaluation
//!
//! Synchronous and total over the grammar, except for pipe stages: a pipe
//! name the registry cannot resolve (or a pipe that fails) is an error.

use indexmap::IndexMap;
use thiserror::Error;

use super::types::{BinaryOp, Expr, ExecutionContext, LogicalOp, UnaryOp, Value};
use crate::registry::PipeRegistry;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("unknown pipe '{name}'")]
    UnknownPipe { name: String },

    #[error("pipe '{name}' failed: {message}")]
    PipeFailed { name: String, message: String },

    #[error("cannot iterate over {found}")]
    NotIterable { found: &'static str },
}

pub type EvalResult = Result<Value, EvaluationError>;

/// Evaluates expressions against a context, dispatching pipe stages to the
/// pipe registry.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    pipes: &'a PipeRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(pipes: &'a PipeRegistry) -> Self {
        Self { pipes }
    }

    pub fn evaluate(&self, expr: &Expr, ctx: &ExecutionContext) -> EvalResult {
        match expr {
            Expr::LitStr { v } => Ok(Value::Str(v.clone())),

            Expr::LitNum { v } => Ok(Value::Num(*v)),

            Expr::LitBool { v } => Ok(Value::Bool(*v)),

            Expr::Ident { name } => Ok(ctx.lookup(name)),

            Expr::Array { items } => items
                .iter()
                .map(|item| self.evaluate(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),

            Expr::Member { object, properties } => {
                let mut value = self.evaluate(object, ctx)?;
                for property in properties {
                    if value.is_absent() {
                        break;
                    }
                    value = value.get(property);
                }
                Ok(value)
            }

            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand, ctx)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Num(-value.to_number()),
                    UnaryOp::Pos => Value::Num(value.to_number()),
                })
            }

            Expr::Binary { op, left, right } => {
                let left = self.evaluate(left, ctx)?;
                let right = self.evaluate(right, ctx)?;
                Ok(binary(*op, left, right))
            }

            Expr::Logical { op, left, right } => {
                let left = self.evaluate(left, ctx)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.evaluate(right, ctx),
                }
            }

            Expr::Pipe { input, segments } => {
                let mut value = self.evaluate(input, ctx)?;
                for segment in segments {
                    let pipe = self.pipes.resolve(&segment.name).ok_or_else(|| {
                        EvaluationError::UnknownPipe {
                            name: segment.name.clone(),
                        }
                    })?;
                    let args = segment
                        .args
                        .iter()
                        .map(|arg| self.evaluate(arg, ctx))
                        .collect::<Result<Vec<_>, _>>()?;
                    value = pipe
                        .execute(value, &args)
                        .map_err(|e| EvaluationError::PipeFailed {
                            name: segment.name.clone(),
                            message: format!("{:#}", e),
                        })?;
                }
                Ok(value)
            }

            Expr::Mapper { source, target } => {
                let value = self.evaluate(source, ctx)?;
                let mut mapping = IndexMap::with_capacity(1);
                mapping.insert(target.clone(), value);
                Ok(Value::Object(mapping))
            }
        }
    }
}

/* ===================== Operators ===================== */

fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Num(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Num(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Num(left.to_number() / right.to_number()),
        BinaryOp::Mod => Value::Num(left.to_number() % right.to_number()),
        BinaryOp::Lt => compare(&left, &right, |o| o.is_lt()),
        BinaryOp::Lte => compare(&left, &right, |o| o.is_le()),
        BinaryOp::Gt => compare(&left, &right, |o| o.is_gt()),
        BinaryOp::Gte => compare(&left, &right, |o| o.is_ge()),
        BinaryOp::Eq => Value::Bool(left == right),
        BinaryOp::Ne => Value::Bool(left != right),
    }
}

fn add(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (l @ Value::Str(_), r) | (l, r @ Value::Str(_)) => Value::Str(format!("{}{}", l, r)),
        (l, r) => Value::Num(l.to_number() + r.to_number()),
    }
}

/// Strings compare lexicographically with strings; everything else
/// numerically. Comparisons against NaN are false.
fn compare(left: &Value, right: &Value, test: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    Value::Bool(ordering.map(test).unwrap_or(false))
}
