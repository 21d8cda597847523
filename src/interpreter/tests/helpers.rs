//! Test helpers for interpreter tests
//!
//! Builds an interpreter over the stdlib bundles plus a small `test` bundle of
//! commands that misbehave on purpose.

use async_trait::async_trait;
use std::sync::Arc;

use crate::interpreter::{
    ActionResult, EvalResult, ExecutionContext, Expr, Interpreter, InterpreterOptions, Program,
    ProgramResult, Value,
};
use crate::parser;
use crate::registry::{
    Arguments, CommandHandler, CommandRegistry, ItemType, PipeRegistry, RegistryItem,
    StaticBundle,
};
use crate::stdlib;

/* ===================== Test Commands ===================== */

type Behavior = fn(&Arguments) -> anyhow::Result<ActionResult>;

pub struct TestCommand {
    id: &'static str,
    behavior: Behavior,
}

impl RegistryItem for TestCommand {
    fn id(&self) -> &str {
        self.id
    }

    fn item_type(&self) -> ItemType {
        ItemType::Command
    }
}

#[async_trait]
impl CommandHandler for TestCommand {
    async fn run(
        &self,
        args: Arguments,
        _context: &ExecutionContext,
    ) -> anyhow::Result<ActionResult> {
        (self.behavior)(&args)
    }
}

fn command(id: &'static str, behavior: Behavior) -> Arc<dyn CommandHandler> {
    Arc::new(TestCommand { id, behavior })
}

fn test_bundle() -> StaticBundle<dyn CommandHandler> {
    StaticBundle::new(
        "test",
        vec![
            // Echoes `arg`
            command("@pkg/name", |args| Ok(ActionResult::ok(args.get("arg").clone()))),
            command("@test/boom", |_| anyhow::bail!("connection reset")),
            command("@test/fatal", |_| Ok(ActionResult::fatal("token revoked"))),
            command("@test/costly", |args| {
                Ok(ActionResult::ok(args.get("value").clone())
                    .with_cost(args.num("cost").unwrap_or(0.0)))
            }),
        ],
    )
}

/* ===================== Builders ===================== */

pub async fn interpreter() -> Interpreter {
    interpreter_with_options(InterpreterOptions::default()).await
}

pub async fn interpreter_with_options(options: InterpreterOptions) -> Interpreter {
    let mut commands = CommandRegistry::new();
    commands
        .add_bundle(stdlib::command_bundle())
        .add_bundle(test_bundle());
    commands.reload().await.expect("Command registry reload failed");

    let mut pipes = PipeRegistry::new();
    pipes.add_bundle(stdlib::pipe_bundle());
    pipes.reload().await.expect("Pipe registry reload failed");

    Interpreter::new(Arc::new(commands), Arc::new(pipes)).with_options(options)
}

/// Parse, round-trip the AST through JSON, and return it
pub fn parse(source: &str) -> Program {
    let program = parser::parse_program(source).expect("Parse program failed");
    let json = serde_json::to_string(&program).expect("Program serialization failed");
    serde_json::from_str(&json).expect("Program deserialization failed")
}

pub async fn run(source: &str) -> ProgramResult {
    run_with(source, ExecutionContext::new()).await
}

pub async fn run_with(source: &str, ctx: ExecutionContext) -> ProgramResult {
    interpreter().await.execute_program(&parse(source), ctx).await
}

/// Evaluate a standalone expression against `ctx`
pub async fn eval(source: &str, ctx: &ExecutionContext) -> EvalResult {
    let expr: Expr = parser::parse_expression(source).expect("Parse expression failed");
    interpreter().await.evaluator().evaluate(&expr, ctx)
}

pub async fn eval_ok(source: &str, ctx: &ExecutionContext) -> Value {
    eval(source, ctx).await.expect("Evaluation failed")
}

pub fn data(result: &ProgramResult, name: &str) -> Value {
    result.context.data.get(name).cloned().unwrap_or_default()
}
