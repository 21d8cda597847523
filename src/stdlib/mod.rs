//! Built-in commands and pipes
//!
//! Each builtin is a variant of a dispatcher enum; the enum implements the
//! registry traits and routes to the per-package implementation modules.

pub mod flow;
pub mod human;
pub mod pipes;
pub mod store;
pub mod utils;


use async_trait::async_trait;
use std::sync::Arc;

use crate::interpreter::types::{ActionResult, ExecutionContext, Value};
use crate::registry::{
    Arguments, CommandHandler, ItemType, PipeFunction, RegistryItem, StaticBundle,
};

pub use pipes::BuiltinPipe;

/// Bundle id under which the builtins register
pub const STDLIB_BUNDLE: &str = "stdlib";

/* ===================== Commands ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    UtilsSet,
    UtilsLog,
    UtilsFail,
    UtilsEnv,
    FlowLabel,
    FlowGoto,
    FlowExit,
    FlowReturn,
    StoreSet,
    StoreGet,
    HumanConfirm,
    HumanSelect,
}

impl BuiltinCommand {
    pub const ALL: [BuiltinCommand; 12] = [
        BuiltinCommand::UtilsSet,
        BuiltinCommand::UtilsLog,
        BuiltinCommand::UtilsFail,
        BuiltinCommand::UtilsEnv,
        BuiltinCommand::FlowLabel,
        BuiltinCommand::FlowGoto,
        BuiltinCommand::FlowExit,
        BuiltinCommand::FlowReturn,
        BuiltinCommand::StoreSet,
        BuiltinCommand::StoreGet,
        BuiltinCommand::HumanConfirm,
        BuiltinCommand::HumanSelect,
    ];

    pub fn action(&self) -> &'static str {
        match self {
            BuiltinCommand::UtilsSet => "@utils/set",
            BuiltinCommand::UtilsLog => "@utils/log",
            BuiltinCommand::UtilsFail => "@utils/fail",
            BuiltinCommand::UtilsEnv => "@utils/env",
            BuiltinCommand::FlowLabel => crate::interpreter::LABEL_ACTION,
            BuiltinCommand::FlowGoto => "@flow/goto",
            BuiltinCommand::FlowExit => "@flow/exit",
            BuiltinCommand::FlowReturn => "@flow/return",
            BuiltinCommand::StoreSet => "@store/set",
            BuiltinCommand::StoreGet => "@store/get",
            BuiltinCommand::HumanConfirm => "@human/confirm",
            BuiltinCommand::HumanSelect => "@human/select",
        }
    }
}

impl RegistryItem for BuiltinCommand {
    fn id(&self) -> &str {
        self.action()
    }

    fn item_type(&self) -> ItemType {
        ItemType::Command
    }
}

#[async_trait]
impl CommandHandler for BuiltinCommand {
    async fn run(
        &self,
        args: Arguments,
        context: &ExecutionContext,
    ) -> anyhow::Result<ActionResult> {
        match self {
            BuiltinCommand::UtilsSet => Ok(utils::set(&args)),
            BuiltinCommand::UtilsLog => Ok(utils::log(&args)),
            BuiltinCommand::UtilsFail => Ok(utils::fail(&args)),
            BuiltinCommand::UtilsEnv => Ok(utils::env(&args, context)),
            BuiltinCommand::FlowLabel => Ok(flow::label(&args)),
            BuiltinCommand::FlowGoto => Ok(flow::goto(&args)),
            BuiltinCommand::FlowExit => Ok(flow::exit(&args)),
            BuiltinCommand::FlowReturn => Ok(flow::ret(&args)),
            BuiltinCommand::StoreSet => store::set(&args, context).await,
            BuiltinCommand::StoreGet => store::get(&args, context).await,
            BuiltinCommand::HumanConfirm => Ok(human::confirm(&args, context).await),
            BuiltinCommand::HumanSelect => Ok(human::select(&args, context).await),
        }
    }
}

/* ===================== Pipes ===================== */

impl RegistryItem for BuiltinPipe {
    fn id(&self) -> &str {
        self.name()
    }

    fn item_type(&self) -> ItemType {
        ItemType::Pipe
    }
}

impl PipeFunction for BuiltinPipe {
    fn execute(&self, input: Value, args: &[Value]) -> anyhow::Result<Value> {
        pipes::call_pipe(*self, input, args)
    }
}

/* ===================== Bundles ===================== */

pub fn command_bundle() -> StaticBundle<dyn CommandHandler> {
    StaticBundle::new(
        STDLIB_BUNDLE,
        BuiltinCommand::ALL
            .iter()
            .map(|command| Arc::new(*command) as Arc<dyn CommandHandler>)
            .collect(),
    )
}

pub fn pipe_bundle() -> StaticBundle<dyn PipeFunction> {
    StaticBundle::new(
        STDLIB_BUNDLE,
        BuiltinPipe::ALL
            .iter()
            .map(|pipe| Arc::new(*pipe) as Arc<dyn PipeFunction>)
            .collect(),
    )
}

/* ===================== Argument Helpers ===================== */

/// Required string argument, or the failure to hand back
fn required_str<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, ActionResult> {
    match args.get(name) {
        Value::Str(s) if !s.is_empty() => Ok(s),
        Value::Absent => Err(ActionResult::failure(format!("{} is required", name))),
        other => Err(ActionResult::failure(format!(
            "{} must be a non-empty string, got {}",
            name,
            other.type_name()
        ))),
    }
}
