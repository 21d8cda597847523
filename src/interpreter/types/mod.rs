//! Type definitions for the interpreter
//!
//! - AST nodes (Program, Stmt, Expr)
//! - Runtime values (Value)
//! - Execution context and scope chain
//! - Flow control signals
//! - Result hierarchy (ActionResult, ActionLog, BatchResult, ProgramResult)

pub mod ast;
pub mod context;
pub mod control;
pub mod results;
pub mod values;

pub use ast::{
    ActionPath, Argument, BinaryOp, Expr, ForEachBinding, Instruction, LogicalOp, PipeSegment,
    Program, Stmt, UnaryOp,
};
pub use context::{ContextMeta, ExecutionContext, ScopeChain, StatusMonitor, UserInfo};
pub use control::{ContextStatus, Flow};
pub use results::{ActionLog, ActionResult, BatchResult, ProgramOutcome, ProgramResult};
pub use values::Value;
