//! Abstract Syntax Tree node types

use serde::{Deserialize, Serialize};
use std::fmt;

/* ===================== Program ===================== */

/// A parsed script: one statement per non-blank source line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/* ===================== Statements ===================== */

/// Statement AST node
///
/// The parser only emits `Instruction`; `If` and `ForEach` are produced by
/// normalizing the `if=` / `forEach=` arguments before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Instruction(Instruction),
    If {
        test: Expr,
        consequent: Box<Stmt>,
    },
    ForEach {
        iterator: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
}

impl Stmt {
    /// Source line (1-based) of the instruction this statement wraps.
    pub fn line(&self) -> usize {
        match self {
            Stmt::Instruction(instruction) => instruction.line,
            Stmt::If { consequent, .. } => consequent.line(),
            Stmt::ForEach { body, .. } => body.line(),
        }
    }
}

/// `@package/name arg=value ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub action: ActionPath,
    /// Handler arguments. Never contains `output`, `if` or `forEach`.
    pub args: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<ForEachBinding>,
    /// 1-based source line
    #[serde(default)]
    pub line: usize,
}

impl Instruction {
    /// Look up a handler argument by name.
    pub fn arg(&self, name: &str) -> Option<&Expr> {
        self.args
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| &arg.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Expr,
}

/// Parsed form of `forEach="item of items"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachBinding {
    pub iterator: String,
    pub iterable: Expr,
}

/// Action path: `@package/segment/.../name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionPath {
    pub package: String,
    pub name: String,
    /// Every segment, package first. Always at least two entries.
    pub path: Vec<String>,
}

impl ActionPath {
    pub fn new(path: Vec<String>) -> Option<Self> {
        if path.len() < 2 {
            return None;
        }
        Some(Self {
            package: path[0].clone(),
            name: path[path.len() - 1].clone(),
            path,
        })
    }

    /// Registry key, e.g. `@utils/set`
    pub fn key(&self) -> String {
        format!("@{}", self.path.join("/"))
    }
}

impl fmt::Display for ActionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.path.join("/"))
    }
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// One `| name:arg:arg` stage of a pipe expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeSegment {
    pub name: String,
    pub args: Vec<Expr>,
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    LitStr {
        v: String,
    },
    LitNum {
        v: f64,
    },
    LitBool {
        v: bool,
    },
    Ident {
        name: String,
    },
    Array {
        items: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        properties: Vec<String>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `{input | seg:arg | seg}`; `segments` is never empty
    Pipe {
        input: Box<Expr>,
        segments: Vec<PipeSegment>,
    },
    /// `source -> target`
    Mapper {
        source: Box<Expr>,
        target: String,
    },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident { name: name.into() }
    }

    pub fn string(v: impl Into<String>) -> Self {
        Expr::LitStr { v: v.into() }
    }

    pub fn number(v: f64) -> Self {
        Expr::LitNum { v }
    }
}
