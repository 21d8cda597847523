//! Parser for Tempo automation scripts
//!
//! PEST-based, line-oriented: each source line is parsed on its own and must
//! be fully consumed, blank, or a `//` comment. The reserved arguments
//! (`output`, `if`, `forEach`) are pulled out of the flat argument list after
//! the instruction is built.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::interpreter::types::{
    ActionPath, Argument, BinaryOp, Expr, ForEachBinding, Instruction, LogicalOp, PipeSegment,
    Program, Stmt, UnaryOp,
};


/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/tempo.pest"]
struct TempoParser;

/* ===================== Error Types ===================== */

/// Malformed source line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parse error on line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    fn from_pest(err: pest::error::Error<Rule>, line: usize) -> Self {
        let column = match err.line_col {
            pest::error::LineColLocation::Pos((_, col)) => col,
            pest::error::LineColLocation::Span((_, col), _) => col,
        };
        Self::new(
            line,
            format!("{} (column {})", err.variant.message(), column),
        )
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Public API ===================== */

/// Parse a whole script into a program.
///
/// Fails on the first line that is rejected or not fully consumed.
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let mut statements = Vec::new();

    for (idx, text) in source.lines().enumerate() {
        if let Some(instruction) = parse_line(text, idx + 1)? {
            statements.push(Stmt::Instruction(instruction));
        }
    }

    Ok(Program::new(statements))
}

/// Parse one source line. Blank and comment-only lines yield `None`.
pub fn parse_line(text: &str, line: usize) -> ParseResult<Option<Instruction>> {
    let mut pairs =
        TempoParser::parse(Rule::line, text).map_err(|err| ParseError::from_pest(err, line))?;
    let line_pair = next_pair(&mut pairs, line, "line")?;

    for pair in line_pair.into_inner() {
        if pair.as_rule() == Rule::instruction {
            return build_instruction(pair, line).map(Some);
        }
    }

    Ok(None)
}

/// Parse a standalone expression (no instruction around it).
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let mut pairs = TempoParser::parse(Rule::expression_only, source)
        .map_err(|err| ParseError::from_pest(err, 1))?;
    let root = next_pair(&mut pairs, 1, "expression")?;
    let mut inner = root.into_inner();
    build_expression(next_pair(&mut inner, 1, "expression")?, 1)
}

/// Parse the `forEach` mini-grammar: `item of items`.
pub fn parse_for_each(binding: &str, line: usize) -> ParseResult<ForEachBinding> {
    let mut pairs = TempoParser::parse(Rule::for_each_binding, binding).map_err(|err| {
        ParseError::new(
            line,
            format!(
                "invalid forEach binding \"{}\": {}",
                binding,
                err.variant.message()
            ),
        )
    })?;
    let root = next_pair(&mut pairs, line, "forEach binding")?;
    let mut inner = root.into_inner();

    let iterator = next_pair(&mut inner, line, "forEach iterator")?
        .as_str()
        .to_string();
    let _of = next_pair(&mut inner, line, "'of'")?;
    let iterable = build_expression(next_pair(&mut inner, line, "forEach iterable")?, line)?;

    Ok(ForEachBinding { iterator, iterable })
}

/* ===================== Instruction Builder ===================== */

fn build_instruction(pair: Pair<Rule>, line: usize) -> ParseResult<Instruction> {
    let mut inner = pair.into_inner();
    let action = build_action_path(next_pair(&mut inner, line, "action path")?, line)?;

    let mut args: Vec<Argument> = Vec::new();
    for arg_pair in inner {
        let mut parts = arg_pair.into_inner();
        let name = next_pair(&mut parts, line, "argument name")?
            .as_str()
            .to_string();
        let value = build_expression(next_pair(&mut parts, line, "argument value")?, line)?;

        if args.iter().any(|arg| arg.name == name) {
            return Err(ParseError::new(
                line,
                format!("duplicate argument '{}'", name),
            ));
        }
        args.push(Argument { name, value });
    }

    extract_reserved_arguments(action, args, line)
}

fn build_action_path(pair: Pair<Rule>, line: usize) -> ParseResult<ActionPath> {
    let text = pair.as_str().to_string();
    let segments: Vec<String> = pair
        .into_inner()
        .map(|segment| segment.as_str().to_string())
        .collect();

    ActionPath::new(segments)
        .ok_or_else(|| ParseError::new(line, format!("invalid action path '{}'", text)))
}

/// Split `output`, `if` and `forEach` out of the handler arguments.
fn extract_reserved_arguments(
    action: ActionPath,
    args: Vec<Argument>,
    line: usize,
) -> ParseResult<Instruction> {
    let mut output = None;
    let mut condition = None;
    let mut for_each = None;
    let mut handler_args = Vec::with_capacity(args.len());

    for arg in args {
        match arg.name.as_str() {
            "output" => match arg.value {
                Expr::Ident { name } => output = Some(name),
                _ => {
                    return Err(ParseError::new(
                        line,
                        "output must be a bare identifier",
                    ))
                }
            },
            "if" => condition = Some(arg.value),
            "forEach" => match arg.value {
                Expr::LitStr { v } => for_each = Some(parse_for_each(&v, line)?),
                _ => {
                    return Err(ParseError::new(
                        line,
                        "forEach must be a string literal such as \"item of items\"",
                    ))
                }
            },
            _ => handler_args.push(arg),
        }
    }

    Ok(Instruction {
        action,
        args: handler_args,
        output,
        condition,
        for_each,
        line,
    })
}

/* ===================== Expression Builder ===================== */

fn build_expression(pair: Pair<Rule>, line: usize) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression => {
            let mut inner = pair.into_inner();
            let source = build_expression(next_pair(&mut inner, line, "expression")?, line)?;

            match inner.next() {
                Some(arrow) if arrow.as_rule() == Rule::arrow => {
                    let target = next_pair(&mut inner, line, "mapper target")?
                        .as_str()
                        .to_string();
                    Ok(Expr::Mapper {
                        source: Box::new(source),
                        target,
                    })
                }
                _ => Ok(source),
            }
        }

        Rule::braced => build_braced(pair, line),

        Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::comparison
        | Rule::additive
        | Rule::multiplicative => build_binary_chain(pair, line),

        Rule::unary => build_unary(pair, line),

        Rule::postfix => {
            let mut inner = pair.into_inner();
            let object = build_expression(next_pair(&mut inner, line, "operand")?, line)?;
            let properties: Vec<String> = inner.map(|p| p.as_str().to_string()).collect();

            if properties.is_empty() {
                Ok(object)
            } else {
                Ok(Expr::Member {
                    object: Box::new(object),
                    properties,
                })
            }
        }

        Rule::array => {
            let items = pair
                .into_inner()
                .map(|item| build_expression(item, line))
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::Array { items })
        }

        Rule::string => {
            let raw = pair
                .into_inner()
                .next()
                .map(|inner| inner.as_str())
                .unwrap_or("");
            Ok(Expr::LitStr { v: unescape(raw) })
        }

        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(|v| Expr::LitNum { v })
            .map_err(|e| ParseError::new(line, format!("invalid number '{}': {}", pair.as_str(), e))),

        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "true",
        }),

        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
        }),

        other => Err(ParseError::new(
            line,
            format!("unexpected expression rule: {:?}", other),
        )),
    }
}

/// `{input | name:arg | name}`. A brace with no segments is just grouping.
fn build_braced(pair: Pair<Rule>, line: usize) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let input = build_expression(next_pair(&mut inner, line, "pipe input")?, line)?;

    let mut segments = Vec::new();
    for segment_pair in inner {
        let mut parts = segment_pair.into_inner();
        let name = next_pair(&mut parts, line, "pipe name")?
            .as_str()
            .to_string();
        let args = parts
            .map(|arg| build_expression(arg, line))
            .collect::<ParseResult<Vec<_>>>()?;
        segments.push(PipeSegment { name, args });
    }

    if segments.is_empty() {
        return Ok(input);
    }

    Ok(Expr::Pipe {
        input: Box::new(input),
        segments,
    })
}

/// Left-associative fold over `operand (op operand)*`
fn build_binary_chain(pair: Pair<Rule>, line: usize) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut left = build_expression(next_pair(&mut inner, line, "operand")?, line)?;

    while let Some(op_pair) = inner.next() {
        let right = build_expression(next_pair(&mut inner, line, "right operand")?, line)?;
        left = combine(op_pair.as_rule(), left, right, line)?;
    }

    Ok(left)
}

fn combine(op_rule: Rule, left: Expr, right: Expr, line: usize) -> ParseResult<Expr> {
    let logical = match op_rule {
        Rule::op_or => Some(LogicalOp::Or),
        Rule::op_and => Some(LogicalOp::And),
        _ => None,
    };
    if let Some(op) = logical {
        return Ok(Expr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
    }

    let op = match op_rule {
        Rule::op_eq => BinaryOp::Eq,
        Rule::op_ne => BinaryOp::Ne,
        Rule::op_lt => BinaryOp::Lt,
        Rule::op_lte => BinaryOp::Lte,
        Rule::op_gt => BinaryOp::Gt,
        Rule::op_gte => BinaryOp::Gte,
        Rule::op_add => BinaryOp::Add,
        Rule::op_sub => BinaryOp::Sub,
        Rule::op_mul => BinaryOp::Mul,
        Rule::op_div => BinaryOp::Div,
        Rule::op_mod => BinaryOp::Mod,
        other => {
            return Err(ParseError::new(
                line,
                format!("expected operator, got {:?}", other),
            ))
        }
    };

    Ok(Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// Prefix operators apply innermost-last: `!-x` is `!(-x)`.
fn build_unary(pair: Pair<Rule>, line: usize) -> ParseResult<Expr> {
    let mut ops = Vec::new();
    let mut operand = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::op_not => ops.push(UnaryOp::Not),
            Rule::op_neg => ops.push(UnaryOp::Neg),
            Rule::op_pos => ops.push(UnaryOp::Pos),
            _ => operand = Some(build_expression(part, line)?),
        }
    }

    let mut expr = operand.ok_or_else(|| ParseError::new(line, "missing operand"))?;
    for op in ops.into_iter().rev() {
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
        };
    }

    Ok(expr)
}

/* ===================== Helpers ===================== */

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, line: usize, what: &str) -> ParseResult<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| ParseError::new(line, format!("expected {}", what)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}
