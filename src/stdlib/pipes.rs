//! Built-in pipe functions
//!
//! Text pipes render their input with the value's display form, so `Absent`
//! reads as an empty string.

use anyhow::bail;

use crate::interpreter::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinPipe {
    Upper,
    Lower,
    Trim,
    Length,
    Join,
    Split,
    Default,
    First,
    Last,
    Replace,
    Truncate,
    Json,
}

impl BuiltinPipe {
    pub const ALL: [BuiltinPipe; 12] = [
        BuiltinPipe::Upper,
        BuiltinPipe::Lower,
        BuiltinPipe::Trim,
        BuiltinPipe::Length,
        BuiltinPipe::Join,
        BuiltinPipe::Split,
        BuiltinPipe::Default,
        BuiltinPipe::First,
        BuiltinPipe::Last,
        BuiltinPipe::Replace,
        BuiltinPipe::Truncate,
        BuiltinPipe::Json,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPipe::Upper => "upper",
            BuiltinPipe::Lower => "lower",
            BuiltinPipe::Trim => "trim",
            BuiltinPipe::Length => "length",
            BuiltinPipe::Join => "join",
            BuiltinPipe::Split => "split",
            BuiltinPipe::Default => "default",
            BuiltinPipe::First => "first",
            BuiltinPipe::Last => "last",
            BuiltinPipe::Replace => "replace",
            BuiltinPipe::Truncate => "truncate",
            BuiltinPipe::Json => "json",
        }
    }
}

/* ===================== Dispatcher ===================== */

pub fn call_pipe(pipe: BuiltinPipe, input: Value, args: &[Value]) -> anyhow::Result<Value> {
    match pipe {
        BuiltinPipe::Upper => Ok(Value::Str(input.to_string().to_uppercase())),
        BuiltinPipe::Lower => Ok(Value::Str(input.to_string().to_lowercase())),
        BuiltinPipe::Trim => Ok(Value::Str(input.to_string().trim().to_string())),
        BuiltinPipe::Length => length(&input),
        BuiltinPipe::Join => join(input, args),
        BuiltinPipe::Split => split(input, args),
        BuiltinPipe::Default => Ok(default(input, args)),
        BuiltinPipe::First => first_or_last(input, true),
        BuiltinPipe::Last => first_or_last(input, false),
        BuiltinPipe::Replace => replace(input, args),
        BuiltinPipe::Truncate => truncate(input, args),
        BuiltinPipe::Json => Ok(Value::Str(serde_json::to_string(&input.to_json())?)),
    }
}

/* ===================== Implementations ===================== */

fn length(input: &Value) -> anyhow::Result<Value> {
    let len = match input {
        Value::Absent => 0,
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => bail!("length expects a string, array or object, got {}", other.type_name()),
    };
    Ok(Value::Num(len as f64))
}

fn join(input: Value, args: &[Value]) -> anyhow::Result<Value> {
    let separator = arg_text(args, 0).unwrap_or_else(|| ",".to_string());
    match input {
        Value::Absent => Ok(Value::Str(String::new())),
        Value::Array(items) => Ok(Value::Str(
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        other => bail!("join expects an array, got {}", other.type_name()),
    }
}

fn split(input: Value, args: &[Value]) -> anyhow::Result<Value> {
    let separator = arg_text(args, 0).unwrap_or_else(|| ",".to_string());
    let text = match input {
        Value::Absent => return Ok(Value::Array(Vec::new())),
        Value::Str(s) => s,
        other => bail!("split expects a string, got {}", other.type_name()),
    };
    if text.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    if separator.is_empty() {
        return Ok(Value::Array(
            text.chars().map(|c| Value::Str(c.to_string())).collect(),
        ));
    }
    Ok(Value::Array(
        text.split(separator.as_str()).map(Value::from).collect(),
    ))
}

/// Fallback for absent or empty-string input
fn default(input: Value, args: &[Value]) -> Value {
    match input {
        Value::Absent => args.first().cloned().unwrap_or_default(),
        Value::Str(s) if s.is_empty() => args.first().cloned().unwrap_or_default(),
        other => other,
    }
}

fn first_or_last(input: Value, first: bool) -> anyhow::Result<Value> {
    let name = if first { "first" } else { "last" };
    match input {
        Value::Absent => Ok(Value::Absent),
        Value::Array(mut items) => Ok(if first {
            items.into_iter().next().unwrap_or_default()
        } else {
            items.pop().unwrap_or_default()
        }),
        Value::Str(s) => {
            let c = if first { s.chars().next() } else { s.chars().next_back() };
            Ok(c.map(|c| Value::Str(c.to_string())).unwrap_or_default())
        }
        other => bail!("{} expects an array or string, got {}", name, other.type_name()),
    }
}

fn replace(input: Value, args: &[Value]) -> anyhow::Result<Value> {
    let Some(from) = arg_text(args, 0).filter(|from| !from.is_empty()) else {
        bail!("replace requires a non-empty search string");
    };
    let to = arg_text(args, 1).unwrap_or_default();
    Ok(Value::Str(input.to_string().replace(&from, &to)))
}

fn truncate(input: Value, args: &[Value]) -> anyhow::Result<Value> {
    let limit = match args.first() {
        Some(Value::Num(n)) if n.fract() == 0.0 && *n >= 0.0 => *n as usize,
        Some(other) => bail!("truncate length must be a non-negative integer, got {}", other),
        None => bail!("truncate requires a length"),
    };
    match input {
        Value::Array(items) => Ok(Value::Array(items.into_iter().take(limit).collect())),
        other => Ok(Value::Str(other.to_string().chars().take(limit).collect())),
    }
}

fn arg_text(args: &[Value], idx: usize) -> Option<String> {
    args.get(idx)
        .filter(|arg| !arg.is_absent())
        .map(ToString::to_string)
}
