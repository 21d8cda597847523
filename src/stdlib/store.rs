//! `@store/*` commands over the context's shared [`Store`](crate::store::Store)

use anyhow::Context;

use super::required_str;
use crate::interpreter::types::{ActionResult, ExecutionContext, Value};
use crate::registry::Arguments;

/// `@store/set key="..." value=<expr>`: yields the stored value.
/// Store errors are unrecovered.
pub async fn set(args: &Arguments, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
    let key = match required_str(args, "key") {
        Ok(key) => key,
        Err(failure) => return Ok(failure),
    };
    let value = args.get("value");
    context
        .store
        .set(key, value.to_json())
        .await
        .with_context(|| format!("failed to write store key '{}'", key))?;
    Ok(ActionResult::ok(value.clone()))
}

/// `@store/get key="..."`: absent when missing
pub async fn get(args: &Arguments, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
    let key = match required_str(args, "key") {
        Ok(key) => key,
        Err(failure) => return Ok(failure),
    };
    let value = context
        .store
        .get(key)
        .await
        .with_context(|| format!("failed to read store key '{}'", key))?
        .map(Value::from)
        .unwrap_or_default();
    Ok(ActionResult::ok(value))
}
