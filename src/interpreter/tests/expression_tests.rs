//! Tests for expression evaluation

use super::helpers::{eval, eval_ok};
use crate::interpreter::{EvaluationError, ExecutionContext, ScopeChain, Value};
use indexmap::IndexMap;
use maplit::hashmap;
use serde_json::json;

fn ctx_with(data: serde_json::Value) -> ExecutionContext {
    let data = match Value::from(data) {
        Value::Object(map) => map,
        _ => IndexMap::new(),
    };
    ExecutionContext::new().with_data(data)
}

/* ===================== Operators ===================== */

#[tokio::test]
async fn test_arithmetic_precedence_and_associativity() {
    let ctx = ExecutionContext::new();

    assert_eq!(eval_ok("1 + 2 * 3", &ctx).await, Value::Num(7.0));
    assert_eq!(eval_ok("10 - 4 - 3", &ctx).await, Value::Num(3.0));
    assert_eq!(eval_ok("(1 + 2) * 3", &ctx).await, Value::Num(9.0));
    assert_eq!(eval_ok("7 % 4", &ctx).await, Value::Num(3.0));
    assert_eq!(eval_ok("-2 * -3", &ctx).await, Value::Num(6.0));
}

#[tokio::test]
async fn test_plus_concatenates_strings_and_arrays() {
    let ctx = ExecutionContext::new();

    assert_eq!(eval_ok(r#""a" + 1"#, &ctx).await, Value::from("a1"));
    assert_eq!(eval_ok(r#"2 + "b""#, &ctx).await, Value::from("2b"));
    assert_eq!(
        eval_ok("[1] + [2, 3]", &ctx).await,
        Value::from(vec![Value::Num(1.0), Value::Num(2.0), Value::Num(3.0)])
    );
    assert_eq!(eval_ok("true + 1", &ctx).await, Value::Num(2.0));
}

#[tokio::test]
async fn test_comparisons() {
    let ctx = ExecutionContext::new();

    assert_eq!(eval_ok(r#""apple" < "banana""#, &ctx).await, Value::Bool(true));
    assert_eq!(eval_ok(r#""10" < 9"#, &ctx).await, Value::Bool(false));
    assert_eq!(eval_ok("missing < 1", &ctx).await, Value::Bool(false));
    assert_eq!(eval_ok("1 == 1.0", &ctx).await, Value::Bool(true));
    assert_eq!(eval_ok("[1, 2] == [1, 2]", &ctx).await, Value::Bool(true));
    assert_eq!(eval_ok(r#"1 != "1""#, &ctx).await, Value::Bool(true));
}

#[tokio::test]
async fn test_logical_operators_return_deciding_operand() {
    let ctx = ExecutionContext::new();

    assert_eq!(eval_ok(r#""" || "fallback""#, &ctx).await, Value::from("fallback"));
    assert_eq!(eval_ok(r#""x" && 0"#, &ctx).await, Value::Num(0.0));
    assert_eq!(eval_ok("!0", &ctx).await, Value::Bool(true));
    assert_eq!(eval_ok("!!missing", &ctx).await, Value::Bool(false));
}

#[tokio::test]
async fn test_logical_operators_short_circuit() {
    let ctx = ExecutionContext::new();

    // The right side would fail (unknown pipe) if it were evaluated
    assert_eq!(eval_ok("false && ({x | nope})", &ctx).await, Value::Bool(false));
    assert_eq!(eval_ok("true || ({x | nope})", &ctx).await, Value::Bool(true));

    match eval("true && ({x | nope})", &ctx).await {
        Err(EvaluationError::UnknownPipe { name }) => assert_eq!(name, "nope"),
        other => panic!("Expected UnknownPipe, got {:?}", other),
    }
}

/* ===================== Identifiers and Members ===================== */

#[tokio::test]
async fn test_inner_scope_lookup() {
    let parent = ScopeChain::new(hashmap! { "user".to_string() => Value::from("Emma") });
    let child = parent.push(hashmap! { "tweet".to_string() => Value::from("Hi") });

    let in_child = ExecutionContext::new().with_scope(child);
    let in_parent = ExecutionContext::new().with_scope(parent);

    assert_eq!(eval_ok("user", &in_child).await, Value::from("Emma"));
    assert_eq!(eval_ok("tweet", &in_child).await, Value::from("Hi"));
    assert_eq!(eval_ok("tweet", &in_parent).await, Value::Absent);
}

#[tokio::test]
async fn test_member_access() {
    let ctx = ctx_with(json!({
        "user": { "name": "Emma", "address": { "city": "Lyon" } }
    }));

    assert_eq!(eval_ok("user.name", &ctx).await, Value::from("Emma"));
    assert_eq!(eval_ok("user.address.city", &ctx).await, Value::from("Lyon"));
    assert_eq!(eval_ok("user.phone.number", &ctx).await, Value::Absent);
    assert_eq!(eval_ok("missing.name", &ctx).await, Value::Absent);
    assert_eq!(eval_ok("user.name.length", &ctx).await, Value::Absent);
}

/* ===================== Pipes and Mappers ===================== */

#[tokio::test]
async fn test_pipe_chain() {
    let ctx = ctx_with(json!({ "name": " emma ", "names": ["a", "b"] }));

    assert_eq!(eval_ok("{name | trim | upper}", &ctx).await, Value::from("EMMA"));
    assert_eq!(eval_ok(r#"{names | join:" & "}"#, &ctx).await, Value::from("a & b"));
    assert_eq!(
        eval_ok(r#"{missing | default:"anon" | upper}"#, &ctx).await,
        Value::from("ANON")
    );
    assert_eq!(eval_ok("{names | length}", &ctx).await, Value::Num(2.0));
}

#[tokio::test]
async fn test_pipe_arguments_are_expressions() {
    let ctx = ctx_with(json!({ "text": "abcdef", "limit": 2 }));

    assert_eq!(eval_ok("{text | truncate:limit + 1}", &ctx).await, Value::from("abc"));
}

#[tokio::test]
async fn test_pipe_errors() {
    let ctx = ctx_with(json!({ "n": 3 }));

    match eval("{n | shout}", &ctx).await {
        Err(EvaluationError::UnknownPipe { name }) => assert_eq!(name, "shout"),
        other => panic!("Expected UnknownPipe, got {:?}", other),
    }
    match eval("{n | join}", &ctx).await {
        Err(EvaluationError::PipeFailed { name, message }) => {
            assert_eq!(name, "join");
            assert!(message.contains("expects an array"));
        }
        other => panic!("Expected PipeFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mapper_builds_single_entry_object() {
    let ctx = ctx_with(json!({ "user": { "name": "Emma" } }));

    assert_eq!(
        eval_ok("user.name -> author", &ctx).await,
        Value::from(json!({ "author": "Emma" }))
    );
    assert_eq!(
        eval_ok("{user.name | upper} -> author", &ctx).await,
        Value::from(json!({ "author": "EMMA" }))
    );
}

#[tokio::test]
async fn test_array_literal_evaluates_items() {
    let ctx = ctx_with(json!({ "a": 1 }));

    assert_eq!(
        eval_ok(r#"[a, a + 1, "x", missing]"#, &ctx).await,
        Value::from(vec![
            Value::Num(1.0),
            Value::Num(2.0),
            Value::from("x"),
            Value::Absent
        ])
    );
}
