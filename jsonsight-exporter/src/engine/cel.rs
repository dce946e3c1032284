//! CEL expressions.
//!
//! Each top-level member of the document is bound as a variable, so a
//! document `{"counter": 1}` supports the expression `counter * 2`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, ExecutionError, Program, Value};

use super::ExprError;
use crate::sanitize::NULL_SENTINEL;

/// Compile a CEL expression.
///
/// The parser panics on some malformed input instead of returning an error;
/// such panics are reported as [`ExprError::Parse`].
pub fn compile(expr: &str) -> Result<Program, ExprError> {
    let parse_error = |reason: String| ExprError::Parse {
        expr: expr.to_string(),
        reason,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| Program::compile(expr))) {
        Ok(Ok(program)) => Ok(program),
        Ok(Err(e)) => Err(parse_error(e.to_string())),
        Err(payload) => Err(parse_error(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("parser panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("parser panicked: {}", message)
    } else {
        "parser panicked".to_string()
    }
}

/// Run a compiled program with the document's members bound as variables.
pub fn evaluate(
    program: &Program,
    expr: &str,
    document: &serde_json::Value,
) -> Result<Value, ExprError> {
    let members = document.as_object().ok_or_else(|| ExprError::Eval {
        expr: expr.to_string(),
        reason: "document root must be a JSON object".to_string(),
    })?;

    let mut context = Context::default();
    for (name, value) in members {
        context.add_variable_from_value(name.as_str(), json_to_value(value));
    }

    program.execute(&context).map_err(|e| match e {
        ExecutionError::UndeclaredReference(name) => ExprError::NotFound(name.to_string()),
        ExecutionError::NoSuchKey(key) => ExprError::NotFound(key.to_string()),
        other => ExprError::Eval {
            expr: expr.to_string(),
            reason: other.to_string(),
        },
    })
}

/// Integers that fit `i64` become `int`, other integers `uint`, the rest `double`.
fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(Arc::new(s.clone())),
        serde_json::Value::Array(items) => {
            Value::List(Arc::new(items.iter().map(json_to_value).collect()))
        }
        serde_json::Value::Object(map) => {
            let entries: HashMap<Arc<String>, Value> = map
                .iter()
                .map(|(k, v)| (Arc::new(k.clone()), json_to_value(v)))
                .collect();
            Value::Map(Map::from(entries))
        }
    }
}

/// Textual form of a result. Lists and maps render as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => NULL_SENTINEL.to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::List(_) | Value::Map(_) => value_to_json(value).to_string(),
        other => format!("{:?}", other),
    }
}

pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Bytes(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.map
                .iter()
                .map(|(key, value)| (key_to_string(key), value_to_json(value)))
                .collect(),
        ),
        other => serde_json::Value::String(format!("{:?}", other)),
    }
}

fn key_to_string(key: &Key) -> String {
    match key {
        Key::Int(i) => i.to_string(),
        Key::Uint(u) => u.to_string(),
        Key::Bool(b) => b.to_string(),
        Key::String(s) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, doc: serde_json::Value) -> Result<Value, ExprError> {
        let program = compile(expr)?;
        evaluate(&program, expr, &doc)
    }

    #[test]
    fn test_top_level_members_are_variables() {
        let doc = json!({"counter": 1234, "location": "mars"});
        assert_eq!(value_to_text(&eval("counter", doc.clone()).unwrap()), "1234");
        assert_eq!(value_to_text(&eval("location", doc).unwrap()), "mars");
    }

    #[test]
    fn test_arithmetic_and_nested_access() {
        let doc = json!({"stats": {"hits": 3, "misses": 1}});
        let result = eval("stats.hits + stats.misses", doc).unwrap();
        assert_eq!(value_to_text(&result), "4");
    }

    #[test]
    fn test_float_and_bool_text() {
        let doc = json!({"ratio": 0.5, "up": true, "gone": null});
        assert_eq!(value_to_text(&eval("ratio", doc.clone()).unwrap()), "0.5");
        assert_eq!(value_to_text(&eval("up", doc.clone()).unwrap()), "true");
        assert_eq!(value_to_text(&eval("gone", doc).unwrap()), NULL_SENTINEL);
    }

    #[test]
    fn test_list_filter_renders_json() {
        let doc = json!({"values": [
            {"id": "id-A", "state": "ACTIVE"},
            {"id": "id-B", "state": "INACTIVE"}
        ]});
        let result = eval("values.filter(v, v.state == 'ACTIVE')", doc).unwrap();
        assert_eq!(
            value_to_json(&result),
            json!([{"id": "id-A", "state": "ACTIVE"}])
        );
    }

    #[test]
    fn test_compile_error() {
        let err = compile("counter +").unwrap_err();
        assert!(err.is_compile_error());
    }

    #[test]
    fn test_compile_errors_do_not_escape() {
        for expr in ["counter +", "values.filter(v,", "((", ")", "a ? b"] {
            let err = compile(expr).unwrap_err();
            assert!(err.is_compile_error(), "{}: {}", expr, err);
        }
    }

    #[test]
    fn test_missing_variable() {
        let err = eval("missing", json!({"counter": 1})).unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {}", err);
    }

    #[test]
    fn test_non_object_document() {
        let err = eval("1", json!([1, 2])).unwrap_err();
        assert!(matches!(err, ExprError::Eval { .. }));
    }
}
