//! Argument AST to plain JSON.

use apollo_compiler::Node;
use apollo_compiler::ast;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// Decodes the arguments of a field.
///
/// Unbound variables decode to `null`. No coercion happens, the operation was validated
/// against the schema before.
pub(crate) fn decode_arguments(arguments: &[Node<ast::Argument>], variables: &Object) -> Object {
    arguments
        .iter()
        .map(|argument| {
            (
                ByteString::from(argument.name.as_str()),
                decode_value(&argument.value, variables),
            )
        })
        .collect()
}

pub(crate) fn decode_value(value: &ast::Value, variables: &Object) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => name.as_str().into(),
        ast::Value::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        ast::Value::String(string) => string.as_str().into(),
        ast::Value::Float(float) => float.try_to_f64().map(Value::from).unwrap_or(Value::Null),
        ast::Value::Int(int) => match int.try_to_i32() {
            Ok(int) => Value::from(i64::from(int)),
            Err(_) => decode_large_int(int.as_str()),
        },
        ast::Value::Boolean(boolean) => Value::Bool(*boolean),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| decode_value(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| {
                    (
                        ByteString::from(name.as_str()),
                        decode_value(value, variables),
                    )
                })
                .collect(),
        ),
    }
}

/// Int literals outside of the 32 bit range, kept as integers as long as they fit.
fn decode_large_int(literal: &str) -> Value {
    if let Ok(int) = literal.parse::<i64>() {
        return int.into();
    }
    literal.parse::<f64>().map(Value::from).unwrap_or(Value::Null)
}
