//! Operators and builtin methods over JSON values.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::ast::{BinaryOp, CastTarget, Member, UnaryOp};
use crate::registry::{ToolError, ToolResult};

/// Methods callable on values inside tool source.
pub(crate) const BUILTIN_METHODS: &[&str] = &[
    "len",
    "is_empty",
    "to_uppercase",
    "to_lowercase",
    "trim",
    "contains",
    "starts_with",
    "ends_with",
    "replace",
    "split",
    "join",
    "push",
    "to_string",
    "to_owned",
    "clone",
    "abs",
    "min",
    "max",
    "keys",
    "get",
    "unwrap_or",
    "iter",
    "chars",
    "collect",
];

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    fn to_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }
}

fn number(value: &Value) -> Option<Num> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(Num::Int)
            .or_else(|| number.as_f64().map(Num::Float)),
        _ => None,
    }
}

fn float(value: f64) -> ToolResult<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ToolError::execution("arithmetic produced a non-finite number"))
}

/// Short type name used in error messages.
pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "unit",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Renders a value the way `{}` does.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Null => "()".to_owned(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Renders a value the way `{:?}` does.
pub(crate) fn debug(value: &Value) -> String {
    match value {
        Value::Null => "()".to_owned(),
        other => other.to_string(),
    }
}

/// Extracts a boolean, failing for any other kind.
pub(crate) fn truthy(value: &Value) -> ToolResult<bool> {
    value.as_bool().ok_or_else(|| {
        ToolError::execution(format!("expected bool, found {}", kind(value)))
    })
}

/// Extracts an integer, failing for any other kind.
pub(crate) fn integer(value: &Value) -> ToolResult<i64> {
    value.as_i64().ok_or_else(|| {
        ToolError::execution(format!("expected integer, found {}", kind(value)))
    })
}

fn text(value: &Value) -> ToolResult<&str> {
    value.as_str().ok_or_else(|| {
        ToolError::execution(format!("expected string, found {}", kind(value)))
    })
}

/// Converts an integer index into a bounds-checked position.
pub(crate) fn position(index: &Value, len: usize) -> ToolResult<usize> {
    let index = integer(index)?;
    usize::try_from(index)
        .ok()
        .filter(|position| *position < len)
        .ok_or_else(|| {
            ToolError::execution(format!("index {index} out of bounds for length {len}"))
        })
}

/// Structural equality, treating integers and floats of equal value as equal.
pub(crate) fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (number(lhs), number(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => (a.to_f64() - b.to_f64()).abs() < f64::EPSILON,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> ToolResult<Ordering> {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => match (number(lhs), number(rhs)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.to_f64().partial_cmp(&b.to_f64()),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        ToolError::execution(format!("cannot compare {} with {}", kind(lhs), kind(rhs)))
    })
}

/// Applies a unary operator.
pub(crate) fn unary(op: UnaryOp, operand: &Value) -> ToolResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, Value::Bool(flag)) => Ok(Value::Bool(!flag)),
        (UnaryOp::Neg, value) => match number(value) {
            Some(Num::Int(int)) => int
                .checked_neg()
                .map(Value::from)
                .ok_or_else(|| ToolError::execution("integer overflow")),
            Some(Num::Float(value)) => float(-value),
            None => Err(ToolError::execution(format!("cannot negate {}", kind(value)))),
        },
        (UnaryOp::Not, value) => Err(ToolError::execution(format!(
            "cannot apply `!` to {}",
            kind(value)
        ))),
    }
}

/// Applies a binary operator to already evaluated operands.
pub(crate) fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> ToolResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(lhs, rhs))),
        BinaryOp::Lt => compare(lhs, rhs).map(|ord| Value::Bool(ord.is_lt())),
        BinaryOp::Le => compare(lhs, rhs).map(|ord| Value::Bool(ord.is_le())),
        BinaryOp::Gt => compare(lhs, rhs).map(|ord| Value::Bool(ord.is_gt())),
        BinaryOp::Ge => compare(lhs, rhs).map(|ord| Value::Bool(ord.is_ge())),
        BinaryOp::And => Ok(Value::Bool(truthy(lhs)? && truthy(rhs)?)),
        BinaryOp::Or => Ok(Value::Bool(truthy(lhs)? || truthy(rhs)?)),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(head), tail) => Ok(Value::String(format!("{head}{}", display(tail)))),
            (Value::Array(head), Value::Array(tail)) => {
                Ok(Value::Array(head.iter().chain(tail).cloned().collect()))
            }
            _ => arithmetic(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, lhs, rhs),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> ToolResult<Value> {
    let (Some(a), Some(b)) = (number(lhs), number(rhs)) else {
        return Err(ToolError::execution(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            kind(lhs),
            kind(rhs)
        )));
    };

    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
            return Err(ToolError::execution("division by zero"));
        }
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result
            .map(Value::from)
            .ok_or_else(|| ToolError::execution("integer overflow"));
    }

    let (a, b) = (a.to_f64(), b.to_f64());
    float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    })
}

/// Applies an `as` cast.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn cast(value: &Value, target: CastTarget) -> ToolResult<Value> {
    let num = match value {
        Value::Bool(flag) => Num::Int(i64::from(*flag)),
        other => number(other).ok_or_else(|| {
            ToolError::execution(format!("cannot cast {} to a number", kind(other)))
        })?,
    };
    match (target, num) {
        (CastTarget::Int, Num::Int(int)) => Ok(Value::from(int)),
        (CastTarget::Int, Num::Float(value)) => Ok(Value::from(value as i64)),
        (CastTarget::Float, num) => float(num.to_f64()),
    }
}

/// Reads `base[index]`.
pub(crate) fn index(base: &Value, index: &Value) -> ToolResult<Value> {
    match (base, index) {
        (Value::Array(items), index) => Ok(items[position(index, items.len())?].clone()),
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ToolError::execution(format!("key `{key}` not found"))),
        (base, index) => Err(ToolError::execution(format!(
            "cannot index {} with {}",
            kind(base),
            kind(index)
        ))),
    }
}

/// Reads `base.member`.
pub(crate) fn field(base: &Value, member: &Member) -> ToolResult<Value> {
    let found = match (base, member) {
        (Value::Object(map), Member::Name(name)) => map.get(name),
        (Value::Array(items), Member::Position(position)) => items.get(*position),
        _ => None,
    };
    found.cloned().ok_or_else(|| {
        let member = match member {
            Member::Name(name) => name.clone(),
            Member::Position(position) => position.to_string(),
        };
        ToolError::execution(format!("{} has no field `{member}`", kind(base)))
    })
}

fn arguments<const N: usize>(method: &str, args: Vec<Value>) -> ToolResult<[Value; N]> {
    let count = args.len();
    <[Value; N]>::try_from(args).map_err(|_| {
        ToolError::execution(format!("`{method}` takes {N} argument(s), got {count}"))
    })
}

fn length(value: &Value) -> ToolResult<usize> {
    match value {
        Value::String(text) => Ok(text.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        other => Err(ToolError::execution(format!("{} has no length", kind(other)))),
    }
}

fn chars(text: &str) -> Value {
    Value::Array(
        text.chars()
            .map(|ch| Value::String(ch.to_string()))
            .collect(),
    )
}

/// Calls a builtin method on an evaluated receiver.
pub(crate) fn call_method(receiver: &Value, method: &str, args: Vec<Value>) -> ToolResult<Value> {
    match method {
        "len" => {
            let [] = arguments(method, args)?;
            length(receiver).map(Value::from)
        }
        "is_empty" => {
            let [] = arguments(method, args)?;
            length(receiver).map(|len| Value::Bool(len == 0))
        }
        "to_uppercase" | "to_lowercase" | "trim" => {
            let [] = arguments(method, args)?;
            let text = text(receiver)?;
            Ok(Value::String(match method {
                "to_uppercase" => text.to_uppercase(),
                "to_lowercase" => text.to_lowercase(),
                _ => text.trim().to_owned(),
            }))
        }
        "contains" => {
            let [needle] = arguments(method, args)?;
            let found = match receiver {
                Value::String(text) => text.contains(display(&needle).as_str()),
                Value::Array(items) => items.iter().any(|item| equals(item, &needle)),
                Value::Object(map) => map.contains_key(&display(&needle)),
                other => {
                    return Err(ToolError::execution(format!(
                        "{} does not support `contains`",
                        kind(other)
                    )));
                }
            };
            Ok(Value::Bool(found))
        }
        "starts_with" | "ends_with" => {
            let [affix] = arguments(method, args)?;
            let text = text(receiver)?;
            let affix = display(&affix);
            Ok(Value::Bool(if method == "starts_with" {
                text.starts_with(affix.as_str())
            } else {
                text.ends_with(affix.as_str())
            }))
        }
        "replace" => {
            let [from, to] = arguments(method, args)?;
            Ok(Value::String(
                text(receiver)?.replace(display(&from).as_str(), &display(&to)),
            ))
        }
        "split" => {
            let [separator] = arguments(method, args)?;
            let separator = display(&separator);
            Ok(Value::Array(
                text(receiver)?
                    .split(separator.as_str())
                    .map(|part| Value::String(part.to_owned()))
                    .collect(),
            ))
        }
        "join" => {
            let [separator] = arguments(method, args)?;
            let Value::Array(items) = receiver else {
                return Err(ToolError::execution(format!(
                    "cannot join {}",
                    kind(receiver)
                )));
            };
            let parts: Vec<String> = items.iter().map(display).collect();
            Ok(Value::String(parts.join(&display(&separator))))
        }
        "to_string" => {
            let [] = arguments(method, args)?;
            Ok(Value::String(display(receiver)))
        }
        "to_owned" | "clone" | "iter" | "collect" => {
            let [] = arguments(method, args)?;
            Ok(receiver.clone())
        }
        "chars" => {
            let [] = arguments(method, args)?;
            Ok(chars(text(receiver)?))
        }
        "abs" => {
            let [] = arguments(method, args)?;
            match number(receiver) {
                Some(Num::Int(int)) => int
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| ToolError::execution("integer overflow")),
                Some(Num::Float(value)) => float(value.abs()),
                None => Err(ToolError::execution(format!(
                    "cannot take abs of {}",
                    kind(receiver)
                ))),
            }
        }
        "min" | "max" => {
            let [other] = arguments(method, args)?;
            let ordering = compare(receiver, &other)?;
            let take_receiver = if method == "min" {
                ordering.is_le()
            } else {
                ordering.is_ge()
            };
            Ok(if take_receiver { receiver.clone() } else { other })
        }
        "keys" => {
            let [] = arguments(method, args)?;
            let Value::Object(map) = receiver else {
                return Err(ToolError::execution(format!(
                    "{} has no keys",
                    kind(receiver)
                )));
            };
            Ok(Value::Array(map.keys().cloned().map(Value::String).collect()))
        }
        "get" => {
            let [key] = arguments(method, args)?;
            let found = match (receiver, &key) {
                (Value::Array(items), Value::Number(_)) => usize::try_from(integer(&key)?)
                    .ok()
                    .and_then(|position| items.get(position)),
                (Value::Object(map), Value::String(name)) => map.get(name),
                _ => {
                    return Err(ToolError::execution(format!(
                        "cannot get {} from {}",
                        kind(&key),
                        kind(receiver)
                    )));
                }
            };
            Ok(found.cloned().unwrap_or(Value::Null))
        }
        "unwrap_or" => {
            let [fallback] = arguments(method, args)?;
            Ok(if receiver.is_null() {
                fallback
            } else {
                receiver.clone()
            })
        }
        other => Err(ToolError::execution(format!("unknown method `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integer_arithmetic_is_checked() {
        assert_eq!(binary(BinaryOp::Add, &json!(2), &json!(3)).unwrap(), json!(5));
        assert_eq!(binary(BinaryOp::Div, &json!(7), &json!(2)).unwrap(), json!(3));
        assert!(binary(BinaryOp::Div, &json!(1), &json!(0)).is_err());
        assert!(binary(BinaryOp::Mul, &json!(i64::MAX), &json!(2)).is_err());
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(binary(BinaryOp::Mul, &json!(2), &json!(1.5)).unwrap(), json!(3.0));
        assert!(equals(&json!(3), &json!(3.0)));
    }

    #[test]
    fn plus_concatenates_strings() {
        assert_eq!(
            binary(BinaryOp::Add, &json!("n="), &json!(4)).unwrap(),
            json!("n=4")
        );
    }

    #[test]
    fn comparisons_reject_mismatched_kinds() {
        assert_eq!(binary(BinaryOp::Lt, &json!("a"), &json!("b")).unwrap(), json!(true));
        assert!(binary(BinaryOp::Lt, &json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn string_methods() {
        assert_eq!(call_method(&json!(" Hi "), "trim", vec![]).unwrap(), json!("Hi"));
        assert_eq!(
            call_method(&json!("a,b"), "split", vec![json!(",")]).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            call_method(&json!(["a", 1]), "join", vec![json!("-")]).unwrap(),
            json!("a-1")
        );
        assert!(call_method(&json!("x"), "len", vec![json!(1)]).is_err());
    }

    #[test]
    fn get_returns_unit_for_missing_entries() {
        assert_eq!(
            call_method(&json!({"a": 1}), "get", vec![json!("b")]).unwrap(),
            Value::Null
        );
        assert_eq!(
            call_method(&Value::Null, "unwrap_or", vec![json!(9)]).unwrap(),
            json!(9)
        );
    }

    #[test]
    fn casts_truncate_floats() {
        assert_eq!(cast(&json!(2.9), CastTarget::Int).unwrap(), json!(2));
        assert_eq!(cast(&json!(true), CastTarget::Int).unwrap(), json!(1));
        assert_eq!(cast(&json!(2), CastTarget::Float).unwrap(), json!(2.0));
    }
}
