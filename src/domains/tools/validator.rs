//! Schema validation for tool arguments and results.
//!
//! Validation never stops at the first problem: every violation found in a
//! value is collected, so a caller gets one complete report.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;

use super::schema::{AdditionalProperties, ArrayRules, NumberBounds, ObjectSchema, Schema, StringRules};

/// Path of the value root in violation reports.
pub const ROOT_PATH: &str = "$";

/// A single schema violation at a path such as `$.filters.limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// Validate `value` against `schema`, returning every violation found.
pub fn validate(schema: &Schema, value: &Value) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check(schema, value, ROOT_PATH, &mut errors);
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Name of a JSON value's type, as used in violation messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if is_integral(n) => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 2^63 and 2^64, the first floats past `i64::MAX` and `u64::MAX`.
const I64_END: f64 = 9_223_372_036_854_775_808.0;
const U64_END: f64 = 18_446_744_073_709_551_616.0;

/// The integer `n` denotes, if any. Integral floats such as `2.0` count
/// when they fit in `i64` or `u64`.
fn integer_value(n: &Number) -> Option<Number> {
    if n.is_i64() || n.is_u64() {
        return Some(n.clone());
    }
    let f = n.as_f64()?;
    if !f.is_finite() || f.fract() != 0.0 {
        None
    } else if (-I64_END..I64_END).contains(&f) {
        Some(Number::from(f as i64))
    } else if (0.0..U64_END).contains(&f) {
        Some(Number::from(f as u64))
    } else {
        None
    }
}

fn is_integral(n: &Number) -> bool {
    integer_value(n).is_some()
}

/// Rewrite every integral float in `value` (`2.0`) as a JSON integer (`2`).
///
/// The validator accepts such floats for `integer` schemas; typed
/// parameters only decode them once they are spelled as integers.
pub fn integral_floats_to_integers(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match integer_value(&n) {
            Some(integer) => Value::Number(integer),
            None => Value::Number(n),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(integral_floats_to_integers)
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, integral_floats_to_integers(value)))
                .collect(),
        ),
        other => other,
    }
}

fn check(schema: &Schema, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    match schema {
        Schema::Any => {}
        Schema::Never => errors.push(ValidationError::new(path, "no value is permitted here")),
        Schema::Null => {
            if !value.is_null() {
                errors.push(mismatch(path, "null", value));
            }
        }
        Schema::Boolean => {
            if !value.is_boolean() {
                errors.push(mismatch(path, "boolean", value));
            }
        }
        Schema::Integer(bounds) => match value {
            Value::Number(n) if is_integral(n) => check_bounds(bounds, n, path, errors),
            _ => errors.push(mismatch(path, "integer", value)),
        },
        Schema::Number(bounds) => match value {
            Value::Number(n) => check_bounds(bounds, n, path, errors),
            _ => errors.push(mismatch(path, "number", value)),
        },
        Schema::String(rules) => match value {
            Value::String(s) => check_string(rules, s, path, errors),
            _ => errors.push(mismatch(path, "string", value)),
        },
        Schema::Array(rules) => match value {
            Value::Array(items) => check_array(rules, items, path, errors),
            _ => errors.push(mismatch(path, "array", value)),
        },
        Schema::Object(object) => match value {
            Value::Object(map) => check_object(object, map, path, errors),
            _ => errors.push(mismatch(path, "object", value)),
        },
        Schema::Enum(allowed) => {
            if !allowed.iter().any(|candidate| literal_eq(candidate, value)) {
                let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                errors.push(ValidationError::new(
                    path,
                    format!("must be one of [{}]", listed.join(", ")),
                ));
            }
        }
        Schema::Nullable(inner) => {
            if !value.is_null() {
                check(inner, value, path, errors);
            }
        }
        Schema::AnyOf(alternatives) => {
            let matched = alternatives.iter().any(|alternative| {
                let mut scratch = Vec::new();
                check(alternative, value, path, &mut scratch);
                scratch.is_empty()
            });
            if !matched {
                errors.push(ValidationError::new(
                    path,
                    "does not match any of the allowed shapes",
                ));
            }
        }
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> ValidationError {
    ValidationError::new(
        path,
        format!("expected {expected}, found {}", type_name(value)),
    )
}

/// Literal equality that treats `1` and `1.0` as the same number.
fn literal_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => expected == actual,
    }
}

/// Order `n` against `bound`, exactly when `n` is an integer.
fn compare(n: &Number, bound: f64) -> Option<Ordering> {
    let exact = n
        .as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from));
    match exact {
        Some(x) if bound.is_finite() && bound.abs() < 1e30 => {
            let floor = bound.floor();
            Some(match x.cmp(&(floor as i128)) {
                Ordering::Equal if bound > floor => Ordering::Less,
                other => other,
            })
        }
        _ => n.as_f64()?.partial_cmp(&bound),
    }
}

fn check_bounds(bounds: &NumberBounds, n: &Number, path: &str, errors: &mut Vec<ValidationError>) {
    if let Some(min) = bounds.minimum {
        if compare(n, min) == Some(Ordering::Less) {
            errors.push(ValidationError::new(path, format!("must be >= {min}")));
        }
    }
    if let Some(max) = bounds.maximum {
        if compare(n, max) == Some(Ordering::Greater) {
            errors.push(ValidationError::new(path, format!("must be <= {max}")));
        }
    }
    if let Some(min) = bounds.exclusive_minimum {
        if matches!(compare(n, min), Some(Ordering::Less | Ordering::Equal)) {
            errors.push(ValidationError::new(path, format!("must be > {min}")));
        }
    }
    if let Some(max) = bounds.exclusive_maximum {
        if matches!(compare(n, max), Some(Ordering::Greater | Ordering::Equal)) {
            errors.push(ValidationError::new(path, format!("must be < {max}")));
        }
    }
}

fn check_string(rules: &StringRules, s: &str, path: &str, errors: &mut Vec<ValidationError>) {
    if rules.min_length.is_none() && rules.max_length.is_none() {
        return;
    }
    let length = s.chars().count();
    if let Some(min) = rules.min_length {
        if length < min {
            errors.push(ValidationError::new(
                path,
                format!("length {length} is shorter than the minimum of {min}"),
            ));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            errors.push(ValidationError::new(
                path,
                format!("length {length} exceeds the maximum of {max}"),
            ));
        }
    }
}

fn check_array(rules: &ArrayRules, items: &[Value], path: &str, errors: &mut Vec<ValidationError>) {
    if let Some(min) = rules.min_items {
        if items.len() < min {
            errors.push(ValidationError::new(
                path,
                format!("must contain at least {min} items, found {}", items.len()),
            ));
        }
    }
    if let Some(max) = rules.max_items {
        if items.len() > max {
            errors.push(ValidationError::new(
                path,
                format!("must contain at most {max} items, found {}", items.len()),
            ));
        }
    }
    for (index, item) in items.iter().enumerate() {
        check(&rules.items, item, &format!("{path}[{index}]"), errors);
    }
}

fn check_object(
    object: &ObjectSchema,
    map: &serde_json::Map<String, Value>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for (name, field) in &object.fields {
        let field_path = format!("{path}.{name}");
        match map.get(name) {
            Some(value) => check(&field.schema, value, &field_path, errors),
            None if field.required => {
                errors.push(ValidationError::new(&field_path, "missing required field"));
            }
            None => {}
        }
    }

    for (name, value) in map {
        if object.fields.contains_key(name) {
            continue;
        }
        let field_path = format!("{path}.{name}");
        match &object.additional {
            AdditionalProperties::Reject => {
                errors.push(ValidationError::new(&field_path, "unknown field"));
            }
            AdditionalProperties::Allow => {}
            AdditionalProperties::Schema(schema) => check(schema, value, &field_path, errors),
        }
    }
}
