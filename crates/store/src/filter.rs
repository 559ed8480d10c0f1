//! Evaluation of store filter documents against JSON documents.
//!
//! Supports the subset of the store's query language the engine uses:
//! equality (with `null` matching a missing field), dotted paths,
//! `$eq`, `$ne`, `$exists`, `$in`, `$nin`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$or` and `$and`. RFC 3339 strings compare as instants.

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::{Map, Value};

/// Whether `doc` satisfies `filter`. An empty or non-object filter
/// matches everything.
pub fn matches(doc: &Value, filter: &Value) -> bool {
    let Some(clauses) = filter.as_object() else {
        return true;
    };

    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$or" => condition
            .as_array()
            .is_some_and(|alternatives| alternatives.iter().any(|f| matches(doc, f))),
        "$and" => condition
            .as_array()
            .is_some_and(|all| all.iter().all(|f| matches(doc, f))),
        path => field_matches(lookup(doc, path), condition),
    })
}

/// Resolve a dotted path such as `rrule.until`.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if is_operator_object(ops) => ops
            .iter()
            .all(|(op, operand)| apply_operator(value, op, operand)),
        expected => equals(value, expected),
    }
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn apply_operator(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => equals(value, operand),
        "$ne" => !equals(value, operand),
        "$exists" => {
            let present = value.is_some_and(|v| !v.is_null());
            present == operand.as_bool().unwrap_or(true)
        }
        "$in" => operand
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| equals(value, c))),
        "$nin" => operand
            .as_array()
            .is_none_or(|candidates| !candidates.iter().any(|c| equals(value, c))),
        "$gt" => compare(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(value, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal)),
        other => {
            tracing::warn!(operator = other, "Unsupported filter operator");
            false
        }
    }
}

/// Equality where a missing field equals `null` and an array field
/// matches any of its elements.
fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None | Some(Value::Null) => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|i| scalar_eq(i, expected)),
        Some(actual) => scalar_eq(actual, expected),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    compare_values(value?, operand)
}

/// Ordering between two scalars of the same kind; `None` when they are
/// not comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn parse_instant(s: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}
