//! In-memory filter evaluation over record maps.
//!
//! Must agree with `query::sql` row for row: ordering operators only compare
//! numbers with numbers and strings with strings, anything else is `false`.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use crate::types::Record;

use super::filter::{Filter, FilterOp};

/// Compare two scalars of the same kind. `None` when they are not comparable.
pub fn compare_scalars(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64()?;
            let fb = nb.as_f64()?;
            fa.partial_cmp(&fb)
        }
        (Value::String(sa), Value::String(sb)) => Some(sa.cmp(sb)),
        _ => None,
    }
}

/// JSON equality where numbers compare numerically (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_scalars(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Translate a `LIKE` pattern into an anchored regex.
pub fn like_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

fn evaluate_operator(field_value: Option<&Value>, op: FilterOp, operand: &Value) -> bool {
    let field_value = match field_value {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    };

    match op {
        FilterOp::Eq => match (field_value, operand) {
            (None, Value::Null) => true,
            (Some(v), operand) => values_equal(v, operand),
            (None, _) => false,
        },
        FilterOp::Ne => !evaluate_operator(field_value, FilterOp::Eq, operand),
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            let Some(ordering) = field_value.and_then(|v| compare_scalars(v, operand)) else {
                return false;
            };
            match op {
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Le => ordering != Ordering::Greater,
                FilterOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
        FilterOp::IEq => match (field_value, operand) {
            (Some(Value::String(a)), Value::String(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        },
        FilterOp::Like => match (field_value, operand) {
            (Some(Value::String(a)), Value::String(pattern)) => {
                like_to_regex(pattern).is_some_and(|re| re.is_match(a))
            }
            _ => false,
        },
    }
}

/// Whether `record` satisfies `filter`. Missing fields read as `null`.
pub fn matches(filter: &Filter, record: &Record) -> bool {
    match filter {
        Filter::Operator { field, op, value } => evaluate_operator(record.get(field), *op, value),
        Filter::Not(inner) => !matches(inner, record),
        Filter::And(list) => list.iter().all(|f| matches(f, record)),
        Filter::Or(list) => list.iter().any(|f| matches(f, record)),
    }
}

// ============================================================================
// Tests
// ============================================================================
