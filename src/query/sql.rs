//! Compile a [`Filter`] into a parameterised SQLite predicate over a JSON
//! column.
//!
//! Every atom is guarded by `json_type` so a comparison between mismatched
//! types evaluates to `0` instead of falling back to SQLite's cross-type
//! ordering. The result never evaluates to `NULL`, which keeps `NOT` sound.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::filter::{Filter, FilterOp};

/// A compiled predicate plus its positional parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFilter {
    fn constant(truth: bool) -> Self {
        Self {
            sql: if truth { "1" } else { "0" }.to_string(),
            params: Vec::new(),
        }
    }
}

/// Convert a JSON scalar to a bind parameter. Composite values are bound as
/// their JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Inverse of [`json_to_sql`] for values read back from aggregate queries.
pub fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(_) => Value::Null,
    }
}

pub fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// Compile `filter` against the JSON document in `column`.
pub fn compile(filter: &Filter, column: &str) -> SqlFilter {
    match filter {
        Filter::Operator { field, op, value } => compile_operator(column, field, *op, value),
        Filter::Not(inner) => {
            let inner = compile(inner, column);
            SqlFilter {
                sql: format!("(NOT {})", inner.sql),
                params: inner.params,
            }
        }
        Filter::And(list) => combine(list, column, " AND ", true),
        Filter::Or(list) => combine(list, column, " OR ", false),
    }
}

fn combine(list: &[Filter], column: &str, joiner: &str, empty: bool) -> SqlFilter {
    if list.is_empty() {
        return SqlFilter::constant(empty);
    }
    let mut parts = Vec::with_capacity(list.len());
    let mut params = Vec::new();
    for filter in list {
        let compiled = compile(filter, column);
        parts.push(compiled.sql);
        params.extend(compiled.params);
    }
    SqlFilter {
        sql: format!("({})", parts.join(joiner)),
        params,
    }
}

/// Builder for a single guarded atom.
struct Atom<'a> {
    column: &'a str,
    path: String,
    sql: String,
    params: Vec<SqlValue>,
}

impl<'a> Atom<'a> {
    fn new(column: &'a str, field: &str) -> Self {
        Self {
            column,
            path: json_path(field),
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn json_type(&mut self) -> String {
        self.params.push(SqlValue::Text(self.path.clone()));
        format!("COALESCE(json_type({}, ?), 'null')", self.column)
    }

    fn extract(&mut self) -> String {
        self.params.push(SqlValue::Text(self.path.clone()));
        format!("json_extract({}, ?)", self.column)
    }

    fn bind(&mut self, value: SqlValue) -> &'static str {
        self.params.push(value);
        "?"
    }

    fn finish(self) -> SqlFilter {
        SqlFilter {
            sql: format!("COALESCE(({}), 0)", self.sql),
            params: self.params,
        }
    }
}

fn compile_operator(column: &str, field: &str, op: FilterOp, value: &Value) -> SqlFilter {
    match op {
        FilterOp::Eq => compile_eq(column, field, value),
        FilterOp::Ne => {
            let eq = compile_eq(column, field, value);
            SqlFilter {
                sql: format!("(NOT {})", eq.sql),
                params: eq.params,
            }
        }
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            let types = match value {
                Value::Number(_) => "('integer', 'real')",
                Value::String(_) => "('text')",
                _ => return SqlFilter::constant(false),
            };
            let mut atom = Atom::new(column, field);
            let ty = atom.json_type();
            let extracted = atom.extract();
            let placeholder = atom.bind(json_to_sql(value));
            atom.sql = format!("{ty} IN {types} AND {extracted} {} {placeholder}", op.as_str());
            atom.finish()
        }
        FilterOp::IEq => {
            let Value::String(s) = value else {
                return SqlFilter::constant(false);
            };
            let mut atom = Atom::new(column, field);
            let ty = atom.json_type();
            let extracted = atom.extract();
            let placeholder = atom.bind(SqlValue::Text(s.clone()));
            atom.sql = format!("{ty} = 'text' AND lower({extracted}) = lower({placeholder})");
            atom.finish()
        }
        FilterOp::Like => {
            let Value::String(pattern) = value else {
                return SqlFilter::constant(false);
            };
            let mut atom = Atom::new(column, field);
            let ty = atom.json_type();
            let extracted = atom.extract();
            let placeholder = atom.bind(SqlValue::Text(pattern.clone()));
            atom.sql = format!("{ty} = 'text' AND {extracted} LIKE {placeholder}");
            atom.finish()
        }
    }
}

fn compile_eq(column: &str, field: &str, value: &Value) -> SqlFilter {
    let mut atom = Atom::new(column, field);
    let ty = atom.json_type();
    atom.sql = match value {
        Value::Null => format!("{ty} = 'null'"),
        Value::Bool(b) => {
            let placeholder = atom.bind(SqlValue::Text(b.to_string()));
            format!("{ty} = {placeholder}")
        }
        Value::Number(_) => {
            let extracted = atom.extract();
            let placeholder = atom.bind(json_to_sql(value));
            format!("{ty} IN ('integer', 'real') AND {extracted} = {placeholder}")
        }
        Value::String(s) => {
            let extracted = atom.extract();
            let placeholder = atom.bind(SqlValue::Text(s.clone()));
            format!("{ty} = 'text' AND {extracted} = {placeholder}")
        }
        Value::Array(_) | Value::Object(_) => {
            let expected = if value.is_array() { "array" } else { "object" };
            let extracted = atom.extract();
            let placeholder = atom.bind(SqlValue::Text(value.to_string()));
            format!("{ty} = '{expected}' AND {extracted} = json({placeholder})")
        }
    };
    atom.finish()
}

// ============================================================================
// Tests
// ============================================================================
