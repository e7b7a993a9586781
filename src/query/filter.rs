//! Filter AST shared by the storage and in-memory evaluators.
//!
//! Wire form:
//!
//! ```json
//! { "field": "name", "operator": "=", "value": "x" }
//! { "not_filter": <filter> }
//! { "and_filter": [<filter>, ...] }
//! { "or_filter": [<filter>, ...] }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DatastoreError, Result};
use crate::keys::assert_field;

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `~=`: case-insensitive string equality.
    IEq,
    /// `%=`: SQL `LIKE` pattern, `%` and `_` wildcards, case-sensitive.
    Like,
}

impl FilterOp {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "=" => FilterOp::Eq,
            "!=" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "~=" => FilterOp::IEq,
            "%=" => FilterOp::Like,
            other => {
                return Err(DatastoreError::InvalidFormat(format!(
                    "Unknown filter operator: {other}"
                )))
            }
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::IEq => "~=",
            FilterOp::Like => "%=",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Filter
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Filter {
    Operator {
        field: String,
        op: FilterOp,
        value: Value,
    },
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn operator(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Filter::Operator {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Filter::operator(field, FilterOp::Eq, value)
    }

    pub fn from_json(raw: &Value) -> Result<Self> {
        let obj = raw.as_object().ok_or_else(|| {
            DatastoreError::InvalidFormat(format!("Filter must be an object, got {raw}"))
        })?;

        if let Some(inner) = obj.get("not_filter") {
            return Ok(Filter::Not(Box::new(Filter::from_json(inner)?)));
        }
        if let Some(list) = obj.get("and_filter") {
            return Ok(Filter::And(parse_list(list, "and_filter")?));
        }
        if let Some(list) = obj.get("or_filter") {
            return Ok(Filter::Or(parse_list(list, "or_filter")?));
        }

        let field = obj.get("field").and_then(Value::as_str).ok_or_else(|| {
            DatastoreError::InvalidFormat(format!("Filter is missing a field: {raw}"))
        })?;
        assert_field(field)?;
        let op = obj.get("operator").and_then(Value::as_str).ok_or_else(|| {
            DatastoreError::InvalidFormat(format!("Filter is missing an operator: {raw}"))
        })?;
        let op = FilterOp::parse(op)?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);
        Ok(Filter::operator(field, op, value))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Operator { field, op, value } => {
                json!({ "field": field, "operator": op.as_str(), "value": value })
            }
            Filter::Not(inner) => json!({ "not_filter": inner.to_json() }),
            Filter::And(list) => {
                json!({ "and_filter": list.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(list) => {
                json!({ "or_filter": list.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
        }
    }

    /// Every field the filter reads.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Operator { field, .. } => out.push(field),
            Filter::Not(inner) => inner.collect_fields(out),
            Filter::And(list) | Filter::Or(list) => {
                for f in list {
                    f.collect_fields(out);
                }
            }
        }
    }
}

fn parse_list(raw: &Value, key: &str) -> Result<Vec<Filter>> {
    let list = raw
        .as_array()
        .ok_or_else(|| DatastoreError::InvalidFormat(format!("{key} must be a list")))?;
    list.iter().map(Filter::from_json).collect()
}

impl TryFrom<Value> for Filter {
    type Error = DatastoreError;

    fn try_from(value: Value) -> Result<Self> {
        Filter::from_json(&value)
    }
}

impl From<Filter> for Value {
    fn from(filter: Filter) -> Self {
        filter.to_json()
    }
}

// ============================================================================
// Tests
// ============================================================================
