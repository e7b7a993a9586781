use serde_json::Value;

use crate::error::Result;
use crate::keys::assert_field;
use crate::types::Record;

/// Apply a field projection to a stored record (payload plus reserved
/// fields). An empty projection keeps every field. `null` values are dropped
/// either way; reserved fields only survive a non-empty projection when
/// named.
pub fn project(record: &Record, mapped_fields: &[String]) -> Record {
    if mapped_fields.is_empty() {
        return record
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
    mapped_fields
        .iter()
        .filter_map(|field| match record.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some((field.clone(), value.clone())),
        })
        .collect()
}

pub fn validate_mapped_fields(mapped_fields: &[String]) -> Result<()> {
    mapped_fields.iter().try_for_each(|f| assert_field(f))
}

/// Sorted union of two projections. The result is empty, and so selects
/// every field, only when both sides are.
pub fn merge_mapped_fields(a: &[String], b: &[String]) -> Vec<String> {
    let mut out: Vec<String> = a.iter().chain(b.iter()).cloned().collect();
    out.sort();
    out.dedup();
    out
}
