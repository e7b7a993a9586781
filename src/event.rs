//! Stored event variants and their application semantics.
//!
//! Every event the engine persists is one of six closed variants. Folding a
//! model's events in `(position, weight)` order yields its state at any
//! position; the same `apply` is used by the writer, the point-in-time
//! reader, and the migration keyframes.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::{DatastoreError, Result};
use crate::keys::{Fqid, META_DELETED, META_POSITION};
use crate::types::{Position, Record};

// ============================================================================
// EventType
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Create,
    Update,
    DeleteFields,
    ListFields,
    Delete,
    Restore,
}

impl EventType {
    /// Value stored in the `type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::DeleteFields => "deletefields",
            EventType::ListFields => "listfields",
            EventType::Delete => "delete",
            EventType::Restore => "restore",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "create" => Ok(EventType::Create),
            "update" => Ok(EventType::Update),
            "deletefields" => Ok(EventType::DeleteFields),
            "listfields" => Ok(EventType::ListFields),
            "delete" => Ok(EventType::Delete),
            "restore" => Ok(EventType::Restore),
            other => Err(DatastoreError::InvalidFormat(format!("Unknown event type: {other}"))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Model
// ============================================================================

/// Folded state of one fqid: payload fields plus the tombstone flag and the
/// position of the last applied event.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub fields: Record,
    pub deleted: bool,
    pub position: Position,
}

impl Model {
    /// Payload plus the two reserved fields, as stored in `models`.
    pub fn to_record(&self) -> Record {
        let mut record = self.fields.clone();
        record.insert(META_DELETED.into(), Value::Bool(self.deleted));
        record.insert(META_POSITION.into(), json!(self.position));
        record
    }

    /// Inverse of [`Model::to_record`]. `deleted` comes from the column, not
    /// the payload, so a stale `meta_deleted` cannot win.
    pub fn from_record(mut record: Record, deleted: bool) -> Self {
        record.remove(META_DELETED);
        let position = record
            .remove(META_POSITION)
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        Self {
            fields: record,
            deleted,
            position,
        }
    }
}

// ============================================================================
// DbEvent
// ============================================================================

pub type ListFields = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq)]
pub enum DbEvent {
    Create { fqid: Fqid, fields: Record },
    Update { fqid: Fqid, fields: Record },
    DeleteFields { fqid: Fqid, fields: Vec<String> },
    ListUpdate { fqid: Fqid, add: ListFields, remove: ListFields },
    Delete { fqid: Fqid },
    Restore { fqid: Fqid },
}

impl DbEvent {
    pub fn fqid(&self) -> &Fqid {
        match self {
            DbEvent::Create { fqid, .. }
            | DbEvent::Update { fqid, .. }
            | DbEvent::DeleteFields { fqid, .. }
            | DbEvent::ListUpdate { fqid, .. }
            | DbEvent::Delete { fqid }
            | DbEvent::Restore { fqid } => fqid,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            DbEvent::Create { .. } => EventType::Create,
            DbEvent::Update { .. } => EventType::Update,
            DbEvent::DeleteFields { .. } => EventType::DeleteFields,
            DbEvent::ListUpdate { .. } => EventType::ListFields,
            DbEvent::Delete { .. } => EventType::Delete,
            DbEvent::Restore { .. } => EventType::Restore,
        }
    }

    /// Payload stored in the `data` column.
    pub fn data(&self) -> Value {
        match self {
            DbEvent::Create { fields, .. } | DbEvent::Update { fields, .. } => {
                Value::Object(fields.clone())
            }
            DbEvent::DeleteFields { fields, .. } => json!(fields),
            DbEvent::ListUpdate { add, remove, .. } => json!({ "add": add, "remove": remove }),
            DbEvent::Delete { .. } | DbEvent::Restore { .. } => Value::Null,
        }
    }

    /// Rebuild an event from its stored columns.
    pub fn from_stored(fqid: Fqid, event_type: EventType, data: Value) -> Result<Self> {
        let malformed =
            |what: &str| DatastoreError::Internal(format!("malformed {what} event for {fqid}"));
        Ok(match event_type {
            EventType::Create => match data {
                Value::Object(fields) => DbEvent::Create { fqid, fields },
                _ => return Err(malformed("create")),
            },
            EventType::Update => match data {
                Value::Object(fields) => DbEvent::Update { fqid, fields },
                _ => return Err(malformed("update")),
            },
            EventType::DeleteFields => {
                let fields = serde_json::from_value::<Vec<String>>(data)
                    .map_err(|_| malformed("deletefields"))?;
                DbEvent::DeleteFields { fqid, fields }
            }
            EventType::ListFields => {
                let mut obj = match data {
                    Value::Object(obj) => obj,
                    _ => return Err(malformed("listfields")),
                };
                let mut take = |key: &str| -> Result<ListFields> {
                    match obj.remove(key) {
                        None | Some(Value::Null) => Ok(ListFields::new()),
                        Some(v) => serde_json::from_value(v).map_err(|_| malformed("listfields")),
                    }
                };
                let add = take("add")?;
                let remove = take("remove")?;
                DbEvent::ListUpdate { fqid, add, remove }
            }
            EventType::Delete => DbEvent::Delete { fqid },
            EventType::Restore => DbEvent::Restore { fqid },
        })
    }

    /// Events that encode no change at all. Migrations drop these.
    pub fn is_empty(&self) -> bool {
        match self {
            DbEvent::Update { fields, .. } => fields.is_empty(),
            DbEvent::DeleteFields { fields, .. } => fields.is_empty(),
            DbEvent::ListUpdate { add, remove, .. } => {
                add.values().all(Vec::is_empty) && remove.values().all(Vec::is_empty)
            }
            _ => false,
        }
    }

    /// Fields this event touches. `Delete` and `Restore` touch every field
    /// the model carries at that moment, so `model` must be the state before
    /// the event is applied.
    pub fn modified_fields(&self, model: Option<&Model>) -> Vec<String> {
        match self {
            DbEvent::Create { fields, .. } | DbEvent::Update { fields, .. } => {
                fields.keys().cloned().collect()
            }
            DbEvent::DeleteFields { fields, .. } => fields.clone(),
            DbEvent::ListUpdate { add, remove, .. } => {
                let mut keys: Vec<String> = add.keys().chain(remove.keys()).cloned().collect();
                keys.sort();
                keys.dedup();
                keys
            }
            DbEvent::Delete { .. } | DbEvent::Restore { .. } => model
                .map(|m| m.fields.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Apply this event to `model` (the state before it) and return the state
    /// after it. Precondition violations surface as the write-path errors.
    pub fn apply(&self, model: Option<Model>, position: Position) -> Result<Model> {
        let fqid = self.fqid();
        match self {
            DbEvent::Create { fields, .. } => {
                if model.is_some() {
                    return Err(DatastoreError::model_exists(fqid.to_string()));
                }
                let fields: Record = fields
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Ok(Model {
                    fields,
                    deleted: false,
                    position,
                })
            }
            DbEvent::Update { fields, .. } => {
                let mut model = require_alive(fqid, model)?;
                for (key, value) in fields {
                    if value.is_null() {
                        model.fields.remove(key);
                    } else {
                        model.fields.insert(key.clone(), value.clone());
                    }
                }
                model.position = position;
                Ok(model)
            }
            DbEvent::DeleteFields { fields, .. } => {
                let mut model = require_alive(fqid, model)?;
                for key in fields {
                    model.fields.remove(key);
                }
                model.position = position;
                Ok(model)
            }
            DbEvent::ListUpdate { add, remove, .. } => {
                let mut model = require_alive(fqid, model)?;
                apply_list_update(fqid, &mut model.fields, add, remove)?;
                model.position = position;
                Ok(model)
            }
            DbEvent::Delete { .. } => {
                let mut model = require_alive(fqid, model)?;
                model.deleted = true;
                model.position = position;
                Ok(model)
            }
            DbEvent::Restore { .. } => match model {
                None => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
                Some(m) if !m.deleted => Err(DatastoreError::model_not_deleted(fqid.to_string())),
                Some(mut m) => {
                    m.deleted = false;
                    m.position = position;
                    Ok(m)
                }
            },
        }
    }
}

fn require_alive(fqid: &Fqid, model: Option<Model>) -> Result<Model> {
    match model {
        Some(m) if !m.deleted => Ok(m),
        _ => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
    }
}

fn is_list_scalar(value: &Value) -> bool {
    value.is_string() || value.is_i64() || value.is_u64()
}

fn apply_list_update(
    fqid: &Fqid,
    fields: &mut Map<String, Value>,
    add: &ListFields,
    remove: &ListFields,
) -> Result<()> {
    for (field, values) in add.iter().chain(remove.iter()) {
        if let Some(bad) = values.iter().find(|v| !is_list_scalar(v)) {
            return Err(DatastoreError::InvalidFormat(format!(
                "List field {field} of {fqid} can only hold strings or integers, got {bad}"
            )));
        }
    }

    for (field, values) in add {
        let mut list = match fields.remove(field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(list)) => list,
            Some(_) => return Err(not_a_list(fqid, field)),
        };
        for value in values {
            if !list.contains(value) {
                list.push(value.clone());
            }
        }
        fields.insert(field.clone(), Value::Array(list));
    }

    for (field, values) in remove {
        match fields.get_mut(field) {
            None | Some(Value::Null) => {}
            Some(Value::Array(list)) => list.retain(|v| !values.contains(v)),
            Some(_) => return Err(not_a_list(fqid, field)),
        }
    }
    Ok(())
}

fn not_a_list(fqid: &Fqid, field: &str) -> DatastoreError {
    DatastoreError::InvalidFormat(format!("Field {field} of {fqid} is not a list"))
}

/// Fold an fqid's events into its model. The first event must be a create;
/// an empty slice or any other opening event is a programming error.
pub fn build_model<'a, I>(events: I) -> Result<Model>
where
    I: IntoIterator<Item = (&'a DbEvent, Position)>,
{
    let mut iter = events.into_iter();
    let (first, position) = iter
        .next()
        .ok_or_else(|| DatastoreError::Internal("cannot build a model from no events".into()))?;
    if first.event_type() != EventType::Create {
        return Err(DatastoreError::Internal(format!(
            "first event of {} is {}, not create",
            first.fqid(),
            first.event_type()
        )));
    }
    let mut model = first.apply(None, position)?;
    for (event, position) in iter {
        model = event.apply(Some(model), position)?;
    }
    Ok(model)
}

// ============================================================================
// Tests
// ============================================================================
