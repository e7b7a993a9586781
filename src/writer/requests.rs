use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ListFields;
use crate::keys::Fqid;
use crate::query::Filter;
use crate::types::{Id, MigrationIndex, Position, Record};

// ============================================================================
// Request events
// ============================================================================

/// `add`/`remove` lists of an update event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFieldsUpdate {
    #[serde(default)]
    pub add: ListFields,
    #[serde(default)]
    pub remove: ListFields,
}

impl ListFieldsUpdate {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// An event as submitted by a caller. Translated into one or more stored
/// events before it is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestEvent {
    Create {
        fqid: Fqid,
        fields: Record,
    },
    Update {
        fqid: Fqid,
        #[serde(default)]
        fields: Record,
        #[serde(default)]
        list_fields: ListFieldsUpdate,
    },
    Delete {
        fqid: Fqid,
    },
    Restore {
        fqid: Fqid,
    },
}

impl RequestEvent {
    pub fn fqid(&self) -> &Fqid {
        match self {
            RequestEvent::Create { fqid, .. }
            | RequestEvent::Update { fqid, .. }
            | RequestEvent::Delete { fqid }
            | RequestEvent::Restore { fqid } => fqid,
        }
    }

    pub fn create(fqid: Fqid, fields: Record) -> Self {
        RequestEvent::Create { fqid, fields }
    }

    pub fn update(fqid: Fqid, fields: Record) -> Self {
        RequestEvent::Update {
            fqid,
            fields,
            list_fields: ListFieldsUpdate::default(),
        }
    }

    pub fn list_update(fqid: Fqid, add: ListFields, remove: ListFields) -> Self {
        RequestEvent::Update {
            fqid,
            fields: Record::new(),
            list_fields: ListFieldsUpdate { add, remove },
        }
    }

    pub fn delete(fqid: Fqid) -> Self {
        RequestEvent::Delete { fqid }
    }

    pub fn restore(fqid: Fqid) -> Self {
        RequestEvent::Restore { fqid }
    }
}

// ============================================================================
// Locked fields
// ============================================================================

/// A position lock on a collectionfield restricted to models matching a
/// filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredLock {
    pub position: Position,
    pub filter: Filter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LockValue {
    Position(Position),
    Filtered(FilteredLock),
    FilteredList(Vec<FilteredLock>),
}

// ============================================================================
// Write requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub events: Vec<RequestEvent>,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub information: Value,
    #[serde(default)]
    pub locked_fields: BTreeMap<String, LockValue>,
    /// Only accepted while the datastore is empty.
    #[serde(default)]
    pub migration_index: Option<MigrationIndex>,
}

impl WriteRequest {
    pub fn new(events: Vec<RequestEvent>) -> Self {
        Self {
            events,
            user_id: 0,
            information: Value::Null,
            locked_fields: BTreeMap::new(),
            migration_index: None,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_information(mut self, information: Value) -> Self {
        self.information = information;
        self
    }

    pub fn with_lock(mut self, key: impl Into<String>, value: LockValue) -> Self {
        self.locked_fields.insert(key.into(), value);
        self
    }

    pub fn with_migration_index(mut self, migration_index: MigrationIndex) -> Self {
        self.migration_index = Some(migration_index);
        self
    }
}

/// Body of the `write` route: one request or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteBody {
    One(WriteRequest),
    Many(Vec<WriteRequest>),
}

impl WriteBody {
    pub fn into_requests(self) -> Vec<WriteRequest> {
        match self {
            WriteBody::One(request) => vec![request],
            WriteBody::Many(requests) => requests,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveIdsRequest {
    pub collection: String,
    pub amount: i64,
}

impl ReserveIdsRequest {
    /// Largest `amount` a single reservation may ask for.
    pub const MAX_AMOUNT: i64 = 1_000_000;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveIdsResponse {
    pub ids: Vec<Id>,
}

/// What a successful batch produced, for notifying downstream consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    /// One position per request, ascending.
    pub positions: Vec<Position>,
    /// `fqfield → value` as written into `models`; `null` for removed
    /// fields and for every field of a deleted model.
    pub modified_fqfields: BTreeMap<String, Value>,
}

impl WriteResult {
    pub fn last_position(&self) -> Option<Position> {
        self.positions.last().copied()
    }
}
