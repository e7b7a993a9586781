//! Writes that touch `models` only, for short-lived collections nobody needs
//! history for.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{DatastoreError, Result};
use crate::event::Model;
use crate::keys::assert_writable_field;
use crate::storage::sqlite;
use crate::types::Record;

use super::requests::{RequestEvent, WriteRequest};

pub const EPHEMERAL_COLLECTIONS: &[&str] = &["action_worker", "import_preview"];

/// Which kind of change a `write_without_events` call made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EphemeralOutcome {
    Written,
    Deleted,
}

/// Shape checks: one request, at most one event unless all are deletes,
/// and only allowed collections.
pub fn validate(requests: &[WriteRequest]) -> Result<&WriteRequest> {
    let [request] = requests else {
        return Err(DatastoreError::InvalidFormat(format!(
            "write_without_events takes exactly one request, got {}",
            requests.len()
        )));
    };
    if request.events.is_empty() {
        return Err(DatastoreError::InvalidFormat(
            "A write request needs at least one event".into(),
        ));
    }
    let all_deletes = request
        .events
        .iter()
        .all(|e| matches!(e, RequestEvent::Delete { .. }));
    if request.events.len() > 1 && !all_deletes {
        return Err(DatastoreError::InvalidFormat(
            "Only delete events may be batched in write_without_events".into(),
        ));
    }
    for event in &request.events {
        let collection = event.fqid().collection();
        if !EPHEMERAL_COLLECTIONS.contains(&collection) {
            return Err(DatastoreError::InvalidFormat(format!(
                "Collection {collection} is not allowed in write_without_events"
            )));
        }
    }
    Ok(request)
}

fn merge(collection: &str, mut base: Record, delta: &Record) -> Result<Record> {
    for (key, value) in delta {
        assert_writable_field(collection, key)?;
        if value.is_null() {
            base.remove(key);
        } else {
            base.insert(key.clone(), value.clone());
        }
    }
    Ok(base)
}

pub fn execute(conn: &Connection, request: &WriteRequest) -> Result<EphemeralOutcome> {
    let position = sqlite::max_position(conn)?;
    let mut outcome = EphemeralOutcome::Written;
    for event in &request.events {
        match event {
            RequestEvent::Create { fqid, fields }
            | RequestEvent::Update { fqid, fields, .. } => {
                if let RequestEvent::Update { list_fields, .. } = event {
                    if !list_fields.is_empty() {
                        return Err(DatastoreError::InvalidFormat(
                            "List updates are not supported without events".into(),
                        ));
                    }
                }
                let existing = sqlite::read_model(conn, fqid)?
                    .map(|m| m.fields)
                    .unwrap_or_default();
                let model = Model {
                    fields: merge(fqid.collection(), existing, fields)?,
                    deleted: false,
                    position,
                };
                sqlite::write_model(conn, fqid, &model)?;
            }
            RequestEvent::Delete { fqid } => {
                sqlite::delete_model(conn, fqid)?;
                outcome = EphemeralOutcome::Deleted;
            }
            RequestEvent::Restore { fqid } => {
                return Err(DatastoreError::InvalidFormat(format!(
                    "Cannot restore {fqid} without events"
                )))
            }
        }
    }
    debug!(events = request.events.len(), ?outcome, "write without events");
    Ok(outcome)
}
