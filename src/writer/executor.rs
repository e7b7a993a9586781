//! One write request against an open write transaction.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::error::{DatastoreError, Result};
use crate::event::{DbEvent, Model};
use crate::keys::Fqid;
use crate::reader::service::current_models;
use crate::storage::{sqlite, EventTable};
use crate::types::{Id, MigrationIndex, Position, INITIAL_MIGRATION_INDEX};

use super::locks::check_locked_fields;
use super::requests::WriteRequest;
use super::translator::translate;

/// How the migration index of the new position is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationIndexSource {
    /// From the request on an empty store, otherwise the store's own index.
    Request,
    /// Fixed by the caller. Used by model migrations while finalizing.
    Forced(MigrationIndex),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub position: Position,
    pub modified_fqfields: BTreeMap<String, Value>,
}

/// Unix epoch seconds with microsecond precision.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn resolve_migration_index(
    conn: &Connection,
    request: &WriteRequest,
    source: MigrationIndexSource,
) -> Result<MigrationIndex> {
    match source {
        MigrationIndexSource::Forced(migration_index) => Ok(migration_index),
        MigrationIndexSource::Request => match (
            request.migration_index,
            sqlite::current_migration_index(conn)?,
        ) {
            (Some(_), Some(_)) => Err(DatastoreError::DatastoreNotEmpty(
                "Passed a migration index to a datastore that already holds data".into(),
            )),
            (Some(requested), None) if requested < INITIAL_MIGRATION_INDEX => {
                Err(DatastoreError::InvalidFormat(format!(
                    "Migration index must be at least {INITIAL_MIGRATION_INDEX}, got {requested}"
                )))
            }
            (Some(requested), None) => Ok(requested),
            (None, Some(current)) => Ok(current),
            (None, None) => Ok(INITIAL_MIGRATION_INDEX),
        },
    }
}

fn validate_request(request: &WriteRequest) -> Result<()> {
    if request.events.is_empty() {
        return Err(DatastoreError::InvalidFormat(
            "A write request needs at least one event".into(),
        ));
    }
    Ok(())
}

/// Values every modified fqfield carries after the write.
fn collect_modified_fqfields(
    touched: &[(DbEvent, Vec<String>)],
    models: &HashMap<Fqid, Model>,
) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (event, fields) in touched {
        let model = models.get(event.fqid());
        for field in fields {
            let value = match model {
                Some(model) if !model.deleted => {
                    model.fields.get(field).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            };
            out.insert(event.fqid().fqfield(field.as_str()).to_string(), value);
        }
    }
    out
}

/// Validate, translate and append one request. Nothing is written unless
/// every check passes; the caller's transaction rolls back otherwise.
pub fn execute(
    conn: &Connection,
    request: &WriteRequest,
    source: MigrationIndexSource,
) -> Result<WriteOutcome> {
    validate_request(request)?;
    let migration_index = resolve_migration_index(conn, request, source)?;
    check_locked_fields(conn, &request.locked_fields)?;

    let position = sqlite::max_position(conn)? + 1;
    let mut models = current_models(conn, request.events.iter().map(|e| e.fqid()))?;
    let mut translated: Vec<(DbEvent, Vec<String>)> = Vec::new();
    let mut touched: BTreeSet<Fqid> = BTreeSet::new();

    for request_event in &request.events {
        for event in translate(request_event)? {
            let before = models.remove(event.fqid());
            let modified = event.modified_fields(before.as_ref());
            let after = event.apply(before, position)?;
            models.insert(event.fqid().clone(), after);
            touched.insert(event.fqid().clone());
            translated.push((event, modified));
        }
    }

    let assigned = sqlite::insert_position(
        conn,
        now_timestamp(),
        request.user_id,
        Some(&request.information),
        migration_index,
    )?;
    if assigned != position {
        return Err(DatastoreError::Internal(format!(
            "expected position {position}, the log assigned {assigned}"
        )));
    }

    let mut created: BTreeMap<String, Id> = BTreeMap::new();
    for (weight, (event, modified)) in translated.iter().enumerate() {
        let event_id = sqlite::insert_event(conn, EventTable::Events, position, event, weight as i64 + 1)?;
        for field in modified {
            let collectionfield = event.fqid().collectionfield(field).to_string();
            let cf_id = sqlite::touch_collectionfield(conn, &collectionfield, position)?;
            sqlite::link_event_to_collectionfield(conn, event_id, cf_id)?;
        }
        if let DbEvent::Create { fqid, .. } = event {
            let entry = created.entry(fqid.collection().to_string()).or_default();
            *entry = (*entry).max(fqid.id());
        }
    }

    for (collection, max_id) in &created {
        sqlite::raise_id_sequence(conn, collection, max_id + 1)?;
    }
    for fqid in &touched {
        if let Some(model) = models.get(fqid) {
            sqlite::write_model(conn, fqid, model)?;
        }
    }

    debug!(position, migration_index, events = translated.len(), "write");
    Ok(WriteOutcome {
        position,
        modified_fqfields: collect_modified_fqfields(&translated, &models),
    })
}
