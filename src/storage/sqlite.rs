//! SQL primitives for every table.
//!
//! Functions here run single statements (or short statement groups) against
//! a connection the caller already holds, usually inside a transaction opened
//! by [`ConnectionPool`](super::pool::ConnectionPool). None of them open or
//! commit transactions.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{DatabaseError, DatastoreError, Result};
use crate::event::{DbEvent, EventType, Model};
use crate::keys::{collection_fqid_range, Fqid};
use crate::query::sql::{compile, json_path, sql_to_json};
use crate::query::Filter;
use crate::types::{
    AggregateType, HistoryInformation, Id, MigrationIndex, Position, PositionData, Record,
};

// ============================================================================
// Helpers
// ============================================================================

fn parse_json(table: &'static str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|source| DatabaseError::Corruption { table, source }.into())
}

fn parse_record(table: &'static str, raw: &str) -> Result<Record> {
    match parse_json(table, raw)? {
        Value::Object(record) => Ok(record),
        other => Err(DatastoreError::Internal(format!(
            "row of {table} holds a non-object record: {other}"
        ))),
    }
}

fn parse_fqid(raw: &str) -> Result<Fqid> {
    raw.parse()
        .map_err(|_| DatastoreError::Internal(format!("stored fqid {raw:?} is malformed")))
}

fn model_from_row(table: &'static str, fqid: &str, data: &str, deleted: bool) -> Result<(Fqid, Model)> {
    let fqid = parse_fqid(fqid)?;
    let record = parse_record(table, data)?;
    Ok((fqid, Model::from_record(record, deleted)))
}

type RawModelRow = (String, String, bool);

fn raw_model_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawModelRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

// ============================================================================
// Positions
// ============================================================================

pub fn max_position(conn: &Connection) -> Result<Position> {
    Ok(conn.query_row("SELECT COALESCE(MAX(position), 0) FROM positions", [], |r| {
        r.get(0)
    })?)
}

pub fn min_position(conn: &Connection) -> Result<Option<Position>> {
    Ok(conn.query_row("SELECT MIN(position) FROM positions", [], |r| r.get(0))?)
}

pub fn position_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM positions", [], |r| r.get(0))?)
}

pub fn previous_position(conn: &Connection, position: Position) -> Result<Option<Position>> {
    Ok(conn.query_row(
        "SELECT MAX(position) FROM positions WHERE position < ?1",
        [position],
        |r| r.get(0),
    )?)
}

pub fn insert_position(
    conn: &Connection,
    timestamp: f64,
    user_id: i64,
    information: Option<&Value>,
    migration_index: MigrationIndex,
) -> Result<Position> {
    let information = information.filter(|v| !v.is_null()).map(Value::to_string);
    conn.execute(
        "INSERT INTO positions (timestamp, user_id, information, migration_index)
         VALUES (?1, ?2, ?3, ?4)",
        params![timestamp, user_id, information, migration_index],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_position(conn: &Connection, position: Position) -> Result<Option<PositionData>> {
    let row = conn
        .query_row(
            "SELECT position, timestamp, user_id, information, migration_index
             FROM positions WHERE position = ?1",
            [position],
            |r| {
                Ok((
                    r.get::<_, Position>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, MigrationIndex>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(position, timestamp, user_id, information, migration_index)| {
        Ok(PositionData {
            position,
            timestamp,
            user_id,
            information: information
                .map(|raw| parse_json("positions", &raw))
                .transpose()?,
            migration_index,
        })
    })
    .transpose()
}

/// Distinct migration indices over all positions, ascending.
pub fn migration_indices(conn: &Connection) -> Result<Vec<MigrationIndex>> {
    let mut stmt =
        conn.prepare_cached("SELECT DISTINCT migration_index FROM positions ORDER BY 1")?;
    let rows = stmt.query_map([], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// The migration index every position shares. `None` for an empty store.
pub fn current_migration_index(conn: &Connection) -> Result<Option<MigrationIndex>> {
    let indices = migration_indices(conn)?;
    match indices.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(*single)),
        many => Err(DatastoreError::InvalidDatastoreState(format!(
            "positions carry multiple migration indices: {many:?}"
        ))),
    }
}

pub fn set_migration_index(conn: &Connection, migration_index: MigrationIndex) -> Result<()> {
    conn.execute("UPDATE positions SET migration_index = ?1", [migration_index])?;
    Ok(())
}

pub fn clear_information(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE positions SET information = NULL WHERE information IS NOT NULL",
        [],
    )?)
}

/// Positions with non-null information whose events touched each fqid.
pub fn history_information(
    conn: &Connection,
    fqids: &[Fqid],
) -> Result<BTreeMap<String, Vec<HistoryInformation>>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT p.position, p.timestamp, p.user_id, p.information
         FROM positions p JOIN events e ON e.position = p.position
         WHERE e.fqid = ?1 AND p.information IS NOT NULL
         ORDER BY p.position",
    )?;
    let mut out = BTreeMap::new();
    for fqid in fqids {
        let rows = stmt.query_map([fqid.to_string()], |r| {
            Ok((
                r.get::<_, Position>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (position, timestamp, user_id, information) = row?;
            entries.push(HistoryInformation {
                position,
                timestamp,
                user_id,
                information: parse_json("positions", &information)?,
            });
        }
        if !entries.is_empty() {
            out.insert(fqid.to_string(), entries);
        }
    }
    Ok(out)
}

// ============================================================================
// Events
// ============================================================================

/// The primary event log or its migration shadow. Both share one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTable {
    Events,
    MigrationEvents,
}

impl EventTable {
    pub fn name(self) -> &'static str {
        match self {
            EventTable::Events => "events",
            EventTable::MigrationEvents => "migration_events",
        }
    }
}

/// An event row with its storage identity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub position: Position,
    pub weight: i64,
    pub event: DbEvent,
}

fn event_data_text(event: &DbEvent) -> Option<String> {
    match event.data() {
        Value::Null => None,
        data => Some(data.to_string()),
    }
}

fn event_from_row(table: EventTable, fqid: &str, kind: &str, data: Option<String>) -> Result<DbEvent> {
    let fqid = parse_fqid(fqid)?;
    let event_type = EventType::parse(kind)
        .map_err(|_| DatastoreError::Internal(format!("stored event type {kind:?} is unknown")))?;
    let data = match data {
        Some(raw) => parse_json(table.name(), &raw)?,
        None => Value::Null,
    };
    DbEvent::from_stored(fqid, event_type, data)
}

pub fn insert_event(
    conn: &Connection,
    table: EventTable,
    position: Position,
    event: &DbEvent,
    weight: i64,
) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {} (position, fqid, type, data, weight) VALUES (?1, ?2, ?3, ?4, ?5)",
            table.name()
        ),
        params![
            position,
            event.fqid().to_string(),
            event.event_type().as_str(),
            event_data_text(event),
            weight
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_event(
    conn: &Connection,
    table: EventTable,
    id: i64,
    event: &DbEvent,
    weight: i64,
) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET fqid = ?2, type = ?3, data = ?4, weight = ?5 WHERE id = ?1",
            table.name()
        ),
        params![
            id,
            event.fqid().to_string(),
            event.event_type().as_str(),
            event_data_text(event),
            weight
        ],
    )?;
    Ok(())
}

pub fn delete_event(conn: &Connection, table: EventTable, id: i64) -> Result<()> {
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table.name()), [id])?;
    Ok(())
}

/// Events of one position, ordered by weight.
pub fn events_at_position(
    conn: &Connection,
    table: EventTable,
    position: Position,
) -> Result<Vec<StoredEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, position, weight, fqid, type, data FROM {}
         WHERE position = ?1 ORDER BY weight",
        table.name()
    ))?;
    let rows = stmt.query_map([position], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, Position>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, Option<String>>(5)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, position, weight, fqid, kind, data) = row?;
        out.push(StoredEvent {
            id,
            position,
            weight,
            event: event_from_row(table, &fqid, &kind, data)?,
        });
    }
    Ok(out)
}

/// Events of one fqid up to and including `up_to`, in replay order.
pub fn events_for_fqid(
    conn: &Connection,
    fqid: &Fqid,
    up_to: Option<Position>,
) -> Result<Vec<(DbEvent, Position)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT position, fqid, type, data FROM events
         WHERE fqid = ?1 AND position <= ?2 ORDER BY position, weight",
    )?;
    let rows = stmt.query_map(params![fqid.to_string(), up_to.unwrap_or(i64::MAX)], |r| {
        Ok((
            r.get::<_, Position>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, Option<String>>(3)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (position, fqid, kind, data) = row?;
        out.push((event_from_row(EventTable::Events, &fqid, &kind, data)?, position));
    }
    Ok(out)
}

pub fn event_count(conn: &Connection, table: EventTable) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |r| {
        r.get(0)
    })?)
}

// ============================================================================
// Models
// ============================================================================

pub fn read_model(conn: &Connection, fqid: &Fqid) -> Result<Option<Model>> {
    let row = conn
        .query_row(
            "SELECT fqid, data, deleted FROM models WHERE fqid = ?1",
            [fqid.to_string()],
            raw_model_row,
        )
        .optional()?;
    row.map(|(fqid, data, deleted)| model_from_row("models", &fqid, &data, deleted).map(|(_, m)| m))
        .transpose()
}

/// Live and deleted models of one collection, ordered by fqid.
pub fn collection_models(conn: &Connection, collection: &str) -> Result<Vec<(Fqid, Model)>> {
    let (low, high) = collection_fqid_range(collection);
    let mut stmt = conn.prepare_cached(
        "SELECT fqid, data, deleted FROM models WHERE fqid >= ?1 AND fqid < ?2",
    )?;
    let rows = stmt.query_map([low, high], raw_model_row)?;
    let mut out = Vec::new();
    for row in rows {
        let (fqid, data, deleted) = row?;
        out.push(model_from_row("models", &fqid, &data, deleted)?);
    }
    Ok(out)
}

pub fn all_models(conn: &Connection) -> Result<Vec<(Fqid, Model)>> {
    let mut stmt = conn.prepare_cached("SELECT fqid, data, deleted FROM models")?;
    let rows = stmt.query_map([], raw_model_row)?;
    let mut out = Vec::new();
    for row in rows {
        let (fqid, data, deleted) = row?;
        out.push(model_from_row("models", &fqid, &data, deleted)?);
    }
    Ok(out)
}

/// Insert or replace the materialized row of `fqid`.
pub fn write_model(conn: &Connection, fqid: &Fqid, model: &Model) -> Result<()> {
    conn.execute(
        "INSERT INTO models (fqid, data, deleted) VALUES (?1, ?2, ?3)
         ON CONFLICT(fqid) DO UPDATE SET data = excluded.data, deleted = excluded.deleted",
        params![
            fqid.to_string(),
            Value::Object(model.to_record()).to_string(),
            model.deleted
        ],
    )?;
    Ok(())
}

pub fn delete_model(conn: &Connection, fqid: &Fqid) -> Result<bool> {
    Ok(conn.execute("DELETE FROM models WHERE fqid = ?1", [fqid.to_string()])? > 0)
}

pub fn model_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM models", [], |r| r.get(0))?)
}

/// Live models of `collection` matching `filter`.
pub fn filter_models(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
) -> Result<Vec<(Fqid, Model)>> {
    let (low, high) = collection_fqid_range(collection);
    let compiled = compile(filter, "data");
    let sql = format!(
        "SELECT fqid, data, deleted FROM models
         WHERE fqid >= ? AND fqid < ? AND deleted = 0 AND {}",
        compiled.sql
    );
    let mut bound = vec![SqlValue::Text(low), SqlValue::Text(high)];
    bound.extend(compiled.params);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bound.iter()), raw_model_row)?;
    let mut out = Vec::new();
    for row in rows {
        let (fqid, data, deleted) = row?;
        out.push(model_from_row("models", &fqid, &data, deleted)?);
    }
    Ok(out)
}

/// Aggregate over live models of a collection matching a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate<'a> {
    Count,
    Exists,
    Min(&'a str, AggregateType),
    Max(&'a str, AggregateType),
}

pub fn aggregate(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
    aggregate: Aggregate<'_>,
) -> Result<Value> {
    let (low, high) = collection_fqid_range(collection);
    let compiled = compile(filter, "data");
    let mut bound = Vec::new();
    let select = match aggregate {
        Aggregate::Count => "COUNT(*)".to_string(),
        Aggregate::Exists => "COUNT(*) > 0".to_string(),
        Aggregate::Min(field, ty) | Aggregate::Max(field, ty) => {
            bound.push(SqlValue::Text(json_path(field)));
            let func = if matches!(aggregate, Aggregate::Min(..)) { "MIN" } else { "MAX" };
            format!("{func}(CAST(json_extract(data, ?) AS {}))", ty.sql_type())
        }
    };
    bound.push(SqlValue::Text(low));
    bound.push(SqlValue::Text(high));
    bound.extend(compiled.params);
    let sql = format!(
        "SELECT {select} FROM models WHERE fqid >= ? AND fqid < ? AND deleted = 0 AND {}",
        compiled.sql
    );
    let raw: SqlValue = conn.query_row(&sql, params_from_iter(bound.iter()), |r| r.get(0))?;
    Ok(match aggregate {
        Aggregate::Exists => Value::Bool(matches!(raw, SqlValue::Integer(n) if n != 0)),
        _ => sql_to_json(raw),
    })
}

pub fn clear_models(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM models", [])?;
    Ok(())
}

// ============================================================================
// Id sequences
// ============================================================================

pub fn id_sequence(conn: &Connection, collection: &str) -> Result<Option<Id>> {
    Ok(conn
        .query_row(
            "SELECT id FROM id_sequences WHERE collection = ?1",
            [collection],
            |r| r.get(0),
        )
        .optional()?)
}

/// Raise the next free id of `collection` to at least `next_id`.
pub fn raise_id_sequence(conn: &Connection, collection: &str, next_id: Id) -> Result<()> {
    conn.execute(
        "INSERT INTO id_sequences (collection, id) VALUES (?1, ?2)
         ON CONFLICT(collection) DO UPDATE SET id = MAX(id, excluded.id)",
        params![collection, next_id],
    )?;
    Ok(())
}

/// Advance the sequence by `amount` and return the new next free id.
pub fn advance_id_sequence(conn: &Connection, collection: &str, amount: i64) -> Result<Id> {
    Ok(conn.query_row(
        "INSERT INTO id_sequences (collection, id) VALUES (?1, 1 + ?2)
         ON CONFLICT(collection) DO UPDATE SET id = id + ?2
         RETURNING id",
        params![collection, amount],
        |r| r.get(0),
    )?)
}

/// Raise every sequence to `1 + max id` present in `models`.
pub fn rebuild_id_sequences(conn: &Connection) -> Result<()> {
    let mut next: BTreeMap<String, Id> = BTreeMap::new();
    {
        let mut stmt = conn.prepare_cached("SELECT fqid FROM models")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        for row in rows {
            let fqid = parse_fqid(&row?)?;
            let entry = next.entry(fqid.collection().to_string()).or_insert(1);
            *entry = (*entry).max(fqid.id() + 1);
        }
    }
    for (collection, id) in next {
        raise_id_sequence(conn, &collection, id)?;
    }
    Ok(())
}

// ============================================================================
// Collectionfields
// ============================================================================

/// Stamp `collectionfield` with `position` and return its row id.
pub fn touch_collectionfield(
    conn: &Connection,
    collectionfield: &str,
    position: Position,
) -> Result<i64> {
    Ok(conn.query_row(
        "INSERT INTO collectionfields (collectionfield, position) VALUES (?1, ?2)
         ON CONFLICT(collectionfield) DO UPDATE SET position = excluded.position
         RETURNING id",
        params![collectionfield, position],
        |r| r.get(0),
    )?)
}

pub fn link_event_to_collectionfield(
    conn: &Connection,
    event_id: i64,
    collectionfield_id: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO events_to_collectionfields (event_id, collectionfield_id)
         VALUES (?1, ?2)",
        params![event_id, collectionfield_id],
    )?;
    Ok(())
}

pub fn collectionfield_position(conn: &Connection, collectionfield: &str) -> Result<Option<Position>> {
    Ok(conn
        .query_row(
            "SELECT position FROM collectionfields WHERE collectionfield = ?1",
            [collectionfield],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn fqid_modified_after(conn: &Connection, fqid: &Fqid, position: Position) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM events WHERE fqid = ?1 AND position > ?2)",
        params![fqid.to_string(), position],
        |r| r.get(0),
    )?)
}

pub fn fqfield_modified_after(
    conn: &Connection,
    fqid: &Fqid,
    collectionfield: &str,
    position: Position,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM events e
            JOIN events_to_collectionfields ecf ON ecf.event_id = e.id
            JOIN collectionfields cf ON cf.id = ecf.collectionfield_id
            WHERE e.fqid = ?1 AND cf.collectionfield = ?2 AND e.position > ?3)",
        params![fqid.to_string(), collectionfield, position],
        |r| r.get(0),
    )?)
}

pub fn collectionfield_modified_after(
    conn: &Connection,
    collectionfield: &str,
    position: Position,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM collectionfields WHERE collectionfield = ?1 AND position > ?2)",
        params![collectionfield, position],
        |r| r.get(0),
    )?)
}

/// Whether an event after `position` modified `collectionfield` on a model
/// that currently matches `filter`.
pub fn collectionfield_modified_after_matching(
    conn: &Connection,
    collectionfield: &str,
    position: Position,
    filter: &Filter,
) -> Result<bool> {
    let compiled = compile(filter, "m.data");
    let sql = format!(
        "SELECT EXISTS(
            SELECT 1 FROM events e
            JOIN events_to_collectionfields ecf ON ecf.event_id = e.id
            JOIN collectionfields cf ON cf.id = ecf.collectionfield_id
            JOIN models m ON m.fqid = e.fqid
            WHERE cf.collectionfield = ? AND e.position > ? AND {})",
        compiled.sql
    );
    let mut bound = vec![
        SqlValue::Text(collectionfield.to_string()),
        SqlValue::Integer(position),
    ];
    bound.extend(compiled.params);
    Ok(conn.query_row(&sql, params_from_iter(bound.iter()), |r| r.get(0))?)
}

pub fn clear_collectionfields(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM events_to_collectionfields;
         DELETE FROM collectionfields;
         DELETE FROM sqlite_sequence WHERE name = 'collectionfields';",
    )?;
    Ok(())
}

// ============================================================================
// Migration positions
// ============================================================================

pub fn migration_position_index(
    conn: &Connection,
    position: Position,
) -> Result<Option<MigrationIndex>> {
    Ok(conn
        .query_row(
            "SELECT migration_index FROM migration_positions WHERE position = ?1",
            [position],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn set_migration_position(
    conn: &Connection,
    position: Position,
    migration_index: MigrationIndex,
) -> Result<()> {
    conn.execute(
        "INSERT INTO migration_positions (position, migration_index) VALUES (?1, ?2)
         ON CONFLICT(position) DO UPDATE SET migration_index = excluded.migration_index",
        params![position, migration_index],
    )?;
    Ok(())
}

/// Positions after `after` whose effective migration index is below
/// `target`, with that index, ascending.
pub fn positions_to_migrate(
    conn: &Connection,
    target: MigrationIndex,
    after: Position,
    limit: usize,
) -> Result<Vec<(Position, MigrationIndex)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT p.position, COALESCE(mp.migration_index, p.migration_index)
         FROM positions p LEFT JOIN migration_positions mp ON mp.position = p.position
         WHERE p.position > ?1 AND COALESCE(mp.migration_index, p.migration_index) < ?2
         ORDER BY p.position LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![after, target, limit as i64], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// `(partially, fully)` migrated position counts relative to `target`.
pub fn migration_position_counts(conn: &Connection, target: MigrationIndex) -> Result<(i64, i64)> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(migration_index < ?1), 0), COALESCE(SUM(migration_index >= ?1), 0)
         FROM migration_positions",
        [target],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?)
}

/// Drop every shadow row: migrated events, migrated positions, keyframes.
pub fn clear_migration_data(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM migration_keyframe_models;
         DELETE FROM migration_keyframes;
         DELETE FROM migration_events;
         DELETE FROM migration_positions;
         DELETE FROM sqlite_sequence
            WHERE name IN ('migration_events', 'migration_keyframes');",
    )?;
    Ok(())
}

/// Exchange `events` and `migration_events` by renaming. Must run inside a
/// transaction.
pub fn swap_event_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE events RENAME TO events_swap;
         ALTER TABLE migration_events RENAME TO events;
         ALTER TABLE events_swap RENAME TO migration_events;",
    )?;
    Ok(())
}

// ============================================================================
// Keyframes
// ============================================================================

pub fn keyframe_id(
    conn: &Connection,
    position: Position,
    migration_index: MigrationIndex,
) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM migration_keyframes WHERE position = ?1 AND migration_index = ?2",
            params![position, migration_index],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn create_keyframe(
    conn: &Connection,
    position: Position,
    migration_index: MigrationIndex,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO migration_keyframes (position, migration_index) VALUES (?1, ?2)",
        params![position, migration_index],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn move_keyframe(conn: &Connection, keyframe_id: i64, position: Position) -> Result<()> {
    conn.execute(
        "UPDATE migration_keyframes SET position = ?2 WHERE id = ?1",
        params![keyframe_id, position],
    )?;
    Ok(())
}

pub fn delete_keyframe(conn: &Connection, keyframe_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM migration_keyframe_models WHERE keyframe_id = ?1",
        [keyframe_id],
    )?;
    conn.execute("DELETE FROM migration_keyframes WHERE id = ?1", [keyframe_id])?;
    Ok(())
}

pub fn keyframe_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM migration_keyframes", [], |r| r.get(0))?)
}

pub fn keyframe_model(conn: &Connection, keyframe_id: i64, fqid: &Fqid) -> Result<Option<Model>> {
    let row = conn
        .query_row(
            "SELECT fqid, data, deleted FROM migration_keyframe_models
             WHERE keyframe_id = ?1 AND fqid = ?2",
            params![keyframe_id, fqid.to_string()],
            raw_model_row,
        )
        .optional()?;
    row.map(|(fqid, data, deleted)| {
        model_from_row("migration_keyframe_models", &fqid, &data, deleted).map(|(_, m)| m)
    })
    .transpose()
}

/// `(fqid, deleted)` of every model of `collection` in a keyframe.
pub fn keyframe_collection_fqids(
    conn: &Connection,
    keyframe_id: i64,
    collection: &str,
) -> Result<Vec<(Fqid, bool)>> {
    let (low, high) = collection_fqid_range(collection);
    let mut stmt = conn.prepare_cached(
        "SELECT fqid, deleted FROM migration_keyframe_models
         WHERE keyframe_id = ?1 AND fqid >= ?2 AND fqid < ?3",
    )?;
    let rows = stmt.query_map(params![keyframe_id, low, high], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, bool>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (fqid, deleted) = row?;
        out.push((parse_fqid(&fqid)?, deleted));
    }
    Ok(out)
}

pub fn write_keyframe_model(
    conn: &Connection,
    keyframe_id: i64,
    fqid: &Fqid,
    model: &Model,
) -> Result<()> {
    conn.execute(
        "INSERT INTO migration_keyframe_models (keyframe_id, fqid, data, deleted)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(keyframe_id, fqid) DO UPDATE SET data = excluded.data, deleted = excluded.deleted",
        params![
            keyframe_id,
            fqid.to_string(),
            Value::Object(model.to_record()).to_string(),
            model.deleted
        ],
    )?;
    Ok(())
}

/// Replace `models` with the content of a keyframe.
pub fn load_models_from_keyframe(conn: &Connection, keyframe_id: i64) -> Result<usize> {
    clear_models(conn)?;
    Ok(conn.execute(
        "INSERT INTO models (fqid, data, deleted)
         SELECT fqid, data, deleted FROM migration_keyframe_models WHERE keyframe_id = ?1",
        [keyframe_id],
    )?)
}

// ============================================================================
// Tests
// ============================================================================
