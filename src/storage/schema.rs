//! Table layout.
//!
//! There are no foreign keys: finalizing a migration swaps `events` and
//! `migration_events` by renaming them, and both tables must keep identical
//! shapes for that to work.

use rusqlite::Connection;

use crate::error::{DatabaseError, Result};

/// Every table, in truncation order.
pub const ALL_TABLES: &[&str] = &[
    "events_to_collectionfields",
    "collectionfields",
    "migration_keyframe_models",
    "migration_keyframes",
    "migration_events",
    "migration_positions",
    "events",
    "models",
    "id_sequences",
    "positions",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS positions (
    position        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp       REAL NOT NULL,
    user_id         INTEGER NOT NULL,
    information     TEXT,
    migration_index INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    position INTEGER NOT NULL,
    fqid     TEXT NOT NULL,
    type     TEXT NOT NULL,
    data     TEXT,
    weight   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_fqid ON events(fqid, position, weight);
CREATE INDEX IF NOT EXISTS idx_events_position ON events(position, weight);

CREATE TABLE IF NOT EXISTS models (
    fqid    TEXT PRIMARY KEY,
    data    TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS id_sequences (
    collection TEXT PRIMARY KEY,
    id         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS collectionfields (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    collectionfield TEXT NOT NULL UNIQUE,
    position        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events_to_collectionfields (
    event_id           INTEGER NOT NULL,
    collectionfield_id INTEGER NOT NULL,
    PRIMARY KEY (event_id, collectionfield_id)
);
CREATE INDEX IF NOT EXISTS idx_events_to_collectionfields_cf
    ON events_to_collectionfields(collectionfield_id);

CREATE TABLE IF NOT EXISTS migration_positions (
    position        INTEGER PRIMARY KEY,
    migration_index INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS migration_events (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    position INTEGER NOT NULL,
    fqid     TEXT NOT NULL,
    type     TEXT NOT NULL,
    data     TEXT,
    weight   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_migration_events_fqid ON migration_events(fqid, position, weight);
CREATE INDEX IF NOT EXISTS idx_migration_events_position ON migration_events(position, weight);

CREATE TABLE IF NOT EXISTS migration_keyframes (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    position        INTEGER NOT NULL,
    migration_index INTEGER NOT NULL,
    UNIQUE (position, migration_index)
);

CREATE TABLE IF NOT EXISTS migration_keyframe_models (
    keyframe_id INTEGER NOT NULL,
    fqid        TEXT NOT NULL,
    data        TEXT NOT NULL,
    deleted     INTEGER NOT NULL,
    PRIMARY KEY (keyframe_id, fqid)
);
";

/// Per-connection settings. `case_sensitive_like` makes `%=` behave the same
/// in SQL as in the in-memory evaluator.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;
         PRAGMA case_sensitive_like=ON;",
    )
    .map_err(DatabaseError::from)?;
    Ok(())
}

/// Create every table and index. Idempotent.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA).map_err(DatabaseError::from)?;
    Ok(())
}

/// Delete every row of every table and reset the autoincrement counters.
pub fn truncate_all(conn: &Connection) -> Result<()> {
    for table in ALL_TABLES {
        conn.execute(&format!("DELETE FROM {table}"), [])
            .map_err(DatabaseError::from)?;
    }
    conn.execute("DELETE FROM sqlite_sequence", [])
        .map_err(DatabaseError::from)?;
    Ok(())
}
