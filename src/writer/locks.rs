//! Optimistic concurrency checks on `locked_fields`.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::error::{DatastoreError, Result};
use crate::keys::LockKey;
use crate::storage::sqlite;
use crate::types::Position;

use super::requests::{FilteredLock, LockValue};

fn assert_lock_position(key: &str, position: Position) -> Result<()> {
    if position <= 0 {
        return Err(DatastoreError::InvalidFormat(format!(
            "Lock position of {key} must be positive, got {position}"
        )));
    }
    Ok(())
}

fn filtered_lock_violated(conn: &Connection, key: &str, collectionfield: &str, lock: &FilteredLock) -> Result<bool> {
    assert_lock_position(key, lock.position)?;
    sqlite::collectionfield_modified_after_matching(conn, collectionfield, lock.position, &lock.filter)
}

/// Whether a single lock was broken by a write after its position.
fn lock_violated(conn: &Connection, key: &str, value: &LockValue) -> Result<bool> {
    let lock_key: LockKey = key.parse()?;
    match (&lock_key, value) {
        (LockKey::Fqid(fqid), LockValue::Position(position)) => {
            assert_lock_position(key, *position)?;
            sqlite::fqid_modified_after(conn, fqid, *position)
        }
        (LockKey::Fqfield(fqfield), LockValue::Position(position)) => {
            assert_lock_position(key, *position)?;
            sqlite::fqfield_modified_after(
                conn,
                fqfield.fqid(),
                &fqfield.collectionfield().to_string(),
                *position,
            )
        }
        (LockKey::CollectionField(cf), LockValue::Position(position)) => {
            assert_lock_position(key, *position)?;
            sqlite::collectionfield_modified_after(conn, &cf.to_string(), *position)
        }
        (LockKey::CollectionField(cf), LockValue::Filtered(lock)) => {
            filtered_lock_violated(conn, key, &cf.to_string(), lock)
        }
        (LockKey::CollectionField(cf), LockValue::FilteredList(locks)) => {
            let cf = cf.to_string();
            for lock in locks {
                if filtered_lock_violated(conn, key, &cf, lock)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        (_, _) => Err(DatastoreError::InvalidFormat(format!(
            "Filtered locks are only allowed on collectionfields, not on {key}"
        ))),
    }
}

/// Check every lock and fail with all broken keys at once.
pub fn check_locked_fields(conn: &Connection, locked: &BTreeMap<String, LockValue>) -> Result<()> {
    let mut broken = Vec::new();
    for (key, value) in locked {
        if lock_violated(conn, key, value)? {
            broken.push(key.clone());
        }
    }
    if broken.is_empty() {
        Ok(())
    } else {
        Err(DatastoreError::ModelLocked { keys: broken })
    }
}
