//! Event phase: translate the events of one position through every pending
//! step and store the result in the shadow tables.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{DatastoreError, Result};
use crate::event::{DbEvent, EventType};
use crate::storage::{sqlite, EventTable};
use crate::types::{MigrationIndex, Position, PositionData};

use super::keyframes::{DatabaseKeyframeModifier, InitialKeyframeModifier, KeyframeModifier};
use super::migration::{EventMigration, MigrationChain, MigrationContext};

/// Run one step over the events of one position. The source events are
/// applied to `old`, their translations to `new`, and both modifiers are
/// moved on. Returns the translated sequence without empty events.
pub fn run_step<O, N>(
    migration: &mut dyn EventMigration,
    old: &mut O,
    new: &mut N,
    position: &PositionData,
    mut events: Vec<DbEvent>,
) -> Result<Vec<DbEvent>>
where
    O: KeyframeModifier,
    N: KeyframeModifier,
{
    events.sort_by_key(|e| e.event_type() != EventType::Create);

    {
        let ctx = MigrationContext {
            old: old.as_accessor(),
            new: new.as_accessor(),
            position,
            events: &events,
        };
        migration.position_init(&ctx)?;
    }

    let mut migrated = Vec::with_capacity(events.len());
    for event in &events {
        let translated = {
            let ctx = MigrationContext {
                old: old.as_accessor(),
                new: new.as_accessor(),
                position,
                events: &events,
            };
            migration.migrate_event(event, &ctx)?
        }
        .unwrap_or_else(|| vec![event.clone()]);

        old.apply_event(event)?;
        for translated in translated.into_iter().filter(|e| !e.is_empty()) {
            new.apply_event(&translated)?;
            migrated.push(translated);
        }
    }

    let additional = {
        let ctx = MigrationContext {
            old: old.as_accessor(),
            new: new.as_accessor(),
            position,
            events: &events,
        };
        migration.get_additional_events(&ctx)?
    }
    .unwrap_or_default();
    for event in additional.into_iter().filter(|e| !e.is_empty()) {
        new.apply_event(&event)?;
        migrated.push(event);
    }

    old.move_to_next_position()?;
    new.move_to_next_position()?;
    Ok(migrated)
}

/// Source events of `position`: the shadow copy once a step has run there,
/// the log otherwise.
fn load_source_events(conn: &Connection, position: Position) -> Result<Vec<DbEvent>> {
    let table = match sqlite::migration_position_index(conn, position)? {
        Some(_) => EventTable::MigrationEvents,
        None => EventTable::Events,
    };
    Ok(sqlite::events_at_position(conn, table, position)?
        .into_iter()
        .map(|stored| stored.event)
        .collect())
}

/// Replace the shadow events of `position` by `events`, reusing rows.
fn write_migrated_events(conn: &Connection, position: Position, events: &[DbEvent]) -> Result<()> {
    let existing = sqlite::events_at_position(conn, EventTable::MigrationEvents, position)?;
    for (i, event) in events.iter().enumerate() {
        let weight = i as i64 + 1;
        match existing.get(i) {
            Some(row) => sqlite::update_event(conn, EventTable::MigrationEvents, row.id, event, weight)?,
            None => {
                sqlite::insert_event(conn, EventTable::MigrationEvents, position, event, weight)?;
            }
        }
    }
    for row in existing.iter().skip(events.len()) {
        sqlite::delete_event(conn, EventTable::MigrationEvents, row.id)?;
    }
    Ok(())
}

/// Migrate `position` from `source` to `target` inside the caller's
/// transaction.
pub fn migrate_position(
    conn: &Connection,
    chain: &mut MigrationChain,
    position: Position,
    source: MigrationIndex,
    target: MigrationIndex,
) -> Result<()> {
    let position_data = sqlite::get_position(conn, position)?.ok_or_else(|| {
        DatastoreError::Internal(format!("position {position} vanished during migration"))
    })?;
    let previous = sqlite::previous_position(conn, position)?;

    for from in source..target {
        let to = from + 1;
        let last = to == target;
        let events = load_source_events(conn, position)?;
        let migration = chain.event_step(from).ok_or_else(|| {
            DatastoreError::Internal(format!("no event migration from index {from}"))
        })?;

        let migrated = match previous {
            None => {
                let mut old = InitialKeyframeModifier::new(Some(conn), position, from);
                let mut new = InitialKeyframeModifier::new(last.then_some(conn), position, to);
                run_step(migration.as_mut(), &mut old, &mut new, &position_data, events)?
            }
            Some(previous) => {
                let mut old = DatabaseKeyframeModifier::open(conn, previous, position, from, true)?;
                let mut new = DatabaseKeyframeModifier::open(conn, previous, position, to, last)?;
                run_step(migration.as_mut(), &mut old, &mut new, &position_data, events)?
            }
        };

        write_migrated_events(conn, position, &migrated)?;
        sqlite::set_migration_position(conn, position, to)?;
        debug!(position, from, to, events = migrated.len(), "migrated position");
    }
    Ok(())
}
