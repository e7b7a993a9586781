//! The event phase: shadow tables, keyframes and resumption before any
//! finalization.

use event_datastore::error::MigrationError;
use event_datastore::migrations::{Migration, MigrationState};
use event_datastore::storage::{sqlite, EventTable};
use event_datastore::writer::RequestEvent;
use event_datastore::DatastoreError;
use serde_json::json;

use super::support::*;

#[test]
fn migrate_fills_the_shadow_tables_only() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    let handler = ds.migration_handler();
    assert_eq!(handler.state().unwrap(), MigrationState::MigrationRequired);

    assert_eq!(handler.migrate().unwrap(), 3);
    assert_eq!(handler.state().unwrap(), MigrationState::FinalizationRequired);

    let (shadow_events, counts, keyframes) = ds
        .pool()
        .read(|conn| {
            Ok((
                sqlite::event_count(conn, EventTable::MigrationEvents)?,
                sqlite::migration_position_counts(conn, 2)?,
                sqlite::keyframe_count(conn)?,
            ))
        })
        .unwrap();
    assert_eq!(shadow_events, 3);
    assert_eq!(counts, (0, 3));
    assert_eq!(keyframes, 2);

    // The live log and models still speak the old schema.
    assert_eq!(get(&ds, "a/1")["f"], json!([2, 3]));
    assert_eq!(ds.pool().read(sqlite::current_migration_index).unwrap(), Some(1));
}

#[test]
fn migrate_is_idempotent_and_resumes_after_new_writes() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    let handler = ds.migration_handler();
    assert_eq!(handler.migrate().unwrap(), 3);
    assert_eq!(handler.migrate().unwrap(), 0);

    write(&ds, vec![RequestEvent::update(fqid("a/1"), record(json!({ "f": [9], "g": 1 })))]);
    assert_eq!(handler.state().unwrap(), MigrationState::MigrationRequired);
    assert_eq!(handler.migrate().unwrap(), 1);

    let stats = handler.stats().unwrap();
    assert_eq!(stats.positions, 4);
    assert_eq!(stats.fully_migrated_positions, 4);
    assert_eq!(stats.partially_migrated_positions, 0);
}

#[test]
fn multi_step_chains_go_through_every_step() {
    let ds = datastore(vec![
        Migration::event(RenameField::new(2, "a", "f", "g")),
        Migration::event(RenameField::new(3, "a", "g", "h")),
    ]);
    seed_list_history(&ds);
    assert_eq!(ds.migration_handler().migrate().unwrap(), 3);
    let counts = ds
        .pool()
        .read(|conn| sqlite::migration_position_counts(conn, 3))
        .unwrap();
    assert_eq!(counts, (0, 3));

    ds.migration_handler().finalize().unwrap();
    assert_eq!(get_at(&ds, "a/1", 1)["h"], json!([1]));
    assert_eq!(get(&ds, "a/1")["h"], json!([2, 3]));
    assert!(get(&ds, "a/1").get("g").is_none());
}

#[test]
fn a_failing_step_keeps_earlier_positions() {
    let ds = datastore(vec![Migration::event(FailAt(2, 2))]);
    seed_list_history(&ds);
    let err = ds.migration_handler().migrate().unwrap_err();
    assert_eq!(err.code(), None);
    match err {
        DatastoreError::Migration(MigrationError::Failed {
            position,
            migration_index,
            ..
        }) => {
            assert_eq!(position, 2);
            assert_eq!(migration_index, 2);
        }
        other => panic!("expected a failed migration, got {other:?}"),
    }

    let stats = ds.migration_handler().stats().unwrap();
    assert_eq!(stats.fully_migrated_positions, 1);
    assert_eq!(stats.status, MigrationState::MigrationRequired);
}

#[test]
fn reset_discards_migration_progress() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    let handler = ds.migration_handler();
    handler.migrate().unwrap();
    handler.reset().unwrap();

    let stats = handler.stats().unwrap();
    assert_eq!(stats.status, MigrationState::MigrationRequired);
    assert_eq!(stats.fully_migrated_positions, 0);
    let (shadow_events, keyframes) = ds
        .pool()
        .read(|conn| {
            Ok((
                sqlite::event_count(conn, EventTable::MigrationEvents)?,
                sqlite::keyframe_count(conn)?,
            ))
        })
        .unwrap();
    assert_eq!((shadow_events, keyframes), (0, 0));
    assert_eq!(get(&ds, "a/1")["f"], json!([2, 3]));

    assert_eq!(handler.migrate().unwrap(), 3);
    handler.finalize().unwrap();
    assert_eq!(get(&ds, "a/1")["f_new"], json!([2, 3]));
}

#[test]
fn additional_events_see_the_position_context() {
    let ds = datastore(vec![Migration::event(AuditCreates(2))]);
    write(&ds, vec![RequestEvent::create(fqid("a/1"), record(json!({ "x": 1 })))]);
    write(
        &ds,
        vec![
            RequestEvent::create(fqid("a/2"), record(json!({}))),
            RequestEvent::create(fqid("b/1"), record(json!({}))),
        ],
    );
    ds.migration_handler().finalize().unwrap();

    assert_eq!(get(&ds, "audit/1")["position"], json!(1));
    assert_eq!(get(&ds, "audit/2")["position"], json!(2));
    assert!(ds
        .reader()
        .get(&event_datastore::reader::GetRequest::new(fqid("audit/3")))
        .is_err());
    let next = ds
        .pool()
        .read(|conn| sqlite::id_sequence(conn, "audit"))
        .unwrap();
    assert_eq!(next, Some(3));
}

#[test]
fn position_init_runs_once_per_position_before_its_events() {
    let (first, first_trace) = TraceHooks::new(2);
    let (second, second_trace) = TraceHooks::new(3);
    let ds = datastore(vec![Migration::event(first), Migration::event(second)]);
    seed_list_history(&ds);
    write(
        &ds,
        vec![
            RequestEvent::create(fqid("a/2"), record(json!({ "f": 1 }))),
            RequestEvent::create(fqid("a/3"), record(json!({ "f": 2 }))),
        ],
    );

    assert_eq!(ds.migration_handler().migrate().unwrap(), 4);

    let expected = vec![
        "init 1", "event 1", "init 2", "event 2", "init 3", "event 3", "init 4", "event 4",
        "event 4",
    ];
    assert_eq!(*first_trace.lock(), expected);
    assert_eq!(*second_trace.lock(), expected);
}
