//! Finalization: swapping the migrated log in, rebuilding `models` and the
//! command surface around it.

use event_datastore::error::MigrationError;
use event_datastore::migrations::{Migration, MigrationState};
use event_datastore::reader::{GetAllRequest, GetRequest};
use event_datastore::storage::{sqlite, EventTable};
use event_datastore::writer::{LockValue, RequestEvent, WriteRequest};
use event_datastore::{DatastoreError, DeletedModelsBehaviour};
use serde_json::{json, Value};

use super::support::*;

#[test]
fn renamed_field_is_visible_at_every_position() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    let handler = ds.migration_handler();
    handler.migrate().unwrap();
    handler.finalize().unwrap();

    let projected = |position| {
        Value::Object(
            ds.reader()
                .get(&GetRequest::new(fqid("a/1")).at(position).fields(["f", "f_new"]))
                .unwrap(),
        )
    };
    assert_eq!(projected(1), json!({ "f_new": [1] }));
    assert_eq!(projected(2), json!({ "f_new": [2] }));
    assert_eq!(projected(3), json!({ "f_new": [2, 3] }));
    assert_eq!(
        get(&ds, "a/1"),
        json!({ "f_new": [2, 3], "meta_deleted": false, "meta_position": 3 })
    );

    assert_eq!(handler.state().unwrap(), MigrationState::NoMigrationRequired);
    let stats = handler.stats().unwrap();
    assert_eq!(stats.current_migration_index, Some(2));
    assert_eq!(stats.events, 3);
    assert_eq!(stats.fully_migrated_positions, 0);
}

#[test]
fn finalize_migrates_pending_positions_first() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    ds.migration_handler().migrate().unwrap();
    write(&ds, vec![RequestEvent::update(fqid("a/1"), record(json!({ "f": null, "g": 1 })))]);
    ds.migration_handler().finalize().unwrap();

    assert_eq!(
        get(&ds, "a/1"),
        json!({ "g": 1, "meta_deleted": false, "meta_position": 4 })
    );
    assert_eq!(get_at(&ds, "a/1", 3)["f_new"], json!([2, 3]));
}

#[test]
fn models_match_a_replay_after_finalization() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    write(&ds, vec![RequestEvent::create(fqid("a/2"), record(json!({ "f": 5 })))]);
    write(&ds, vec![RequestEvent::delete(fqid("a/2"))]);
    ds.migration_handler().finalize().unwrap();

    let head = ds.reader().max_position().unwrap();
    for raw in ["a/1", "a/2"] {
        let request = GetRequest::new(fqid(raw)).deleted(DeletedModelsBehaviour::AllModels);
        let current = ds.reader().get(&request).unwrap();
        let replayed = ds.reader().get(&request.clone().at(head)).unwrap();
        assert_eq!(current, replayed, "{raw}");
    }
    let deleted = ds
        .reader()
        .get(&GetRequest::new(fqid("a/2")).deleted(DeletedModelsBehaviour::OnlyDeleted))
        .unwrap();
    assert_eq!(deleted["f_new"], json!(5));
}

#[test]
fn noop_migration_changes_no_read() {
    let ds = datastore(vec![Migration::event(Noop(2))]);
    seed_list_history(&ds);
    write(&ds, vec![RequestEvent::create(fqid("b/1"), record(json!({ "s": "x" })))]);
    write(&ds, vec![RequestEvent::delete(fqid("b/1"))]);

    let snapshot = |ds: &event_datastore::Datastore| {
        let mut out = Vec::new();
        for raw in ["a/1", "b/1"] {
            for position in 1..=5 {
                let request = GetRequest::new(fqid(raw))
                    .at(position)
                    .deleted(DeletedModelsBehaviour::AllModels);
                out.push(ds.reader().get(&request).ok());
            }
            let current = GetRequest::new(fqid(raw)).deleted(DeletedModelsBehaviour::AllModels);
            out.push(ds.reader().get(&current).ok());
        }
        out
    };
    let before = snapshot(&ds);
    ds.migration_handler().finalize().unwrap();
    assert_eq!(snapshot(&ds), before);
}

#[test]
fn dropped_events_disappear_from_history() {
    let ds = datastore(vec![Migration::event(DropCollection(2, "tmp"))]);
    write(
        &ds,
        vec![
            RequestEvent::create(fqid("a/1"), record(json!({ "f": 1 }))),
            RequestEvent::create(fqid("tmp/1"), record(json!({}))),
        ],
    );
    ds.migration_handler().finalize().unwrap();

    assert!(matches!(
        ds.reader().get(&GetRequest::new(fqid("tmp/1"))),
        Err(DatastoreError::ModelDoesNotExist { .. })
    ));
    let all = ds
        .reader()
        .get_all(&GetAllRequest {
            collection: "tmp".into(),
            mapped_fields: Vec::new(),
            get_deleted_models: DeletedModelsBehaviour::AllModels,
        })
        .unwrap();
    assert!(all.is_empty());
    let events = ds
        .pool()
        .read(|conn| sqlite::event_count(conn, EventTable::Events))
        .unwrap();
    assert_eq!(events, 1);
}

#[test]
fn writes_after_finalization_use_the_new_index_and_locks() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    ds.migration_handler().finalize().unwrap();

    ds.writer()
        .write(&[WriteRequest::new(vec![RequestEvent::update(
            fqid("a/1"),
            record(json!({ "f_new": [7] })),
        )])
        .with_lock("a/f_new", LockValue::Position(3))])
        .unwrap();
    let position = ds.pool().read(|conn| sqlite::get_position(conn, 4)).unwrap().unwrap();
    assert_eq!(position.migration_index, 2);

    let err = ds
        .writer()
        .write(&[WriteRequest::new(vec![RequestEvent::update(
            fqid("a/1"),
            record(json!({ "f_new": [8] })),
        )])
        .with_lock("a/f_new", LockValue::Position(3))])
        .unwrap_err();
    assert!(matches!(err, DatastoreError::ModelLocked { .. }));
}

#[test]
fn empty_datastore_needs_nothing() {
    let ds = datastore(vec![Migration::event(Noop(2))]);
    let handler = ds.migration_handler();
    assert_eq!(handler.state().unwrap(), MigrationState::NoMigrationRequired);
    assert_eq!(handler.migrate().unwrap(), 0);
    handler.finalize().unwrap();
    assert_eq!(handler.stats().unwrap().current_migration_index, None);
}

#[test]
fn datastore_ahead_of_the_chain_is_rejected() {
    let ds = datastore(vec![Migration::event(Noop(2))]);
    ds.writer()
        .write(&[WriteRequest::new(vec![RequestEvent::create(fqid("a/1"), Default::default())])
            .with_migration_index(5)])
        .unwrap();
    let err = ds.migration_handler().state().unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::Migration(MigrationError::MismatchingMigrationIndices {
            datastore: 5,
            target: 2
        })
    ));
    assert_eq!(err.code(), Some(7));
    assert!(ds.migration_handler().migrate().is_err());
    assert!(ds.migration_handler().finalize().is_err());
}

#[test]
fn commands_report_their_outcome() {
    let ds = datastore(vec![Migration::event(RenameField::new(2, "a", "f", "f_new"))]);
    seed_list_history(&ds);
    let handler = ds.migration_handler();

    let stats = handler.execute_command("stats").unwrap();
    assert_eq!(stats["status"], json!("MIGRATION_REQUIRED"));
    assert_eq!(stats["current_migration_index"], json!(1));
    assert_eq!(stats["target_migration_index"], json!(2));
    assert_eq!(stats["positions"], json!(3));

    let migrated = handler.execute_command("migrate").unwrap();
    assert_eq!(migrated, json!({ "migrated_positions": 3, "status": "FINALIZATION_REQUIRED" }));

    let finalized = handler.execute_command("finalize").unwrap();
    assert_eq!(finalized, json!({ "status": "NO_MIGRATION_REQUIRED" }));

    assert_eq!(handler.execute_command("clear-collectionfield-tables").unwrap(), Value::Null);
    assert_eq!(
        handler.execute_command("reset").unwrap(),
        json!({ "status": "NO_MIGRATION_REQUIRED" })
    );

    let err = handler.execute_command("rollback").unwrap_err();
    assert!(matches!(err, DatastoreError::Migration(MigrationError::InvalidCommand(_))));
    assert_eq!(err.code(), Some(2));
}
