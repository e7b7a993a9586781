use event_datastore::migrations::{Migration, MigrationReader, MigrationState, ModelMigration};
use event_datastore::query::{Filter, FilterOp};
use event_datastore::reader::GetRequest;
use event_datastore::storage::sqlite;
use event_datastore::types::AggregateType;
use event_datastore::writer::RequestEvent;
use event_datastore::{DatastoreError, DeletedModelsBehaviour, MigrationIndex, Record, Result};
use serde_json::json;

use super::support::*;

fn set_default(target: MigrationIndex, field: &'static str) -> Migration {
    Migration::model(SetDefault {
        target,
        collection: "a",
        field,
        value: json!(0),
    })
}

fn seed(ds: &event_datastore::Datastore) {
    write(ds, vec![RequestEvent::create(fqid("a/1"), record(json!({ "f": 1 })))]);
    write(ds, vec![RequestEvent::create(fqid("a/2"), record(json!({ "g": 5 })))]);
    write(ds, vec![RequestEvent::create(fqid("a/3"), Record::new())]);
    write(ds, vec![RequestEvent::delete(fqid("a/3"))]);
}

#[test]
fn model_steps_write_one_position_at_their_index() {
    let ds = datastore(vec![set_default(2, "g")]);
    seed(&ds);
    assert_eq!(ds.migration_handler().state().unwrap(), MigrationState::FinalizationRequired);
    ds.migration_handler().finalize().unwrap();

    assert_eq!(get(&ds, "a/1")["g"], json!(0));
    assert_eq!(get(&ds, "a/2")["g"], json!(5));
    let deleted = ds
        .reader()
        .get(&GetRequest::new(fqid("a/3")).deleted(DeletedModelsBehaviour::OnlyDeleted))
        .unwrap();
    assert!(deleted.get("g").is_none());

    assert_eq!(ds.reader().max_position().unwrap(), 5);
    assert_eq!(get(&ds, "a/1")["meta_position"], json!(5));
    let indices = ds.pool().read(sqlite::migration_indices).unwrap();
    assert_eq!(indices, vec![2]);
    assert_eq!(ds.migration_handler().state().unwrap(), MigrationState::NoMigrationRequired);
}

#[test]
fn failed_index_stamp_rolls_back_the_step_position() {
    let ds = datastore(vec![set_default(2, "g")]);
    seed(&ds);
    ds.pool()
        .write(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_stamp BEFORE UPDATE OF migration_index ON positions
                 WHEN NEW.migration_index = 2
                 BEGIN SELECT RAISE(ABORT, 'stamp blocked'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    assert!(ds.migration_handler().finalize().is_err());
    assert_eq!(ds.reader().max_position().unwrap(), 4);
    assert_eq!(ds.pool().read(sqlite::migration_indices).unwrap(), vec![1]);
    assert!(get(&ds, "a/1").get("g").is_none());
    assert_eq!(ds.migration_handler().state().unwrap(), MigrationState::FinalizationRequired);

    ds.pool()
        .write(|conn| {
            conn.execute_batch("DROP TRIGGER block_stamp;")?;
            Ok(())
        })
        .unwrap();
    ds.migration_handler().finalize().unwrap();
    assert_eq!(ds.reader().max_position().unwrap(), 5);
    assert_eq!(ds.pool().read(sqlite::migration_indices).unwrap(), vec![2]);
    assert_eq!(get(&ds, "a/1")["g"], json!(0));
}

#[test]
fn model_step_without_events_only_bumps_the_index() {
    let ds = datastore(vec![set_default(2, "f")]);
    write(&ds, vec![RequestEvent::create(fqid("a/1"), record(json!({ "f": 1 })))]);
    ds.migration_handler().finalize().unwrap();
    assert_eq!(ds.reader().max_position().unwrap(), 1);
    assert_eq!(ds.pool().read(sqlite::current_migration_index).unwrap(), Some(2));
}

#[test]
fn event_steps_run_before_model_steps() {
    let ds = datastore(vec![
        Migration::event(RenameField::new(2, "a", "f", "f_new")),
        set_default(3, "f_new"),
    ]);
    seed(&ds);
    ds.migration_handler().finalize().unwrap();

    assert_eq!(get(&ds, "a/1")["f_new"], json!(1));
    assert!(get(&ds, "a/1").get("f").is_none());
    assert_eq!(get(&ds, "a/2")["f_new"], json!(0));
    assert_eq!(ds.pool().read(sqlite::current_migration_index).unwrap(), Some(3));
}

/// Creates `summary/1` from aggregates over collection `a`.
struct Summarize;

impl ModelMigration for Summarize {
    fn target_migration_index(&self) -> MigrationIndex {
        2
    }

    fn migrate_models(&mut self, reader: &dyn MigrationReader) -> Result<Option<Vec<RequestEvent>>> {
        let everything = Filter::And(vec![]);
        let with_g = Filter::operator("g", FilterOp::Gt, json!(0));
        let fields = record(json!({
            "count": reader.count("a", &everything)?,
            "with_g": reader.filter("a", &with_g, &[])?.keys().collect::<Vec<_>>(),
            "max_g": reader.max("a", &everything, "g", AggregateType::Int)?,
            "has_f": reader.exists("a", &Filter::eq("f", json!(1)))?,
            "a3_alive": reader.is_alive(&fqid("a/3"))?,
            "a1": reader.get(&fqid("a/1"), &["f".to_string()])?,
        }));
        Ok(Some(vec![RequestEvent::create(fqid("summary/1"), fields)]))
    }
}

#[test]
fn model_steps_read_the_current_models() {
    let ds = datastore(vec![Migration::model(Summarize)]);
    seed(&ds);
    ds.migration_handler().finalize().unwrap();

    let summary = get(&ds, "summary/1");
    assert_eq!(summary["count"], json!(2));
    assert_eq!(summary["with_g"], json!([2]));
    assert_eq!(summary["max_g"], json!(5));
    assert_eq!(summary["has_f"], json!(true));
    assert_eq!(summary["a3_alive"], json!(false));
    assert_eq!(summary["a1"], json!({ "f": 1 }));
    let next = ds.pool().read(|conn| sqlite::id_sequence(conn, "summary")).unwrap();
    assert_eq!(next, Some(2));
}

struct Failing;

impl ModelMigration for Failing {
    fn target_migration_index(&self) -> MigrationIndex {
        3
    }

    fn migrate_models(&mut self, _reader: &dyn MigrationReader) -> Result<Option<Vec<RequestEvent>>> {
        Err(DatastoreError::InvalidRequest("cannot migrate".into()))
    }
}

#[test]
fn failed_model_step_leaves_the_event_phase_done() {
    let ds = datastore(vec![
        Migration::event(RenameField::new(2, "a", "f", "f_new")),
        Migration::model(Failing),
    ]);
    seed(&ds);
    assert!(ds.migration_handler().finalize().is_err());

    assert_eq!(get(&ds, "a/1")["f_new"], json!(1));
    assert_eq!(ds.pool().read(sqlite::current_migration_index).unwrap(), Some(2));
    assert_eq!(
        ds.migration_handler().state().unwrap(),
        MigrationState::FinalizationRequired
    );
}
