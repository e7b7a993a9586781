use event_datastore::query::{Filter, FilterOp};
use event_datastore::writer::{FilteredLock, LockValue, RequestEvent, WriteRequest};
use event_datastore::{Datastore, DatastoreError, Fqid, Record};
use serde_json::{json, Value};

fn datastore() -> Datastore {
    Datastore::open_in_memory().expect("open in-memory datastore")
}

fn fqid(raw: &str) -> Fqid {
    raw.parse().expect("valid fqid")
}

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object literal")
}

/// Positions 1 (`a/1 {f, g}`), 2 (`a/2 {f}`), 3 (`a/1.f` updated).
fn seeded() -> Datastore {
    let ds = datastore();
    let writes = [
        RequestEvent::create(fqid("a/1"), record(json!({ "f": 1, "g": 1 }))),
        RequestEvent::create(fqid("a/2"), record(json!({ "f": 10 }))),
        RequestEvent::update(fqid("a/1"), record(json!({ "f": 2 }))),
    ];
    for event in writes {
        ds.writer().write(&[WriteRequest::new(vec![event])]).expect("seed write");
    }
    ds
}

fn write_locked(ds: &Datastore, locks: Vec<(&str, LockValue)>) -> Result<(), DatastoreError> {
    let mut request = WriteRequest::new(vec![RequestEvent::create(fqid("b/1"), Record::new())]);
    for (key, value) in locks {
        request = request.with_lock(key, value);
    }
    ds.writer().write(&[request]).map(|_| ())
}

fn locked_keys(err: DatastoreError) -> Vec<String> {
    match err {
        DatastoreError::ModelLocked { keys } => keys,
        other => panic!("expected ModelLocked, got {other:?}"),
    }
}

#[test]
fn fqid_lock_breaks_on_any_later_event() {
    let ds = seeded();
    let err = write_locked(&ds, vec![("a/1", LockValue::Position(2))]).unwrap_err();
    assert_eq!(locked_keys(err), vec!["a/1".to_string()]);
    write_locked(&ds, vec![("a/1", LockValue::Position(3))]).unwrap();
}

#[test]
fn fqfield_lock_only_sees_its_own_field() {
    let ds = seeded();
    write_locked(&ds, vec![("a/1/g", LockValue::Position(1))]).unwrap();
    let err = write_locked(&ds, vec![("a/1/f", LockValue::Position(1))]).unwrap_err();
    assert_eq!(locked_keys(err), vec!["a/1/f".to_string()]);
}

#[test]
fn collectionfield_lock_spans_the_collection() {
    let ds = seeded();
    let err = write_locked(&ds, vec![("a/f", LockValue::Position(2))]).unwrap_err();
    assert_eq!(locked_keys(err), vec!["a/f".to_string()]);
    write_locked(&ds, vec![("a/g", LockValue::Position(1))]).unwrap();
}

#[test]
fn filtered_lock_only_counts_matching_models() {
    let ds = seeded();
    let on_a2 = FilteredLock {
        position: 2,
        filter: Filter::eq("f", json!(10)),
    };
    write_locked(&ds, vec![("a/f", LockValue::Filtered(on_a2))]).unwrap();

    let on_a1 = FilteredLock {
        position: 2,
        filter: Filter::operator("f", FilterOp::Lt, json!(5)),
    };
    let err = write_locked(&ds, vec![("a/f", LockValue::Filtered(on_a1.clone()))]).unwrap_err();
    assert_eq!(locked_keys(err), vec!["a/f".to_string()]);

    let list = LockValue::FilteredList(vec![
        FilteredLock {
            position: 2,
            filter: Filter::eq("f", json!(10)),
        },
        on_a1,
    ]);
    assert!(matches!(
        write_locked(&ds, vec![("a/f", list)]),
        Err(DatastoreError::ModelLocked { .. })
    ));
}

#[test]
fn every_broken_key_is_reported() {
    let ds = seeded();
    let err = write_locked(
        &ds,
        vec![
            ("a/1", LockValue::Position(1)),
            ("a/2", LockValue::Position(2)),
            ("a/f", LockValue::Position(1)),
        ],
    )
    .unwrap_err();
    assert_eq!(err.code(), Some(6));
    let body = err.to_error_body();
    assert_eq!(body["error"]["keys"], json!(["a/1", "a/f"]));
}

#[test]
fn broken_lock_writes_nothing() {
    let ds = seeded();
    write_locked(&ds, vec![("a/1", LockValue::Position(1))]).unwrap_err();
    assert_eq!(ds.reader().max_position().unwrap(), 3);
}

#[test]
fn malformed_locks_are_format_errors() {
    let ds = seeded();
    assert!(matches!(
        write_locked(&ds, vec![("a/1", LockValue::Position(0))]),
        Err(DatastoreError::InvalidFormat(_))
    ));
    let filtered = LockValue::Filtered(FilteredLock {
        position: 1,
        filter: Filter::eq("f", json!(1)),
    });
    assert!(matches!(
        write_locked(&ds, vec![("a/1", filtered)]),
        Err(DatastoreError::InvalidFormat(_))
    ));
    assert!(matches!(
        write_locked(&ds, vec![("not a key", LockValue::Position(1))]),
        Err(DatastoreError::InvalidFormat(_))
    ));
}

#[test]
fn lock_values_decode_from_json() {
    let request: WriteRequest = serde_json::from_value(json!({
        "events": [{ "type": "create", "fqid": "b/1", "fields": {} }],
        "locked_fields": {
            "a/1": 3,
            "a/f": { "position": 2, "filter": { "field": "f", "operator": "=", "value": 10 } }
        }
    }))
    .unwrap();
    assert_eq!(request.locked_fields["a/1"], LockValue::Position(3));
    assert!(matches!(request.locked_fields["a/f"], LockValue::Filtered(_)));

    let ds = seeded();
    ds.writer().write(&[request]).unwrap();
}
