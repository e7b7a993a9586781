use event_datastore::storage::sqlite;
use event_datastore::writer::{RequestEvent, ReserveIdsRequest, WriteRequest};
use event_datastore::{Datastore, DatastoreError, Fqid, Record};

fn datastore() -> Datastore {
    Datastore::open_in_memory().expect("open in-memory datastore")
}

fn reserve(ds: &Datastore, collection: &str, amount: i64) -> Result<Vec<i64>, DatastoreError> {
    ds.writer()
        .reserve_ids(&ReserveIdsRequest {
            collection: collection.into(),
            amount,
        })
        .map(|response| response.ids)
}

fn sequence(ds: &Datastore, collection: &str) -> Option<i64> {
    ds.pool()
        .read(|conn| sqlite::id_sequence(conn, collection))
        .expect("read id sequence")
}

fn create(ds: &Datastore, raw: &str) {
    let fqid: Fqid = raw.parse().expect("valid fqid");
    ds.writer()
        .write(&[WriteRequest::new(vec![RequestEvent::create(fqid, Record::new())])])
        .expect("create succeeds");
}

#[test]
fn reservations_are_consecutive_and_creates_raise_the_sequence() {
    let ds = datastore();
    assert_eq!(reserve(&ds, "c", 3).unwrap(), vec![1, 2, 3]);
    assert_eq!(reserve(&ds, "c", 2).unwrap(), vec![4, 5]);
    create(&ds, "c/6");
    assert_eq!(sequence(&ds, "c"), Some(7));
}

#[test]
fn creates_above_the_sequence_push_reservations_past_them() {
    let ds = datastore();
    create(&ds, "c/10");
    assert_eq!(sequence(&ds, "c"), Some(11));
    assert_eq!(reserve(&ds, "c", 1).unwrap(), vec![11]);
}

#[test]
fn creates_below_the_sequence_leave_it_alone() {
    let ds = datastore();
    reserve(&ds, "c", 5).unwrap();
    create(&ds, "c/2");
    assert_eq!(sequence(&ds, "c"), Some(6));
}

#[test]
fn collections_have_independent_sequences() {
    let ds = datastore();
    reserve(&ds, "a", 4).unwrap();
    assert_eq!(reserve(&ds, "b", 1).unwrap(), vec![1]);
    assert_eq!(sequence(&ds, "a"), Some(5));
    assert_eq!(sequence(&ds, "missing"), None);
}

#[test]
fn invalid_reservations_are_rejected() {
    let ds = datastore();
    assert!(matches!(reserve(&ds, "c", 0), Err(DatastoreError::InvalidFormat(_))));
    assert!(matches!(reserve(&ds, "c", -3), Err(DatastoreError::InvalidFormat(_))));
    assert!(matches!(reserve(&ds, "Not_Valid", 1), Err(DatastoreError::InvalidFormat(_))));
    assert_eq!(sequence(&ds, "c"), None);
}

#[test]
fn oversized_reservations_are_rejected() {
    let ds = datastore();
    let max = ReserveIdsRequest::MAX_AMOUNT;
    assert!(matches!(reserve(&ds, "c", max + 1), Err(DatastoreError::InvalidFormat(_))));
    assert!(matches!(
        reserve(&ds, "c", 10_000_000_000),
        Err(DatastoreError::InvalidFormat(_))
    ));
    assert_eq!(sequence(&ds, "c"), None);

    let ids = reserve(&ds, "c", max).unwrap();
    assert_eq!(ids.len() as i64, max);
    assert_eq!(ids.last(), Some(&max));
}

#[test]
fn reservations_do_not_create_positions() {
    let ds = datastore();
    reserve(&ds, "c", 2).unwrap();
    assert_eq!(ds.reader().max_position().unwrap(), 0);
}
