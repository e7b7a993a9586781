use event_datastore::reader::HistoryInformationRequest;
use event_datastore::writer::{RequestEvent, WriteRequest};
use event_datastore::{Datastore, Fqid, Record};
use serde_json::json;

fn fqid(raw: &str) -> Fqid {
    raw.parse().expect("valid fqid")
}

fn seeded() -> Datastore {
    let ds = Datastore::open_in_memory().expect("open in-memory datastore");
    let requests = [
        WriteRequest::new(vec![RequestEvent::create(fqid("a/1"), Record::new())])
            .with_user(7)
            .with_information(json!({ "action": "create" })),
        WriteRequest::new(vec![RequestEvent::create(fqid("a/2"), Record::new())]),
        WriteRequest::new(vec![
            RequestEvent::delete(fqid("a/1")),
            RequestEvent::delete(fqid("a/2")),
        ])
        .with_user(9)
        .with_information(json!(["cleanup"])),
    ];
    for request in requests {
        ds.writer().write(&[request]).expect("seed write");
    }
    ds
}

fn request(fqids: &[&str]) -> HistoryInformationRequest {
    HistoryInformationRequest {
        fqids: fqids.iter().map(|raw| fqid(raw)).collect(),
    }
}

#[test]
fn history_lists_positions_with_information() {
    let ds = seeded();
    let history = ds
        .reader()
        .history_information(&request(&["a/1", "a/2", "b/1"]))
        .unwrap();

    let a1 = &history["a/1"];
    assert_eq!(a1.iter().map(|h| h.position).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(a1[0].user_id, 7);
    assert_eq!(a1[0].information, json!({ "action": "create" }));
    assert!(a1[0].timestamp > 0.0);

    let a2 = &history["a/2"];
    assert_eq!(a2.len(), 1);
    assert_eq!(a2[0].information, json!(["cleanup"]));
    assert!(!history.contains_key("b/1"));
}

#[test]
fn deleting_history_information_keeps_the_log() {
    let ds = seeded();
    ds.writer().delete_history_information().unwrap();
    let history = ds
        .reader()
        .history_information(&request(&["a/1", "a/2"]))
        .unwrap();
    assert!(history.is_empty());
    assert_eq!(ds.reader().max_position().unwrap(), 3);
}
