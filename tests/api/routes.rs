use event_datastore::api::{
    handle, Route, STATUS_BAD_REQUEST, STATUS_CREATED, STATUS_NOT_FOUND, STATUS_NO_CONTENT,
    STATUS_OK,
};
use event_datastore::config::DatastoreConfig;
use event_datastore::Datastore;
use serde_json::{json, Value};

fn datastore() -> Datastore {
    Datastore::open_in_memory().expect("open in-memory datastore")
}

fn create_a1(ds: &Datastore) {
    let response = handle(
        ds,
        "write",
        &json!({ "events": [{ "type": "create", "fqid": "a/1", "fields": { "f": 1 } }] }),
    );
    assert_eq!(response.status, STATUS_CREATED);
    assert_eq!(response.body, None);
}

#[test]
fn route_names_parse_with_or_without_a_slash() {
    assert_eq!(Route::parse("get"), Some(Route::Get));
    assert_eq!(Route::parse("/reserve_ids"), Some(Route::ReserveIds));
    assert_eq!(Route::parse("nope"), None);
}

#[test]
fn write_then_read_over_json() {
    let ds = datastore();
    create_a1(&ds);

    let response = handle(&ds, "/get", &json!({ "fqid": "a/1" }));
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(
        response.body,
        Some(json!({ "f": 1, "meta_deleted": false, "meta_position": 1 }))
    );

    let response = handle(
        &ds,
        "filter",
        &json!({ "collection": "a", "filter": { "field": "f", "operator": ">=", "value": 1 } }),
    );
    assert_eq!(response.body, Some(json!({
        "data": { "1": { "f": 1, "meta_deleted": false, "meta_position": 1 } },
        "position": 1
    })));

    let response = handle(
        &ds,
        "count",
        &json!({ "collection": "a", "filter": { "field": "f", "operator": "=", "value": 1 } }),
    );
    assert_eq!(response.body, Some(json!({ "count": 1, "position": 1 })));
}

#[test]
fn batched_writes_accept_a_list() {
    let ds = datastore();
    let response = handle(
        &ds,
        "write",
        &json!([
            { "events": [{ "type": "create", "fqid": "a/1", "fields": {} }] },
            { "events": [{ "type": "update", "fqid": "a/1", "fields": { "f": 2 } }] }
        ]),
    );
    assert_eq!(response.status, STATUS_CREATED);
    let response = handle(&ds, "get_everything", &Value::Null);
    assert_eq!(response.status, STATUS_OK);
    let body = response.body.unwrap();
    assert_eq!(body["a"]["1"]["f"], json!(2));
    assert_eq!(body["a"]["1"]["meta_position"], json!(2));
}

#[test]
fn client_errors_map_to_400_with_a_typed_body() {
    let ds = datastore();
    create_a1(&ds);

    let response = handle(
        &ds,
        "write",
        &json!({ "events": [{ "type": "create", "fqid": "a/1", "fields": {} }] }),
    );
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    let error = &response.body.unwrap()["error"];
    assert_eq!(error["type"], json!(4));
    assert_eq!(error["type_verbose"], json!("MODEL_EXISTS"));
    assert_eq!(error["fqid"], json!("a/1"));

    let response = handle(&ds, "get", &json!({ "fqid": "not-an-fqid" }));
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    assert_eq!(response.body.unwrap()["error"]["type"], json!(1));

    let response = handle(&ds, "get", &json!({ "fqid": "a/2" }));
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    assert_eq!(response.body.unwrap()["error"]["type_verbose"], json!("MODEL_DOES_NOT_EXIST"));
}

#[test]
fn unknown_routes_are_not_found() {
    let response = handle(&datastore(), "drop_everything", &Value::Null);
    assert_eq!(response.status, STATUS_NOT_FOUND);
    assert!(response.body.unwrap()["error"]["msg"]
        .as_str()
        .unwrap()
        .contains("drop_everything"));
}

#[test]
fn reserve_ids_and_maintenance_routes() {
    let ds = datastore();
    let response = handle(&ds, "reserve_ids", &json!({ "collection": "c", "amount": 2 }));
    assert_eq!(response.body, Some(json!({ "ids": [1, 2] })));

    create_a1(&ds);
    let response = handle(&ds, "delete_history_information", &Value::Null);
    assert_eq!(response.status, STATUS_NO_CONTENT);

    let response = handle(&ds, "truncate_db", &Value::Null);
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    assert_eq!(response.body.unwrap()["error"]["type"], json!(2));

    let dev = Datastore::open(DatastoreConfig {
        development_mode: true,
        ..DatastoreConfig::in_memory()
    })
    .unwrap();
    create_a1(&dev);
    assert_eq!(handle(&dev, "truncate_db", &Value::Null).status, STATUS_NO_CONTENT);
    assert_eq!(handle(&dev, "get", &json!({ "fqid": "a/1" })).status, STATUS_BAD_REQUEST);
}

#[test]
fn write_without_events_statuses() {
    let ds = datastore();
    let response = handle(
        &ds,
        "write_without_events",
        &json!([{ "events": [{ "type": "create", "fqid": "action_worker/1", "fields": { "n": 1 } }] }]),
    );
    assert_eq!(response.status, STATUS_CREATED);
    let response = handle(
        &ds,
        "write_without_events",
        &json!([{ "events": [{ "type": "delete", "fqid": "action_worker/1" }] }]),
    );
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.body, None);
}

#[test]
fn history_information_route() {
    let ds = datastore();
    let response = handle(
        &ds,
        "write",
        &json!({
            "events": [{ "type": "create", "fqid": "a/1", "fields": {} }],
            "user_id": 3,
            "information": { "why": "test" }
        }),
    );
    assert_eq!(response.status, STATUS_CREATED);
    let response = handle(&ds, "history_information", &json!({ "fqids": ["a/1", "a/2"] }));
    let body = response.body.unwrap();
    assert_eq!(body["a/1"][0]["position"], json!(1));
    assert_eq!(body["a/1"][0]["user_id"], json!(3));
    assert_eq!(body["a/1"][0]["information"], json!({ "why": "test" }));
    assert!(body.get("a/2").is_none());
}
