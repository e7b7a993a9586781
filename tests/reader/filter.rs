use event_datastore::query::{Filter, FilterOp};
use event_datastore::reader::{AggregateRequest, FilterRequest, MinMaxRequest};
use event_datastore::types::AggregateType;
use event_datastore::writer::{RequestEvent, WriteRequest};
use event_datastore::{Datastore, Fqid, Record};
use serde_json::{json, Value};

fn fqid(raw: &str) -> Fqid {
    raw.parse().expect("valid fqid")
}

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object literal")
}

fn seeded() -> Datastore {
    let ds = Datastore::open_in_memory().expect("open in-memory datastore");
    let models = [
        ("user/1", json!({ "name": "Ada", "age": 36, "tags": ["x"] })),
        ("user/2", json!({ "name": "bob", "age": 17 })),
        ("user/3", json!({ "name": "Carol", "age": "old" })),
        ("user/4", json!({ "name": "Dan", "age": 50 })),
        ("group/1", json!({ "name": "Ada" })),
    ];
    let events = models
        .into_iter()
        .map(|(raw, fields)| RequestEvent::create(fqid(raw), record(fields)))
        .collect();
    ds.writer()
        .write(&[WriteRequest::new(events)])
        .expect("seed write");
    ds.writer()
        .write(&[WriteRequest::new(vec![RequestEvent::delete(fqid("user/4"))])])
        .expect("delete user/4");
    ds
}

fn filter_ids(ds: &Datastore, filter: Filter) -> Vec<i64> {
    let response = ds
        .reader()
        .filter(&FilterRequest {
            collection: "user".into(),
            filter,
            mapped_fields: Vec::new(),
        })
        .expect("filter succeeds");
    response.data.keys().copied().collect()
}

#[test]
fn comparison_operators_skip_mismatched_types() {
    let ds = seeded();
    assert_eq!(filter_ids(&ds, Filter::operator("age", FilterOp::Gt, json!(18))), vec![1]);
    assert_eq!(filter_ids(&ds, Filter::operator("age", FilterOp::Le, json!(17))), vec![2]);
    assert_eq!(filter_ids(&ds, Filter::operator("age", FilterOp::Ne, json!(36))), vec![2, 3]);
}

#[test]
fn deleted_models_and_other_collections_never_match() {
    let ds = seeded();
    assert!(filter_ids(&ds, Filter::eq("name", json!("Dan"))).is_empty());
    assert_eq!(filter_ids(&ds, Filter::eq("name", json!("Ada"))), vec![1]);
}

#[test]
fn string_operators() {
    let ds = seeded();
    assert_eq!(filter_ids(&ds, Filter::operator("name", FilterOp::IEq, json!("BOB"))), vec![2]);
    assert_eq!(filter_ids(&ds, Filter::operator("name", FilterOp::Like, json!("%a%"))), vec![1, 3]);
}

#[test]
fn null_matches_missing_fields() {
    let ds = seeded();
    assert_eq!(filter_ids(&ds, Filter::eq("tags", Value::Null)), vec![2, 3]);
    assert_eq!(filter_ids(&ds, Filter::operator("tags", FilterOp::Ne, Value::Null)), vec![1]);
}

#[test]
fn boolean_combinators() {
    let ds = seeded();
    let filter = Filter::from_json(&json!({
        "or_filter": [
            { "field": "name", "operator": "=", "value": "bob" },
            { "and_filter": [
                { "field": "age", "operator": ">", "value": 30 },
                { "not_filter": { "field": "name", "operator": "=", "value": "Carol" } }
            ]}
        ]
    }))
    .unwrap();
    assert_eq!(filter_ids(&ds, filter), vec![1, 2]);
    assert_eq!(filter_ids(&ds, Filter::And(vec![])), vec![1, 2, 3]);
    assert!(filter_ids(&ds, Filter::Or(vec![])).is_empty());
}

#[test]
fn filter_projects_and_reports_the_position() {
    let ds = seeded();
    let response = ds
        .reader()
        .filter(&FilterRequest {
            collection: "user".into(),
            filter: Filter::eq("name", json!("Ada")),
            mapped_fields: vec!["age".into()],
        })
        .unwrap();
    assert_eq!(response.position, 2);
    assert_eq!(Value::Object(response.data[&1].clone()), json!({ "age": 36 }));
}

#[test]
fn aggregates() {
    let ds = seeded();
    let reader = ds.reader();
    let adults = AggregateRequest {
        collection: "user".into(),
        filter: Filter::operator("age", FilterOp::Ge, json!(18)),
    };
    assert_eq!(reader.count(&adults).unwrap().count, 1);
    assert!(reader.exists(&adults).unwrap().exists);

    let nobody = AggregateRequest {
        collection: "user".into(),
        filter: Filter::eq("name", json!("nobody")),
    };
    assert_eq!(reader.count(&nobody).unwrap().count, 0);
    assert!(!reader.exists(&nobody).unwrap().exists);

    let numeric = |filter: Filter| MinMaxRequest {
        collection: "user".into(),
        filter,
        field: "age".into(),
        aggregate_type: AggregateType::Int,
    };
    let everyone = Filter::And(vec![]);
    assert_eq!(reader.max(&numeric(everyone.clone())).unwrap().max, json!(36));
    assert_eq!(reader.min(&numeric(Filter::operator("age", FilterOp::Gt, json!(0)))).unwrap().min, json!(17));
    let empty = reader.min(&numeric(Filter::eq("name", json!("nobody")))).unwrap();
    assert_eq!(empty.min, Value::Null);
    assert_eq!(empty.position, 2);
}

#[test]
fn filters_decode_from_the_wire_form() {
    let request: FilterRequest = serde_json::from_value(json!({
        "collection": "user",
        "filter": { "field": "age", "operator": "<", "value": 20 }
    }))
    .unwrap();
    assert_eq!(request.filter, Filter::operator("age", FilterOp::Lt, json!(20)));
    assert!(serde_json::from_value::<FilterRequest>(json!({
        "collection": "user",
        "filter": { "field": "age", "operator": "<>", "value": 20 }
    }))
    .is_err());
}
