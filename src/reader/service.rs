//! Connection-level read operations. [`Reader`](super::Reader) wraps each in
//! a read transaction; the writer and the migration handler call them on a
//! connection they already hold.

use std::collections::{BTreeMap, HashMap};

use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{DatastoreError, Result};
use crate::event::{build_model, Model};
use crate::keys::{assert_collection, assert_field, Fqid, LockKey};
use crate::storage::sqlite::{self, Aggregate};
use crate::types::{DeletedModelsBehaviour, HistoryInformation, Id, Position, Record};

use super::projection::{merge_mapped_fields, project, validate_mapped_fields};
use super::requests::{
    AggregateRequest, CountResponse, ExistsResponse, FilterRequest, FilterResponse,
    GetAllRequest, GetEverythingRequest, GetManyRequest, GetManyRequestItem, GetRequest,
    HistoryInformationRequest, MaxResponse, MinMaxRequest, MinResponse, ModelsByCollection,
};

// ============================================================================
// Model loading
// ============================================================================

/// Reject positions outside `1..=max_position`.
pub fn check_position(conn: &Connection, position: Position) -> Result<()> {
    if position < 1 {
        return Err(DatastoreError::InvalidFormat(format!(
            "Position must be positive, got {position}"
        )));
    }
    let max = sqlite::max_position(conn)?;
    if position > max {
        return Err(DatastoreError::InvalidRequest(format!(
            "Position {position} is higher than the current position {max}"
        )));
    }
    Ok(())
}

/// Replay the events of `fqid` up to `position`. `None` when the model did
/// not exist yet.
pub fn build_model_at(conn: &Connection, fqid: &Fqid, position: Position) -> Result<Option<Model>> {
    let events = sqlite::events_for_fqid(conn, fqid, Some(position))?;
    if events.is_empty() {
        return Ok(None);
    }
    build_model(events.iter().map(|(event, position)| (event, *position))).map(Some)
}

/// Current model from `models`, or a rebuild when a position is given.
/// Callers validate the position first.
pub fn load_model(conn: &Connection, fqid: &Fqid, position: Option<Position>) -> Result<Option<Model>> {
    match position {
        None => sqlite::read_model(conn, fqid),
        Some(position) => build_model_at(conn, fqid, position),
    }
}

fn apply_policy(fqid: &Fqid, model: Option<Model>, policy: DeletedModelsBehaviour) -> Result<Model> {
    match model {
        None => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
        Some(model) if policy.matches(model.deleted) => Ok(model),
        Some(_) if policy == DeletedModelsBehaviour::OnlyDeleted => {
            Err(DatastoreError::model_not_deleted(fqid.to_string()))
        }
        Some(_) => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
    }
}

// ============================================================================
// get / get_many / get_all / get_everything
// ============================================================================

pub fn get(conn: &Connection, request: &GetRequest) -> Result<Record> {
    validate_mapped_fields(&request.mapped_fields)?;
    if let Some(position) = request.position {
        check_position(conn, position)?;
    }
    let model = load_model(conn, &request.fqid, request.position)?;
    let model = apply_policy(&request.fqid, model, request.get_deleted_models)?;
    Ok(project(&model.to_record(), &request.mapped_fields))
}

/// Requested fields per fqid. An empty list selects every field.
fn collect_get_many_targets(request: &GetManyRequest) -> Result<BTreeMap<Fqid, Vec<String>>> {
    let mut targets: BTreeMap<Fqid, Vec<String>> = BTreeMap::new();
    let mut whole: Vec<Fqid> = Vec::new();

    for item in &request.requests {
        match item {
            GetManyRequestItem::Part(part) => {
                assert_collection(&part.collection)?;
                validate_mapped_fields(&part.mapped_fields)?;
                let fields = merge_mapped_fields(&request.mapped_fields, &part.mapped_fields);
                for id in &part.ids {
                    let fqid = Fqid::new(part.collection.clone(), *id)?;
                    if fields.is_empty() {
                        whole.push(fqid.clone());
                    }
                    let entry = targets.entry(fqid).or_default();
                    *entry = merge_mapped_fields(entry, &fields);
                }
            }
            GetManyRequestItem::Key(raw) => match raw.parse::<LockKey>()? {
                LockKey::Fqfield(fqfield) => {
                    let fields = merge_mapped_fields(
                        &request.mapped_fields,
                        &[fqfield.field().to_string()],
                    );
                    let entry = targets.entry(fqfield.fqid().clone()).or_default();
                    *entry = merge_mapped_fields(entry, &fields);
                }
                LockKey::Fqid(fqid) => {
                    let entry = targets.entry(fqid.clone()).or_default();
                    *entry = merge_mapped_fields(entry, &request.mapped_fields);
                    if request.mapped_fields.is_empty() {
                        whole.push(fqid);
                    }
                }
                LockKey::CollectionField(cf) => {
                    return Err(DatastoreError::InvalidFormat(format!(
                        "get_many expects fqids or fqfields, got collectionfield {cf}"
                    )))
                }
            },
        }
    }

    for fqid in whole {
        targets.insert(fqid, Vec::new());
    }
    Ok(targets)
}

pub fn get_many(conn: &Connection, request: &GetManyRequest) -> Result<ModelsByCollection> {
    validate_mapped_fields(&request.mapped_fields)?;
    if let Some(position) = request.position {
        check_position(conn, position)?;
    }
    let targets = collect_get_many_targets(request)?;

    let mut out = ModelsByCollection::new();
    for (fqid, fields) in targets {
        let Some(model) = load_model(conn, &fqid, request.position)? else {
            continue;
        };
        if !request.get_deleted_models.matches(model.deleted) {
            continue;
        }
        out.entry(fqid.collection().to_string())
            .or_default()
            .insert(fqid.id(), project(&model.to_record(), &fields));
    }
    Ok(out)
}

pub fn get_all(conn: &Connection, request: &GetAllRequest) -> Result<BTreeMap<Id, Record>> {
    assert_collection(&request.collection)?;
    validate_mapped_fields(&request.mapped_fields)?;
    let models = sqlite::collection_models(conn, &request.collection)?;
    Ok(models
        .into_iter()
        .filter(|(_, model)| request.get_deleted_models.matches(model.deleted))
        .map(|(fqid, model)| (fqid.id(), project(&model.to_record(), &request.mapped_fields)))
        .collect())
}

/// Every model grouped by collection, each with its `id` injected.
pub fn get_everything(conn: &Connection, request: &GetEverythingRequest) -> Result<ModelsByCollection> {
    let mut out = ModelsByCollection::new();
    for (fqid, model) in sqlite::all_models(conn)? {
        if !request.get_deleted_models.matches(model.deleted) {
            continue;
        }
        let mut record = project(&model.to_record(), &[]);
        record.insert("id".into(), json!(fqid.id()));
        out.entry(fqid.collection().to_string())
            .or_default()
            .insert(fqid.id(), record);
    }
    Ok(out)
}

// ============================================================================
// filter / aggregates
// ============================================================================

pub fn filter(conn: &Connection, request: &FilterRequest) -> Result<FilterResponse> {
    assert_collection(&request.collection)?;
    validate_mapped_fields(&request.mapped_fields)?;
    let models = sqlite::filter_models(conn, &request.collection, &request.filter)?;
    let position = sqlite::max_position(conn)?;
    debug!(collection = %request.collection, matches = models.len(), "filter");
    Ok(FilterResponse {
        data: models
            .into_iter()
            .map(|(fqid, model)| (fqid.id(), project(&model.to_record(), &request.mapped_fields)))
            .collect(),
        position,
    })
}

pub fn exists(conn: &Connection, request: &AggregateRequest) -> Result<ExistsResponse> {
    assert_collection(&request.collection)?;
    let value = sqlite::aggregate(conn, &request.collection, &request.filter, Aggregate::Exists)?;
    Ok(ExistsResponse {
        exists: value.as_bool().unwrap_or(false),
        position: sqlite::max_position(conn)?,
    })
}

pub fn count(conn: &Connection, request: &AggregateRequest) -> Result<CountResponse> {
    assert_collection(&request.collection)?;
    let value = sqlite::aggregate(conn, &request.collection, &request.filter, Aggregate::Count)?;
    Ok(CountResponse {
        count: value.as_i64().unwrap_or(0),
        position: sqlite::max_position(conn)?,
    })
}

fn min_max_value(conn: &Connection, request: &MinMaxRequest, max: bool) -> Result<Value> {
    assert_collection(&request.collection)?;
    assert_field(&request.field)?;
    let aggregate = if max {
        Aggregate::Max(&request.field, request.aggregate_type)
    } else {
        Aggregate::Min(&request.field, request.aggregate_type)
    };
    sqlite::aggregate(conn, &request.collection, &request.filter, aggregate)
}

pub fn min(conn: &Connection, request: &MinMaxRequest) -> Result<MinResponse> {
    Ok(MinResponse {
        min: min_max_value(conn, request, false)?,
        position: sqlite::max_position(conn)?,
    })
}

pub fn max(conn: &Connection, request: &MinMaxRequest) -> Result<MaxResponse> {
    Ok(MaxResponse {
        max: min_max_value(conn, request, true)?,
        position: sqlite::max_position(conn)?,
    })
}

// ============================================================================
// history
// ============================================================================

pub fn history_information(
    conn: &Connection,
    request: &HistoryInformationRequest,
) -> Result<BTreeMap<String, Vec<HistoryInformation>>> {
    sqlite::history_information(conn, &request.fqids)
}

// ============================================================================
// Helpers shared with the writer
// ============================================================================

/// Current models of `fqids`, ignoring the deleted flag. Missing fqids are
/// absent from the map.
pub fn current_models<'a, I>(conn: &Connection, fqids: I) -> Result<HashMap<Fqid, Model>>
where
    I: IntoIterator<Item = &'a Fqid>,
{
    let mut out = HashMap::new();
    for fqid in fqids {
        if out.contains_key(fqid) {
            continue;
        }
        if let Some(model) = sqlite::read_model(conn, fqid)? {
            out.insert(fqid.clone(), model);
        }
    }
    Ok(out)
}
