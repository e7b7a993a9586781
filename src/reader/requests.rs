use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::Fqid;
use crate::query::Filter;
use crate::types::{AggregateType, DeletedModelsBehaviour, Id, Position, Record};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub fqid: Fqid,
    #[serde(default)]
    pub mapped_fields: Vec<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub get_deleted_models: DeletedModelsBehaviour,
}

impl GetRequest {
    pub fn new(fqid: Fqid) -> Self {
        Self {
            fqid,
            mapped_fields: Vec::new(),
            position: None,
            get_deleted_models: DeletedModelsBehaviour::default(),
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mapped_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn deleted(mut self, behaviour: DeletedModelsBehaviour) -> Self {
        self.get_deleted_models = behaviour;
        self
    }
}

/// `{collection, ids, mapped_fields?}` part of a `get_many` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetManyRequestPart {
    pub collection: String,
    pub ids: Vec<Id>,
    #[serde(default)]
    pub mapped_fields: Vec<String>,
}

/// One entry of `get_many.requests`: a part, or an fqid / fqfield string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GetManyRequestItem {
    Part(GetManyRequestPart),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetManyRequest {
    pub requests: Vec<GetManyRequestItem>,
    #[serde(default)]
    pub mapped_fields: Vec<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub get_deleted_models: DeletedModelsBehaviour,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetAllRequest {
    pub collection: String,
    #[serde(default)]
    pub mapped_fields: Vec<String>,
    #[serde(default)]
    pub get_deleted_models: DeletedModelsBehaviour,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetEverythingRequest {
    #[serde(default)]
    pub get_deleted_models: DeletedModelsBehaviour,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub collection: String,
    pub filter: Filter,
    #[serde(default)]
    pub mapped_fields: Vec<String>,
}

/// Body of `exists` and `count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub collection: String,
    pub filter: Filter,
}

/// Body of `min` and `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxRequest {
    pub collection: String,
    pub filter: Filter,
    pub field: String,
    #[serde(rename = "type", default)]
    pub aggregate_type: AggregateType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryInformationRequest {
    pub fqids: Vec<Fqid>,
}

// ============================================================================
// Responses
// ============================================================================

/// `collection → id → record`.
pub type ModelsByCollection = BTreeMap<String, BTreeMap<Id, Record>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResponse {
    pub data: BTreeMap<Id, Record>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinResponse {
    pub min: Value,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxResponse {
    pub max: Value,
    pub position: Position,
}
