//! Read views for model migrations: one over the live datastore, one over a
//! set of models held in memory.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::{DatastoreError, Result};
use crate::event::Model;
use crate::keys::Fqid;
use crate::query::operators::compare_scalars;
use crate::query::{matches, Filter};
use crate::reader::projection::project;
use crate::reader::{
    AggregateRequest, FilterRequest, GetAllRequest, GetManyRequest, GetManyRequestItem,
    GetManyRequestPart, GetRequest, MinMaxRequest, Reader,
};
use crate::types::{AggregateType, DeletedModelsBehaviour, Id, Record};

use super::migration::MigrationReader;

// ============================================================================
// DatabaseMigrationReader
// ============================================================================

pub struct DatabaseMigrationReader<'r> {
    reader: &'r Reader,
}

impl<'r> DatabaseMigrationReader<'r> {
    pub fn new(reader: &'r Reader) -> Self {
        Self { reader }
    }
}

impl MigrationReader for DatabaseMigrationReader<'_> {
    fn get(&self, fqid: &Fqid, mapped_fields: &[String]) -> Result<Record> {
        self.reader
            .get(&GetRequest::new(fqid.clone()).fields(mapped_fields.iter().cloned()))
    }

    fn get_many(&self, fqids: &[Fqid], mapped_fields: &[String]) -> Result<BTreeMap<Fqid, Record>> {
        let mut by_collection: BTreeMap<&str, Vec<Id>> = BTreeMap::new();
        for fqid in fqids {
            by_collection.entry(fqid.collection()).or_default().push(fqid.id());
        }
        let request = GetManyRequest {
            requests: by_collection
                .into_iter()
                .map(|(collection, ids)| {
                    GetManyRequestItem::Part(GetManyRequestPart {
                        collection: collection.to_string(),
                        ids,
                        mapped_fields: Vec::new(),
                    })
                })
                .collect(),
            mapped_fields: mapped_fields.to_vec(),
            position: None,
            get_deleted_models: DeletedModelsBehaviour::NoDeleted,
        };
        let mut out = BTreeMap::new();
        for (collection, models) in self.reader.get_many(&request)? {
            for (id, record) in models {
                out.insert(Fqid::new(collection.clone(), id)?, record);
            }
        }
        Ok(out)
    }

    fn get_all(&self, collection: &str, mapped_fields: &[String]) -> Result<BTreeMap<Id, Record>> {
        self.reader.get_all(&GetAllRequest {
            collection: collection.to_string(),
            mapped_fields: mapped_fields.to_vec(),
            get_deleted_models: DeletedModelsBehaviour::NoDeleted,
        })
    }

    fn filter(
        &self,
        collection: &str,
        filter: &Filter,
        mapped_fields: &[String],
    ) -> Result<BTreeMap<Id, Record>> {
        Ok(self
            .reader
            .filter(&FilterRequest {
                collection: collection.to_string(),
                filter: filter.clone(),
                mapped_fields: mapped_fields.to_vec(),
            })?
            .data)
    }

    fn exists(&self, collection: &str, filter: &Filter) -> Result<bool> {
        Ok(self.reader.exists(&aggregate_request(collection, filter))?.exists)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<i64> {
        Ok(self.reader.count(&aggregate_request(collection, filter))?.count)
    }

    fn min(&self, collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> Result<Value> {
        Ok(self
            .reader
            .min(&min_max_request(collection, filter, field, aggregate_type))?
            .min)
    }

    fn max(&self, collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> Result<Value> {
        Ok(self
            .reader
            .max(&min_max_request(collection, filter, field, aggregate_type))?
            .max)
    }

    fn is_alive(&self, fqid: &Fqid) -> Result<bool> {
        match self.reader.get(&GetRequest::new(fqid.clone())) {
            Ok(_) => Ok(true),
            Err(DatastoreError::ModelDoesNotExist { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn aggregate_request(collection: &str, filter: &Filter) -> AggregateRequest {
    AggregateRequest {
        collection: collection.to_string(),
        filter: filter.clone(),
    }
}

fn min_max_request(collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> MinMaxRequest {
    MinMaxRequest {
        collection: collection.to_string(),
        filter: filter.clone(),
        field: field.to_string(),
        aggregate_type,
    }
}

// ============================================================================
// MemoryMigrationReader
// ============================================================================

/// Serves reads from a map of models, evaluating filters in memory.
pub struct MemoryMigrationReader<'m> {
    models: &'m BTreeMap<Fqid, Model>,
}

impl<'m> MemoryMigrationReader<'m> {
    pub fn new(models: &'m BTreeMap<Fqid, Model>) -> Self {
        Self { models }
    }

    fn live(&self, collection: &str) -> impl Iterator<Item = (&'m Fqid, &'m Model)> + '_ {
        let collection = collection.to_string();
        self.models
            .iter()
            .filter(move |(fqid, model)| fqid.collection() == collection && !model.deleted)
    }

    fn matching(&self, collection: &str, filter: &Filter) -> Vec<(&'m Fqid, &'m Model)> {
        self.live(collection)
            .filter(|(_, model)| matches(filter, &model.to_record()))
            .collect()
    }

    fn extreme(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
        aggregate_type: AggregateType,
        wanted: Ordering,
    ) -> Value {
        self.matching(collection, filter)
            .into_iter()
            .filter_map(|(_, model)| cast(model.fields.get(field)?, aggregate_type))
            .reduce(|best, candidate| match compare_scalars(&candidate, &best) {
                Some(order) if order == wanted => candidate,
                _ => best,
            })
            .unwrap_or(Value::Null)
    }
}

/// Mirror of the SQL cast applied by the datastore aggregates.
fn cast(value: &Value, aggregate_type: AggregateType) -> Option<Value> {
    match (aggregate_type, value) {
        (_, Value::Null) => None,
        (AggregateType::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(|i| json!(i)),
        (AggregateType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
        (AggregateType::Float, Value::Number(n)) => n.as_f64().map(|f| json!(f)),
        (AggregateType::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| json!(f)),
        (AggregateType::Text, Value::String(s)) => Some(json!(s)),
        (AggregateType::Text, Value::Number(n)) => Some(json!(n.to_string())),
        _ => None,
    }
}

impl MigrationReader for MemoryMigrationReader<'_> {
    fn get(&self, fqid: &Fqid, mapped_fields: &[String]) -> Result<Record> {
        match self.models.get(fqid) {
            Some(model) if !model.deleted => Ok(project(&model.to_record(), mapped_fields)),
            _ => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
        }
    }

    fn get_many(&self, fqids: &[Fqid], mapped_fields: &[String]) -> Result<BTreeMap<Fqid, Record>> {
        Ok(fqids
            .iter()
            .filter_map(|fqid| {
                self.get(fqid, mapped_fields)
                    .ok()
                    .map(|record| (fqid.clone(), record))
            })
            .collect())
    }

    fn get_all(&self, collection: &str, mapped_fields: &[String]) -> Result<BTreeMap<Id, Record>> {
        Ok(self
            .live(collection)
            .map(|(fqid, model)| (fqid.id(), project(&model.to_record(), mapped_fields)))
            .collect())
    }

    fn filter(
        &self,
        collection: &str,
        filter: &Filter,
        mapped_fields: &[String],
    ) -> Result<BTreeMap<Id, Record>> {
        Ok(self
            .matching(collection, filter)
            .into_iter()
            .map(|(fqid, model)| (fqid.id(), project(&model.to_record(), mapped_fields)))
            .collect())
    }

    fn exists(&self, collection: &str, filter: &Filter) -> Result<bool> {
        Ok(!self.matching(collection, filter).is_empty())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<i64> {
        Ok(self.matching(collection, filter).len() as i64)
    }

    fn min(&self, collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> Result<Value> {
        Ok(self.extreme(collection, filter, field, aggregate_type, Ordering::Less))
    }

    fn max(&self, collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> Result<Value> {
        Ok(self.extreme(collection, filter, field, aggregate_type, Ordering::Greater))
    }

    fn is_alive(&self, fqid: &Fqid) -> Result<bool> {
        Ok(self.models.get(fqid).is_some_and(|m| !m.deleted))
    }
}
