//! Read path.
//!
//! Current state comes from `models`; point-in-time reads replay `events`
//! up to the requested position instead. Every call runs in its own read
//! transaction on a pooled connection, so readers proceed in parallel with
//! each other and with the writer.

pub mod projection;
pub mod requests;
pub mod service;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::{sqlite, ConnectionPool};
use crate::types::{HistoryInformation, Id, Position, Record};

pub use requests::{
    AggregateRequest, CountResponse, ExistsResponse, FilterRequest, FilterResponse,
    GetAllRequest, GetEverythingRequest, GetManyRequest, GetManyRequestItem, GetManyRequestPart,
    GetRequest, HistoryInformationRequest, MaxResponse, MinMaxRequest, MinResponse,
    ModelsByCollection,
};

#[derive(Clone)]
pub struct Reader {
    pool: Arc<ConnectionPool>,
}

impl Reader {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn get(&self, request: &GetRequest) -> Result<Record> {
        self.pool.read(|conn| service::get(conn, request))
    }

    pub fn get_many(&self, request: &GetManyRequest) -> Result<ModelsByCollection> {
        self.pool.read(|conn| service::get_many(conn, request))
    }

    pub fn get_all(&self, request: &GetAllRequest) -> Result<BTreeMap<Id, Record>> {
        self.pool.read(|conn| service::get_all(conn, request))
    }

    pub fn get_everything(&self, request: &GetEverythingRequest) -> Result<ModelsByCollection> {
        self.pool.read(|conn| service::get_everything(conn, request))
    }

    pub fn filter(&self, request: &FilterRequest) -> Result<FilterResponse> {
        self.pool.read(|conn| service::filter(conn, request))
    }

    pub fn exists(&self, request: &AggregateRequest) -> Result<ExistsResponse> {
        self.pool.read(|conn| service::exists(conn, request))
    }

    pub fn count(&self, request: &AggregateRequest) -> Result<CountResponse> {
        self.pool.read(|conn| service::count(conn, request))
    }

    pub fn min(&self, request: &MinMaxRequest) -> Result<MinResponse> {
        self.pool.read(|conn| service::min(conn, request))
    }

    pub fn max(&self, request: &MinMaxRequest) -> Result<MaxResponse> {
        self.pool.read(|conn| service::max(conn, request))
    }

    pub fn history_information(
        &self,
        request: &HistoryInformationRequest,
    ) -> Result<BTreeMap<String, Vec<HistoryInformation>>> {
        self.pool.read(|conn| service::history_information(conn, request))
    }

    /// Highest assigned position, `0` for an empty store.
    pub fn max_position(&self) -> Result<Position> {
        self.pool.read(sqlite::max_position)
    }
}
