//! JSON request surface.
//!
//! Decodes a route name plus JSON body into a typed request, runs it and
//! encodes the outcome as a status code and optional JSON body. Transport
//! (HTTP server, CLI, ...) is left to the embedding binary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::datastore::Datastore;
use crate::error::{DatastoreError, Result};
use crate::reader::{
    AggregateRequest, FilterRequest, GetAllRequest, GetEverythingRequest, GetManyRequest,
    GetRequest, HistoryInformationRequest, MinMaxRequest,
};
use crate::writer::{EphemeralOutcome, ReserveIdsRequest, WriteBody, WriteRequest};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Option<Value>,
}

impl Response {
    fn ok(body: Value) -> Self {
        Self {
            status: STATUS_OK,
            body: Some(body),
        }
    }

    fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    fn error(err: &DatastoreError) -> Self {
        let status = if err.is_client_error() {
            STATUS_BAD_REQUEST
        } else {
            STATUS_INTERNAL_ERROR
        };
        Self {
            status,
            body: Some(err.to_error_body()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Get,
    GetMany,
    GetAll,
    GetEverything,
    Filter,
    Exists,
    Count,
    Min,
    Max,
    HistoryInformation,
    Write,
    ReserveIds,
    DeleteHistoryInformation,
    TruncateDb,
    WriteWithoutEvents,
}

impl Route {
    pub fn parse(name: &str) -> Option<Self> {
        let route = match name.trim_start_matches('/') {
            "get" => Route::Get,
            "get_many" => Route::GetMany,
            "get_all" => Route::GetAll,
            "get_everything" => Route::GetEverything,
            "filter" => Route::Filter,
            "exists" => Route::Exists,
            "count" => Route::Count,
            "min" => Route::Min,
            "max" => Route::Max,
            "history_information" => Route::HistoryInformation,
            "write" => Route::Write,
            "reserve_ids" => Route::ReserveIds,
            "delete_history_information" => Route::DeleteHistoryInformation,
            "truncate_db" => Route::TruncateDb,
            "write_without_events" => Route::WriteWithoutEvents,
            _ => return None,
        };
        Some(route)
    }
}

fn decode<T: DeserializeOwned>(body: &Value) -> Result<T> {
    T::deserialize(body).map_err(|e| DatastoreError::InvalidFormat(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| DatastoreError::Internal(e.to_string()))
}

/// Bodies that may be absent altogether.
fn decode_or_default<T: DeserializeOwned + Default>(body: &Value) -> Result<T> {
    if body.is_null() {
        Ok(T::default())
    } else {
        decode(body)
    }
}

fn dispatch(datastore: &Datastore, route: Route, body: &Value) -> Result<Response> {
    let reader = datastore.reader();
    let writer = datastore.writer();
    let response = match route {
        Route::Get => Response::ok(encode(&reader.get(&decode::<GetRequest>(body)?)?)?),
        Route::GetMany => Response::ok(encode(&reader.get_many(&decode::<GetManyRequest>(body)?)?)?),
        Route::GetAll => Response::ok(encode(&reader.get_all(&decode::<GetAllRequest>(body)?)?)?),
        Route::GetEverything => Response::ok(encode(
            &reader.get_everything(&decode_or_default::<GetEverythingRequest>(body)?)?,
        )?),
        Route::Filter => Response::ok(encode(&reader.filter(&decode::<FilterRequest>(body)?)?)?),
        Route::Exists => Response::ok(encode(&reader.exists(&decode::<AggregateRequest>(body)?)?)?),
        Route::Count => Response::ok(encode(&reader.count(&decode::<AggregateRequest>(body)?)?)?),
        Route::Min => Response::ok(encode(&reader.min(&decode::<MinMaxRequest>(body)?)?)?),
        Route::Max => Response::ok(encode(&reader.max(&decode::<MinMaxRequest>(body)?)?)?),
        Route::HistoryInformation => Response::ok(encode(
            &reader.history_information(&decode::<HistoryInformationRequest>(body)?)?,
        )?),
        Route::Write => {
            let requests = decode::<WriteBody>(body)?.into_requests();
            writer.write(&requests)?;
            Response::empty(STATUS_CREATED)
        }
        Route::ReserveIds => Response::ok(encode(&writer.reserve_ids(&decode::<ReserveIdsRequest>(body)?)?)?),
        Route::DeleteHistoryInformation => {
            writer.delete_history_information()?;
            Response::empty(STATUS_NO_CONTENT)
        }
        Route::TruncateDb => {
            writer.truncate_db()?;
            Response::empty(STATUS_NO_CONTENT)
        }
        Route::WriteWithoutEvents => {
            let requests = decode::<Vec<WriteRequest>>(body)?;
            match writer.write_without_events(&requests)? {
                EphemeralOutcome::Written => Response::empty(STATUS_CREATED),
                EphemeralOutcome::Deleted => Response::empty(STATUS_OK),
            }
        }
    };
    Ok(response)
}

/// Handle one request. Never fails: errors become error responses.
pub fn handle(datastore: &Datastore, route: &str, body: &Value) -> Response {
    let Some(parsed) = Route::parse(route) else {
        return Response {
            status: STATUS_NOT_FOUND,
            body: Some(json!({ "error": { "msg": format!("Unknown route {route}") } })),
        };
    };
    match dispatch(datastore, parsed, body) {
        Ok(response) => {
            debug!(route, status = response.status, "handled request");
            response
        }
        Err(err) if err.is_client_error() => {
            debug!(route, error = %err, "rejected request");
            Response::error(&err)
        }
        Err(err) => {
            error!(route, error = %err, "request failed");
            Response::error(&err)
        }
    }
}
