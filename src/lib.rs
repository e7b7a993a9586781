//! Event-sourced datastore on SQLite.
//!
//! Every write appends one position to an event log and updates the
//! materialized `models` table in the same transaction. Reads are served
//! from `models`, or by replaying the log for point-in-time queries.
//! Registered migrations rewrite the log online and are swapped in on
//! finalization.

pub mod error;
pub mod types;

pub mod api;
pub mod config;
pub mod datastore;
pub mod event;
pub mod keys;
pub mod logging;
pub mod migrations;
pub mod query;
pub mod reader;
pub mod storage;
pub mod writer;

pub use config::DatastoreConfig;
pub use datastore::Datastore;
pub use error::{DatabaseError, DatastoreError, MigrationError, Result};
pub use event::{DbEvent, Model};
pub use keys::{CollectionField, Fqfield, Fqid};
pub use types::{DeletedModelsBehaviour, Id, MigrationIndex, Position, Record};
