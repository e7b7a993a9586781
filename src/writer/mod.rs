//! Write path.
//!
//! A batch of requests commits in one immediate transaction. Writes are
//! serialised by a process-wide lock that the migration handler shares, so
//! a finalization never interleaves with a write.

pub mod ephemeral;
pub mod executor;
pub mod locks;
pub mod requests;
pub mod translator;

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::info;

use crate::error::{DatastoreError, Result};
use crate::storage::{schema, sqlite, ConnectionPool};
use crate::types::{Id, MigrationIndex, Position};

pub use ephemeral::EphemeralOutcome;
pub use executor::{MigrationIndexSource, WriteOutcome};
pub use requests::{
    FilteredLock, ListFieldsUpdate, LockValue, RequestEvent, ReserveIdsRequest,
    ReserveIdsResponse, WriteBody, WriteRequest, WriteResult,
};

/// Lock held for the duration of every write and every migration step.
pub type WriterLock = Arc<ReentrantMutex<()>>;

#[derive(Clone)]
pub struct Writer {
    pool: Arc<ConnectionPool>,
    lock: WriterLock,
    development_mode: bool,
}

impl Writer {
    pub fn new(pool: Arc<ConnectionPool>, lock: WriterLock, development_mode: bool) -> Self {
        Self {
            pool,
            lock,
            development_mode,
        }
    }

    /// Apply `requests` in order, atomically. One position per request.
    pub fn write(&self, requests: &[WriteRequest]) -> Result<WriteResult> {
        self.write_batch(requests, MigrationIndexSource::Request)
    }

    /// Append a model migration's events at `migration_index` and stamp
    /// every position with it. Both happen in one transaction, so the log
    /// never carries two indices.
    pub(crate) fn write_model_migration(
        &self,
        request: Option<&WriteRequest>,
        migration_index: MigrationIndex,
    ) -> Result<Option<Position>> {
        let _guard = self.lock.lock();
        self.pool.write(|conn| {
            let position = match request {
                Some(request) => Some(
                    executor::execute(conn, request, MigrationIndexSource::Forced(migration_index))?
                        .position,
                ),
                None => None,
            };
            sqlite::set_migration_index(conn, migration_index)?;
            Ok(position)
        })
    }

    fn write_batch(&self, requests: &[WriteRequest], source: MigrationIndexSource) -> Result<WriteResult> {
        if requests.is_empty() {
            return Err(DatastoreError::InvalidFormat(
                "A write needs at least one request".into(),
            ));
        }
        let _guard = self.lock.lock();
        self.pool.write(|conn| {
            let mut result = WriteResult::default();
            for request in requests {
                let outcome = executor::execute(conn, request, source)?;
                result.positions.push(outcome.position);
                result.modified_fqfields.extend(outcome.modified_fqfields);
            }
            Ok(result)
        })
    }

    /// Reserve `amount` fresh ids of a collection. Like
    /// [`Writer::write_without_events`] this does not take the writer lock.
    pub fn reserve_ids(&self, request: &ReserveIdsRequest) -> Result<ReserveIdsResponse> {
        crate::keys::assert_collection(&request.collection)?;
        if !(1..=ReserveIdsRequest::MAX_AMOUNT).contains(&request.amount) {
            return Err(DatastoreError::InvalidFormat(format!(
                "Amount must be between 1 and {}, got {}",
                ReserveIdsRequest::MAX_AMOUNT,
                request.amount
            )));
        }
        let next: Id = self.pool.write(|conn| {
            sqlite::advance_id_sequence(conn, &request.collection, request.amount)
        })?;
        Ok(ReserveIdsResponse {
            ids: (next - request.amount..next).collect(),
        })
    }

    pub fn write_without_events(&self, requests: &[WriteRequest]) -> Result<EphemeralOutcome> {
        let request = ephemeral::validate(requests)?;
        self.pool.write(|conn| ephemeral::execute(conn, request))
    }

    /// Null out `information` on every position.
    pub fn delete_history_information(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let cleared = self.pool.write(sqlite::clear_information)?;
        info!(positions = cleared, "deleted history information");
        Ok(())
    }

    /// Empty every table. Only available in development mode.
    pub fn truncate_db(&self) -> Result<()> {
        if !self.development_mode {
            return Err(DatastoreError::InvalidRequest(
                "truncate_db is only available in development mode".into(),
            ));
        }
        let _guard = self.lock.lock();
        self.pool.write(schema::truncate_all)?;
        info!("truncated datastore");
        Ok(())
    }

    pub(crate) fn lock(&self) -> &WriterLock {
        &self.lock
    }
}
