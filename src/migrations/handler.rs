//! Drives a registered migration chain against the datastore.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{DatastoreError, MigrationError, Result};
use crate::reader::Reader;
use crate::storage::{sqlite, ConnectionPool, EventTable};
use crate::types::{MigrationIndex, Position};
use crate::writer::{WriteRequest, Writer};

use super::event_migrater::migrate_position;
use super::migration::{Migration, MigrationChain};
use super::reader::DatabaseMigrationReader;

// ============================================================================
// State and stats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    NoMigrationRequired,
    MigrationRequired,
    FinalizationRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub status: MigrationState,
    /// `None` for an empty datastore.
    pub current_migration_index: Option<MigrationIndex>,
    pub target_migration_index: MigrationIndex,
    pub positions: i64,
    pub events: i64,
    pub partially_migrated_positions: i64,
    pub fully_migrated_positions: i64,
}

/// Commands accepted by [`MigrationHandler::execute_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    Migrate,
    Finalize,
    Reset,
    ClearCollectionfieldTables,
    Stats,
}

impl std::str::FromStr for MigrationCommand {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "migrate" => Ok(MigrationCommand::Migrate),
            "finalize" => Ok(MigrationCommand::Finalize),
            "reset" => Ok(MigrationCommand::Reset),
            "clear-collectionfield-tables" => Ok(MigrationCommand::ClearCollectionfieldTables),
            "stats" => Ok(MigrationCommand::Stats),
            other => Err(MigrationError::InvalidCommand(other.to_string()).into()),
        }
    }
}

// ============================================================================
// MigrationHandler
// ============================================================================

pub struct MigrationHandler {
    pool: Arc<ConnectionPool>,
    reader: Reader,
    writer: Writer,
    chain: Mutex<MigrationChain>,
    batch_size: usize,
}

impl MigrationHandler {
    pub fn new(pool: Arc<ConnectionPool>, reader: Reader, writer: Writer, batch_size: usize) -> Self {
        Self {
            pool,
            reader,
            writer,
            chain: Mutex::new(MigrationChain::default()),
            batch_size: batch_size.max(1),
        }
    }

    /// Replace the registered chain.
    pub fn register_migrations(&self, migrations: Vec<Migration>) -> Result<()> {
        let chain = MigrationChain::new(migrations)?;
        info!(
            target_migration_index = chain.target_migration_index(),
            event_migrations = chain.events.len(),
            model_migrations = chain.models.len(),
            "registered migrations"
        );
        *self.chain.lock() = chain;
        Ok(())
    }

    pub fn target_migration_index(&self) -> MigrationIndex {
        self.chain.lock().target_migration_index()
    }

    /// Current index of the datastore, rejecting one above the chain's
    /// target.
    fn checked_migration_index(&self, target: MigrationIndex) -> Result<Option<MigrationIndex>> {
        let current = self.pool.read(sqlite::current_migration_index)?;
        match current {
            Some(datastore) if datastore > target => {
                Err(MigrationError::MismatchingMigrationIndices { datastore, target }.into())
            }
            other => Ok(other),
        }
    }

    pub fn state(&self) -> Result<MigrationState> {
        let (target, event_target) = {
            let chain = self.chain.lock();
            (chain.target_migration_index(), chain.event_target_migration_index())
        };
        let Some(current) = self.checked_migration_index(target)? else {
            return Ok(MigrationState::NoMigrationRequired);
        };
        if current == target {
            return Ok(MigrationState::NoMigrationRequired);
        }
        if current >= event_target {
            return Ok(MigrationState::FinalizationRequired);
        }
        let pending = self
            .pool
            .read(|conn| sqlite::positions_to_migrate(conn, event_target, 0, 1))?;
        Ok(if pending.is_empty() {
            MigrationState::FinalizationRequired
        } else {
            MigrationState::MigrationRequired
        })
    }

    pub fn stats(&self) -> Result<MigrationStats> {
        let (target, event_target) = {
            let chain = self.chain.lock();
            (chain.target_migration_index(), chain.event_target_migration_index())
        };
        let status = self.state()?;
        self.pool.read(|conn| {
            let (partially, fully) = sqlite::migration_position_counts(conn, event_target)?;
            Ok(MigrationStats {
                status,
                current_migration_index: sqlite::current_migration_index(conn)?,
                target_migration_index: target,
                positions: sqlite::position_count(conn)?,
                events: sqlite::event_count(conn, EventTable::Events)?,
                partially_migrated_positions: partially,
                fully_migrated_positions: fully,
            })
        })
    }

    // ------------------------------------------------------------------------
    // Event phase
    // ------------------------------------------------------------------------

    /// Translate every position not yet at the event target into the
    /// shadow tables, one transaction per position. Returns the number of
    /// positions migrated by this call.
    pub fn migrate(&self) -> Result<usize> {
        let _guard = self.writer.lock().lock();
        let mut chain = self.chain.lock();
        let target = chain.target_migration_index();
        let event_target = chain.event_target_migration_index();
        let Some(current) = self.checked_migration_index(target)? else {
            return Ok(0);
        };
        if current >= event_target {
            return Ok(0);
        }

        info!(from = current, to = event_target, "migrating events");
        let mut migrated = 0;
        let mut after: Position = 0;
        loop {
            let batch = self.pool.read(|conn| {
                sqlite::positions_to_migrate(conn, event_target, after, self.batch_size)
            })?;
            let Some(&(last, _)) = batch.last() else {
                break;
            };
            for (position, source) in batch {
                self.pool
                    .write(|conn| migrate_position(conn, &mut chain, position, source, event_target))
                    .map_err(|err| MigrationError::Failed {
                        position,
                        migration_index: event_target,
                        source: Box::new(err),
                    })?;
                migrated += 1;
            }
            after = last;
            debug!(migrated, up_to = after, "migrated batch");
        }
        info!(positions = migrated, "event migration done");
        Ok(migrated)
    }

    // ------------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------------

    /// Finish the event phase, swap the shadow log in and run the model
    /// migrations.
    pub fn finalize(&self) -> Result<()> {
        let _guard = self.writer.lock().lock();
        self.migrate()?;

        let mut chain = self.chain.lock();
        let target = chain.target_migration_index();
        let event_target = chain.event_target_migration_index();
        let Some(mut current) = self.checked_migration_index(target)? else {
            return Ok(());
        };

        if current < event_target {
            self.pool.write(|conn| swap_in_migrated_events(conn, event_target))?;
            info!(migration_index = event_target, "swapped in migrated events");
            current = event_target;
        }

        for migration in chain.model_steps_after(current) {
            let step_target = migration.target_migration_index();
            let events = {
                let reader = DatabaseMigrationReader::new(&self.reader);
                migration.migrate_models(&reader)?
            };
            let request = events
                .filter(|events| !events.is_empty())
                .map(WriteRequest::new);
            let position = self
                .writer
                .write_model_migration(request.as_ref(), step_target)?;
            info!(migration_index = step_target, ?position, "model migration done");
        }

        info!(migration_index = target, "finalized migrations");
        Ok(())
    }

    /// Drop every shadow row. `events`, `models` and `positions` stay as
    /// they are.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.writer.lock().lock();
        self.pool.write(sqlite::clear_migration_data)?;
        info!("reset migration data");
        Ok(())
    }

    pub fn clear_collectionfield_tables(&self) -> Result<()> {
        let _guard = self.writer.lock().lock();
        self.pool.write(sqlite::clear_collectionfields)
    }

    /// Run a command by name and report its result as JSON.
    pub fn execute_command(&self, command: &str) -> Result<Value> {
        match command.parse::<MigrationCommand>()? {
            MigrationCommand::Migrate => {
                let migrated = self.migrate()?;
                Ok(json!({ "migrated_positions": migrated, "status": self.state()? }))
            }
            MigrationCommand::Finalize => {
                self.finalize()?;
                Ok(json!({ "status": self.state()? }))
            }
            MigrationCommand::Reset => {
                self.reset()?;
                Ok(json!({ "status": self.state()? }))
            }
            MigrationCommand::ClearCollectionfieldTables => {
                self.clear_collectionfield_tables()?;
                Ok(Value::Null)
            }
            MigrationCommand::Stats => Ok(serde_json::to_value(self.stats()?)
                .map_err(|e| DatastoreError::Internal(e.to_string()))?),
        }
    }
}

/// Replace `models` and the event log by the migrated state, in one
/// transaction.
fn swap_in_migrated_events(conn: &rusqlite::Connection, event_target: MigrationIndex) -> Result<()> {
    let max_position = sqlite::max_position(conn)?;
    let keyframe = sqlite::keyframe_id(conn, max_position, event_target)?.ok_or_else(|| {
        DatastoreError::InvalidDatastoreState(format!(
            "No keyframe for position {max_position} at migration index {event_target}"
        ))
    })?;
    let models = sqlite::load_models_from_keyframe(conn, keyframe)?;
    sqlite::rebuild_id_sequences(conn)?;
    sqlite::swap_event_tables(conn)?;
    sqlite::set_migration_index(conn, event_target)?;
    sqlite::clear_migration_data(conn)?;
    sqlite::clear_collectionfields(conn)?;
    debug!(models, "loaded models from final keyframe");
    Ok(())
}
