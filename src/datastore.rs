//! Wires the pool, the read and write paths and the migration
//! handler together.

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::info;

use crate::config::DatastoreConfig;
use crate::error::Result;
use crate::migrations::{Migration, MigrationHandler};
use crate::reader::Reader;
use crate::storage::ConnectionPool;
use crate::writer::Writer;

pub struct Datastore {
    config: DatastoreConfig,
    pool: Arc<ConnectionPool>,
    reader: Reader,
    writer: Writer,
    migration_handler: MigrationHandler,
}

impl Datastore {
    /// Open (and create if needed) the database described by `config`.
    pub fn open(config: DatastoreConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool::open(&config)?);
        let reader = Reader::new(Arc::clone(&pool));
        let writer = Writer::new(
            Arc::clone(&pool),
            Arc::new(ReentrantMutex::new(())),
            config.development_mode,
        );
        let migration_handler = MigrationHandler::new(
            Arc::clone(&pool),
            reader.clone(),
            writer.clone(),
            config.migration_batch_size,
        );
        info!(
            path = config.database_path.as_deref().unwrap_or(":memory:"),
            development_mode = config.development_mode,
            "opened datastore"
        );
        Ok(Self {
            config,
            pool,
            reader,
            writer,
            migration_handler,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(DatastoreConfig::in_memory())
    }

    /// Open and register a migration chain in one go.
    pub fn with_migrations(config: DatastoreConfig, migrations: Vec<Migration>) -> Result<Self> {
        let datastore = Self::open(config)?;
        datastore.migration_handler.register_migrations(migrations)?;
        Ok(datastore)
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn migration_handler(&self) -> &MigrationHandler {
        &self.migration_handler
    }
}
