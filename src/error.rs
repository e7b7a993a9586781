use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::types::{MigrationIndex, Position};

// ---------------------------------------------------------------------------
// DatabaseError
// ---------------------------------------------------------------------------

/// Failures raised by the persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("Timed out after {0} ms waiting for a database connection")]
    PoolTimeout(u64),

    #[error("Corrupt JSON in table \"{table}\": {source}")]
    Corruption {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DatabaseError {
    /// Connection-level failures that carry no statement-level cause and may
    /// succeed when the whole operation is retried.
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            DatabaseError::PoolTimeout(_) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// MigrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration setup: {0}")]
    Setup(String),

    #[error(
        "The datastore has migration index {datastore}, \
         but the registered migrations only reach {target}"
    )]
    MismatchingMigrationIndices {
        datastore: MigrationIndex,
        target: MigrationIndex,
    },

    #[error("Unknown migration command: {0}")]
    InvalidCommand(String),

    #[error("Migration to index {migration_index} failed at position {position}: {source}")]
    Failed {
        position: Position,
        migration_index: MigrationIndex,
        #[source]
        source: Box<DatastoreError>,
    },
}

// ---------------------------------------------------------------------------
// DatastoreError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model \"{fqid}\" does not exist")]
    ModelDoesNotExist { fqid: String },

    #[error("Model \"{fqid}\" already exists")]
    ModelExists { fqid: String },

    #[error("Model \"{fqid}\" is not deleted")]
    ModelNotDeleted { fqid: String },

    #[error("Locked keys were modified: {}", keys.join(", "))]
    ModelLocked { keys: Vec<String> },

    #[error("Invalid datastore state: {0}")]
    InvalidDatastoreState(String),

    #[error("Datastore is not empty: {0}")]
    DatastoreNotEmpty(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for DatastoreError {
    fn from(err: rusqlite::Error) -> Self {
        DatastoreError::Database(DatabaseError::Sqlite(err))
    }
}

impl DatastoreError {
    pub fn model_does_not_exist(fqid: impl Into<String>) -> Self {
        DatastoreError::ModelDoesNotExist { fqid: fqid.into() }
    }

    pub fn model_exists(fqid: impl Into<String>) -> Self {
        DatastoreError::ModelExists { fqid: fqid.into() }
    }

    pub fn model_not_deleted(fqid: impl Into<String>) -> Self {
        DatastoreError::ModelNotDeleted { fqid: fqid.into() }
    }

    /// Contractual wire code. `None` for internal failures, which map to a
    /// server error instead of a client error body.
    pub fn code(&self) -> Option<u8> {
        match self {
            DatastoreError::InvalidFormat(_) => Some(1),
            DatastoreError::InvalidRequest(_) => Some(2),
            DatastoreError::ModelDoesNotExist { .. } => Some(3),
            DatastoreError::ModelExists { .. } => Some(4),
            DatastoreError::ModelNotDeleted { .. } => Some(5),
            DatastoreError::ModelLocked { .. } => Some(6),
            DatastoreError::InvalidDatastoreState(_) => Some(7),
            DatastoreError::DatastoreNotEmpty(_) => Some(8),
            DatastoreError::Migration(MigrationError::InvalidCommand(_)) => Some(2),
            DatastoreError::Migration(MigrationError::MismatchingMigrationIndices { .. }) => {
                Some(7)
            }
            DatastoreError::Migration(_)
            | DatastoreError::Database(_)
            | DatastoreError::Internal(_) => None,
        }
    }

    pub fn type_verbose(&self) -> &'static str {
        match self.code() {
            Some(1) => "INVALID_FORMAT",
            Some(2) => "INVALID_REQUEST",
            Some(3) => "MODEL_DOES_NOT_EXIST",
            Some(4) => "MODEL_EXISTS",
            Some(5) => "MODEL_NOT_DELETED",
            Some(6) => "MODEL_LOCKED",
            Some(7) => "INVALID_DATASTORE_STATE",
            Some(8) => "DATASTORE_NOT_EMPTY",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.code().is_some()
    }

    /// Render the `{"error": {...}}` body returned by the request surfaces.
    pub fn to_error_body(&self) -> Value {
        let mut error = Map::new();
        if let Some(code) = self.code() {
            error.insert("type".into(), json!(code));
        }
        error.insert("type_verbose".into(), json!(self.type_verbose()));
        error.insert("msg".into(), json!(self.to_string()));
        match self {
            DatastoreError::ModelDoesNotExist { fqid }
            | DatastoreError::ModelExists { fqid }
            | DatastoreError::ModelNotDeleted { fqid } => {
                error.insert("fqid".into(), json!(fqid));
            }
            DatastoreError::ModelLocked { keys } => {
                error.insert("keys".into(), json!(keys));
            }
            _ => {}
        }
        json!({ "error": Value::Object(error) })
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatastoreError::Database(db) if db.is_transient())
    }
}

/// The default error type is `DatastoreError`.
pub type Result<T, E = DatastoreError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
