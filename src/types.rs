use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Monotonic write generation number. Strictly positive once assigned.
pub type Position = i64;

/// Numeric part of a fully-qualified id.
pub type Id = i64;

/// Global schema generation every position carries.
pub type MigrationIndex = i64;

/// A record body: unordered field name → JSON value.
pub type Record = Map<String, Value>;

/// Migration index assumed for the first write into an empty datastore that
/// does not bring its own.
pub const INITIAL_MIGRATION_INDEX: MigrationIndex = 1;

/// Which models a read returns with respect to their tombstone flag.
///
/// Encoded on the wire as `1 = NO_DELETED`, `2 = ONLY_DELETED`,
/// `3 = ALL_MODELS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeletedModelsBehaviour {
    #[default]
    NoDeleted,
    OnlyDeleted,
    AllModels,
}

impl DeletedModelsBehaviour {
    pub fn matches(self, deleted: bool) -> bool {
        match self {
            DeletedModelsBehaviour::NoDeleted => !deleted,
            DeletedModelsBehaviour::OnlyDeleted => deleted,
            DeletedModelsBehaviour::AllModels => true,
        }
    }
}

impl TryFrom<u8> for DeletedModelsBehaviour {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(DeletedModelsBehaviour::NoDeleted),
            2 => Ok(DeletedModelsBehaviour::OnlyDeleted),
            3 => Ok(DeletedModelsBehaviour::AllModels),
            other => Err(format!("invalid get_deleted_models value: {other}")),
        }
    }
}

impl From<DeletedModelsBehaviour> for u8 {
    fn from(value: DeletedModelsBehaviour) -> Self {
        match value {
            DeletedModelsBehaviour::NoDeleted => 1,
            DeletedModelsBehaviour::OnlyDeleted => 2,
            DeletedModelsBehaviour::AllModels => 3,
        }
    }
}

/// Type a `min`/`max` aggregate casts the field to before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    #[default]
    Int,
    Float,
    Text,
}

impl AggregateType {
    /// SQLite type name for `CAST(... AS <type>)`.
    pub fn sql_type(self) -> &'static str {
        match self {
            AggregateType::Int => "INTEGER",
            AggregateType::Float => "REAL",
            AggregateType::Text => "TEXT",
        }
    }
}

/// A row of the `positions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionData {
    pub position: Position,
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub user_id: i64,
    pub information: Option<Value>,
    pub migration_index: MigrationIndex,
}

/// One entry of a `history_information` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryInformation {
    pub position: Position,
    pub timestamp: f64,
    pub user_id: i64,
    pub information: Value,
}

impl From<PositionData> for HistoryInformation {
    fn from(value: PositionData) -> Self {
        Self {
            position: value.position,
            timestamp: value.timestamp,
            user_id: value.user_id,
            information: value.information.unwrap_or(Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
