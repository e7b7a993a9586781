//! Online schema migration.
//!
//! Event migrations rewrite the log position by position into shadow
//! tables while the datastore keeps serving; finalization swaps the shadow
//! log in and then runs model migrations over the materialized state.

pub mod event_migrater;
pub mod handler;
pub mod keyframes;
pub mod memory;
pub mod migration;
pub mod reader;

pub use handler::{MigrationCommand, MigrationHandler, MigrationState, MigrationStats};
pub use keyframes::{
    DatabaseKeyframeModifier, InitialKeyframeModifier, KeyframeAccessor, KeyframeModifier,
};
pub use memory::MemoryMigrationHandler;
pub use migration::{
    EventMigration, Migration, MigrationChain, MigrationContext, MigrationReader, ModelMigration,
};
pub use reader::{DatabaseMigrationReader, MemoryMigrationReader};
