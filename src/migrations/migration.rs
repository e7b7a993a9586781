//! Migration step definitions.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{MigrationError, Result};
use crate::event::{DbEvent, Model};
use crate::keys::Fqid;
use crate::query::Filter;
use crate::types::{AggregateType, Id, MigrationIndex, PositionData, Record};
use crate::writer::RequestEvent;

use super::keyframes::KeyframeAccessor;

// ============================================================================
// Event migrations
// ============================================================================

/// What an event migration sees while translating one position.
pub struct MigrationContext<'a> {
    /// State at the end of the previous position under the source index,
    /// advanced through the events already handled at this position.
    pub old: &'a dyn KeyframeAccessor,
    /// Same, under the target index.
    pub new: &'a dyn KeyframeAccessor,
    pub position: &'a PositionData,
    /// Source events of the position, creates first.
    pub events: &'a [DbEvent],
}

impl MigrationContext<'_> {
    /// Whether `fqid` is alive once this position is applied: it either is
    /// alive now and not deleted here, or it is created here.
    pub fn will_exist(&self, fqid: &Fqid) -> Result<bool> {
        let mut created = false;
        let mut deleted = false;
        for event in self.events.iter().filter(|e| e.fqid() == fqid) {
            match event {
                DbEvent::Create { .. } => created = true,
                DbEvent::Delete { .. } => deleted = true,
                _ => {}
            }
        }
        if created {
            return Ok(true);
        }
        Ok(!deleted && self.new.model_not_deleted(fqid)?)
    }

    pub fn get_old(&self, fqid: &Fqid) -> Result<Model> {
        self.old.get(fqid)
    }

    pub fn get_new(&self, fqid: &Fqid) -> Result<Model> {
        self.new.get(fqid)
    }
}

/// Rewrites events one position at a time.
///
/// Instances are reused across positions; `position_init` runs before the
/// first event of every position and is the place to reset per-position
/// state.
pub trait EventMigration: Send {
    fn target_migration_index(&self) -> MigrationIndex;

    fn position_init(&mut self, _ctx: &MigrationContext<'_>) -> Result<()> {
        Ok(())
    }

    /// `None` keeps the event unchanged; a list replaces it, possibly with
    /// nothing.
    fn migrate_event(
        &mut self,
        event: &DbEvent,
        ctx: &MigrationContext<'_>,
    ) -> Result<Option<Vec<DbEvent>>>;

    /// Events appended after every migrated event of the position.
    fn get_additional_events(&mut self, _ctx: &MigrationContext<'_>) -> Result<Option<Vec<DbEvent>>> {
        Ok(None)
    }
}

// ============================================================================
// Model migrations
// ============================================================================

/// Read view handed to model migrations. Only live models are visible.
pub trait MigrationReader {
    fn get(&self, fqid: &Fqid, mapped_fields: &[String]) -> Result<Record>;

    /// Missing fqids are left out of the result.
    fn get_many(&self, fqids: &[Fqid], mapped_fields: &[String]) -> Result<BTreeMap<Fqid, Record>>;

    fn get_all(&self, collection: &str, mapped_fields: &[String]) -> Result<BTreeMap<Id, Record>>;

    fn filter(
        &self,
        collection: &str,
        filter: &Filter,
        mapped_fields: &[String],
    ) -> Result<BTreeMap<Id, Record>>;

    fn exists(&self, collection: &str, filter: &Filter) -> Result<bool>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<i64>;

    fn min(&self, collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> Result<Value>;

    fn max(&self, collection: &str, filter: &Filter, field: &str, aggregate_type: AggregateType) -> Result<Value>;

    fn is_alive(&self, fqid: &Fqid) -> Result<bool>;
}

/// Rewrites materialized models after every event migration is finalized.
pub trait ModelMigration: Send {
    fn target_migration_index(&self) -> MigrationIndex;

    /// Write events to apply, in order, or `None` for no change.
    fn migrate_models(&mut self, reader: &dyn MigrationReader) -> Result<Option<Vec<RequestEvent>>>;
}

// ============================================================================
// Migration chain
// ============================================================================

pub enum Migration {
    Event(Box<dyn EventMigration>),
    Model(Box<dyn ModelMigration>),
}

impl Migration {
    pub fn event(migration: impl EventMigration + 'static) -> Self {
        Migration::Event(Box::new(migration))
    }

    pub fn model(migration: impl ModelMigration + 'static) -> Self {
        Migration::Model(Box::new(migration))
    }

    pub fn target_migration_index(&self) -> MigrationIndex {
        match self {
            Migration::Event(m) => m.target_migration_index(),
            Migration::Model(m) => m.target_migration_index(),
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Migration::Event(_))
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_event() { "Event" } else { "Model" };
        write!(f, "{kind}({})", self.target_migration_index())
    }
}

/// Registered steps split by kind. Targets are consecutive from 2 and all
/// event steps come before the model steps.
#[derive(Default)]
pub struct MigrationChain {
    pub events: Vec<Box<dyn EventMigration>>,
    pub models: Vec<Box<dyn ModelMigration>>,
}

impl MigrationChain {
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        let mut chain = MigrationChain::default();
        for (i, migration) in migrations.into_iter().enumerate() {
            let expected = i as MigrationIndex + 2;
            let target = migration.target_migration_index();
            if target != expected {
                return Err(MigrationError::Setup(format!(
                    "Migration targets must be consecutive from 2: expected {expected}, got {target}"
                ))
                .into());
            }
            match migration {
                Migration::Event(m) if chain.models.is_empty() => chain.events.push(m),
                Migration::Event(_) => {
                    return Err(MigrationError::Setup(format!(
                        "Event migration to {target} follows a model migration"
                    ))
                    .into())
                }
                Migration::Model(m) => chain.models.push(m),
            }
        }
        Ok(chain)
    }

    /// Index every position has once all steps ran.
    pub fn target_migration_index(&self) -> MigrationIndex {
        (self.events.len() + self.models.len()) as MigrationIndex + 1
    }

    /// Index the event phase ends at.
    pub fn event_target_migration_index(&self) -> MigrationIndex {
        self.events.len() as MigrationIndex + 1
    }

    /// Step migrating from `from` to `from + 1`.
    pub fn event_step(&mut self, from: MigrationIndex) -> Option<&mut Box<dyn EventMigration>> {
        usize::try_from(from - 1).ok().and_then(|i| self.events.get_mut(i))
    }

    /// Model steps with a target above `current`, ascending.
    pub fn model_steps_after(
        &mut self,
        current: MigrationIndex,
    ) -> impl Iterator<Item = &mut Box<dyn ModelMigration>> + '_ {
        self.models
            .iter_mut()
            .filter(move |m| m.target_migration_index() > current)
    }
}
