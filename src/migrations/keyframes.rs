//! Snapshots of all models at the end of a position under one migration
//! index.
//!
//! Two modifiers are used per migration step: the *old* one replays the
//! source events, the *new* one the translated events. Both start at the
//! end of the previous position and are moved to the current one when the
//! step is done. The very first position starts from an empty state.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{DatastoreError, Result};
use crate::event::{DbEvent, Model};
use crate::keys::Fqid;
use crate::storage::sqlite;
use crate::types::{Id, MigrationIndex, Position};

// ============================================================================
// Traits
// ============================================================================

/// Read access to a keyframe.
pub trait KeyframeAccessor {
    /// Raw model regardless of its deleted flag.
    fn get_model(&self, fqid: &Fqid) -> Result<Option<Model>>;

    /// Ids of every non-deleted model of `collection`.
    fn get_all_ids_for_collection(&self, collection: &str) -> Result<BTreeSet<Id>>;

    fn get(&self, fqid: &Fqid) -> Result<Model> {
        match self.get_model(fqid)? {
            Some(model) if !model.deleted => Ok(model),
            _ => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
        }
    }

    fn get_deleted(&self, fqid: &Fqid) -> Result<Model> {
        match self.get_model(fqid)? {
            Some(model) if model.deleted => Ok(model),
            Some(_) => Err(DatastoreError::model_not_deleted(fqid.to_string())),
            None => Err(DatastoreError::model_does_not_exist(fqid.to_string())),
        }
    }

    fn get_ignore_deleted(&self, fqid: &Fqid) -> Result<Model> {
        self.get_model(fqid)?
            .ok_or_else(|| DatastoreError::model_does_not_exist(fqid.to_string()))
    }

    fn model_exists(&self, fqid: &Fqid) -> Result<bool> {
        Ok(self.get_model(fqid)?.is_some())
    }

    fn model_not_deleted(&self, fqid: &Fqid) -> Result<bool> {
        Ok(self.get_model(fqid)?.is_some_and(|m| !m.deleted))
    }
}

/// A keyframe that can be advanced by one position.
pub trait KeyframeModifier: KeyframeAccessor {
    /// Apply `event` as part of the position this modifier moves to.
    fn apply_event(&mut self, event: &DbEvent) -> Result<()>;

    /// Persist the accumulated state as the keyframe of the current
    /// position. A no-op for modifiers that only live in memory.
    fn move_to_next_position(&mut self) -> Result<()>;

    fn as_accessor(&self) -> &dyn KeyframeAccessor;
}

// ============================================================================
// InitialKeyframeModifier
// ============================================================================

/// Starts from an empty state. With a connection it writes a brand new
/// keyframe on move; without one it only lives in memory.
pub struct InitialKeyframeModifier<'c> {
    conn: Option<&'c Connection>,
    position: Position,
    migration_index: MigrationIndex,
    models: BTreeMap<Fqid, Model>,
}

impl<'c> InitialKeyframeModifier<'c> {
    pub fn new(conn: Option<&'c Connection>, position: Position, migration_index: MigrationIndex) -> Self {
        Self {
            conn,
            position,
            migration_index,
            models: BTreeMap::new(),
        }
    }

    pub fn into_models(self) -> BTreeMap<Fqid, Model> {
        self.models
    }
}

impl KeyframeAccessor for InitialKeyframeModifier<'_> {
    fn get_model(&self, fqid: &Fqid) -> Result<Option<Model>> {
        Ok(self.models.get(fqid).cloned())
    }

    fn get_all_ids_for_collection(&self, collection: &str) -> Result<BTreeSet<Id>> {
        Ok(self
            .models
            .iter()
            .filter(|(fqid, model)| fqid.collection() == collection && !model.deleted)
            .map(|(fqid, _)| fqid.id())
            .collect())
    }
}

impl KeyframeModifier for InitialKeyframeModifier<'_> {
    fn apply_event(&mut self, event: &DbEvent) -> Result<()> {
        let before = self.models.remove(event.fqid());
        let after = event.apply(before, self.position)?;
        self.models.insert(event.fqid().clone(), after);
        Ok(())
    }

    fn move_to_next_position(&mut self) -> Result<()> {
        let Some(conn) = self.conn else {
            return Ok(());
        };
        if let Some(stale) = sqlite::keyframe_id(conn, self.position, self.migration_index)? {
            sqlite::delete_keyframe(conn, stale)?;
        }
        let id = sqlite::create_keyframe(conn, self.position, self.migration_index)?;
        for (fqid, model) in &self.models {
            sqlite::write_keyframe_model(conn, id, fqid, model)?;
        }
        debug!(
            position = self.position,
            migration_index = self.migration_index,
            models = self.models.len(),
            "created keyframe"
        );
        Ok(())
    }

    fn as_accessor(&self) -> &dyn KeyframeAccessor {
        self
    }
}

// ============================================================================
// DatabaseKeyframeModifier
// ============================================================================

/// Rooted at the stored keyframe of the previous position. Changes are
/// kept in a delta and written back on move when `persistent`.
pub struct DatabaseKeyframeModifier<'c> {
    conn: &'c Connection,
    keyframe_id: i64,
    position: Position,
    migration_index: MigrationIndex,
    persistent: bool,
    delta: BTreeMap<Fqid, Model>,
}

impl<'c> DatabaseKeyframeModifier<'c> {
    /// Open the keyframe `(previous_position, migration_index)` to advance
    /// it to `position`.
    pub fn open(
        conn: &'c Connection,
        previous_position: Position,
        position: Position,
        migration_index: MigrationIndex,
        persistent: bool,
    ) -> Result<Self> {
        let keyframe_id = sqlite::keyframe_id(conn, previous_position, migration_index)?
            .ok_or_else(|| {
                DatastoreError::InvalidDatastoreState(format!(
                    "No keyframe for position {previous_position} at migration index {migration_index}"
                ))
            })?;
        Ok(Self {
            conn,
            keyframe_id,
            position,
            migration_index,
            persistent,
            delta: BTreeMap::new(),
        })
    }
}

impl KeyframeAccessor for DatabaseKeyframeModifier<'_> {
    fn get_model(&self, fqid: &Fqid) -> Result<Option<Model>> {
        match self.delta.get(fqid) {
            Some(model) => Ok(Some(model.clone())),
            None => sqlite::keyframe_model(self.conn, self.keyframe_id, fqid),
        }
    }

    fn get_all_ids_for_collection(&self, collection: &str) -> Result<BTreeSet<Id>> {
        let mut ids: BTreeSet<Id> = sqlite::keyframe_collection_fqids(self.conn, self.keyframe_id, collection)?
            .into_iter()
            .filter(|(_, deleted)| !deleted)
            .map(|(fqid, _)| fqid.id())
            .collect();
        for (fqid, model) in self.delta.iter().filter(|(f, _)| f.collection() == collection) {
            if model.deleted {
                ids.remove(&fqid.id());
            } else {
                ids.insert(fqid.id());
            }
        }
        Ok(ids)
    }
}

impl KeyframeModifier for DatabaseKeyframeModifier<'_> {
    fn apply_event(&mut self, event: &DbEvent) -> Result<()> {
        let before = self.get_model(event.fqid())?;
        let after = event.apply(before, self.position)?;
        self.delta.insert(event.fqid().clone(), after);
        Ok(())
    }

    fn move_to_next_position(&mut self) -> Result<()> {
        if !self.persistent {
            return Ok(());
        }
        if let Some(stale) = sqlite::keyframe_id(self.conn, self.position, self.migration_index)? {
            if stale != self.keyframe_id {
                sqlite::delete_keyframe(self.conn, stale)?;
            }
        }
        sqlite::move_keyframe(self.conn, self.keyframe_id, self.position)?;
        for (fqid, model) in &self.delta {
            sqlite::write_keyframe_model(self.conn, self.keyframe_id, fqid, model)?;
        }
        debug!(
            position = self.position,
            migration_index = self.migration_index,
            changed = self.delta.len(),
            "moved keyframe"
        );
        Ok(())
    }

    fn as_accessor(&self) -> &dyn KeyframeAccessor {
        self
    }
}
